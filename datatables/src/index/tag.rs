use std::collections::{BTreeSet, HashMap};

static EMPTY: BTreeSet<String> = BTreeSet::new();

/// Bidirectional mapping between pages and tags.
///
/// Tags are case-insensitive and stored lowercased. `all_tags` is never pruned:
/// a tag whose last page goes away is still reported there.
#[derive(Debug, Clone, Default)]
pub struct TagIndex {
    all_tags: BTreeSet<String>,
    page_to_tags: HashMap<String, BTreeSet<String>>,
    tag_to_pages: HashMap<String, BTreeSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every tag ever set, including ones with no pages left.
    pub fn all_tags(&self) -> &BTreeSet<String> {
        &self.all_tags
    }

    pub fn get_tags(&self, page: &str) -> &BTreeSet<String> {
        self.page_to_tags.get(page).unwrap_or(&EMPTY)
    }

    pub fn get_pages(&self, tag: &str) -> &BTreeSet<String> {
        self.tag_to_pages.get(&tag.to_lowercase()).unwrap_or(&EMPTY)
    }

    pub fn has(&self, tag: &str) -> bool {
        self.all_tags.contains(&tag.to_lowercase())
    }

    /// Replace the tags of `page`.
    pub fn set<I, S>(&mut self, page: &str, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags: BTreeSet<String> = tags.into_iter().map(|t| t.as_ref().to_lowercase()).collect();

        if let Some(current) = self.page_to_tags.get(page) {
            for tag in current.difference(&tags) {
                if let Some(pages) = self.tag_to_pages.get_mut(tag) {
                    pages.remove(page);
                }
            }
        }

        for tag in &tags {
            self.tag_to_pages
                .entry(tag.clone())
                .or_default()
                .insert(page.to_string());
            self.all_tags.insert(tag.clone());
        }

        self.page_to_tags.insert(page.to_string(), tags);
    }

    pub fn delete(&mut self, page: &str) {
        let Some(tags) = self.page_to_tags.remove(page) else {
            return;
        };
        for tag in &tags {
            if let Some(pages) = self.tag_to_pages.get_mut(tag) {
                pages.remove(page);
            }
        }
    }

    /// Move the tags of `old_page` to `new_page`.
    pub fn rename(&mut self, old_page: &str, new_page: &str) {
        let tags = self.page_to_tags.get(old_page).cloned().unwrap_or_default();
        self.delete(old_page);
        self.set(new_page, tags);
    }

    pub fn clear(&mut self) {
        self.all_tags.clear();
        self.page_to_tags.clear();
        self.tag_to_pages.clear();
    }
}
