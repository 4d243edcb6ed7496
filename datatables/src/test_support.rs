// Test fixtures shared across modules

use crate::config::{CorruptionPolicy, Settings};
use crate::vault::{EventSink, MemoryVault};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Records every event that reaches the host emitter.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|(n, _)| n == name).count()
    }

    pub fn last(&self, name: &str) -> Option<Value> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, payload)| payload.clone())
    }
}

impl EventSink for RecordingSink {
    fn emit_without_lock(&self, event: &str, payload: &Value) {
        self.events.lock().push((event.to_string(), payload.clone()));
    }
}

/// A memory vault wired to a recording sink, with the default schema folder present.
pub fn memory_vault() -> (Arc<MemoryVault>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let vault = Arc::new(MemoryVault::with_sink(sink.clone()));
    vault.add_directory(&Settings::default().schema.folder);
    (vault, sink)
}

/// Settings that reject corruption instead of aborting, with a short debounce.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.persist.debounce_ms = 20;
    settings.persist.on_corruption = CorruptionPolicy::Reject;
    settings
}

pub const TASK_SCHEMA: &str = r##"{
  "version": 1,
  "tables": {
    "#task": {
      "properties": [
        { "uuid": "p-name", "name": "Name", "kind": "title", "config": {} },
        { "uuid": "p-done", "name": "Done", "kind": "checkbox", "config": {} }
      ],
      "views": [
        { "uuid": "v-all", "name": "Table", "kind": "table",
          "config": { "properties": [ { "uuid": "c-name", "field": "p-name" } ] } }
      ]
    }
  }
}"##;
