use clap::{Parser, Subcommand, ValueEnum};
use datatables::schema::PropertyKind;
use datatables::Store;
use serde_json::json;
use std::process;

/// datatables CLI - inspect and edit a tagged markdown vault from the command line
#[derive(Parser)]
#[command(name = "datatables", version, about)]
struct Cli {
    /// Path to the vault (default: current directory)
    #[arg(long, default_value = ".")]
    vault_dir: String,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Index the vault and print a summary
    Index,

    /// List every tag seen, with its document count
    Tags,

    /// List documents carrying a tag
    Documents {
        /// Tag, with or without the leading '#'
        tag: String,
    },

    /// Resolve a link and print the indexed document
    Page {
        /// Link or path (e.g. "[[Launch]]")
        link: String,
        /// Path the link is resolved from
        #[arg(long, default_value = "")]
        from: String,
    },

    /// Inspect or edit the schema
    Schema {
        #[command(subcommand)]
        command: SchemaCommand,
    },

    /// Create or instantiate table templates
    Template {
        #[command(subcommand)]
        command: TemplateCommand,
    },
}

#[derive(Subcommand)]
enum SchemaCommand {
    /// Print the whole schema
    Show,
    /// List tables with their property names
    Tables,
    /// Add a table with a title property and a table view
    AddTable {
        /// Table tag (e.g. "#book")
        table: String,
    },
    /// Add a property with the next free default name
    AddProperty {
        /// Table tag
        table: String,
        /// text, number, select, date, checkbox, reference or title
        kind: String,
    },
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// Create an empty template for a table
    Create {
        /// Table tag
        table: String,
    },
    /// Copy a template into the items folder
    Instantiate {
        /// Table tag
        table: String,
        /// Template uuid
        uuid: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open(&cli.vault_dir).await?;
    let result = execute(&store, cli.command).await;
    store.close();

    print_output(&result?, &cli.format)
}

async fn execute(
    store: &Store,
    command: Command,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let value = match command {
        Command::Index => store.status(),

        Command::Tags => {
            let tags = store.index().with_tags(|tags| {
                tags.all_tags()
                    .iter()
                    .map(|tag| (tag.clone(), json!(tags.get_pages(tag).len())))
                    .collect::<serde_json::Map<_, _>>()
            });
            serde_json::Value::Object(tags)
        }

        Command::Documents { tag } => {
            let tag = datatables::document::normalize_tag(&tag);
            let documents = store.index().get_documents(&tag);
            serde_json::to_value(documents.iter().map(|d| d.as_ref()).collect::<Vec<_>>())?
        }

        Command::Page { link, from } => match store.index().page(&link, &from).await? {
            Some(document) => serde_json::to_value(document.as_ref())?,
            None => return Err(format!("No indexed document for link '{link}'").into()),
        },

        Command::Schema { command } => match command {
            SchemaCommand::Show => serde_json::to_value(store.schema().snapshot())?,

            SchemaCommand::Tables => {
                let schema = store.schema().snapshot();
                let tables: serde_json::Map<_, _> = schema
                    .tables
                    .iter()
                    .map(|(name, table)| {
                        let properties: Vec<_> =
                            table.properties.iter().map(|p| p.name.clone()).collect();
                        (name.clone(), json!(properties))
                    })
                    .collect();
                serde_json::Value::Object(tables)
            }

            SchemaCommand::AddTable { table } => {
                let table = store.schema().create_table(&table).await?;
                json!({ "ok": true, "table": table.name() })
            }

            SchemaCommand::AddProperty { table, kind } => {
                let kind: PropertyKind = kind.parse()?;
                let property = store.schema().table(&table)?.create_property(kind).await?;
                json!({ "ok": true, "property": property })
            }
        },

        Command::Template { command } => match command {
            TemplateCommand::Create { table } => {
                let option = store.schema().table(&table)?.create_template().await?;
                json!({ "ok": true, "template": option })
            }

            TemplateCommand::Instantiate { table, uuid } => {
                match store.schema().table(&table)?.instantiate_template(&uuid).await? {
                    Some(file) => json!({ "ok": true, "path": file.path }),
                    None => return Err(format!("Template does not exist: {uuid}").into()),
                }
            }
        },
    };

    Ok(value)
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
