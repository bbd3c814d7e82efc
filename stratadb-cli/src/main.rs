use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;
use stratadb::config::parse_config;
use stratadb::document::ID_FIELD;
use stratadb::{ClientManager, Document, UpdateOutcome};

/// StrataDB CLI - query and edit layered document databases
#[derive(Parser)]
#[command(name = "stratadb", version, about)]
struct Cli {
    /// Path to the run configuration
    #[arg(long, default_value = "stratadb.yaml")]
    config: PathBuf,

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
    /// List configured databases
    Databases,

    /// List the collections of a database
    Collections {
        /// Database name
        database: String,
    },

    /// List a collection as merged across every loaded database
    List {
        /// Collection name
        collection: String,
    },

    /// Get one merged document by ID
    Get {
        /// Collection name
        collection: String,
        /// Document ID
        id: String,
    },

    /// Find the first document in one database matching every field
    Find {
        /// Database name
        database: String,
        /// Collection name
        collection: String,
        /// Field filters (e.g. --field status=active)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Insert a new document; the fields must include _id
    Insert {
        /// Database name
        database: String,
        /// Collection name
        collection: String,
        /// Field values (e.g. --field name="Alice Chen")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Merge fields into an existing document
    Update {
        /// Database name
        database: String,
        /// Collection name
        collection: String,
        /// Document ID
        id: String,
        /// Field values to update (e.g. --field status=done)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Create the document if it does not exist
        #[arg(long)]
        upsert: bool,
    },

    /// Delete a document
    Delete {
        /// Database name
        database: String,
        /// Collection name
        collection: String,
        /// Document ID
        id: String,
    },

    /// Write loaded databases back to storage
    Dump {
        /// Only dump this database
        database: Option<String>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut manager = ClientManager::connect(parse_config(&cli.config)?)?;
    log::info!(
        "Connected {} databases from {}",
        manager.databases().len(),
        cli.config.display()
    );

    match cli.command {
        Command::Databases => {
            let databases: Vec<Value> = manager
                .databases()
                .iter()
                .map(|db| {
                    json!({
                        "name": db.name,
                        "backend": db.backend,
                        "public": db.public,
                        "loaded": manager.is_loaded(&db.name),
                    })
                })
                .collect();
            print_output(&Value::Array(databases), &cli.format)?;
        }

        Command::Collections { database } => {
            let names = manager.collection_names(&database)?;
            print_output(&json!(names), &cli.format)?;
        }

        Command::List { collection } => {
            let docs = manager.all_documents(&collection)?;
            print_output(&documents_to_value(docs), &cli.format)?;
        }

        Command::Get { collection, id } => {
            let doc = manager
                .find_chained(&collection, &id)?
                .ok_or_else(|| format!("Document '{id}' not found in {collection}"))?;
            print_output(&Value::Object(doc), &cli.format)?;
        }

        Command::Find {
            database,
            collection,
            fields,
        } => {
            let filter = fields_to_document(&fields);
            let found = manager.find_one(&database, &collection, &filter)?;
            print_output(&found.map(Value::Object).unwrap_or(Value::Null), &cli.format)?;
        }

        Command::Insert {
            database,
            collection,
            fields,
        } => {
            let doc = fields_to_document(&fields);
            let id = doc
                .get(ID_FIELD)
                .and_then(Value::as_str)
                .ok_or("insert requires --field _id=<id>")?
                .to_string();
            manager.insert_one(&database, &collection, doc)?;
            dump_one(&mut manager, &database)?;
            print_output(&json!({ "ok": true, "id": id }), &cli.format)?;
        }

        Command::Update {
            database,
            collection,
            id,
            fields,
            upsert,
        } => {
            let mut filter = Document::new();
            filter.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            let update = fields_to_document(&fields);

            let outcome = manager.update_one(&database, &collection, &filter, &update, upsert)?;
            let result = match outcome {
                UpdateOutcome::Updated(_) => "updated",
                UpdateOutcome::Upserted(_) => "upserted",
                UpdateOutcome::NoMatch => "no_match",
            };
            if outcome != UpdateOutcome::NoMatch {
                dump_one(&mut manager, &database)?;
            }
            print_output(&json!({ "id": id, "result": result }), &cli.format)?;
        }

        Command::Delete {
            database,
            collection,
            id,
        } => {
            let deleted = manager.delete_one(&database, &collection, &id)?;
            if deleted {
                dump_one(&mut manager, &database)?;
            }
            print_output(&json!({ "ok": true, "deleted": deleted, "id": id }), &cli.format)?;
        }

        Command::Dump { database } => {
            let written = match database {
                Some(name) => dump_one(&mut manager, &name)?,
                None => manager.dump_all()?,
            };
            print_output(&paths_to_value(&written), &cli.format)?;
        }
    }

    Ok(())
}

fn dump_one(
    manager: &mut ClientManager,
    database: &str,
) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let config = manager
        .database(database)
        .cloned()
        .ok_or_else(|| format!("Unknown database '{database}'"))?;
    let written = manager.dump_database(&config)?;
    log::info!("Dumped '{database}' ({} files)", written.len());
    Ok(written)
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn fields_to_document(fields: &[(String, String)]) -> Document {
    let mut doc = Document::new();
    for (key, val) in fields {
        // Numbers, booleans, arrays and objects parse as JSON; anything else is a string.
        // _id is always a string.
        let json_val = if key == ID_FIELD {
            Value::String(val.clone())
        } else {
            serde_json::from_str(val).unwrap_or_else(|_| Value::String(val.clone()))
        };
        doc.insert(key.clone(), json_val);
    }
    doc
}

fn documents_to_value(docs: Vec<Document>) -> Value {
    Value::Array(docs.into_iter().map(Value::Object).collect())
}

fn paths_to_value(paths: &[PathBuf]) -> Value {
    Value::Array(
        paths
            .iter()
            .map(|path| Value::String(path.display().to_string()))
            .collect(),
    )
}
