use clap::{Parser, Subcommand, ValueEnum};
use restless::record::{parse_id, Record};
use restless::{Database, ExchangeFormat, StoreError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process;

/// restless CLI: inspect and edit a restless data directory
#[derive(Parser)]
#[command(name = "restless", version, about)]
struct Cli {
    /// Path to the data directory (default: current directory)
    #[arg(long, default_value = ".")]
    data_dir: String,

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

#[derive(Clone, Copy, ValueEnum)]
enum DataFormat {
    Json,
    Csv,
}

impl From<DataFormat> for ExchangeFormat {
    fn from(format: DataFormat) -> Self {
        match format {
            DataFormat::Json => ExchangeFormat::Json,
            DataFormat::Csv => ExchangeFormat::Csv,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// List stored collections
    Collections,

    /// Show registered schemas
    Schemas,

    /// Get a single record by id
    Get {
        /// Collection name
        collection: String,
        /// Record id
        id: String,
        /// Expand relations this many levels deep
        #[arg(long, default_value_t = 0)]
        expand: usize,
    },

    /// Query a collection
    List {
        /// Collection name
        collection: String,
        /// Query parameters (e.g. --param precio_gt=500 --param _sort=precio)
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },

    /// Insert a new record
    Insert {
        /// Collection name
        collection: String,
        /// Field values (e.g. --field nombre="Laptop" --field precio=1200)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Merge fields into an existing record
    Update {
        /// Collection name
        collection: String,
        /// Record id
        id: String,
        /// Field values to update (e.g. --field estado=enviado)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Replace an existing record
    Replace {
        /// Collection name
        collection: String,
        /// Record id
        id: String,
        /// The new record's fields
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Delete a record, applying relation policies
    Delete {
        /// Collection name
        collection: String,
        /// Record id
        id: String,
        /// Show what would be deleted without actually deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Check all stored records against their schemas
    Validate,

    /// Export every collection as JSON or CSV
    Export {
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<String>,
        /// Export format
        #[arg(long, default_value = "json")]
        format: DataFormat,
    },

    /// Replace every collection with the contents of an export
    Import {
        /// File produced by `export`
        file: String,
        /// Format of the file
        #[arg(long, default_value = "json")]
        format: DataFormat,
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
    let db = Database::open(&cli.data_dir)?;

    match cli.command {
        Command::Collections => {
            print_output(&json!(db.collections()), &cli.format)?;
        }

        Command::Schemas => {
            let schemas = db.schemas();
            let schemas: Vec<_> = schemas.iter().map(|s| s.as_ref()).collect();
            print_output(&serde_json::to_value(schemas)?, &cli.format)?;
        }

        Command::Get {
            collection,
            id,
            expand,
        } => {
            let record = db
                .get(&collection, &parse_id(&id), expand)
                .ok_or_else(|| not_found(&collection, &id))?;
            print_output(&Value::Object(record), &cli.format)?;
        }

        Command::List { collection, params } => {
            let param_map: HashMap<String, String> = params.into_iter().collect();
            let result = db.list_params(&collection, &param_map)?;
            print_output(&serde_json::to_value(result)?, &cli.format)?;
        }

        Command::Insert { collection, fields } => {
            let record = db.create(&collection, fields_to_record(&fields))?;
            print_output(&Value::Object(record), &cli.format)?;
        }

        Command::Update {
            collection,
            id,
            fields,
        } => {
            let record = db
                .patch(&collection, &parse_id(&id), &fields_to_record(&fields))?
                .ok_or_else(|| not_found(&collection, &id))?;
            print_output(&Value::Object(record), &cli.format)?;
        }

        Command::Replace {
            collection,
            id,
            fields,
        } => {
            let record = db
                .replace(&collection, &parse_id(&id), fields_to_record(&fields))?
                .ok_or_else(|| not_found(&collection, &id))?;
            print_output(&Value::Object(record), &cli.format)?;
        }

        Command::Delete {
            collection,
            id,
            dry_run,
        } => {
            let key = parse_id(&id);
            if dry_run {
                let record = db
                    .get(&collection, &key, 0)
                    .ok_or_else(|| not_found(&collection, &id))?;
                let dependents: Vec<Value> = db
                    .relations()
                    .dependents_of(&collection)
                    .into_iter()
                    .map(|d| json!({ "collection": d.collection, "field": d.field, "on_delete": d.on_delete }))
                    .collect();
                print_output(
                    &json!({
                        "dry_run": true,
                        "would_delete": { "collection": collection, "id": key },
                        "allowed": db.can_delete(&collection, &key),
                        "record": record,
                        "dependents": dependents,
                    }),
                    &cli.format,
                )?;
            } else if db.delete(&collection, &key)? {
                print_output(&json!({ "ok": true, "deleted": key }), &cli.format)?;
            } else {
                return Err(not_found(&collection, &id).into());
            }
        }

        Command::Validate => {
            let issues = db.validate_all();
            print_output(
                &json!({ "valid": issues.is_empty(), "issues": serde_json::to_value(&issues)? }),
                &cli.format,
            )?;
        }

        Command::Export { output, format } => {
            let content = db.export_as(format.into())?;
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .map_err(|e| format!("Failed to write export file '{path}': {e}"))?;
                    print_output(&json!({ "ok": true, "output": path }), &cli.format)?;
                }
                None => print!("{content}"),
            }
        }

        Command::Import { file, format } => {
            let content = std::fs::read_to_string(&file)
                .map_err(|e| format!("Failed to read import file '{file}': {e}"))?;
            db.import_from(&content, format.into())?;
            print_output(
                &json!({ "ok": true, "collections": db.collections() }),
                &cli.format,
            )?;
        }
    }

    Ok(())
}

fn not_found(collection: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn fields_to_record(fields: &[(String, String)]) -> Record {
    let mut record = Record::new();
    for (key, val) in fields {
        // Try to parse as JSON value (for numbers, booleans, arrays, objects)
        let json_val = serde_json::from_str(val).unwrap_or_else(|_| Value::String(val.clone()));
        record.insert(key.clone(), json_val);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("nombre=Ana=B").unwrap(),
            ("nombre".to_string(), "Ana=B".to_string())
        );
        assert!(parse_key_value("nombre").is_err());
    }

    #[test]
    fn test_export_import_format_flag() {
        let cli = Cli::try_parse_from(["restless", "export", "--format", "csv", "--output", "datos.csv"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Export { format: DataFormat::Csv, output: Some(_) }
        ));

        let cli = Cli::try_parse_from(["restless", "--format", "json", "import", "datos.json"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
        assert!(matches!(cli.command, Command::Import { format: DataFormat::Json, .. }));

        assert!(Cli::try_parse_from(["restless", "export", "--format", "yaml"]).is_err());
    }

    #[test]
    fn test_fields_to_record() {
        let record = fields_to_record(&[
            ("precio".into(), "1200".into()),
            ("activo".into(), "true".into()),
            ("nombre".into(), "Laptop".into()),
            ("tags".into(), "[\"a\"]".into()),
        ]);
        assert_eq!(Value::Object(record), json!({ "precio": 1200, "activo": true, "nombre": "Laptop", "tags": ["a"] }));
    }
}
