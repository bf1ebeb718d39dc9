//! Distribuito CLI
//!
//! Command-line interface over a local data directory.

use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value as Json};
use tracing_subscriber::{fmt, EnvFilter};

use distribuito::schema::ColumnId;
use distribuito::{
    AllSegments, CompactionOutcome, Config, DistribuitoError, Engine, Row, Value, ValueType,
};

/// Distribuito CLI
#[derive(Parser, Debug)]
#[command(name = "distribuito")]
#[command(about = "Column-oriented storage engine")]
#[command(version)]
struct Args {
    /// Data directory (default: ./distribuito_data, or the config file's)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a table
    CreateTable {
        table: String,

        /// Declare a column as `name:type` (int64, float64, boolean, string, timestamp)
        #[arg(long = "column")]
        columns: Vec<String>,
    },

    /// Write rows given as a JSON array or newline-delimited JSON objects
    Write {
        table: String,

        /// Read rows from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Flush a table's buffered rows into a segment
    Flush { table: String },

    /// Print rows as newline-delimited JSON
    Read {
        table: String,

        /// Comma-separated column names (default: all)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },

    /// Compact a table with the configured strategy
    Compact { table: String },

    /// Print a table's columns
    Schema { table: String },

    /// Print a table's live segments with their statistics
    Segments { table: String },

    /// List tables
    Tables,
}

fn main() {
    // Initialize tracing/logging; stdout is reserved for command output
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,distribuito=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> distribuito::Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    // A one-shot process has no use for a background worker
    config.background_compaction = false;

    let engine = Engine::open(config)?;
    let mut out = BufWriter::new(io::stdout().lock());

    match args.command {
        Commands::CreateTable { table, columns } => {
            let columns = columns
                .iter()
                .map(|spec| parse_column_spec(spec))
                .collect::<distribuito::Result<Vec<_>>>()?;
            engine.create_table(&table, &columns)?;
            writeln!(out, "created {}", table)?;
        }
        Commands::Write { table, file } => {
            let text = match file {
                Some(path) => fs::read_to_string(path)?,
                None => {
                    let mut text = String::new();
                    io::stdin().read_to_string(&mut text)?;
                    text
                }
            };
            let rows = parse_rows(&text)?;
            let receipt = engine.open_or_create_table(&table)?.write(&rows)?;
            if let Some(e) = receipt.flush_error {
                return Err(e);
            }
            writeln!(out, "wrote {} rows", receipt.rows)?;
        }
        Commands::Flush { table } => match engine.flush(&table)? {
            Some(segment) => writeln!(
                out,
                "flushed segment {} ({} rows)",
                segment.id(),
                segment.row_count()
            )?,
            None => writeln!(out, "nothing to flush")?,
        },
        Commands::Read { table, columns } => {
            let handle = engine.table(&table)?;
            let schema = handle.schema_snapshot();
            let ids: Vec<ColumnId> = if columns.is_empty() {
                schema.columns().iter().map(|c| c.id).collect()
            } else {
                columns
                    .iter()
                    .map(|name| {
                        schema
                            .id_of(name)
                            .ok_or_else(|| DistribuitoError::UnknownColumn(name.clone()))
                    })
                    .collect::<distribuito::Result<_>>()?
            };
            let batch = handle.read(&ids, &AllSegments)?.into_batch()?;
            for row in batch.to_rows(&schema) {
                let object: Map<String, Json> = row
                    .iter()
                    .map(|(name, value)| (name.to_string(), value_to_json(value)))
                    .collect();
                writeln!(out, "{}", Json::Object(object))?;
            }
        }
        Commands::Compact { table } => match engine.compact_default(&table)? {
            CompactionOutcome::Skipped => writeln!(out, "nothing to compact")?,
            CompactionOutcome::Compacted { inputs, output } => writeln!(
                out,
                "merged segments {:?} into segment {} ({} rows)",
                inputs,
                output.id(),
                output.row_count()
            )?,
        },
        Commands::Schema { table } => {
            for (name, (id, value_type)) in engine.schema(&table)? {
                let line = json!({ "name": name, "id": id.0, "type": value_type.as_str() });
                writeln!(out, "{}", line)?;
            }
        }
        Commands::Segments { table } => {
            let schema = engine.table(&table)?.schema_snapshot();
            for segment in engine.segments(&table)? {
                let mut columns = Map::new();
                for id in segment.column_ids() {
                    let stats = segment.stats(id);
                    let name = schema
                        .get(id)
                        .map(|c| c.name.clone())
                        .unwrap_or_else(|| id.to_string());
                    columns.insert(
                        name,
                        json!({
                            "min": stats.min.as_ref().map(value_to_json),
                            "max": stats.max.as_ref().map(value_to_json),
                            "nulls": stats.null_count,
                        }),
                    );
                }
                let line = json!({
                    "id": segment.id(),
                    "rows": segment.row_count(),
                    "bytes": segment.file_size(),
                    "columns": columns,
                });
                writeln!(out, "{}", line)?;
            }
        }
        Commands::Tables => {
            for name in engine.tables() {
                writeln!(out, "{}", name)?;
            }
        }
    }

    out.flush()?;
    drop(out);
    engine.close()
}

/// `name:type`
fn parse_column_spec(spec: &str) -> distribuito::Result<(String, ValueType)> {
    let (name, ty) = spec.split_once(':').ok_or_else(|| {
        DistribuitoError::Config(format!("column '{}' must be written as name:type", spec))
    })?;
    let value_type: ValueType = ty.parse().map_err(DistribuitoError::Config)?;
    Ok((name.to_string(), value_type))
}

/// A JSON array of objects, or one object per line
fn parse_rows(text: &str) -> distribuito::Result<Vec<Row>> {
    let objects: Vec<Json> = if text.trim_start().starts_with('[') {
        serde_json::from_str(text).map_err(|e| DistribuitoError::Serialization(e.to_string()))?
    } else {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| DistribuitoError::Serialization(e.to_string()))
            })
            .collect::<distribuito::Result<_>>()?
    };

    objects
        .into_iter()
        .map(|object| match object {
            Json::Object(fields) => fields
                .into_iter()
                .map(|(name, value)| Ok((name, json_to_value(value)?)))
                .collect::<distribuito::Result<Row>>(),
            other => Err(DistribuitoError::Serialization(format!(
                "expected a JSON object per row, got {}",
                other
            ))),
        })
        .collect()
}

fn json_to_value(json: Json) -> distribuito::Result<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => Value::Float64(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(s),
        Json::Object(map) => match (map.len(), map.get("$ts").and_then(Json::as_i64)) {
            (1, Some(ts)) => Value::Timestamp(ts),
            _ => {
                return Err(DistribuitoError::Serialization(
                    "nested objects other than {\"$ts\": <i64>} are not supported".to_string(),
                ))
            }
        },
        Json::Array(_) => {
            return Err(DistribuitoError::Serialization(
                "array values are not supported".to_string(),
            ))
        }
    })
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Int64(i) => json!(i),
        Value::Float64(f) => json!(f),
        Value::Boolean(b) => json!(b),
        Value::String(s) => json!(s),
        Value::Timestamp(ts) => json!({ "$ts": ts }),
    }
}
