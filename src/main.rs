use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};

use polydb::{
    BackendConfig, Database, DatabaseOptions, Params, QueryResult, Record, SelectOptions,
};

#[derive(Parser)]
#[command(name = "polydb")]
#[command(author, version, about = "Run CRUD operations against a configured backend", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    backend: BackendArgs,

    /// Where connection failures are logged
    #[arg(long, env = "POLYDB_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BackendArgs {
    /// Driver identifier (mysql, pgsql, sqlite, sqlsrv, mongodb, redis)
    #[arg(long, default_value = "mysql", env = "POLYDB_DRIVER")]
    driver: String,

    #[arg(long, default_value = "localhost", env = "POLYDB_HOST")]
    host: String,

    /// Defaults to the driver's conventional port
    #[arg(long, env = "POLYDB_PORT")]
    port: Option<u16>,

    /// Database name, or file path for SQLite
    #[arg(long, default_value = "", env = "POLYDB_DATABASE")]
    database: String,

    #[arg(long, default_value = "", env = "POLYDB_USER")]
    user: String,

    #[arg(long, default_value = "", env = "POLYDB_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run literal SQL (relational drivers only)
    Query {
        sql: String,

        /// Named parameter as name=value
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Positional parameter, in order
        #[arg(short = 'a', long = "arg", conflicts_with = "params")]
        args: Vec<String>,
    },

    /// Select rows or documents
    Select {
        table: String,

        /// Condition as column=value
        #[arg(short = 'w', long = "where")]
        conditions: Vec<String>,

        /// Comma separated column list
        #[arg(long)]
        columns: Option<String>,

        /// ORDER BY text, e.g. "age DESC"
        #[arg(long)]
        order: Option<String>,

        #[arg(long)]
        limit: Option<u64>,

        #[arg(long)]
        offset: Option<u64>,
    },

    /// Insert one row or document
    Insert {
        table: String,

        /// Value as column=value
        #[arg(short = 's', long = "set", required = true)]
        values: Vec<String>,
    },

    /// Update matching rows or documents
    Update {
        table: String,

        #[arg(short = 's', long = "set", required = true)]
        values: Vec<String>,

        #[arg(short = 'w', long = "where", required = true)]
        conditions: Vec<String>,
    },

    /// Delete matching rows or documents
    Delete {
        table: String,

        #[arg(short = 'w', long = "where", required = true)]
        conditions: Vec<String>,
    },
}

/// JSON when it parses, plain text otherwise
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_pairs(pairs: &[String]) -> Result<Record> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("expected key=value, got '{}'", pair))?;
            Ok((key.trim().to_string(), parse_value(value)))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("polydb=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let mut config = BackendConfig::new(
        cli.backend.host,
        cli.backend.database,
        cli.backend.user,
        cli.backend.password,
    )
    .with_driver(cli.backend.driver);
    config.port = cli.backend.port;

    let mut options = DatabaseOptions::default();
    if let Some(path) = cli.log_file {
        options = options.log_path(path);
    }
    let db = Database::with_options(config, options);

    let output = match cli.command {
        Commands::Query { sql, params, args } => {
            let params = if !args.is_empty() {
                Params::Positional(args.iter().map(|a| parse_value(a)).collect())
            } else if !params.is_empty() {
                Params::Named(parse_pairs(&params)?)
            } else {
                Params::None
            };
            match db.raw_query(&sql, params).await? {
                QueryResult::Rows(rows) => json!(rows),
                QueryResult::Affected(count) => json!({ "affected": count }),
            }
        }
        Commands::Select {
            table,
            conditions,
            columns,
            order,
            limit,
            offset,
        } => {
            let options = SelectOptions {
                columns: columns
                    .map(|c| c.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_default(),
                order,
                limit,
                offset,
            };
            json!(db.select(&table, &parse_pairs(&conditions)?, &options).await?)
        }
        Commands::Insert { table, values } => {
            json!({ "id": db.insert(&table, &parse_pairs(&values)?).await? })
        }
        Commands::Update {
            table,
            values,
            conditions,
        } => {
            let count = db
                .update(&table, &parse_pairs(&values)?, &parse_pairs(&conditions)?)
                .await?;
            json!({ "affected": count })
        }
        Commands::Delete { table, conditions } => {
            let count = db.delete(&table, &parse_pairs(&conditions)?).await?;
            json!({ "affected": count })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
