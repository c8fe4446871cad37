//! Purpose: `rdrs-dal` developer CLI for running primary-key reads against a fixture cluster.
//! Role: Binary crate root; parses args, drives `api::Dal`, emits JSON on stdout.
//! Invariants: Results print as `{"code":..,"body":..}`; errors print as JSON on stderr.
//! Invariants: Process exit code is derived from the HTTP-like status (200 0, 400 2, 404 3, else 1).
//! Invariants: Diagnostics go to stderr so stdout stays machine-readable.
use std::error::Error as StdError;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueHint};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use rdrs_dal::api::{
    DEFAULT_CONNECTION_STRING, Dal, DalConfig, Error, ErrorKind, MemoryCluster, MemoryConnector,
    NodeSelector, PkReadRequest, ReadOutcome, RequestBuilder, ResponseView,
};
use rdrs_dal::fixture::Fixture;

/// Response buffer size used by the REST layer.
const DEFAULT_BUFFER_SIZE: usize = 5 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(
    name = "rdrs-dal",
    version,
    about = "Run primary-key reads through the data-access layer",
    after_help = r#"EXAMPLES
  $ rdrs-dal --fixture shop.json read --db shop --table items --pk id=1
  $ rdrs-dal --fixture shop.json read --db shop --table items --pk id=1 --column label --op-id r1
  $ rdrs-dal --fixture shop.json batch --requests reads.json

NOTES
  - Without --fixture the cluster is empty and every table lookup fails.
  - RUST_LOG overrides --log-level."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_CONNECTION_STRING, help = "Management server connection string")]
    connect: String,
    #[arg(long = "find-node-id", global = true, help = "Claim a free API node id when connecting")]
    find_node_id: bool,
    #[arg(long, global = true, value_hint = ValueHint::FilePath, help = "JSON fixture with tables, rows and API node slots")]
    fixture: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = DEFAULT_BUFFER_SIZE, help = "Response buffer size in bytes")]
    buffer_size: usize,
    #[arg(long, global = true, default_value = "warn", help = "Log filter used when RUST_LOG is unset")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Read one row by its full primary key")]
    Read(ReadArgs),
    #[command(about = "Read a JSON array of requests over one leased session")]
    Batch {
        #[arg(long, value_hint = ValueHint::FilePath, help = "File holding [{db, table, filters, readColumns?, operationId?}]")]
        requests: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ReadArgs {
    #[arg(long)]
    db: String,
    #[arg(long)]
    table: String,
    #[arg(long = "pk", value_parser = parse_key_value, help = "Primary-key column and value as col=value (repeatable)")]
    pks: Vec<(String, String)>,
    #[arg(long = "column", help = "Column to return (repeatable); default is every non-key column")]
    columns: Vec<String>,
    #[arg(long = "op-id", help = "Operation id echoed in the response body")]
    op_id: Option<String>,
}

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            exit_code(err.http_code())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let connector = match &cli.fixture {
        Some(path) => Fixture::load(path)?.into_connector()?,
        None => MemoryConnector::default(),
    };
    let config = DalConfig {
        connection_string: cli.connect.clone(),
        find_available_node_id: cli.find_node_id,
    };
    let dal = Dal::init(&connector, &config, &mut NodeSelector::new())?;

    let code = match &cli.command {
        Command::Read(args) => run_read(&dal, args, cli.buffer_size)?,
        Command::Batch { requests } => run_batch(&dal, requests, cli.buffer_size)?,
    };
    dal.shutdown();
    Ok(code)
}

fn run_read(dal: &Dal<MemoryCluster>, args: &ReadArgs, buffer_size: usize) -> Result<i32, Error> {
    let mut builder = RequestBuilder::new(&args.db, &args.table);
    for (column, value) in &args.pks {
        builder = builder.pk(column, value);
    }
    for column in &args.columns {
        builder = builder.column(column);
    }
    if let Some(id) = &args.op_id {
        builder = builder.operation_id(id);
    }
    let request = builder.build();
    let mut response = vec![0u8; buffer_size];
    let outcome = dal.pk_read(&request, &mut response)?;
    let result = result_json(&response, outcome)?;
    println!("{result}");
    Ok(exit_code(outcome.http_code()))
}

fn run_batch(dal: &Dal<MemoryCluster>, path: &Path, buffer_size: usize) -> Result<i32, Error> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Client)
            .with_message(format!("failed to read requests {}", path.display()))
            .with_source(err)
    })?;
    let parsed: Vec<PkReadRequest> = serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Client)
            .with_message("requests file is not a JSON array of reads")
            .with_source(err)
    })?;

    let requests: Vec<Vec<u8>> = parsed.iter().map(|read| read.to_builder().build()).collect();
    let request_refs: Vec<&[u8]> = requests.iter().map(Vec::as_slice).collect();
    let mut responses: Vec<Vec<u8>> = vec![vec![0u8; buffer_size]; requests.len()];
    let mut response_refs: Vec<&mut [u8]> = responses.iter_mut().map(Vec::as_mut_slice).collect();
    let results = dal.pk_batch_read(&request_refs, &mut response_refs)?;

    let mut items = Vec::with_capacity(results.len());
    for (response, result) in responses.iter().zip(&results) {
        let item = match result {
            Ok(outcome) => result_json(response, *outcome)?,
            Err(err) => json!({
                "code": err.http_code(),
                "body": Value::Null,
                "error": error_json(err)["error"].clone(),
            }),
        };
        items.push(item);
    }
    let stats = serde_json::to_value(dal.stats()).map_err(|err| {
        Error::new(ErrorKind::Server)
            .with_message("failed to encode pool stats")
            .with_source(err)
    })?;
    println!("{}", json!({ "results": items, "stats": stats }));
    Ok(0)
}

fn result_json(response: &[u8], outcome: ReadOutcome) -> Result<Value, Error> {
    let view = ResponseView::new(response)?;
    let body = match outcome {
        ReadOutcome::Found => serde_json::from_str(&view.render_json()?).map_err(|err| {
            Error::new(ErrorKind::Server)
                .with_message("response body is not valid JSON")
                .with_source(err)
        })?,
        ReadOutcome::NotFound => Value::Null,
    };
    Ok(json!({ "code": view.status()?, "body": body }))
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((column, value)) if !column.is_empty() => Ok((column.to_string(), value.to_string())),
        _ => Err(format!("expected col=value, got {raw:?}")),
    }
}

fn exit_code(http_code: u32) -> i32 {
    match http_code {
        200 => 0,
        400 => 2,
        404 => 3,
        _ => 1,
    }
}

fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn emit_error(err: &Error) {
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Server\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Client => "bad request".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Server => "server error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(column) = err.column() {
        inner.insert("column".to_string(), json!(column));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    if let Some(native) = err.native_error() {
        inner.insert(
            "native".to_string(),
            json!({
                "code": native.code,
                "mysqlCode": native.mysql_code,
                "classification": format!("{:?}", native.classification),
                "status": format!("{:?}", native.status),
                "message": native.message,
            }),
        );
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}
