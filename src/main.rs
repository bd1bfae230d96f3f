//! Purpose: `colshm` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All segment access goes through `api::LocalClient`.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use colshm::api::{
    Affine, DEFAULT_CAPACITY, Error, ErrorKind, Identity, Negate, NumericMap, to_exit_code,
};
use colshm::segment_paths::default_segment_dir;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `colshm --help`."));
            }
        },
    };

    let dir = cli.dir.unwrap_or_else(default_segment_dir);
    command_dispatch::dispatch_command(cli.command, dir, cli.segment, cli.capacity)
        .map_err(add_corrupt_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
}

#[derive(Parser)]
#[command(
    name = "colshm",
    version,
    about = "Columnar tables in a named shared-memory segment",
    long_about = None,
    after_help = r#"EXAMPLES
  $ colshm add sales sales.json
  $ colshm head sales -n 5
  $ colshm group-sum sales store amount
  $ colshm map sales amount scale=2
  $ colshm list

NOTES
  - Tables are JSON: {"columns": [{"name": "x", "dtype": "int64", "values": [1, 2]}]}
  - Default directory: $COLSHM_DIR, else /dev/shm, else the temp dir (override with --dir)"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Directory holding segment files",
        value_hint = ValueHint::DirPath
    )]
    dir: Option<PathBuf>,
    #[arg(long, global = true, default_value = "colshm", help = "Segment name")]
    segment: String,
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_CAPACITY,
        help = "Data capacity in bytes when the segment is created"
    )]
    capacity: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Store a JSON table under a name (no-op if the name exists)")]
    Add {
        name: String,
        #[arg(help = "Table JSON file, or - for stdin", value_hint = ValueHint::FilePath)]
        input: PathBuf,
    },
    #[command(about = "Show the first rows of a table")]
    Head {
        name: String,
        #[arg(short = 'n', long = "rows", default_value_t = 5)]
        rows: usize,
    },
    #[command(about = "Sum one int64 column per distinct value of another")]
    GroupSum {
        name: String,
        group: String,
        sum: String,
    },
    #[command(
        about = "Rewrite a numeric column in place",
        after_help = "OPS\n  identity | negate | scale=<k> | offset=<k>"
    )]
    Map {
        name: String,
        column: String,
        op: MapOp,
    },
    #[command(about = "List tables in the segment")]
    List,
    #[command(about = "Show segment capacity and usage")]
    Info,
    #[command(about = "Check segment frames and catalog entries")]
    Validate,
    #[command(about = "Remove the segment and its catalog")]
    Unlink,
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum MapOp {
    Identity,
    Negate,
    Scale(i64),
    Offset(i64),
}

impl MapOp {
    fn name(self) -> String {
        match self {
            MapOp::Identity => "identity".to_string(),
            MapOp::Negate => "negate".to_string(),
            MapOp::Scale(factor) => format!("scale={factor}"),
            MapOp::Offset(delta) => format!("offset={delta}"),
        }
    }
}

impl FromStr for MapOp {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parse = |raw: &str| {
            raw.parse::<i64>()
                .map_err(|_| format!("expected an integer, got {raw:?}"))
        };
        match value.split_once('=') {
            None if value == "identity" => Ok(MapOp::Identity),
            None if value == "negate" => Ok(MapOp::Negate),
            Some(("scale", raw)) => Ok(MapOp::Scale(parse(raw)?)),
            Some(("offset", raw)) => Ok(MapOp::Offset(parse(raw)?)),
            _ => Err(format!(
                "unknown op {value:?} (expected identity, negate, scale=<k>, or offset=<k>)"
            )),
        }
    }
}

impl NumericMap for MapOp {
    fn map_i64(&mut self, value: i64) -> i64 {
        match *self {
            MapOp::Identity => Identity.map_i64(value),
            MapOp::Negate => Negate.map_i64(value),
            MapOp::Scale(factor) => Affine::scale_by(factor).map_i64(value),
            MapOp::Offset(delta) => Affine::offset_by(delta).map_i64(value),
        }
    }

    fn map_f64(&mut self, value: f64) -> f64 {
        match *self {
            MapOp::Identity => Identity.map_f64(value),
            MapOp::Negate => Negate.map_f64(value),
            MapOp::Scale(factor) => Affine::scale_by(factor).map_f64(value),
            MapOp::Offset(delta) => Affine::offset_by(delta).map_f64(value),
        }
    }
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::NotFound => "not found",
        ErrorKind::UnsupportedColumnType => "unsupported column type",
        ErrorKind::ColumnNotFound => "column not found",
        ErrorKind::TypeMismatch => "type mismatch",
        ErrorKind::Corrupt => "corrupt data",
        ErrorKind::IndexOutOfRange => "index out of range",
        ErrorKind::OutOfMemory => "segment is full",
        ErrorKind::Busy => "resource is busy",
        ErrorKind::Permission => "permission denied",
        ErrorKind::Io => "i/o error",
    }
    .to_string()
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
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(column) = err.column() {
        inner.insert("column".to_string(), json!(column));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    if let Some(column) = err.column() {
        lines.push(format!("column: {column}"));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => err.with_hint(
            "Permission denied. Check directory permissions or use --dir to a writable location.",
        ),
        ErrorKind::Busy => err.with_hint("Segment is locked by another writer. Retry."),
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        ErrorKind::OutOfMemory => err.with_hint(
            "Segment capacity is fixed at creation. Unlink it and recreate with a larger --capacity.",
        ),
        _ => err,
    }
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Corrupt || err.hint().is_some() {
        return err;
    }
    err.with_hint("Segment appears corrupt. Run `colshm validate` or recreate it.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint("Unexpected internal failure. Retry with RUST_LOG=debug for details.")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Cli, MapOp};
    use clap::CommandFactory;
    use colshm::api::NumericMap;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn map_ops_parse() {
        assert_eq!("identity".parse::<MapOp>(), Ok(MapOp::Identity));
        assert_eq!("negate".parse::<MapOp>(), Ok(MapOp::Negate));
        assert_eq!("scale=-3".parse::<MapOp>(), Ok(MapOp::Scale(-3)));
        assert_eq!("offset=7".parse::<MapOp>(), Ok(MapOp::Offset(7)));
        assert!("scale=x".parse::<MapOp>().is_err());
        assert!("square".parse::<MapOp>().is_err());
    }

    #[test]
    fn op_dispatches_per_dtype() {
        let mut op = MapOp::Scale(2);
        assert_eq!(op.map_i64(21), 42);
        assert_eq!(op.map_f64(1.5), 3.0);
        let mut op = MapOp::Offset(-1);
        assert_eq!(op.map_i64(10), 9);
        assert_eq!(MapOp::Negate.name(), "negate");
    }

    #[test]
    fn op_names_echo_what_was_parsed() {
        for raw in ["identity", "negate", "scale=1", "scale=-3", "offset=0", "offset=7"] {
            let op = raw.parse::<MapOp>().expect("op");
            assert_eq!(op.name(), raw);
        }
    }
}
