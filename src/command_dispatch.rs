//! Purpose: Hold top-level CLI command dispatch for `colshm`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Each command prints exactly one JSON document on success.
//! Invariants: Read-only commands attach and never create a segment.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use colshm::api::{
    CatalogApiExt, Error, ErrorKind, LocalClient, MapOutcome, SegmentOptions, Table,
    ValidationStatus, to_exit_code,
};
use serde::Serialize;
use serde_json::{Value, json};

use super::{Cli, Command, RunOutcome, emit_json};

pub(super) fn dispatch_command(
    command: Command,
    dir: PathBuf,
    segment: String,
    capacity: u64,
) -> Result<RunOutcome, Error> {
    let client = LocalClient::new().with_segment_dir(&dir);
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "colshm", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Add { name, input } => {
            let table = Table::from_json(&read_input(&input)?)?;
            let mut catalog = client.open(&segment, SegmentOptions::new(capacity))?;
            let added = catalog.add_table(&name, &table)?;
            let entry = catalog.entry(&name)?;
            emit_json(json!({
                "segment": segment,
                "table": name,
                "added": added,
                "offset": entry.offset,
                "len": entry.len,
                "created": entry.created,
            }));
            Ok(RunOutcome::ok())
        }
        Command::Head { name, rows } => {
            let mut catalog = client.attach(&segment)?;
            let table = catalog.head(&name, rows)?;
            emit_json(json!({
                "table": name,
                "rows": table.row_count(),
                "data": table.to_json(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::GroupSum { name, group, sum } => {
            let mut catalog = client.attach(&segment)?;
            let sums = catalog.group_by_sum(&name, &group, &sum)?;
            emit_json(json!({
                "table": name,
                "groups": sums.rows.len(),
                "data": sums.into_table().to_json(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Map { name, column, mut op } => {
            let mut catalog = client.attach(&segment)?;
            let outcome = catalog.map_numeric_column(&name, &column, &mut op)?;
            let (status, dtype, elements) = match outcome {
                MapOutcome::Mapped { dtype, elements } => ("mapped", Some(dtype.name()), elements),
                MapOutcome::MissingColumn => ("missing_column", None, 0),
                MapOutcome::TextColumn => ("text_column", None, 0),
            };
            emit_json(json!({
                "table": name,
                "column": column,
                "op": op.name(),
                "status": status,
                "dtype": dtype,
                "elements": elements,
            }));
            Ok(RunOutcome::ok())
        }
        Command::List => {
            let catalog = client.attach(&segment)?;
            let tables = catalog
                .entries()
                .into_iter()
                .map(|entry| {
                    json!({
                        "name": entry.name,
                        "offset": entry.offset,
                        "len": entry.len,
                        "created": entry.created,
                    })
                })
                .collect::<Vec<_>>();
            emit_json(json!({ "segment": segment, "tables": tables }));
            Ok(RunOutcome::ok())
        }
        Command::Info => {
            emit_json(to_value(client.info(&segment)?)?);
            Ok(RunOutcome::ok())
        }
        Command::Validate => {
            let report = client.validate(&segment)?;
            let corrupt = report.status == ValidationStatus::Corrupt;
            emit_json(to_value(&report)?);
            if corrupt {
                return Ok(RunOutcome::with_code(to_exit_code(ErrorKind::Corrupt)));
            }
            Ok(RunOutcome::ok())
        }
        Command::Unlink => {
            client.unlink(&segment)?;
            emit_json(json!({ "segment": segment, "unlinked": true }));
            Ok(RunOutcome::ok())
        }
    }
}

fn to_value(value: impl Serialize) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode output")
            .with_source(err)
    })
}

fn read_input(input: &Path) -> Result<String, Error> {
    if input == Path::new("-") {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read stdin")
                .with_source(err)
        })?;
        return Ok(text);
    }
    std::fs::read_to_string(input).map_err(|err| {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::Permission,
            _ => ErrorKind::Io,
        };
        Error::new(kind)
            .with_message("failed to read table file")
            .with_path(input)
            .with_source(err)
    })
}
