//! Line-oriented administrative protocol.
//!
//! Commands are single `\r\n` terminated lines. Replies are either one
//! `OK ...` / `ERR ...` line or a block of rows closed by a line holding
//! only `.`.

use gearman_core::{GearmanError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Administrative commands understood by the job server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Status,
    Workers,
    Version,
    GetPid,
    Verbose,
    MaxQueue { function: String, size: i64 },
    Shutdown { graceful: bool },
    DropFunction(String),
    CreateFunction(String),
    ShowJobs,
    ShowUniqueJobs,
    CancelJob(String),
}

impl AdminCommand {
    /// Wire form including the trailing CRLF
    pub fn to_line(&self) -> String {
        format!("{}\r\n", self)
    }

    /// Whether the reply is a `.` terminated block rather than one line
    pub fn expects_block(&self) -> bool {
        matches!(
            self,
            AdminCommand::Status
                | AdminCommand::Workers
                | AdminCommand::ShowJobs
                | AdminCommand::ShowUniqueJobs
        )
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminCommand::Status => f.write_str("status"),
            AdminCommand::Workers => f.write_str("workers"),
            AdminCommand::Version => f.write_str("version"),
            AdminCommand::GetPid => f.write_str("getpid"),
            AdminCommand::Verbose => f.write_str("verbose"),
            AdminCommand::MaxQueue { function, size } => write!(f, "maxqueue {} {}", function, size),
            AdminCommand::Shutdown { graceful: true } => f.write_str("shutdown graceful"),
            AdminCommand::Shutdown { graceful: false } => f.write_str("shutdown"),
            AdminCommand::DropFunction(name) => write!(f, "drop function {}", name),
            AdminCommand::CreateFunction(name) => write!(f, "create function {}", name),
            AdminCommand::ShowJobs => f.write_str("show jobs"),
            AdminCommand::ShowUniqueJobs => f.write_str("show unique jobs"),
            AdminCommand::CancelJob(handle) => write!(f, "cancel job {}", handle),
        }
    }
}

/// One row of `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionStatus {
    pub function: String,
    pub total: u64,
    pub running: u64,
    pub available_workers: u64,
}

/// One row of `workers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub fd: String,
    pub ip_address: String,
    pub client_id: String,
    pub functions: Vec<String>,
}

/// One row of `show jobs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub handle: String,
    pub retries: u64,
    pub ignore_job: u64,
    pub job_queued: u64,
}

/// Whether an accumulated reply is complete for `command`.
pub fn reply_complete(command: &AdminCommand, raw: &str) -> bool {
    if raw.starts_with("ERR") || !command.expects_block() {
        return raw.ends_with('\n');
    }
    raw.lines().any(|line| line.trim_end_matches('\r') == ".")
}

/// Raise the server's `ERR ...` line as a protocol error.
pub fn check_server_error(raw: &str) -> Result<()> {
    if raw.starts_with("ERR") {
        return Err(GearmanError::Protocol(raw.trim_end().to_string()));
    }
    Ok(())
}

/// Accept any reply starting with `OK`.
pub fn expect_ok(raw: &str) -> Result<()> {
    if raw.starts_with("OK") {
        return Ok(());
    }
    check_server_error(raw)?;
    Err(unparsable(raw))
}

/// Tokens after `OK` in a single line reply; exactly `expected` of them.
pub fn ok_fields(raw: &str, expected: usize) -> Result<Vec<String>> {
    check_server_error(raw)?;

    let mut tokens = raw.trim().split(' ');
    if tokens.next() != Some("OK") {
        return Err(unparsable(raw));
    }

    let fields: Vec<String> = tokens.map(str::to_string).collect();
    if fields.len() != expected {
        return Err(GearmanError::Protocol(format!(
            "Unexpected number of values in response ({}): expected {}, got {}",
            raw.trim_end(),
            expected,
            fields.len()
        )));
    }
    Ok(fields)
}

/// Rows of a `.` terminated block
pub fn block_rows(raw: &str) -> Vec<&str> {
    raw.lines()
        .map(|line| line.trim_end_matches('\r'))
        .take_while(|line| *line != ".")
        .filter(|line| !line.trim().is_empty())
        .collect()
}

/// Tab separated fields of one row
pub fn tab_fields(row: &str) -> Vec<&str> {
    row.split('\t').collect()
}

/// Space separated tokens, ignoring runs of blanks
pub fn space_fields(segment: &str) -> Vec<&str> {
    segment.split_whitespace().collect()
}

/// Split a `workers` row at the ` :` separating the connection from its
/// function list. The connection part may hold IPv6 addresses, so the
/// separator is the colon that ends a space-delimited token.
pub fn colon_split(row: &str) -> Option<(&str, &str)> {
    let bytes = row.as_bytes();
    row.match_indices(':')
        .map(|(i, _)| i)
        .find(|&i| {
            let after_ok = i + 1 == bytes.len() || bytes[i + 1] == b' ';
            let before_ok = i == 0 || bytes[i - 1] == b' ';
            after_ok && before_ok
        })
        .map(|i| (&row[..i], &row[i + 1..]))
}

pub fn parse_status(raw: &str) -> Result<Vec<FunctionStatus>> {
    check_server_error(raw)?;
    block_rows(raw)
        .into_iter()
        .map(tab_fields)
        // An idle server reports a single empty-ish line; skip short rows
        .filter(|fields| fields.len() >= 4)
        .map(|fields| {
            Ok(FunctionStatus {
                function: fields[0].to_string(),
                total: number(fields[1])?,
                running: number(fields[2])?,
                available_workers: number(fields[3])?,
            })
        })
        .collect()
}

pub fn parse_workers(raw: &str) -> Result<Vec<WorkerInfo>> {
    check_server_error(raw)?;

    let mut workers = Vec::new();
    for row in block_rows(raw) {
        let (prefix, functions) = colon_split(row).ok_or_else(|| {
            GearmanError::Protocol(format!(
                "Malformed response line from server, expected colon: '{}'",
                row
            ))
        })?;

        let prefix = prefix.trim();
        let ids = space_fields(prefix);
        if ids.len() != 3 {
            return Err(GearmanError::Protocol(format!(
                "Malformed response line from server, expected three fields: '{}'",
                prefix
            )));
        }

        workers.push(WorkerInfo {
            fd: ids[0].to_string(),
            ip_address: ids[1].to_string(),
            client_id: ids[2].to_string(),
            functions: space_fields(functions).into_iter().map(str::to_string).collect(),
        });
    }
    Ok(workers)
}

pub fn parse_jobs(raw: &str) -> Result<Vec<JobInfo>> {
    check_server_error(raw)?;
    block_rows(raw)
        .into_iter()
        .map(tab_fields)
        .filter(|fields| fields.len() >= 4)
        .map(|fields| {
            Ok(JobInfo {
                handle: fields[0].to_string(),
                retries: number(fields[1])?,
                ignore_job: number(fields[2])?,
                job_queued: number(fields[3])?,
            })
        })
        .collect()
}

pub fn parse_unique_jobs(raw: &str) -> Result<Vec<String>> {
    check_server_error(raw)?;
    Ok(block_rows(raw)
        .into_iter()
        .map(|row| row.trim().to_string())
        .collect())
}

fn number(field: &str) -> Result<u64> {
    field.trim().parse().map_err(|_| {
        GearmanError::Protocol(format!("Expected an integer field, got '{}'", field))
    })
}

fn unparsable(raw: &str) -> GearmanError {
    if raw.is_empty() {
        GearmanError::Protocol("Failed to parse server response (no data received)".to_string())
    } else {
        GearmanError::Protocol(format!("Failed to parse server response ({})", raw.trim_end()))
    }
}
