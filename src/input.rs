//! Input line parsing: bare hostnames or structured enumeration records.
use serde::Deserialize;
use std::net::IpAddr;

use crate::error::{Result, ScanError};
use crate::types::Target;

#[derive(Debug, Deserialize)]
struct Record {
    name: String,
    #[serde(default)]
    addresses: Vec<Address>,
}

#[derive(Debug, Deserialize)]
struct Address {
    ip: String,
}

/// Parse one input line. Returns `Ok(None)` for blank lines.
///
/// In structured mode the line must be a JSON object with a `name` and an
/// `addresses` list whose first element carries an `ip`.
pub fn parse_line(line: &str, structured: bool) -> Result<Option<Target>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !structured {
        return Ok(Some(Target::new(line)));
    }

    let record: Record =
        serde_json::from_str(line).map_err(|e| ScanError::Input(format!("{e}: {line}")))?;
    let host = record.name.trim();
    if host.is_empty() {
        return Err(ScanError::Input(format!("empty name: {line}")));
    }
    let first = record
        .addresses
        .first()
        .ok_or_else(|| ScanError::Input(format!("no addresses for {host}")))?;
    let ip: IpAddr = first
        .ip
        .trim()
        .parse()
        .map_err(|_| ScanError::Input(format!("invalid ip {:?} for {host}", first.ip)))?;
    Ok(Some(Target::with_ip(host, ip)))
}
