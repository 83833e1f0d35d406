//! Library crate for web-recon-rs: CDN-aware port scanning, HTTP(S) probing
//! and page fingerprinting of many hosts at once.
pub mod cdn;
pub mod config;
pub mod dialer;
pub mod error;
pub mod fingerprint;
pub mod input;
pub mod logging;
pub mod orchestrator;
pub mod ports;
pub mod probe;
pub mod render;
pub mod report;
pub mod scanner;
pub mod types;

use ::time::{format_description::well_known, OffsetDateTime};

/// Current UTC time in RFC 3339.
pub fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
