use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// One hostname to scan end-to-end, optionally with its address already known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub ip: Option<IpAddr>,
}

impl Target {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ip: None,
        }
    }

    pub fn with_ip(host: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            host: host.into(),
            ip: Some(ip),
        }
    }
}

/// Open ports recorded for one IP. Written once per IP for the lifetime of the process.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortScanEntry {
    pub ip: String,
    pub open_ports: Vec<u16>,
}

/// Everything captured from a single HTTP round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, Vec<String>>,
    pub raw_headers: Vec<u8>,
    pub raw: Vec<u8>,
    /// At most `probe::BODY_CAPTURE_LIMIT` bytes.
    pub body: Vec<u8>,
    pub content_length: u64,
    pub duration_ms: u64,
    pub words: usize,
    pub lines: usize,
}

impl ProbeResponse {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Technology {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub category: String,
}

impl Technology {
    pub fn new(name: &str, category: &str, version: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            version,
            category: category.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Infos {
    /// Hostname as it was read from input.
    pub data: String,
    pub ip: String,
    pub cname: Vec<String>,
    pub cdn: String,
    pub scheme: String,
    pub status_code: u16,
    pub content_type: String,
    pub content_length: u64,
    pub response_time_ms: u64,
    pub location: String,
    pub title: String,
    pub ports: Vec<u16>,
    pub screenshot: String,
    pub cert_vhost: Vec<String>,
    pub cert_issuer: String,
    pub technologies: Vec<Technology>,
}

/// One reachable host:port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanResult {
    pub url: String,
    pub infos: Infos,
    pub timestamp: String,
}
