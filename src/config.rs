use std::path::PathBuf;
use std::time::Duration;

use crate::ports;

/// Public resolvers used when none are configured.
pub const DEFAULT_RESOLVERS: [&str; 8] = [
    "8.8.8.8",
    "1.1.1.1",
    "64.6.64.6",
    "74.82.42.42",
    "1.0.0.1",
    "8.8.4.4",
    "64.6.65.6",
    "77.88.8.8",
];

/// Concurrent TCP connect attempts per target. Not user-configurable.
pub const PORT_SCAN_POOL: usize = 50;
/// Overall deadline of one HTTP request.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Overall deadline of one render session.
pub const RENDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Sizes of the three admission gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimits {
    pub targets: usize,
    pub scan_probes: usize,
    pub render_sessions: usize,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            targets: 5,
            scan_probes: PORT_SCAN_POOL,
            render_sessions: 5,
        }
    }
}

/// Run configuration shared by every stage.
#[derive(Debug, Clone)]
pub struct Options {
    pub proxy: Option<String>,
    pub ports: Vec<u16>,
    pub port_timeout: Duration,
    pub limits: ConcurrencyLimits,
    pub resolvers: Vec<String>,
    pub follow_redirect: bool,
    pub screenshot_dir: Option<PathBuf>,
    pub report: bool,
    pub structured_input: bool,
    pub probe_timeout: Duration,
    pub render_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            proxy: None,
            ports: ports::default_ports(),
            port_timeout: Duration::from_millis(1000),
            limits: ConcurrencyLimits::default(),
            resolvers: DEFAULT_RESOLVERS.iter().map(|r| r.to_string()).collect(),
            follow_redirect: false,
            screenshot_dir: None,
            report: false,
            structured_input: false,
            probe_timeout: PROBE_TIMEOUT,
            render_timeout: RENDER_TIMEOUT,
        }
    }
}

/// Split a comma-separated resolver list, falling back to the defaults when empty.
pub fn parse_resolvers(s: Option<&str>) -> Vec<String> {
    let list: Vec<String> = s
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(String::from)
        .collect();
    if list.is_empty() {
        DEFAULT_RESOLVERS.iter().map(|r| r.to_string()).collect()
    } else {
        list
    }
}
