use std::collections::HashSet;

use crate::error::{Result, ScanError};

/// Ports scanned when the target address belongs to a CDN/WAF network.
pub const CDN_PORTS: [u16; 2] = [80, 443];

/// Parse a comma-separated port list into deduplicated TCP ports (1..=65535).
///
/// Items may be single ports (`8080`) or inclusive ranges (`8000-8010`).
/// Whitespace and empty items are ignored. First-seen order is kept.
pub fn parse_port_list(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
        if let Some((a, b)) = item.split_once('-') {
            let start = parse_port_str(a.trim(), item)?;
            let end = parse_port_str(b.trim(), item)?;
            if start > end {
                return Err(ScanError::Config(format!("invalid range {start}-{end} (start > end)")));
            }
            for p in start..=end {
                if seen.insert(p) {
                    out.push(p);
                }
            }
            continue;
        }

        let p = parse_port_str(item, item)?;
        if seen.insert(p) {
            out.push(p);
        }
    }

    if out.is_empty() {
        return Err(ScanError::Config("port list is empty".into()));
    }
    Ok(out)
}

/// Web ports probed when none are configured.
pub fn default_ports() -> Vec<u16> {
    vec![80, 443, 8000, 8080, 8443]
}

/// The candidate list actually dialed: CDN addresses only ever get 80 and 443.
pub fn effective_ports(configured: &[u16], is_cdn: bool) -> Vec<u16> {
    if is_cdn {
        CDN_PORTS.to_vec()
    } else {
        configured.to_vec()
    }
}

fn parse_port_str(s: &str, item: &str) -> Result<u16> {
    let val: u32 = s
        .parse()
        .map_err(|e| ScanError::Config(format!("invalid port value in {item:?}: {e}")))?;
    if val == 0 || val > 65535 {
        return Err(ScanError::Config(format!("port out of range: {val}")));
    }
    Ok(val as u16)
}
