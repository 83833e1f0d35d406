use ipnet::IpNet;
use std::net::IpAddr;

use crate::error::{Result, ScanError};

/// Tells whether an address belongs to a CDN/WAF network.
pub trait CdnClassifier: Send + Sync {
    /// `Ok(Some(name))` for a CDN address, `Ok(None)` otherwise.
    fn classify(&self, ip: IpAddr) -> Result<Option<String>>;
}

/// Classifier backed by a static list of published provider ranges.
#[derive(Debug, Clone)]
pub struct RangeClassifier {
    ranges: Vec<(IpNet, String)>,
}

const BUILTIN_RANGES: &[(&str, &[&str])] = &[
    (
        "cloudflare",
        &[
            "173.245.48.0/20",
            "103.21.244.0/22",
            "103.22.200.0/22",
            "103.31.4.0/22",
            "141.101.64.0/18",
            "108.162.192.0/18",
            "190.93.240.0/20",
            "188.114.96.0/20",
            "197.234.240.0/22",
            "198.41.128.0/17",
            "162.158.0.0/15",
            "104.16.0.0/13",
            "104.24.0.0/14",
            "172.64.0.0/13",
            "131.0.72.0/22",
            "2400:cb00::/32",
            "2606:4700::/32",
            "2803:f800::/32",
            "2405:b500::/32",
            "2405:8100::/32",
            "2a06:98c0::/29",
            "2c0f:f248::/32",
        ],
    ),
    (
        "fastly",
        &[
            "23.235.32.0/20",
            "43.249.72.0/22",
            "103.244.50.0/24",
            "103.245.222.0/23",
            "103.245.224.0/24",
            "104.156.80.0/20",
            "140.248.64.0/18",
            "140.248.128.0/17",
            "146.75.0.0/17",
            "151.101.0.0/16",
            "157.52.64.0/18",
            "167.82.0.0/17",
            "167.82.128.0/20",
            "167.82.160.0/20",
            "167.82.224.0/20",
            "172.111.64.0/18",
            "185.31.16.0/22",
            "199.27.72.0/21",
            "199.232.0.0/16",
            "2a04:4e40::/32",
            "2a04:4e42::/32",
        ],
    ),
    (
        "cloudfront",
        &[
            "13.32.0.0/15",
            "13.224.0.0/14",
            "13.249.0.0/16",
            "18.64.0.0/14",
            "52.84.0.0/15",
            "54.182.0.0/16",
            "54.192.0.0/16",
            "54.230.0.0/16",
            "54.239.128.0/18",
            "99.84.0.0/16",
            "143.204.0.0/16",
            "204.246.164.0/22",
            "205.251.192.0/19",
        ],
    ),
    (
        "akamai",
        &[
            "23.32.0.0/11",
            "23.192.0.0/11",
            "2.16.0.0/13",
            "104.64.0.0/10",
            "184.24.0.0/13",
            "23.0.0.0/12",
            "95.100.0.0/15",
        ],
    ),
    (
        "incapsula",
        &[
            "199.83.128.0/21",
            "198.143.32.0/19",
            "149.126.72.0/21",
            "103.28.248.0/22",
            "45.64.64.0/22",
            "185.11.124.0/22",
            "192.230.64.0/18",
            "107.154.0.0/16",
            "45.60.0.0/16",
            "45.223.0.0/16",
        ],
    ),
    (
        "sucuri",
        &["192.88.134.0/23", "185.93.228.0/22", "66.248.200.0/22", "208.109.0.0/22"],
    ),
];

impl RangeClassifier {
    /// Classifier over the built-in provider table.
    pub fn builtin() -> Self {
        let ranges = BUILTIN_RANGES
            .iter()
            .flat_map(|(name, nets)| {
                nets.iter()
                    .filter_map(move |n| n.parse::<IpNet>().ok().map(|net| (net, name.to_string())))
            })
            .collect();
        Self { ranges }
    }

    /// Classifier over caller-provided `(cidr, provider)` pairs.
    pub fn from_ranges<'a>(
        items: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        let mut ranges = Vec::new();
        for (cidr, name) in items {
            let net: IpNet = cidr
                .parse()
                .map_err(|e| ScanError::Config(format!("invalid CIDR {cidr}: {e}")))?;
            ranges.push((net, name.to_string()));
        }
        Ok(Self { ranges })
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl CdnClassifier for RangeClassifier {
    fn classify(&self, ip: IpAddr) -> Result<Option<String>> {
        if self.ranges.is_empty() {
            return Err(ScanError::Classifier {
                ip,
                reason: "no ranges loaded".into(),
            });
        }
        Ok(self
            .ranges
            .iter()
            .find(|(net, _)| net.contains(&ip))
            .map(|(_, name)| name.clone()))
    }
}
