//! Hostname resolution shared by the scanner and the HTTP client.
use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{Result, ScanError};

/// DNS data attached to a result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsRecord {
    pub host: String,
    pub cname: Vec<String>,
    pub addresses: Vec<IpAddr>,
}

#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Address used for `host`. Repeated calls for the same host return the same address.
    async fn resolve_ip(&self, host: &str) -> Result<IpAddr>;

    /// CNAME chain and addresses for `host`, if any were found.
    async fn dns_record(&self, host: &str) -> Option<DnsRecord>;
}

/// Resolver over a fixed list of upstream servers that remembers which address
/// it handed out for every hostname.
#[derive(Clone)]
pub struct Dialer {
    resolver: TokioAsyncResolver,
    history: Arc<Mutex<HashMap<String, IpAddr>>>,
}

impl Dialer {
    pub fn new(resolvers: &[String]) -> Result<Self> {
        let mut ips = Vec::with_capacity(resolvers.len());
        for r in resolvers {
            let ip: IpAddr = r
                .trim()
                .parse()
                .map_err(|_| ScanError::Dialer(format!("invalid resolver address: {r}")))?;
            ips.push(ip);
        }
        if ips.is_empty() {
            return Err(ScanError::Dialer("no resolvers configured".into()));
        }
        let group = NameServerConfigGroup::from_ips_clear(&ips, 53, true);
        let config = ResolverConfig::from_parts(None, vec![], group);
        let resolver = TokioAsyncResolver::tokio(config, ResolverOpts::default());
        Ok(Self {
            resolver,
            history: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Address previously handed out for `host`, without resolving.
    pub fn dialed_ip(&self, host: &str) -> Option<IpAddr> {
        self.history.lock().ok()?.get(host).copied()
    }

    fn remember(&self, host: &str, ip: IpAddr) -> IpAddr {
        match self.history.lock() {
            // First writer wins so every caller sees the same address.
            Ok(mut h) => *h.entry(host.to_string()).or_insert(ip),
            Err(_) => ip,
        }
    }
}

#[async_trait]
impl HostResolver for Dialer {
    async fn resolve_ip(&self, host: &str) -> Result<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        if let Some(ip) = self.dialed_ip(host) {
            return Ok(ip);
        }
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| ScanError::Resolve {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        let ip = lookup.iter().next().ok_or_else(|| ScanError::Resolve {
            host: host.to_string(),
            reason: "no addresses".into(),
        })?;
        debug!(host, %ip, "resolved");
        Ok(self.remember(host, ip))
    }

    async fn dns_record(&self, host: &str) -> Option<DnsRecord> {
        if host.parse::<IpAddr>().is_ok() {
            return None;
        }
        let mut record = DnsRecord {
            host: host.to_string(),
            ..Default::default()
        };
        if let Ok(lookup) = self.resolver.lookup(host, RecordType::CNAME).await {
            for rdata in lookup.iter() {
                if let RData::CNAME(cname) = rdata {
                    record
                        .cname
                        .push(cname.0.to_utf8().trim_end_matches('.').to_string());
                }
            }
        }
        if let Ok(ips) = self.resolver.lookup_ip(host).await {
            record.addresses = ips.iter().collect();
        }
        if record.cname.is_empty() && record.addresses.is_empty() {
            None
        } else {
            Some(record)
        }
    }
}

impl Resolve for Dialer {
    fn resolve(&self, name: Name) -> Resolving {
        let this = self.clone();
        Box::pin(async move {
            let ip = this.resolve_ip(name.as_str()).await?;
            let addrs: Addrs = Box::new(std::iter::once(SocketAddr::new(ip, 0)));
            Ok::<Addrs, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}
