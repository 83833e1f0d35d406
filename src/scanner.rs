use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, info};

use crate::cdn::CdnClassifier;
use crate::config::PORT_SCAN_POOL;
use crate::error::Result;
use crate::ports;
use crate::types::PortScanEntry;

/// Tests whether a single TCP port accepts connections.
#[async_trait]
pub trait PortDialer: Send + Sync {
    async fn is_open(&self, ip: IpAddr, port: u16, timeout: Duration) -> bool;
}

/// Plain TCP connect, closed right after the handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl PortDialer for TcpDialer {
    async fn is_open(&self, ip: IpAddr, port: u16, timeout: Duration) -> bool {
        let addr = SocketAddr::new(ip, port);
        matches!(time::timeout(timeout, TcpStream::connect(addr)).await, Ok(Ok(_)))
    }
}

/// Outcome of scanning one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortScan {
    pub open_ports: Vec<u16>,
    /// Provider name when the address belongs to a CDN/WAF network.
    pub cdn: Option<String>,
    pub cached: bool,
}

/// CDN-aware TCP connect scanner with a process-lifetime cache keyed by IP.
///
/// Each IP owns a once-cell: the first caller scans, concurrent callers for the
/// same IP wait for that scan and read its result. An IP is never dialed twice.
pub struct PortScanner {
    classifier: Arc<dyn CdnClassifier>,
    dialer: Arc<dyn PortDialer>,
    pool_size: usize,
    cache: Mutex<HashMap<IpAddr, Arc<OnceCell<Vec<u16>>>>>,
}

impl PortScanner {
    pub fn new(classifier: Arc<dyn CdnClassifier>, dialer: Arc<dyn PortDialer>) -> Self {
        Self::with_pool_size(classifier, dialer, PORT_SCAN_POOL)
    }

    pub fn with_pool_size(
        classifier: Arc<dyn CdnClassifier>,
        dialer: Arc<dyn PortDialer>,
        pool_size: usize,
    ) -> Self {
        Self {
            classifier,
            dialer,
            pool_size: pool_size.clamp(1, 5_000),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Scan `ip` for open ports among `candidates`.
    ///
    /// Classifier errors are returned as-is; per-port failures only mark the port closed.
    pub async fn scan(&self, ip: IpAddr, candidates: &[u16], timeout: Duration) -> Result<PortScan> {
        let cdn = self.classifier.classify(ip)?;
        let candidates = ports::effective_ports(candidates, cdn.is_some());
        if let Some(name) = &cdn {
            debug!(%ip, cdn = %name, "cdn address, reducing port list");
        }

        let cell = {
            let mut cache = self.cache.lock().await;
            cache.entry(ip).or_default().clone()
        };

        let mut cached = true;
        let open_ports = cell
            .get_or_init(|| {
                cached = false;
                self.dial_all(ip, candidates, timeout)
            })
            .await
            .clone();

        if cached {
            debug!(%ip, open = open_ports.len(), "port scan cache hit");
        } else {
            info!(%ip, open = ?open_ports, "port scan finished");
        }
        Ok(PortScan {
            open_ports,
            cdn,
            cached,
        })
    }

    async fn dial_all(&self, ip: IpAddr, candidates: Vec<u16>, timeout: Duration) -> Vec<u16> {
        let sem = Arc::new(Semaphore::new(self.pool_size));
        let mut set = JoinSet::new();

        for (idx, &port) in candidates.iter().enumerate() {
            let sem = sem.clone();
            let dialer = self.dialer.clone();
            set.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return (idx, false);
                };
                (idx, dialer.is_open(ip, port, timeout).await)
            });
        }

        let mut open = vec![false; candidates.len()];
        while let Some(res) = set.join_next().await {
            if let Ok((idx, true)) = res {
                open[idx] = true;
            }
        }

        candidates
            .into_iter()
            .zip(open)
            .filter_map(|(port, ok)| ok.then_some(port))
            .collect()
    }

    /// Snapshot of every completed cache entry.
    pub async fn entries(&self) -> Vec<PortScanEntry> {
        let cache = self.cache.lock().await;
        let mut out: Vec<PortScanEntry> = cache
            .iter()
            .filter_map(|(ip, cell)| {
                cell.get().map(|ports| PortScanEntry {
                    ip: ip.to_string(),
                    open_ports: ports.clone(),
                })
            })
            .collect();
        out.sort_by(|a, b| a.ip.cmp(&b.ip));
        out
    }
}
