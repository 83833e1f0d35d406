#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use web_recon_rs::cdn::CdnClassifier;
use web_recon_rs::dialer::{DnsRecord, HostResolver};
use web_recon_rs::error::{Result, ScanError};
use web_recon_rs::render::{RenderRequest, RenderedPage, Renderer};
use web_recon_rs::scanner::PortDialer;
use web_recon_rs::types::Technology;

/// Plain-HTTP server answering every GET with `response`. Connections that do
/// not start with `GET ` (TLS handshakes) are closed.
pub struct TestServer {
    pub port: u16,
    pub requests: Arc<AtomicUsize>,
}

pub async fn http_server(response: &'static str) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { break };
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let Ok(n) = sock.read(&mut chunk).await else { return };
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if !buf.starts_with(b"GET ") && buf.len() >= 4 {
                        return;
                    }
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    TestServer { port, requests }
}

/// HTTPS server with a fresh self-signed certificate, answering every GET with
/// `response`. Plain-HTTP requests are counted separately and closed.
pub struct TlsServer {
    pub port: u16,
    pub tls_requests: Arc<AtomicUsize>,
    pub plain_requests: Arc<AtomicUsize>,
}

/// First byte of a TLS handshake record.
const TLS_HANDSHAKE: u8 = 0x16;

pub async fn https_server(response: &'static str) -> TlsServer {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let identity =
        native_tls::Identity::from_pkcs8(cert.pem().as_bytes(), key_pair.serialize_pem().as_bytes()).unwrap();
    let acceptor = tokio_native_tls::TlsAcceptor::from(native_tls::TlsAcceptor::new(identity).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let tls_requests = Arc::new(AtomicUsize::new(0));
    let plain_requests = Arc::new(AtomicUsize::new(0));
    let (tls_counter, plain_counter) = (tls_requests.clone(), plain_requests.clone());
    tokio::spawn(async move {
        loop {
            let Ok((sock, _)) = listener.accept().await else { break };
            let acceptor = acceptor.clone();
            let tls_counter = tls_counter.clone();
            let plain_counter = plain_counter.clone();
            tokio::spawn(async move {
                let mut first = [0u8; 1];
                match sock.peek(&mut first).await {
                    // Port scan connects close without sending anything.
                    Ok(0) | Err(_) => return,
                    Ok(_) if first[0] != TLS_HANDSHAKE => {
                        plain_counter.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                    Ok(_) => {}
                }
                let Ok(mut tls) = acceptor.accept(sock).await else { return };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match tls.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                tls_counter.fetch_add(1, Ordering::SeqCst);
                let _ = tls.write_all(response.as_bytes()).await;
                let _ = tls.shutdown().await;
            });
        }
    });
    TlsServer {
        port,
        tls_requests,
        plain_requests,
    }
}

/// Resolves every host to one fixed address.
pub struct FixedResolver {
    pub ip: IpAddr,
    pub cname: Vec<String>,
    pub lookups: AtomicUsize,
}

impl FixedResolver {
    pub fn new(ip: &str) -> Self {
        Self {
            ip: ip.parse().unwrap(),
            cname: Vec::new(),
            lookups: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl HostResolver for FixedResolver {
    async fn resolve_ip(&self, host: &str) -> Result<IpAddr> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if host.ends_with(".invalid") {
            return Err(ScanError::Resolve {
                host: host.to_string(),
                reason: "nxdomain".into(),
            });
        }
        Ok(self.ip)
    }

    async fn dns_record(&self, host: &str) -> Option<DnsRecord> {
        (!self.cname.is_empty()).then(|| DnsRecord {
            host: host.to_string(),
            cname: self.cname.clone(),
            addresses: vec![self.ip],
        })
    }
}

/// Classifies a fixed set of addresses as CDN.
#[derive(Default)]
pub struct StaticClassifier {
    pub cdn: HashMap<IpAddr, String>,
    pub fail: bool,
}

impl StaticClassifier {
    pub fn with_cdn(ip: &str, name: &str) -> Self {
        let mut cdn = HashMap::new();
        cdn.insert(ip.parse().unwrap(), name.to_string());
        Self { cdn, fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }
}

impl CdnClassifier for StaticClassifier {
    fn classify(&self, ip: IpAddr) -> Result<Option<String>> {
        if self.fail {
            return Err(ScanError::Classifier { ip, reason: "provider list unavailable".into() });
        }
        Ok(self.cdn.get(&ip).cloned())
    }
}

/// Records every dial; reports the listed ports open.
#[derive(Default)]
pub struct RecordingDialer {
    pub open: Vec<u16>,
    pub dialed: Mutex<Vec<(IpAddr, u16)>>,
    pub delay: Duration,
    pub in_flight: AtomicUsize,
    /// Most dials ever running at once.
    pub peak: AtomicUsize,
}

impl RecordingDialer {
    pub fn open(ports: &[u16]) -> Self {
        Self { open: ports.to_vec(), ..Default::default() }
    }

    pub fn calls(&self) -> usize {
        self.dialed.lock().unwrap().len()
    }

    pub fn dialed_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.dialed.lock().unwrap().iter().map(|(_, p)| *p).collect();
        ports.sort_unstable();
        ports
    }
}

#[async_trait]
impl PortDialer for RecordingDialer {
    async fn is_open(&self, ip: IpAddr, port: u16, _timeout: Duration) -> bool {
        self.dialed.lock().unwrap().push((ip, port));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.open.contains(&port)
    }
}

/// Renderer that records the URLs it was asked to load.
#[derive(Default)]
pub struct RecordingRenderer {
    pub urls: Mutex<Vec<String>>,
    pub statuses: Mutex<Vec<u16>>,
    pub fail: bool,
}

#[async_trait]
impl Renderer for RecordingRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedPage> {
        self.urls.lock().unwrap().push(request.url.to_string());
        self.statuses.lock().unwrap().push(request.response.status_code);
        if self.fail {
            return Err(ScanError::Render { url: request.url.to_string(), reason: "browser crashed".into() });
        }
        Ok(RenderedPage {
            title: "Test Page".into(),
            technologies: vec![
                Technology::new("Nginx", "Web Server", None),
                Technology::new("Nginx", "Web Server", Some("1.25".into())),
                Technology::new("PHP", "Programming Language", None),
            ],
            ..Default::default()
        })
    }
}
