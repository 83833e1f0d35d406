//! HTTP(S) probing of a single host:port.
//!
//! Scheme selection, per port:
//! - `80`: plain HTTP only.
//! - `443`: HTTPS only; a failed handshake means the port is unreachable.
//! - anything else: HTTPS first, HTTP when HTTPS fails.
use reqwest::header::{HeaderMap, ACCEPT_ENCODING, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Proxy, StatusCode, Version};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::net::Ipv6Addr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use crate::config::Options;
use crate::dialer::Dialer;
use crate::error::{Result, ScanError};
use crate::types::{ProbeResponse, ScanResult};

/// Bytes of body kept per response. Metrics are computed over this window only.
pub const BODY_CAPTURE_LIMIT: usize = 4096;
/// First request plus one identity-encoding retry.
const MAX_ATTEMPTS: usize = 2;
const MAX_REDIRECTS: usize = 10;
const USER_AGENT: &str = concat!("Mozilla/5.0 (compatible; web-recon-rs/", env!("CARGO_PKG_VERSION"), ")");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schemes to try for `port`, in order.
pub fn scheme_plan(port: u16) -> &'static [Scheme] {
    match port {
        80 => &[Scheme::Http],
        443 => &[Scheme::Https],
        _ => &[Scheme::Https, Scheme::Http],
    }
}

/// `scheme://host[:port]`, with the port left out for 80 and 443. IPv6
/// literals are bracketed.
pub fn target_url(scheme: Scheme, host: &str, port: u16) -> String {
    let host = match host.parse::<Ipv6Addr>() {
        Ok(v6) => format!("[{v6}]"),
        Err(_) => host.to_string(),
    };
    match port {
        80 | 443 => format!("{scheme}://{host}"),
        _ => format!("{scheme}://{host}:{port}"),
    }
}

/// A successful probe of one host:port.
#[derive(Debug, Clone)]
pub struct Probe {
    pub url: String,
    pub scheme: Scheme,
    pub response: ProbeResponse,
}

impl Probe {
    /// Copy response-derived fields into `result`.
    pub fn fill(&self, result: &mut ScanResult) {
        let resp = &self.response;
        let infos = &mut result.infos;
        if (300..400).contains(&resp.status_code) {
            if let Some(loc) = resp.header(LOCATION.as_str()) {
                infos.location = loc.to_string();
            }
        }
        if let Some(ct) = resp.header(CONTENT_TYPE.as_str()) {
            infos.content_type = ct.split(';').next().unwrap_or_default().trim().to_string();
        }
        infos.response_time_ms = resp.duration_ms;
        infos.content_length = resp.content_length;
        infos.status_code = resp.status_code;
        if infos.scheme.is_empty() {
            infos.scheme = self.scheme.to_string();
        }
        result.url = self.url.clone();
    }
}

pub struct HttpProber {
    client: Client,
    identity_client: Client,
}

impl HttpProber {
    /// Build the probe transports. `resolver` routes hostname lookups through the shared dialer.
    pub fn new(options: &Options, resolver: Option<Arc<Dialer>>) -> Result<Self> {
        let client = client_builder(options, resolver.clone())?
            .build()
            .map_err(ScanError::Client)?;
        let identity_client = client_builder(options, resolver)?
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()
            .map_err(ScanError::Client)?;
        Ok(Self {
            client,
            identity_client,
        })
    }

    pub async fn probe(&self, host: &str, port: u16) -> Result<Probe> {
        for &scheme in scheme_plan(port) {
            let url = target_url(scheme, host, port);
            match self.fetch(&url).await {
                Ok(response) => {
                    debug!(%url, status = response.status_code, "probe succeeded");
                    return Ok(Probe {
                        url,
                        scheme,
                        response,
                    });
                }
                Err(e) => debug!(%url, error = %e, "probe attempt failed"),
            }
        }
        Err(ScanError::Unreachable {
            host: host.to_string(),
            port,
        })
    }

    /// GET `url`, retrying once with identity encoding if the body cannot be decoded.
    pub async fn fetch(&self, url: &str) -> Result<ProbeResponse> {
        with_encoding_retry(|identity| self.fetch_once(url, identity))
            .await
            .map_err(|source| ScanError::Request {
                url: url.to_string(),
                source,
            })
    }

    async fn fetch_once(&self, url: &str, identity: bool) -> reqwest::Result<ProbeResponse> {
        let request = if identity {
            self.identity_client.get(url).header(ACCEPT_ENCODING, "identity")
        } else {
            self.client.get(url)
        };

        let start = Instant::now();
        let mut resp = request.send().await?;
        let status = resp.status();
        let headers = collect_headers(resp.headers());
        let raw_headers = dump_headers(resp.version(), status, resp.headers());
        let transport_length = resp.content_length();

        let mut body = Vec::new();
        // An upgraded connection has no readable body.
        if status != StatusCode::SWITCHING_PROTOCOLS {
            while body.len() < BODY_CAPTURE_LIMIT {
                let Some(chunk) = resp.chunk().await? else {
                    break;
                };
                let take = chunk.len().min(BODY_CAPTURE_LIMIT - body.len());
                body.extend_from_slice(&chunk[..take]);
            }
        }

        Ok(build_response(
            status.as_u16(),
            headers,
            raw_headers,
            body,
            transport_length,
            start.elapsed().as_millis() as u64,
        ))
    }
}

/// Run `attempt` until it succeeds, at most `MAX_ATTEMPTS` times. Only a decode
/// failure is retried, and the retry is told to request identity encoding.
pub async fn with_encoding_retry<T, F, Fut>(mut attempt: F) -> reqwest::Result<T>
where
    F: FnMut(bool) -> Fut,
    Fut: Future<Output = reqwest::Result<T>>,
{
    let mut n = 1;
    loop {
        match attempt(n > 1).await {
            Err(e) if e.is_decode() && n < MAX_ATTEMPTS => {
                debug!(error = %e, "content encoding mismatch, retrying with identity");
                n += 1;
            }
            other => return other,
        }
    }
}

fn client_builder(options: &Options, resolver: Option<Arc<Dialer>>) -> Result<ClientBuilder> {
    let redirect = if options.follow_redirect {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .pool_max_idle_per_host(0)
        .timeout(options.probe_timeout)
        .redirect(redirect);
    builder = match options.proxy.as_deref() {
        Some(proxy) => builder.proxy(Proxy::all(proxy).map_err(ScanError::Client)?),
        None => builder.no_proxy(),
    };
    if let Some(resolver) = resolver {
        builder = builder.dns_resolver(resolver);
    }
    Ok(builder)
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        out.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}

fn dump_headers(version: Version, status: StatusCode, headers: &HeaderMap) -> Vec<u8> {
    let mut raw = format!("{version:?} {status}\r\n").into_bytes();
    for (name, value) in headers {
        raw.extend_from_slice(name.as_str().as_bytes());
        raw.extend_from_slice(b": ");
        raw.extend_from_slice(value.as_bytes());
        raw.extend_from_slice(b"\r\n");
    }
    raw.extend_from_slice(b"\r\n");
    raw
}

/// Assemble a `ProbeResponse` and derive its metrics from the captured body.
pub fn build_response(
    status_code: u16,
    headers: BTreeMap<String, Vec<String>>,
    raw_headers: Vec<u8>,
    mut body: Vec<u8>,
    transport_length: Option<u64>,
    duration_ms: u64,
) -> ProbeResponse {
    body.truncate(BODY_CAPTURE_LIMIT);
    let text = String::from_utf8_lossy(&body);
    let content_length = resolve_content_length(transport_length, &headers, &text);
    let words = text.split(' ').count();
    let lines = text.split('\n').count();

    let mut raw = raw_headers.clone();
    raw.extend_from_slice(&body);

    ProbeResponse {
        status_code,
        headers,
        raw_headers,
        raw,
        body,
        content_length,
        duration_ms,
        words,
        lines,
    }
}

/// Transport length if positive, else the `Content-Length` header, else the
/// character count of the captured body.
pub fn resolve_content_length(
    transport: Option<u64>,
    headers: &BTreeMap<String, Vec<String>>,
    body: &str,
) -> u64 {
    if let Some(n) = transport.filter(|n| *n > 0) {
        return n;
    }
    let from_header = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.first())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    if from_header > 0 {
        return from_header;
    }
    body.chars().count() as u64
}
