//! Default renderer: a full HTTP page load plus a TLS handshake for the certificate.
//!
//! It does not execute scripts and cannot capture screenshots; a browser-backed
//! renderer can be plugged in through [`Renderer`].
use async_trait::async_trait;
use reqwest::header::SET_COOKIE;
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use scraper::{Html, Selector};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tracing::debug;
use url::Url;
use x509_parser::prelude::*;

use super::{EventSink, RenderEvent, RenderRequest, RenderSession, RenderedPage, Renderer, ResourceKind};
use crate::config::Options;
use crate::dialer::{Dialer, HostResolver};
use crate::error::{Result, ScanError};
use crate::fingerprint::{self, PageEvidence};

/// Largest document body read during a page load.
const MAX_DOCUMENT_BYTES: usize = 2 * 1024 * 1024;
const TLS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_DRAIN: Duration = Duration::from_millis(200);

pub struct PageRenderer {
    client: Client,
    tls: tokio_native_tls::TlsConnector,
    resolver: Option<Arc<Dialer>>,
}

impl PageRenderer {
    pub fn new(options: &Options, resolver: Option<Arc<Dialer>>) -> Result<Self> {
        let mut builder = Client::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .redirect(Policy::limited(10))
            .timeout(options.render_timeout);
        builder = match options.proxy.as_deref() {
            Some(p) => builder.proxy(Proxy::all(p).map_err(|e| ScanError::RendererInit(e.to_string()))?),
            None => builder.no_proxy(),
        };
        if let Some(r) = resolver.clone() {
            builder = builder.dns_resolver(r);
        }
        let client = builder
            .build()
            .map_err(|e| ScanError::RendererInit(e.to_string()))?;

        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| ScanError::RendererInit(e.to_string()))?;

        Ok(Self {
            client,
            tls: tokio_native_tls::TlsConnector::from(tls),
            resolver,
        })
    }

    async fn navigate(&self, url: &str, events: &EventSink) -> Result<String> {
        let render_err = |e: reqwest::Error| ScanError::Render {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let mut resp = self.client.get(url).send().await.map_err(render_err)?;
        let final_url = resp.url().clone();
        events.emit(RenderEvent::Navigated {
            url: final_url.to_string(),
            status: resp.status().as_u16(),
        });
        for value in resp.headers().get_all(SET_COOKIE) {
            if let Some(name) = value.to_str().ok().and_then(cookie_name) {
                events.emit(RenderEvent::Cookie(name));
            }
        }

        let mut body = Vec::new();
        while body.len() < MAX_DOCUMENT_BYTES {
            match resp.chunk().await.map_err(render_err)? {
                Some(chunk) => body.extend_from_slice(&chunk),
                None => break,
            }
        }
        body.truncate(MAX_DOCUMENT_BYTES);
        let html = String::from_utf8_lossy(&body).into_owned();

        for (kind, href) in document_resources(&html, &final_url) {
            events.emit(RenderEvent::Resource { kind, url: href });
        }
        Ok(html)
    }

    /// DNS names and issuer common name of the certificate served for `url`.
    async fn certificate(&self, url: &Url) -> Result<(Vec<String>, String)> {
        let cert_err = |reason: String| ScanError::Render {
            url: url.to_string(),
            reason,
        };
        let host = url
            .host_str()
            .ok_or_else(|| cert_err("no host".into()))?
            .trim_matches(|c| c == '[' || c == ']');
        let port = url.port_or_known_default().unwrap_or(443);
        let ip: IpAddr = match &self.resolver {
            Some(r) => r.resolve_ip(host).await?,
            None => match host.parse() {
                Ok(ip) => ip,
                Err(_) => tokio::net::lookup_host((host, port))
                    .await?
                    .next()
                    .map(|a| a.ip())
                    .ok_or_else(|| cert_err("no address".into()))?,
            },
        };

        let tcp = time::timeout(TLS_CONNECT_TIMEOUT, TcpStream::connect((ip, port)))
            .await
            .map_err(|_| cert_err("connect timed out".into()))??;
        let stream = time::timeout(TLS_CONNECT_TIMEOUT, self.tls.connect(host, tcp))
            .await
            .map_err(|_| cert_err("handshake timed out".into()))?
            .map_err(|e| cert_err(e.to_string()))?;
        let der = stream
            .get_ref()
            .peer_certificate()
            .map_err(|e| cert_err(e.to_string()))?
            .ok_or_else(|| cert_err("no peer certificate".into()))?
            .to_der()
            .map_err(|e| cert_err(e.to_string()))?;
        certificate_names(&der).ok_or_else(|| cert_err("unparsable certificate".into()))
    }
}

#[async_trait]
impl Renderer for PageRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedPage> {
        let url = Url::parse(request.url).map_err(|e| ScanError::Render {
            url: request.url.to_string(),
            reason: e.to_string(),
        })?;

        let session = RenderSession::open();
        let sink = session.sink();
        let document = match self.navigate(request.url, &sink).await {
            Ok(html) => Some(html),
            Err(e) => {
                debug!(url = request.url, error = %e, "page load failed");
                None
            }
        };
        drop(sink);

        let mut page = RenderedPage::default();
        if url.scheme() == "https" {
            match self.certificate(&url).await {
                Ok((names, issuer)) => {
                    page.cert_vhost = names;
                    page.cert_issuer = issuer;
                }
                Err(e) => debug!(url = request.url, error = %e, "certificate capture failed"),
            }
        }

        for event in session.close(EVENT_DRAIN).await {
            match event {
                RenderEvent::Navigated { url, status } => debug!(%url, status, "page loaded"),
                RenderEvent::Resource { kind, url } => {
                    if kind == ResourceKind::Script {
                        page.scripts.push(url.clone());
                    }
                    page.resources.push(url);
                }
                RenderEvent::Cookie(name) => page.cookies.push(name),
            }
        }

        let captured = request.response.body_text();
        let body = document.as_deref().unwrap_or(&captured);
        let facts = DocumentFacts::parse(body);
        page.title = facts.title;

        let technologies = fingerprint::detect(&PageEvidence {
            headers: Some(&request.response.headers),
            body,
            meta_generator: facts.generator.as_deref(),
            scripts: &page.scripts,
            resources: &page.resources,
            cookies: &page.cookies,
        });
        page.technologies = fingerprint::dedup(technologies);
        Ok(page)
    }
}

/// Title and generator of an HTML document.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DocumentFacts {
    pub title: String,
    pub generator: Option<String>,
}

impl DocumentFacts {
    pub fn parse(html: &str) -> Self {
        let doc = Html::parse_document(html);
        let title = Selector::parse("title")
            .ok()
            .and_then(|sel| {
                doc.select(&sel)
                    .next()
                    .map(|t| t.text().collect::<String>().trim().to_string())
            })
            .unwrap_or_default();
        let generator = Selector::parse("meta[name][content]").ok().and_then(|sel| {
            doc.select(&sel)
                .filter(|m| m.value().attr("name").is_some_and(|n| n.eq_ignore_ascii_case("generator")))
                .find_map(|m| m.value().attr("content").map(str::to_string))
        });
        Self { title, generator }
    }
}

/// Script and stylesheet URLs referenced by a document, resolved against `base`.
pub fn document_resources(html: &str, base: &Url) -> Vec<(ResourceKind, String)> {
    let doc = Html::parse_document(html);
    let mut out = Vec::new();
    let wanted = [
        (ResourceKind::Script, "script[src]", "src"),
        (ResourceKind::Stylesheet, "link[rel][href]", "href"),
    ];
    for (kind, selector, attr) in wanted {
        let Ok(sel) = Selector::parse(selector) else {
            continue;
        };
        for el in doc.select(&sel) {
            let is_stylesheet = el
                .value()
                .attr("rel")
                .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")));
            if kind == ResourceKind::Stylesheet && !is_stylesheet {
                continue;
            }
            if let Some(v) = el.value().attr(attr).map(str::trim).filter(|v| !v.is_empty()) {
                let resolved = base.join(v).map(|u| u.to_string()).unwrap_or_else(|_| v.to_string());
                out.push((kind, resolved));
            }
        }
    }
    out
}

fn cookie_name(set_cookie: &str) -> Option<String> {
    let (name, _) = set_cookie.split_once('=')?;
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn certificate_names(der: &[u8]) -> Option<(Vec<String>, String)> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let mut names = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                names.push(dns.to_string());
            }
        }
    }
    let issuer = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();
    Some((names, issuer))
}
