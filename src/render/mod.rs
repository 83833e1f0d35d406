//! Render/analyze handoff: loads a reachable URL and extracts page-level facts.
pub mod page;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tracing::debug;
use url::Url;

use crate::error::Result;
use crate::types::{ProbeResponse, Technology};

pub use page::PageRenderer;

/// What the render stage is handed for one reachable endpoint.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub url: &'a str,
    /// Response captured by the prober. Passed through, never refetched.
    pub response: &'a ProbeResponse,
    pub timeout: Duration,
    pub screenshot: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedPage {
    pub title: String,
    pub cert_vhost: Vec<String>,
    pub cert_issuer: String,
    pub cookies: Vec<String>,
    pub scripts: Vec<String>,
    /// Every subresource URL requested by the page, scripts included.
    pub resources: Vec<String>,
    pub technologies: Vec<Technology>,
    /// PNG bytes, when the renderer can capture one.
    pub screenshot: Option<Vec<u8>>,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedPage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Script,
    Stylesheet,
}

/// Something observed while a page was loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    Navigated { url: String, status: u16 },
    Resource { kind: ResourceKind, url: String },
    Cookie(String),
}

/// Sender half handed to whatever drives the page load.
#[derive(Debug, Clone)]
pub struct EventSink(mpsc::UnboundedSender<RenderEvent>);

impl EventSink {
    pub fn emit(&self, event: RenderEvent) {
        // The session may already be closed; late events are dropped.
        let _ = self.0.send(event);
    }
}

/// Event channel scoped to one render. Closing it tears the listener down.
pub struct RenderSession {
    sink: EventSink,
    events: mpsc::UnboundedReceiver<RenderEvent>,
}

impl RenderSession {
    pub fn open() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sink: EventSink(tx),
            events: rx,
        }
    }

    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Stop listening and return every event received. Waits at most `drain`
    /// for outstanding sinks to be dropped.
    pub async fn close(self, drain: Duration) -> Vec<RenderEvent> {
        let RenderSession { sink, mut events } = self;
        drop(sink);
        let mut out = Vec::new();
        let _ = time::timeout(drain, async {
            while let Some(ev) = events.recv().await {
                out.push(ev);
            }
        })
        .await;
        events.close();
        while let Ok(ev) = events.try_recv() {
            out.push(ev);
        }
        out
    }
}

/// Run `renderer` under the request deadline. Failures and timeouts yield an
/// empty page so probe-derived fields still get reported.
pub async fn render_bounded(renderer: &dyn Renderer, request: RenderRequest<'_>) -> RenderedPage {
    match time::timeout(request.timeout, renderer.render(request)).await {
        Ok(Ok(page)) => page,
        Ok(Err(e)) => {
            debug!(url = request.url, error = %e, "render failed");
            RenderedPage::default()
        }
        Err(_) => {
            debug!(url = request.url, "render timed out");
            RenderedPage::default()
        }
    }
}

/// URL the render stage should load: the recorded redirect target if any,
/// resolved against the probed URL when relative.
pub fn destination_url(probe_url: &str, location: &str) -> String {
    let location = location.trim();
    if location.is_empty() {
        return probe_url.to_string();
    }
    if Url::parse(location).is_ok() {
        return location.to_string();
    }
    Url::parse(probe_url)
        .and_then(|base| base.join(location))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| probe_url.to_string())
}
