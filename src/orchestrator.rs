use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Options;
use crate::dialer::HostResolver;
use crate::error::{Result, ScanError};
use crate::fingerprint;
use crate::input;
use crate::probe::HttpProber;
use crate::render::{self, RenderRequest, Renderer};
use crate::report;
use crate::scanner::PortScanner;
use crate::types::{Infos, ScanResult, Target};

/// Counters for one finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub targets: usize,
    pub failed_targets: usize,
    pub skipped_lines: usize,
}

/// Drives targets through scan → probe → render under three admission gates.
pub struct Orchestrator {
    options: Options,
    resolver: Arc<dyn HostResolver>,
    scanner: PortScanner,
    prober: HttpProber,
    renderer: Arc<dyn Renderer>,
}

impl Orchestrator {
    pub fn new(
        options: Options,
        resolver: Arc<dyn HostResolver>,
        scanner: PortScanner,
        prober: HttpProber,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            options,
            resolver,
            scanner,
            prober,
            renderer,
        }
    }

    pub fn scanner(&self) -> &PortScanner {
        &self.scanner
    }

    /// Parse raw input lines and run them. A malformed line is logged and skipped.
    pub async fn run_lines<I>(self: Arc<Self>, lines: I, results: mpsc::Sender<ScanResult>) -> Result<RunSummary>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut targets = Vec::new();
        let mut skipped = 0;
        for line in lines {
            match input::parse_line(line.as_ref(), self.options.structured_input) {
                Ok(Some(t)) => targets.push(t),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "skipping input line");
                    skipped += 1;
                }
            }
        }
        let mut summary = self.run(targets, results).await?;
        summary.skipped_lines = skipped;
        Ok(summary)
    }

    /// Process every target and return once all of them are done. `results`
    /// is dropped on return, which closes the stream.
    pub async fn run(
        self: Arc<Self>,
        targets: Vec<Target>,
        results: mpsc::Sender<ScanResult>,
    ) -> Result<RunSummary> {
        let sem = Arc::new(Semaphore::new(self.options.limits.targets.clamp(1, 10_000)));
        let cancel = CancellationToken::new();
        let mut set = JoinSet::new();
        let mut summary = RunSummary::default();
        let mut fatal: Option<ScanError> = None;

        for target in targets {
            let permit = tokio::select! {
                p = sem.clone().acquire_owned() => match p {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = cancel.cancelled() => break,
            };
            summary.targets += 1;
            let this = self.clone();
            let results = results.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let _permit = permit;
                let host = target.host.clone();
                let res = this.scan_target(target, results, &cancel).await;
                if matches!(&res, Err(e) if e.is_fatal()) {
                    cancel.cancel();
                }
                (host, res)
            });

            // Reap finished tasks so a fatal error stops admission promptly.
            while let Some(joined) = set.try_join_next() {
                Self::record(joined, &mut summary, &mut fatal);
            }
        }
        drop(results);

        while let Some(joined) = set.join_next().await {
            Self::record(joined, &mut summary, &mut fatal);
        }

        match fatal {
            Some(e) => Err(e),
            None => {
                info!(targets = summary.targets, failed = summary.failed_targets, "run finished");
                Ok(summary)
            }
        }
    }

    fn record(
        joined: std::result::Result<(String, Result<()>), tokio::task::JoinError>,
        summary: &mut RunSummary,
        fatal: &mut Option<ScanError>,
    ) {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((host, Err(e))) if e.is_fatal() => {
                warn!(host, error = %e, "fatal error, aborting run");
                summary.failed_targets += 1;
                fatal.get_or_insert(e);
            }
            Ok((host, Err(e))) => {
                warn!(host, error = %e, "target failed");
                summary.failed_targets += 1;
            }
            Err(e) => {
                warn!(error = %e, "target task panicked");
                summary.failed_targets += 1;
            }
        }
    }

    async fn scan_target(
        self: Arc<Self>,
        target: Target,
        results: mpsc::Sender<ScanResult>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ip = match target.ip {
            Some(ip) => ip,
            None => self.resolver.resolve_ip(&target.host).await?,
        };
        let scan = self
            .scanner
            .scan(ip, &self.options.ports, self.options.port_timeout)
            .await?;
        if scan.open_ports.is_empty() {
            debug!(host = %target.host, %ip, "no open ports");
            return Ok(());
        }

        let base = ScanResult {
            infos: Infos {
                data: target.host.clone(),
                ip: ip.to_string(),
                cdn: scan.cdn.clone().unwrap_or_default(),
                ports: scan.open_ports.clone(),
                ..Default::default()
            },
            ..Default::default()
        };

        let sem = Arc::new(Semaphore::new(self.options.limits.render_sessions.clamp(1, 1_000)));
        let mut set = JoinSet::new();
        for &port in &scan.open_ports {
            if cancel.is_cancelled() {
                break;
            }
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break;
            };
            let this = self.clone();
            let host = target.host.clone();
            let result = base.clone();
            let results = results.clone();
            set.spawn(async move {
                let _permit = permit;
                this.probe_port(&host, ip, port, result, results).await;
            });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(host = %target.host, error = %e, "port task panicked");
            }
        }
        Ok(())
    }

    async fn probe_port(
        &self,
        host: &str,
        ip: IpAddr,
        port: u16,
        mut result: ScanResult,
        results: mpsc::Sender<ScanResult>,
    ) {
        let probe = match self.prober.probe(host, port).await {
            Ok(p) => p,
            Err(e) => {
                debug!(host, %ip, port, error = %e, "no response");
                return;
            }
        };
        probe.fill(&mut result);

        if let Some(record) = self.resolver.dns_record(host).await {
            result.infos.cname = record.cname;
        }

        let url = render::destination_url(&probe.url, &result.infos.location);
        let page = render::render_bounded(
            self.renderer.as_ref(),
            RenderRequest {
                url: &url,
                response: &probe.response,
                timeout: self.options.render_timeout,
                screenshot: self.options.screenshot_dir.is_some(),
            },
        )
        .await;

        result.infos.title = page.title;
        result.infos.cert_vhost = page.cert_vhost;
        result.infos.cert_issuer = page.cert_issuer;
        result.infos.technologies = fingerprint::dedup(page.technologies);

        if let (Some(dir), Some(png)) = (&self.options.screenshot_dir, page.screenshot.as_deref()) {
            if !png.is_empty() {
                match report::save_screenshot(dir, &url, png).await {
                    Ok(name) => result.infos.screenshot = name,
                    Err(e) => warn!(url = %url, error = %e, "could not write screenshot"),
                }
            }
        }

        result.timestamp = crate::timestamp();
        info!(url = %result.url, status = result.infos.status_code, "endpoint reached");
        if results.send(result).await.is_err() {
            debug!("result receiver closed");
        }
    }
}
