use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::info;

use web_recon_rs::cdn::RangeClassifier;
use web_recon_rs::config::{self, ConcurrencyLimits, Options, PORT_SCAN_POOL};
use web_recon_rs::dialer::Dialer;
use web_recon_rs::orchestrator::Orchestrator;
use web_recon_rs::probe::HttpProber;
use web_recon_rs::render::PageRenderer;
use web_recon_rs::scanner::{PortScanner, TcpDialer};
use web_recon_rs::{logging, ports, report};

/// web-recon-rs — find open web ports on many hosts, probe them over HTTPS/HTTP and fingerprint what answers.
#[derive(Debug, Clone, Parser)]
#[command(name = "web-recon-rs", version, about, long_about = None)]
struct Cli {
    /// File with one target per line. Reads stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Upstream HTTP/HTTPS proxy URL.
    #[arg(long)]
    proxy: Option<String>,

    /// Comma-separated TCP ports or ranges to scan.
    #[arg(short, long, default_value = "80,443,8000,8080,8443")]
    ports: String,

    /// TCP connect timeout per port, in milliseconds.
    #[arg(long = "port-timeout", default_value_t = 1000)]
    port_timeout: u64,

    /// Hosts processed concurrently.
    #[arg(short, long, default_value_t = 5)]
    threads: usize,

    /// Render sessions per host running concurrently.
    #[arg(long = "render-threads", default_value_t = 5)]
    render_threads: usize,

    /// Comma-separated DNS resolvers.
    #[arg(long)]
    resolvers: Option<String>,

    /// Follow HTTP redirects while probing.
    #[arg(long = "follow-redirect", default_value_t = false)]
    follow_redirect: bool,

    /// Directory for PNG screenshots (enables capture).
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Buffer every result and emit a single JSON report at the end.
    #[arg(long, default_value_t = false)]
    report: bool,

    /// Report destination. Stdout when omitted.
    #[arg(long = "report-file", requires = "report")]
    report_file: Option<PathBuf>,

    /// Input lines are JSON records with `name` and `addresses[0].ip`.
    #[arg(long = "structured-input", default_value_t = false)]
    structured_input: bool,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn options(&self) -> Result<Options> {
        Ok(Options {
            proxy: self.proxy.clone().filter(|p| !p.trim().is_empty()),
            ports: ports::parse_port_list(&self.ports)?,
            port_timeout: Duration::from_millis(self.port_timeout),
            limits: ConcurrencyLimits {
                targets: self.threads.max(1),
                scan_probes: PORT_SCAN_POOL,
                render_sessions: self.render_threads.max(1),
            },
            resolvers: config::parse_resolvers(self.resolvers.as_deref()),
            follow_redirect: self.follow_redirect,
            screenshot_dir: self.screenshot.clone(),
            report: self.report,
            structured_input: self.structured_input,
            ..Options::default()
        })
    }
}

async fn read_lines(path: Option<&PathBuf>) -> Result<Vec<String>> {
    let mut out = Vec::new();
    match path {
        Some(p) => {
            let file = tokio::fs::File::open(p)
                .await
                .with_context(|| format!("failed to open input: {}", p.display()))?;
            let mut lines = tokio::io::BufReader::new(file).lines();
            while let Some(line) = lines.next_line().await? {
                out.push(line);
            }
        }
        None => {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                out.push(line);
            }
        }
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::initialize_logging(cli.verbose)?;
    let options = cli.options()?;

    info!(
        ports = ?options.ports,
        threads = options.limits.targets,
        render_threads = options.limits.render_sessions,
        resolvers = options.resolvers.len(),
        "starting"
    );

    if let Some(dir) = &options.screenshot_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create screenshot dir: {}", dir.display()))?;
    }

    let dialer = Arc::new(Dialer::new(&options.resolvers)?);
    let scanner = PortScanner::with_pool_size(
        Arc::new(RangeClassifier::builtin()),
        Arc::new(TcpDialer),
        options.limits.scan_probes,
    );
    let prober = HttpProber::new(&options, Some(dialer.clone()))?;
    let renderer = Arc::new(PageRenderer::new(&options, Some(dialer.clone()))?);

    let lines = read_lines(cli.input.as_ref()).await?;
    let orchestrator = Arc::new(Orchestrator::new(
        options.clone(),
        dialer,
        scanner,
        prober,
        renderer,
    ));

    let (tx, rx) = mpsc::channel(256);
    let run = tokio::spawn(orchestrator.run_lines(lines, tx));

    if options.report {
        let results = report::collect(rx).await;
        run.await??;
        let report = report::build_report(results, options.screenshot_dir.as_deref());
        report::write_report(cli.report_file.as_deref(), &report)?;
    } else {
        let written = report::stream_json_lines(rx, tokio::io::stdout()).await?;
        let summary = run.await??;
        info!(results = written, targets = summary.targets, skipped = summary.skipped_lines, "done");
    }
    Ok(())
}
