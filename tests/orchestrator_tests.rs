mod common;

use common::{http_server, https_server, FixedResolver, RecordingDialer, RecordingRenderer, StaticClassifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use web_recon_rs::cdn::CdnClassifier;
use web_recon_rs::config::{ConcurrencyLimits, Options};
use web_recon_rs::orchestrator::{Orchestrator, RunSummary};
use web_recon_rs::probe::HttpProber;
use web_recon_rs::render::Renderer;
use web_recon_rs::report;
use web_recon_rs::scanner::{PortDialer, PortScanner, TcpDialer};
use web_recon_rs::types::{ScanResult, Target};

const OK_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: 26\r\nConnection: close\r\n\r\n<html>hello world</html>\n\n";
const REDIRECT: &str = "HTTP/1.1 301 Moved Permanently\r\nLocation: https://other.example\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

fn options(ports: Vec<u16>) -> Options {
    Options {
        ports,
        port_timeout: Duration::from_millis(500),
        limits: ConcurrencyLimits {
            targets: 2,
            render_sessions: 2,
            ..Default::default()
        },
        ..Options::default()
    }
}

fn orchestrator(
    options: Options,
    resolver: Arc<FixedResolver>,
    classifier: Arc<dyn CdnClassifier>,
    dialer: Arc<dyn PortDialer>,
    renderer: Arc<dyn Renderer>,
) -> Arc<Orchestrator> {
    let prober = HttpProber::new(&options, None).unwrap();
    let scanner = PortScanner::new(classifier, dialer);
    Arc::new(Orchestrator::new(options, resolver, scanner, prober, renderer))
}

async fn run(orch: Arc<Orchestrator>, targets: Vec<Target>) -> (Vec<ScanResult>, RunSummary) {
    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(orch.run(targets, tx));
    let results = report::collect(rx).await;
    (results, handle.await.unwrap().unwrap())
}

#[tokio::test]
async fn reachable_port_yields_one_result_with_http_fallback() {
    let server = http_server(OK_PAGE).await;
    let mut resolver = FixedResolver::new("127.0.0.1");
    resolver.cname = vec!["edge.example.net".into()];
    let renderer = Arc::new(RecordingRenderer::default());
    let orch = orchestrator(
        options(vec![server.port]),
        Arc::new(resolver),
        Arc::new(StaticClassifier::default()),
        Arc::new(TcpDialer),
        renderer.clone(),
    );

    let (results, summary) = run(orch, vec![Target::new("127.0.0.1")]).await;

    assert_eq!(summary.targets, 1);
    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.url, format!("http://127.0.0.1:{}", server.port));
    assert_eq!(r.infos.scheme, "http");
    assert_eq!(r.infos.status_code, 200);
    assert_eq!(r.infos.content_type, "text/html");
    assert_eq!(r.infos.content_length, 26);
    assert_eq!(r.infos.ports, vec![server.port]);
    assert_eq!(r.infos.ip, "127.0.0.1");
    assert_eq!(r.infos.cname, vec!["edge.example.net".to_string()]);
    assert_eq!(r.infos.title, "Test Page");
    let names: Vec<&str> = r.infos.technologies.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Nginx", "PHP"]);
    assert!(!r.timestamp.is_empty());
    assert_eq!(server.requests.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(*renderer.urls.lock().unwrap(), vec![r.url.clone()]);
}

#[tokio::test]
async fn https_success_needs_no_http_fallback() {
    let server = https_server(OK_PAGE).await;
    let renderer = Arc::new(RecordingRenderer::default());
    let orch = orchestrator(
        options(vec![server.port]),
        Arc::new(FixedResolver::new("127.0.0.1")),
        Arc::new(StaticClassifier::default()),
        Arc::new(TcpDialer),
        renderer.clone(),
    );

    let (results, _) = run(orch, vec![Target::new("127.0.0.1")]).await;

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.url, format!("https://127.0.0.1:{}", server.port));
    assert_eq!(r.infos.scheme, "https");
    assert_eq!(r.infos.status_code, 200);
    assert_eq!(r.infos.content_length, 26);
    assert_eq!(server.tls_requests.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(server.plain_requests.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(*renderer.urls.lock().unwrap(), vec![r.url.clone()]);
}

#[tokio::test]
async fn redirect_location_is_recorded_and_rendered() {
    let server = http_server(REDIRECT).await;
    let renderer = Arc::new(RecordingRenderer::default());
    let orch = orchestrator(
        options(vec![server.port]),
        Arc::new(FixedResolver::new("127.0.0.1")),
        Arc::new(StaticClassifier::default()),
        Arc::new(TcpDialer),
        renderer.clone(),
    );

    let (results, _) = run(orch, vec![Target::new("127.0.0.1")]).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].infos.location, "https://other.example");
    assert_eq!(results[0].infos.status_code, 301);
    assert_eq!(*renderer.urls.lock().unwrap(), vec!["https://other.example".to_string()]);
    assert_eq!(*renderer.statuses.lock().unwrap(), vec![301]);
}

#[tokio::test]
async fn render_failure_keeps_probe_fields() {
    let server = http_server(OK_PAGE).await;
    let renderer = Arc::new(RecordingRenderer { fail: true, ..Default::default() });
    let orch = orchestrator(
        options(vec![server.port]),
        Arc::new(FixedResolver::new("127.0.0.1")),
        Arc::new(StaticClassifier::default()),
        Arc::new(TcpDialer),
        renderer,
    );

    let (results, _) = run(orch, vec![Target::new("127.0.0.1")]).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].infos.status_code, 200);
    assert!(results[0].infos.title.is_empty());
    assert!(results[0].infos.technologies.is_empty());
}

#[tokio::test]
async fn hosts_sharing_an_ip_are_dialed_once() {
    let dialer = Arc::new(RecordingDialer::default());
    let resolver = Arc::new(FixedResolver::new("192.0.2.40"));
    let orch = orchestrator(
        options(vec![80, 443, 8080]),
        resolver.clone(),
        Arc::new(StaticClassifier::default()),
        dialer.clone(),
        Arc::new(RecordingRenderer::default()),
    );

    let targets = vec![Target::new("a.example"), Target::new("b.example"), Target::new("c.example")];
    let (results, summary) = run(orch.clone(), targets).await;

    assert!(results.is_empty());
    assert_eq!(summary.targets, 3);
    assert_eq!(resolver.lookups.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(dialer.calls(), 3);
    assert_eq!(orch.scanner().entries().await.len(), 1);
}

#[tokio::test]
async fn pre_resolved_targets_skip_lookup() {
    let dialer = Arc::new(RecordingDialer::default());
    let resolver = Arc::new(FixedResolver::new("192.0.2.50"));
    let orch = orchestrator(
        options(vec![80]),
        resolver.clone(),
        Arc::new(StaticClassifier::default()),
        dialer.clone(),
        Arc::new(RecordingRenderer::default()),
    );

    let target = Target::with_ip("known.example", "192.0.2.60".parse().unwrap());
    run(orch, vec![target]).await;

    assert_eq!(resolver.lookups.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(dialer.dialed.lock().unwrap()[0].0, "192.0.2.60".parse::<std::net::IpAddr>().unwrap());
}

#[tokio::test]
async fn cdn_target_only_dials_web_ports() {
    let dialer = Arc::new(RecordingDialer::default());
    let orch = orchestrator(
        options(vec![80, 443, 8080, 8443]),
        Arc::new(FixedResolver::new("104.16.0.9")),
        Arc::new(StaticClassifier::with_cdn("104.16.0.9", "cloudflare")),
        dialer.clone(),
        Arc::new(RecordingRenderer::default()),
    );

    run(orch, vec![Target::new("cdn.example")]).await;

    assert_eq!(dialer.dialed_ports(), vec![80, 443]);
}

#[tokio::test]
async fn failures_are_isolated_per_target() {
    let server = http_server(OK_PAGE).await;
    let orch = orchestrator(
        options(vec![server.port]),
        Arc::new(FixedResolver::new("127.0.0.1")),
        Arc::new(StaticClassifier::default()),
        Arc::new(TcpDialer),
        Arc::new(RecordingRenderer::default()),
    );

    let targets = vec![Target::new("gone.invalid"), Target::new("127.0.0.1")];
    let (results, summary) = run(orch, targets).await;

    assert_eq!(results.len(), 1);
    assert_eq!(summary.failed_targets, 1);
}

#[tokio::test]
async fn classifier_failure_aborts_run() {
    let orch = orchestrator(
        options(vec![80]),
        Arc::new(FixedResolver::new("192.0.2.70")),
        Arc::new(StaticClassifier::failing()),
        Arc::new(RecordingDialer::default()),
        Arc::new(RecordingRenderer::default()),
    );

    let (tx, rx) = mpsc::channel(4);
    let handle = tokio::spawn(orch.run(vec![Target::new("a.example")], tx));
    assert!(report::collect(rx).await.is_empty());
    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn malformed_structured_lines_are_skipped() {
    let server = http_server(OK_PAGE).await;
    let mut opts = options(vec![server.port]);
    opts.structured_input = true;
    let orch = orchestrator(
        opts,
        Arc::new(FixedResolver::new("192.0.2.99")),
        Arc::new(StaticClassifier::default()),
        Arc::new(TcpDialer),
        Arc::new(RecordingRenderer::default()),
    );

    let lines = vec![
        "{\"name\": \"broken\"".to_string(),
        String::new(),
        r#"{"name":"127.0.0.1","addresses":[{"ip":"127.0.0.1"}]}"#.to_string(),
        r#"{"name":"x.example","addresses":[]}"#.to_string(),
    ];
    let (tx, rx) = mpsc::channel(4);
    let handle = tokio::spawn(orch.run_lines(lines, tx));
    let results = report::collect(rx).await;
    let summary = handle.await.unwrap().unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].infos.ip, "127.0.0.1");
    assert_eq!(summary.skipped_lines, 2);
    assert_eq!(summary.targets, 1);
}

#[tokio::test]
async fn unreachable_port_443_emits_nothing() {
    // Nothing listens on 443 locally in the test environment; the dialer lies.
    let renderer = Arc::new(RecordingRenderer::default());
    let mut opts = options(vec![443]);
    opts.probe_timeout = Duration::from_secs(2);
    let orch = orchestrator(
        opts,
        Arc::new(FixedResolver::new("127.0.0.1")),
        Arc::new(StaticClassifier::default()),
        Arc::new(RecordingDialer::open(&[443])),
        renderer.clone(),
    );

    let (results, summary) = run(orch, vec![Target::new("127.0.0.1")]).await;

    assert!(results.is_empty());
    assert_eq!(summary.failed_targets, 0);
    assert!(renderer.urls.lock().unwrap().is_empty());
}
