mod common;

use common::{RecordingDialer, StaticClassifier};
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use web_recon_rs::scanner::PortScanner;

const TIMEOUT: Duration = Duration::from_millis(200);

#[tokio::test]
async fn cdn_address_only_dials_web_ports() {
    let dialer = Arc::new(RecordingDialer::open(&[80, 443, 8080]));
    let scanner = PortScanner::new(Arc::new(StaticClassifier::with_cdn("104.16.0.1", "cloudflare")), dialer.clone());
    let ip: IpAddr = "104.16.0.1".parse().unwrap();

    let scan = scanner.scan(ip, &[80, 443, 8080, 8443], TIMEOUT).await.unwrap();

    assert_eq!(dialer.dialed_ports(), vec![80, 443]);
    assert_eq!(scan.open_ports, vec![80, 443]);
    assert_eq!(scan.cdn.as_deref(), Some("cloudflare"));
}

#[tokio::test]
async fn cdn_reduction_applies_even_without_web_ports_configured() {
    let dialer = Arc::new(RecordingDialer::default());
    let scanner = PortScanner::new(Arc::new(StaticClassifier::with_cdn("151.101.1.1", "fastly")), dialer.clone());
    scanner
        .scan("151.101.1.1".parse().unwrap(), &[22, 3306], TIMEOUT)
        .await
        .unwrap();
    assert_eq!(dialer.dialed_ports(), vec![80, 443]);
}

#[tokio::test]
async fn second_scan_of_same_ip_hits_cache() {
    let dialer = Arc::new(RecordingDialer::open(&[443]));
    let scanner = PortScanner::new(Arc::new(StaticClassifier::default()), dialer.clone());
    let ip: IpAddr = "192.0.2.7".parse().unwrap();

    let first = scanner.scan(ip, &[80, 443], TIMEOUT).await.unwrap();
    let second = scanner.scan(ip, &[80, 443], TIMEOUT).await.unwrap();

    assert_eq!(dialer.calls(), 2);
    assert_eq!(first.open_ports, second.open_ports);
    assert!(!first.cached);
    assert!(second.cached);
}

#[tokio::test]
async fn concurrent_scans_of_same_ip_dial_once() {
    let dialer = Arc::new(RecordingDialer {
        open: vec![80],
        delay: Duration::from_millis(50),
        ..Default::default()
    });
    let scanner = Arc::new(PortScanner::new(Arc::new(StaticClassifier::default()), dialer.clone()));
    let ip: IpAddr = "192.0.2.8".parse().unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let scanner = scanner.clone();
        handles.push(tokio::spawn(async move { scanner.scan(ip, &[80, 443, 8080], TIMEOUT).await }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap().open_ports, vec![80]);
    }

    assert_eq!(dialer.calls(), 3);
    assert_eq!(scanner.entries().await.len(), 1);
}

#[tokio::test]
async fn distinct_ips_are_scanned_separately() {
    let dialer = Arc::new(RecordingDialer::open(&[80]));
    let scanner = PortScanner::new(Arc::new(StaticClassifier::default()), dialer.clone());
    scanner.scan("192.0.2.1".parse().unwrap(), &[80], TIMEOUT).await.unwrap();
    scanner.scan("192.0.2.2".parse().unwrap(), &[80], TIMEOUT).await.unwrap();
    assert_eq!(dialer.calls(), 2);
    assert_eq!(scanner.entries().await.len(), 2);
}

#[tokio::test]
async fn pool_size_bounds_concurrent_dials() {
    let dialer = Arc::new(RecordingDialer {
        open: vec![8001, 8004],
        delay: Duration::from_millis(20),
        ..Default::default()
    });
    let scanner = PortScanner::with_pool_size(Arc::new(StaticClassifier::default()), dialer.clone(), 2);

    let scan = scanner
        .scan("192.0.2.9".parse().unwrap(), &[8000, 8001, 8002, 8003, 8004, 8005], TIMEOUT)
        .await
        .unwrap();

    assert_eq!(scan.open_ports, vec![8001, 8004]);
    assert_eq!(dialer.calls(), 6);
    assert_eq!(dialer.peak.load(Ordering::SeqCst), 2);
}
