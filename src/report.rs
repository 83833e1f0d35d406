//! Result sinks: streamed JSON lines or one buffered report.
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::types::ScanResult;

#[derive(Debug, Serialize)]
pub struct Report {
    pub generated_at: String,
    pub screenshot_dir: Option<PathBuf>,
    pub total: usize,
    pub results: Vec<ScanResult>,
}

/// Write each result as one JSON line as soon as it arrives. Returns the count written.
pub async fn stream_json_lines<W>(mut results: mpsc::Receiver<ScanResult>, mut out: W) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut n = 0;
    while let Some(result) = results.recv().await {
        let mut line = serde_json::to_vec(&result)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
        n += 1;
    }
    Ok(n)
}

/// Drain the channel into memory. The single consumer is the only writer of the buffer.
pub async fn collect(mut results: mpsc::Receiver<ScanResult>) -> Vec<ScanResult> {
    let mut out = Vec::new();
    while let Some(result) = results.recv().await {
        out.push(result);
    }
    out
}

pub fn build_report(results: Vec<ScanResult>, screenshot_dir: Option<&Path>) -> Report {
    Report {
        generated_at: crate::timestamp(),
        screenshot_dir: screenshot_dir.map(Path::to_path_buf),
        total: results.len(),
        results,
    }
}

/// Write the report as pretty JSON to `path`, or to stdout when `None`.
pub fn write_report(path: Option<&Path>, report: &Report) -> Result<()> {
    match path {
        Some(p) => {
            let file = File::create(p).with_context(|| format!("failed to create report: {}", p.display()))?;
            serde_json::to_writer_pretty(file, report)?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, report)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

/// File name for the screenshot of `url`: `:` becomes `_`, `/` is dropped, `.` becomes `_`.
pub fn screenshot_name(url: &str) -> String {
    let stem = url.replace(':', "_").replace('/', "").replace('.', "_");
    format!("{stem}.png")
}

/// Save `png` under `dir` and return the file name used.
pub async fn save_screenshot(dir: &Path, url: &str, png: &[u8]) -> std::io::Result<String> {
    let name = screenshot_name(url);
    tokio::fs::write(dir.join(&name), png).await?;
    Ok(name)
}
