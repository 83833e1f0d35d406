use std::net::IpAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid input line: {0}")]
    Input(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("dialer setup failed: {0}")]
    Dialer(String),

    #[error("cdn classification failed for {ip}: {reason}")]
    Classifier { ip: IpAddr, reason: String },

    #[error("http client setup failed: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{host}:{port} is unreachable")]
    Unreachable { host: String, port: u16 },

    #[error("render of {url} failed: {reason}")]
    Render { url: String, reason: String },

    #[error("renderer setup failed: {0}")]
    RendererInit(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Errors after which no meaningful continuation of the run exists.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::Config(_)
                | ScanError::Dialer(_)
                | ScanError::Classifier { .. }
                | ScanError::Client(_)
                | ScanError::RendererInit(_)
        )
    }
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;
