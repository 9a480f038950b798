use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to acquire a free local port: {0}")]
    Port(#[source] std::io::Error),

    #[error("Bridge command is empty")]
    EmptyCommand,

    #[error("Bridge executable not found: {0}")]
    NotFound(String),

    #[error("Failed to spawn bridge process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Bridge process exited before accepting connections ({0})")]
    Exited(ExitStatus),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid URL in `{field}`: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("failed to read request body: {0}")]
    Body(#[source] axum::Error),

    #[error("{0}")]
    Upstream(#[from] reqwest::Error),

    #[error("{0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to build response: {0}")]
    Response(#[from] axum::http::Error),
}
