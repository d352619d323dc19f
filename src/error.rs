use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
