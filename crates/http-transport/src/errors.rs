use thiserror::Error;

/// Failure to build an [`crate::HttpTransportSender`] from its configuration.
#[derive(Debug, Error)]
pub enum HttpTransportError {
    #[error("Invalid endpoint '{endpoint}': {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    #[error("Invalid header '{name}'")]
    InvalidHeader { name: String },

    #[error("HTTP client could not be built: {0}")]
    Client(#[from] reqwest::Error),
}
