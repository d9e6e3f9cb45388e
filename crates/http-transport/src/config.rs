use std::time::Duration;

use pipeline::Headers;
use serde::{Deserialize, Serialize};

/// Settings for [`crate::HttpTransportSender`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTransportConfig {
    /// URL every request is posted to.
    pub endpoint: String,
    /// Per-request deadline covering connect, send and body download.
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub pool_max_idle_per_host: usize,
    /// Sent with every request; per-request headers win on conflict.
    pub headers: Headers,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4000/graphql".into(),
            timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            pool_max_idle_per_host: 10,
            headers: Headers::new(),
        }
    }
}

impl HttpTransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: HttpTransportConfig =
            serde_json::from_str(r#"{ "endpoint": "https://api.example.com/graphql" }"#).unwrap();

        assert_eq!(config.endpoint, "https://api.example.com/graphql");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.headers.is_empty());
    }
}
