use async_trait::async_trait;
use pipeline::{Headers, TransportError, TransportRequest, TransportResponse, TransportSender};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use tracing::{debug, instrument};

use crate::{HttpTransportConfig, HttpTransportError};

/// Posts encoded request bodies to a single endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransportSender {
    client: Client,
    endpoint: Url,
}

fn header_map(headers: &Headers) -> Result<HeaderMap, HttpTransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let invalid = || HttpTransportError::InvalidHeader { name: name.clone() };
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        map.insert(name, value);
    }
    Ok(map)
}

fn response_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect()
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connection {
            message: err.to_string(),
        }
    } else if err.is_builder() {
        TransportError::InvalidRequest {
            message: err.to_string(),
        }
    } else {
        TransportError::Other {
            message: err.to_string(),
        }
    }
}

impl HttpTransportSender {
    pub fn new(config: &HttpTransportConfig) -> Result<Self, HttpTransportError> {
        let endpoint =
            Url::parse(&config.endpoint).map_err(|e| HttpTransportError::InvalidEndpoint {
                endpoint: config.endpoint.clone(),
                message: e.to_string(),
            })?;
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .default_headers(header_map(&config.headers)?)
            .build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TransportSender for HttpTransportSender {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, bytes = request.body.len()))]
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let headers = header_map(&request.headers).map_err(|e| TransportError::InvalidRequest {
            message: e.to_string(),
        })?;
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let headers = response_headers(response.headers());
        let body = response.bytes().await.map_err(transport_error)?.to_vec();
        debug!(status, bytes = body.len(), "response received");
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
