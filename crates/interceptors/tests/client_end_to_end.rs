//! Full chains built by the default provider against an in-process server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use batching::{BatchCoalescer, BatchConfig};
use interceptors::{DefaultInterceptorProvider, QueryClient, RetryConfig, TokioCallbackContext};
use pipeline::{
    CachePolicy, Headers, JsonCodec, Operation, OperationKind, OperationName, OutboundRequest,
    PipelineError, TransportError, TransportRequest, TransportResponse, TransportSender,
};
use serde_json::{json, Value};
use tokio::time::timeout;

/// Answers `{"data": {"name": <operationName>}}` per operation, failing the
/// first `unavailable` calls with a 503.
#[derive(Default)]
struct StubServer {
    unavailable: usize,
    calls: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
}

impl StubServer {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn answer(item: &Value) -> Value {
    json!({ "data": { "name": item["operationName"] } })
}

#[async_trait]
impl TransportSender for StubServer {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let body: Value = serde_json::from_slice(&request.body).map_err(|e| {
            TransportError::InvalidRequest {
                message: e.to_string(),
            }
        })?;
        self.bodies.lock().unwrap().push(body.clone());
        if call < self.unavailable {
            return Ok(TransportResponse {
                status: 503,
                headers: Headers::new(),
                body: b"busy".to_vec(),
            });
        }
        let reply = match &body {
            Value::Array(items) => Value::Array(items.iter().map(answer).collect()),
            single => answer(single),
        };
        Ok(TransportResponse {
            status: 200,
            headers: Headers::new(),
            body: serde_json::to_vec(&reply).unwrap(),
        })
    }
}

fn query(name: &str) -> Operation {
    Operation::new(
        OperationName::new(name).unwrap(),
        OperationKind::Query,
        format!("query {name} {{ name }}"),
    )
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay_ms: 1,
    }
}

#[tokio::test]
async fn query_round_trip() {
    let server = Arc::new(StubServer::default());
    let provider = DefaultInterceptorProvider::new(server.clone(), Arc::new(JsonCodec));
    let client = QueryClient::new(Arc::new(provider));

    let result = client
        .execute(OutboundRequest::new(Arc::new(query("Hero"))))
        .await;

    assert_eq!(result, Ok(json!({ "data": { "name": "Hero" } })));
    assert_eq!(server.calls(), 1);
    assert_eq!(server.bodies.lock().unwrap()[0]["query"], "query Hero { name }");
}

#[tokio::test]
async fn unavailable_server_is_retried() {
    let server = Arc::new(StubServer {
        unavailable: 2,
        ..StubServer::default()
    });
    let provider = DefaultInterceptorProvider::new(server.clone(), Arc::new(JsonCodec))
        .with_retry(fast_retry());
    let client = QueryClient::new(Arc::new(provider));

    let result = timeout(
        Duration::from_secs(2),
        client.execute(OutboundRequest::new(Arc::new(query("Hero")))),
    )
    .await
    .unwrap();

    assert_eq!(result, Ok(json!({ "data": { "name": "Hero" } })));
    assert_eq!(server.calls(), 3);
}

#[tokio::test]
async fn retries_stop_at_the_limit() {
    let server = Arc::new(StubServer {
        unavailable: 10,
        ..StubServer::default()
    });
    let provider = DefaultInterceptorProvider::new(server.clone(), Arc::new(JsonCodec))
        .with_retry(fast_retry());
    let client = QueryClient::new(Arc::new(provider));

    let result = timeout(
        Duration::from_secs(2),
        client.execute(OutboundRequest::new(Arc::new(query("Hero")))),
    )
    .await
    .unwrap();

    assert_eq!(
        result,
        Err(PipelineError::HttpStatus {
            status: 503,
            body: "busy".into(),
        })
    );
    assert_eq!(server.calls(), 3);
}

#[tokio::test]
async fn cache_first_serves_the_second_call_locally() {
    let server = Arc::new(StubServer::default());
    let provider = DefaultInterceptorProvider::new(server.clone(), Arc::new(JsonCodec));
    let client = QueryClient::new(Arc::new(provider));
    let operation = Arc::new(query("Hero"));

    let first = client
        .execute(OutboundRequest::new(operation.clone()).with_cache_policy(CachePolicy::CacheFirst))
        .await;
    let second = client
        .execute(OutboundRequest::new(operation).with_cache_policy(CachePolicy::CacheFirst))
        .await;

    assert_eq!(first, second);
    assert_eq!(server.calls(), 1);
}

#[tokio::test]
async fn batchable_queries_share_one_call() {
    let server = Arc::new(StubServer::default());
    let coalescer = BatchCoalescer::new(
        BatchConfig {
            interval_ms: 20,
            ..BatchConfig::default()
        },
        server.clone(),
        Arc::new(JsonCodec),
    );
    coalescer.start().unwrap();
    let provider = DefaultInterceptorProvider::new(server.clone(), Arc::new(JsonCodec))
        .with_batching(coalescer.clone());
    let client = QueryClient::new(Arc::new(provider))
        .with_context(Arc::new(TokioCallbackContext::current().unwrap()));

    let luke = client.submit(OutboundRequest::new(Arc::new(
        query("Luke").with_batching(true),
    )));
    let leia = client.submit(OutboundRequest::new(Arc::new(
        query("Leia").with_batching(true),
    )));
    let (luke, leia) = timeout(Duration::from_secs(2), async {
        (luke.wait().await, leia.wait().await)
    })
    .await
    .unwrap();

    assert_eq!(luke, Ok(json!({ "data": { "name": "Luke" } })));
    assert_eq!(leia, Ok(json!({ "data": { "name": "Leia" } })));
    assert_eq!(server.calls(), 1);
    assert_eq!(server.bodies.lock().unwrap()[0].as_array().map(Vec::len), Some(2));
    coalescer.stop();
}

#[tokio::test]
async fn cancelling_a_submission_stops_the_request() {
    let server = Arc::new(StubServer::default());
    let coalescer = BatchCoalescer::new(
        BatchConfig {
            interval_ms: 3_600_000,
            ..BatchConfig::default()
        },
        server.clone(),
        Arc::new(JsonCodec),
    );
    coalescer.start().unwrap();
    let provider = DefaultInterceptorProvider::new(server.clone(), Arc::new(JsonCodec))
        .with_batching(coalescer.clone());
    let client = QueryClient::new(Arc::new(provider));

    let pending = client.submit(OutboundRequest::new(Arc::new(
        query("Han").with_batching(true),
    )));
    assert_eq!(coalescer.pending_len(), 1);
    pending.cancel();

    assert_eq!(coalescer.pending_len(), 0);
    assert_eq!(pending.wait().await, Err(PipelineError::Cancelled));
    assert_eq!(coalescer.flush().await, 0);
    assert_eq!(server.calls(), 0);
}
