//! Transport stage that performs one physical call per attempt.

use std::sync::{Arc, Mutex, PoisonError};

use pipeline::{
    InboundResponse, InterceptorChain, OutboundRequest, PipelineError, TransportError,
    TransportRequest, TransportSender, TransportStage,
};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

/// Sends each attempt on its own Tokio task through a [`TransportSender`].
///
/// Cancelling aborts the task of the attempt in flight.
pub struct NetworkTransport {
    sender: Arc<dyn TransportSender>,
    in_flight: Mutex<Option<AbortHandle>>,
}

impl NetworkTransport {
    pub fn new(sender: Arc<dyn TransportSender>) -> Self {
        Self {
            sender,
            in_flight: Mutex::new(None),
        }
    }
}

impl TransportStage for NetworkTransport {
    fn name(&self) -> &'static str {
        "network-transport"
    }

    fn dispatch(&self, request: OutboundRequest, chain: InterceptorChain) {
        let Some(body) = request.body.clone() else {
            chain.report_error(PipelineError::MissingBody, request, None);
            return;
        };
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                let error = TransportError::Other {
                    message: err.to_string(),
                };
                chain.report_error(error.into(), request, None);
                return;
            }
        };
        let transport_request = TransportRequest {
            headers: request.headers.clone(),
            body,
        };
        let sender = Arc::clone(&self.sender);
        debug!(
            operation = %request.operation().name(),
            request_id = %request.request_id(),
            attempt = request.attempt(),
            "sending request"
        );
        // The lock is held across the spawn so a retry dispatched from inside
        // the new task cannot store its handle before this one.
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let watcher = chain.clone();
        let task = runtime.spawn(async move {
            match sender.send(transport_request).await {
                Ok(response) => {
                    chain.proceed_with_response(request, InboundResponse::from_transport(response))
                }
                Err(err) => chain.report_error(err.into(), request, None),
            }
        });
        if watcher.is_cancelled() {
            debug!("chain cancelled during dispatch; aborting request");
            task.abort();
            return;
        }
        *in_flight = Some(task.abort_handle());
    }

    fn cancel(&self) {
        let in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = in_flight {
            debug!("aborting in-flight request");
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use pipeline::{Headers, ParsedValue, StageSet, TransportResponse};
    use serde_json::json;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::timeout;

    use super::*;
    use crate::testing::hero_request;
    use crate::{
        JsonParseInterceptor, RequestEncodingInterceptor, RetryConfig, RetryOnErrorEscalation,
    };

    struct Fixed(Result<TransportResponse, TransportError>);

    #[async_trait]
    impl TransportSender for Fixed {
        async fn send(&self, _: TransportRequest) -> Result<TransportResponse, TransportError> {
            self.0.clone()
        }
    }

    struct Hang;

    #[async_trait]
    impl TransportSender for Hang {
        async fn send(&self, _: TransportRequest) -> Result<TransportResponse, TransportError> {
            std::future::pending().await
        }
    }

    fn chain(sender: Arc<dyn TransportSender>) -> InterceptorChain {
        let codec = Arc::new(pipeline::JsonCodec);
        InterceptorChain::new(
            StageSet::new(Arc::new(NetworkTransport::new(sender)))
                .with_pre(Arc::new(RequestEncodingInterceptor::new(codec.clone())))
                .with_post(Arc::new(JsonParseInterceptor::new(codec))),
        )
    }

    fn run(chain: &InterceptorChain) -> oneshot::Receiver<Result<ParsedValue, PipelineError>> {
        let (tx, rx) = oneshot::channel();
        chain.kickoff(
            hero_request(),
            Box::new(move |r| {
                let _ = tx.send(r);
            }),
        );
        rx
    }

    #[tokio::test]
    async fn response_flows_into_post_stages() {
        let body = json!({ "data": { "hero": "R2-D2" } });
        let sender = Fixed(Ok(TransportResponse {
            status: 200,
            headers: Headers::new(),
            body: serde_json::to_vec(&body).unwrap(),
        }));

        let result = timeout(Duration::from_secs(2), run(&chain(Arc::new(sender))))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Ok(body));
    }

    #[tokio::test]
    async fn sender_failure_is_reported() {
        let result = timeout(
            Duration::from_secs(2),
            run(&chain(Arc::new(Fixed(Err(TransportError::Timeout))))),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(result, Err(PipelineError::Transport(TransportError::Timeout)));
    }

    #[tokio::test]
    async fn missing_body_fails_without_sending() {
        let chain = InterceptorChain::new(
            StageSet::new(Arc::new(NetworkTransport::new(Arc::new(Hang))))
                .with_pre(Arc::new(crate::HeaderInterceptor::default())),
        );
        let result = run(&chain).await.unwrap();
        assert_eq!(result, Err(PipelineError::MissingBody));
    }

    #[tokio::test]
    async fn cancel_aborts_the_request() {
        let chain = chain(Arc::new(Hang));
        let rx = run(&chain);
        tokio::task::yield_now().await;

        chain.cancel();
        assert!(timeout(Duration::from_secs(2), rx).await.unwrap().is_err());
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Times out the first attempt, then never answers.
    struct FailThenHang {
        calls: AtomicU32,
        started: mpsc::UnboundedSender<()>,
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TransportSender for FailThenHang {
        async fn send(&self, _: TransportRequest) -> Result<TransportResponse, TransportError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(TransportError::Timeout);
            }
            let _guard = SetOnDrop(Arc::clone(&self.dropped));
            let _ = self.started.send(());
            std::future::pending().await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancel_reaches_a_retried_attempt() {
        for _ in 0..200 {
            let dropped = Arc::new(AtomicBool::new(false));
            let (started_tx, mut started) = mpsc::unbounded_channel();
            let sender = FailThenHang {
                calls: AtomicU32::new(0),
                started: started_tx,
                dropped: Arc::clone(&dropped),
            };
            let codec = Arc::new(pipeline::JsonCodec);
            let retry = RetryConfig {
                max_attempts: 3,
                base_delay_ms: 0,
            };
            let chain = InterceptorChain::new(
                StageSet::new(Arc::new(NetworkTransport::new(Arc::new(sender))))
                    .with_pre(Arc::new(RequestEncodingInterceptor::new(codec.clone())))
                    .with_post(Arc::new(JsonParseInterceptor::new(codec)))
                    .with_escalation(Arc::new(RetryOnErrorEscalation::new(retry))),
            );

            let _rx = run(&chain);
            timeout(Duration::from_secs(2), started.recv())
                .await
                .unwrap()
                .unwrap();
            chain.cancel();

            let aborted = timeout(Duration::from_secs(2), async {
                while !dropped.load(Ordering::SeqCst) {
                    tokio::task::yield_now().await;
                }
            })
            .await;
            assert!(aborted.is_ok(), "retried attempt kept running after cancel");
        }
    }
}
