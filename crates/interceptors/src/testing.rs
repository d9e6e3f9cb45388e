//! Fixtures shared by the stage tests in this crate.

use std::sync::{Arc, Mutex};

use pipeline::{
    Completion, InboundResponse, InterceptorChain, Operation, OperationKind, OperationName,
    OutboundRequest, ParsedValue, PipelineError, RequestInterceptor, ResponseInterceptor,
    StageSet, TransportResponse, TransportStage,
};
use serde_json::json;

pub type Outcomes = Arc<Mutex<Vec<Result<ParsedValue, PipelineError>>>>;

pub fn hero_request() -> OutboundRequest {
    let operation = Operation::new(
        OperationName::new("Hero").unwrap(),
        OperationKind::Query,
        "query Hero($episode: String) { hero(episode: $episode) { name } }",
    )
    .with_variables(json!({ "episode": "JEDI" }).as_object().unwrap().clone());
    OutboundRequest::new(Arc::new(operation))
}

pub fn recorder() -> (Outcomes, Completion) {
    let outcomes = Outcomes::default();
    let sink = Arc::clone(&outcomes);
    (
        outcomes,
        Box::new(move |result| sink.lock().unwrap().push(result)),
    )
}

pub fn outcome_of(outcomes: &Outcomes) -> Option<Result<ParsedValue, PipelineError>> {
    let outcomes = outcomes.lock().unwrap();
    assert!(outcomes.len() <= 1, "completion fired {} times", outcomes.len());
    outcomes.first().cloned()
}

/// Transport that records the request it receives and goes no further.
#[derive(Default)]
struct Capture(Mutex<Option<OutboundRequest>>);

impl TransportStage for Capture {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn dispatch(&self, request: OutboundRequest, _chain: InterceptorChain) {
        *self.0.lock().unwrap() = Some(request);
    }
}

/// Runs `stage` as the only pre-transport stage and returns what reached the
/// transport, if anything.
pub fn capture_request(
    stage: Arc<dyn RequestInterceptor>,
    request: OutboundRequest,
) -> (Option<OutboundRequest>, Outcomes) {
    let capture = Arc::new(Capture::default());
    let chain = InterceptorChain::new(
        StageSet::new(Arc::clone(&capture) as Arc<dyn TransportStage>).with_pre(stage),
    );
    let (outcomes, completion) = recorder();
    chain.kickoff(request, completion);
    let captured = capture.0.lock().unwrap().take();
    (captured, outcomes)
}

struct Pass;

impl RequestInterceptor for Pass {
    fn name(&self) -> &'static str {
        "pass"
    }

    fn intercept(&self, request: OutboundRequest, chain: InterceptorChain) {
        chain.proceed(request);
    }
}

/// Transport that answers with a canned response.
pub struct Canned(pub TransportResponse);

impl TransportStage for Canned {
    fn name(&self) -> &'static str {
        "canned"
    }

    fn dispatch(&self, request: OutboundRequest, chain: InterceptorChain) {
        chain.proceed_with_response(request, InboundResponse::from_transport(self.0.clone()));
    }
}

pub fn response(status: u16, body: ParsedValue) -> TransportResponse {
    TransportResponse {
        status,
        headers: Default::default(),
        body: serde_json::to_vec(&body).unwrap(),
    }
}

/// Runs `post` against a canned transport response.
pub fn run_post(
    request: OutboundRequest,
    canned: TransportResponse,
    post: Vec<Arc<dyn ResponseInterceptor>>,
) -> Outcomes {
    let stages = post.into_iter().fold(
        StageSet::new(Arc::new(Canned(canned))).with_pre(Arc::new(Pass)),
        StageSet::with_post,
    );
    let chain = InterceptorChain::new(stages);
    let (outcomes, completion) = recorder();
    chain.kickoff(request, completion);
    outcomes
}
