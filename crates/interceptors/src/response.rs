//! Post-transport stages: status checking and response parsing.

use std::sync::Arc;

use pipeline::{
    InboundResponse, InterceptorChain, OutboundRequest, ParsedValue, PayloadCodec, PipelineError,
    ResponseInterceptor,
};
use tracing::{debug, warn};

/// Fails the chain on a non-2xx status, keeping the response for the
/// escalation hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseCodeInterceptor;

impl ResponseInterceptor for ResponseCodeInterceptor {
    fn name(&self) -> &'static str {
        "response-code"
    }

    fn intercept(
        &self,
        request: OutboundRequest,
        response: InboundResponse,
        chain: InterceptorChain,
    ) {
        if response.is_success() {
            chain.proceed_with_response(request, response);
            return;
        }
        let status = response.metadata.status;
        warn!(
            operation = %request.operation().name(),
            status,
            "unsuccessful response status"
        );
        let error = PipelineError::HttpStatus {
            status,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        };
        chain.report_error(error, request, Some(response));
    }
}

/// Decodes the response body and records it as the parsed result.
///
/// The parsed value is the whole response envelope, so partial errors stay
/// visible alongside `data`. A response carrying errors and no data fails
/// with [`PipelineError::GraphErrors`].
pub struct JsonParseInterceptor {
    codec: Arc<dyn PayloadCodec>,
}

impl JsonParseInterceptor {
    pub fn new(codec: Arc<dyn PayloadCodec>) -> Self {
        Self { codec }
    }
}

fn error_messages(envelope: &ParsedValue) -> Vec<String> {
    envelope
        .get("errors")
        .and_then(ParsedValue::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|e| match e.get("message").and_then(ParsedValue::as_str) {
                    Some(message) => message.to_owned(),
                    None => e.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

impl ResponseInterceptor for JsonParseInterceptor {
    fn name(&self) -> &'static str {
        "json-parse"
    }

    fn intercept(
        &self,
        request: OutboundRequest,
        mut response: InboundResponse,
        chain: InterceptorChain,
    ) {
        let envelope = match self.codec.decode(&response.body) {
            Ok(value) => value,
            Err(err) => {
                chain.report_error(err.into(), request, Some(response));
                return;
            }
        };
        let messages = error_messages(&envelope);
        let has_data = envelope.get("data").is_some_and(|d| !d.is_null());
        if !messages.is_empty() && !has_data {
            chain.report_error(PipelineError::GraphErrors { messages }, request, Some(response));
            return;
        }
        if !messages.is_empty() {
            debug!(errors = messages.len(), "response carries partial errors");
        }
        response.parsed = Some(envelope);
        chain.proceed_with_response(request, response);
    }
}

#[cfg(test)]
mod tests {
    use pipeline::JsonCodec;
    use serde_json::json;

    use super::*;
    use crate::testing::{hero_request, outcome_of, response, run_post};

    fn post_stages() -> Vec<Arc<dyn ResponseInterceptor>> {
        vec![
            Arc::new(ResponseCodeInterceptor),
            Arc::new(JsonParseInterceptor::new(Arc::new(JsonCodec))),
        ]
    }

    #[test]
    fn success_delivers_the_envelope() {
        let body = json!({ "data": { "hero": { "name": "R2-D2" } } });
        let outcomes = run_post(hero_request(), response(200, body.clone()), post_stages());

        assert_eq!(outcome_of(&outcomes), Some(Ok(body)));
    }

    #[test]
    fn non_success_status_fails() {
        let outcomes = run_post(
            hero_request(),
            response(503, json!("unavailable")),
            post_stages(),
        );

        assert_eq!(
            outcome_of(&outcomes),
            Some(Err(PipelineError::HttpStatus {
                status: 503,
                body: "\"unavailable\"".into(),
            }))
        );
    }

    #[test]
    fn errors_without_data_fail() {
        let body = json!({ "data": null, "errors": [{ "message": "boom" }, { "code": 1 }] });
        let outcomes = run_post(hero_request(), response(200, body), post_stages());

        assert_eq!(
            outcome_of(&outcomes),
            Some(Err(PipelineError::GraphErrors {
                messages: vec!["boom".into(), "{\"code\":1}".into()],
            }))
        );
    }

    #[test]
    fn partial_errors_are_kept() {
        let body = json!({ "data": { "hero": null }, "errors": [{ "message": "partial" }] });
        let outcomes = run_post(hero_request(), response(200, body.clone()), post_stages());

        assert_eq!(outcome_of(&outcomes), Some(Ok(body)));
    }

    #[test]
    fn undecodable_body_is_a_codec_error() {
        let mut canned = response(200, json!(null));
        canned.body = b"not json".to_vec();
        let outcomes = run_post(hero_request(), canned, post_stages());

        assert!(matches!(
            outcome_of(&outcomes),
            Some(Err(PipelineError::Codec(_)))
        ));
    }
}
