//! Normalized-cache stages and an in-memory [`ObjectCache`].
//!
//! [`CacheReadInterceptor`] sits before encoding and can short-circuit the
//! chain with a cached value. [`CacheWriteInterceptor`] sits after parsing and
//! stores what came back. Both honour [`CachePolicy`] and ignore mutations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use pipeline::{
    CacheError, CacheKey, CachePolicy, InboundResponse, InterceptorChain, ObjectCache,
    OperationKind, OutboundRequest, ParsedValue, PipelineError, RequestInterceptor,
    ResponseInterceptor,
};
use serde_json::Value;
use tracing::{debug, warn};

/// Process-local cache keyed by [`CacheKey`].
///
/// Merging two objects overwrites top-level fields; any other combination
/// replaces the stored value.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<CacheKey, ParsedValue>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::Store {
        message: "cache lock poisoned".into(),
    }
}

impl ObjectCache for InMemoryCache {
    fn read(&self, key: &CacheKey) -> Result<Option<ParsedValue>, CacheError> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    fn merge(&self, key: CacheKey, value: ParsedValue) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        match (entries.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => existing.extend(incoming),
            (_, value) => {
                entries.insert(key, value);
            }
        }
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.entries.write().map_err(poisoned)?.remove(key).is_some())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

fn is_cacheable(request: &OutboundRequest) -> bool {
    request.operation().kind() == OperationKind::Query
}

/// Serves queries from the cache when the request's policy allows it.
pub struct CacheReadInterceptor {
    cache: Arc<dyn ObjectCache>,
}

impl CacheReadInterceptor {
    pub fn new(cache: Arc<dyn ObjectCache>) -> Self {
        Self { cache }
    }
}

impl RequestInterceptor for CacheReadInterceptor {
    fn name(&self) -> &'static str {
        "cache-read"
    }

    fn intercept(&self, request: OutboundRequest, chain: InterceptorChain) {
        let policy = request.cache_policy;
        if !policy.reads_cache() || !is_cacheable(&request) {
            chain.proceed(request);
            return;
        }
        let key = request.operation().cache_key();
        match self.cache.read(&key) {
            Ok(Some(value)) => {
                debug!(key = %key, "cache hit");
                chain.report_success(&request, value);
            }
            Ok(None) if policy == CachePolicy::CacheOnly => chain.report_error(
                PipelineError::CacheMiss {
                    key: key.to_string(),
                },
                request,
                None,
            ),
            Ok(None) => {
                debug!(key = %key, "cache miss");
                chain.proceed(request);
            }
            Err(err) if policy == CachePolicy::CacheOnly => {
                chain.report_error(err.into(), request, None)
            }
            Err(err) => {
                warn!(key = %key, error = %err, "cache read failed; fetching");
                chain.proceed(request);
            }
        }
    }
}

/// Stores parsed query results when the request's policy allows it.
///
/// A failed write is logged and does not fail the operation.
pub struct CacheWriteInterceptor {
    cache: Arc<dyn ObjectCache>,
}

impl CacheWriteInterceptor {
    pub fn new(cache: Arc<dyn ObjectCache>) -> Self {
        Self { cache }
    }
}

impl ResponseInterceptor for CacheWriteInterceptor {
    fn name(&self) -> &'static str {
        "cache-write"
    }

    fn intercept(
        &self,
        request: OutboundRequest,
        response: InboundResponse,
        chain: InterceptorChain,
    ) {
        if request.cache_policy.writes_cache() && is_cacheable(&request) {
            if let Some(parsed) = &response.parsed {
                let key = request.operation().cache_key();
                match self.cache.merge(key.clone(), parsed.clone()) {
                    Ok(()) => debug!(key = %key, "cache updated"),
                    Err(err) => warn!(key = %key, error = %err, "cache write failed"),
                }
            }
        }
        chain.proceed_with_response(request, response);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{capture_request, hero_request, outcome_of, response, run_post};

    struct SetParsed;

    impl ResponseInterceptor for SetParsed {
        fn name(&self) -> &'static str {
            "set-parsed"
        }

        fn intercept(
            &self,
            request: OutboundRequest,
            mut response: InboundResponse,
            chain: InterceptorChain,
        ) {
            response.parsed = Some(serde_json::from_slice(&response.body).unwrap());
            chain.proceed_with_response(request, response);
        }
    }

    #[test]
    fn merge_overwrites_top_level_fields() {
        let cache = InMemoryCache::new();
        let key = hero_request().operation().cache_key();
        cache.merge(key.clone(), json!({ "a": 1, "b": 1 })).unwrap();
        cache.merge(key.clone(), json!({ "b": 2 })).unwrap();

        assert_eq!(cache.read(&key).unwrap(), Some(json!({ "a": 1, "b": 2 })));
        assert!(cache.remove(&key).unwrap());
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_first_hit_short_circuits() {
        let cache = Arc::new(InMemoryCache::new());
        let request = hero_request().with_cache_policy(CachePolicy::CacheFirst);
        cache
            .merge(request.operation().cache_key(), json!({ "data": 1 }))
            .unwrap();

        let (reached, outcomes) =
            capture_request(Arc::new(CacheReadInterceptor::new(cache)), request);

        assert!(reached.is_none());
        assert_eq!(outcome_of(&outcomes), Some(Ok(json!({ "data": 1 }))));
    }

    #[test]
    fn cache_first_miss_goes_to_the_network() {
        let cache = Arc::new(InMemoryCache::new());
        let request = hero_request().with_cache_policy(CachePolicy::CacheFirst);

        let (reached, outcomes) =
            capture_request(Arc::new(CacheReadInterceptor::new(cache)), request);

        assert!(reached.is_some());
        assert_eq!(outcome_of(&outcomes), None);
    }

    #[test]
    fn cache_only_miss_fails() {
        let cache = Arc::new(InMemoryCache::new());
        let request = hero_request().with_cache_policy(CachePolicy::CacheOnly);

        let (reached, outcomes) =
            capture_request(Arc::new(CacheReadInterceptor::new(cache)), request);

        assert!(reached.is_none());
        assert!(matches!(
            outcome_of(&outcomes),
            Some(Err(PipelineError::CacheMiss { .. }))
        ));
    }

    #[test]
    fn network_only_ignores_a_populated_cache() {
        let cache = Arc::new(InMemoryCache::new());
        let request = hero_request();
        cache
            .merge(request.operation().cache_key(), json!(1))
            .unwrap();

        let (reached, _) = capture_request(Arc::new(CacheReadInterceptor::new(cache)), request);
        assert!(reached.is_some());
    }

    #[test]
    fn write_stores_parsed_result() {
        let cache = Arc::new(InMemoryCache::new());
        let request = hero_request().with_cache_policy(CachePolicy::NetworkFirst);
        let key = request.operation().cache_key();

        let outcomes = run_post(
            request,
            response(200, json!({ "data": { "hero": "R2-D2" } })),
            vec![
                Arc::new(SetParsed),
                Arc::new(CacheWriteInterceptor::new(cache.clone())),
            ],
        );

        assert!(matches!(outcome_of(&outcomes), Some(Ok(_))));
        assert_eq!(
            cache.read(&key).unwrap(),
            Some(json!({ "data": { "hero": "R2-D2" } }))
        );
    }

    #[test]
    fn write_skips_network_only_requests() {
        let cache = Arc::new(InMemoryCache::new());
        run_post(
            hero_request(),
            response(200, json!({ "data": 1 })),
            vec![
                Arc::new(SetParsed),
                Arc::new(CacheWriteInterceptor::new(cache.clone())),
            ],
        );
        assert!(cache.is_empty());
    }
}
