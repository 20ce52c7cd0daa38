//! Tower middleware enforcing rate limits over `http` request/response types.
//!
//! Denials surface as the standard 429 contract: `Retry-After`,
//! `X-RateLimit-Limit`, `X-RateLimit-Remaining`, `X-RateLimit-Reset`
//! headers and a JSON body. Allowed responses are decorated with the same
//! `X-RateLimit-*` headers reflecting post-increment state.
//!
//! The limiter is injected at construction; the middleware owns no global
//! state. The auth layer upstream supplies the caller identity as a
//! [`CallerId`] request extension.

use super::keys::{client_identity, rate_limit_key, CallerId};
use super::routes::RoutePolicy;
use super::store::CounterStore;
use super::{Limit, RateLimitDecision, RateLimiter};
use chrono::SecondsFormat;
use futures::future::BoxFuture;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, Request, Response, StatusCode};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const DEFAULT_DENIAL_MESSAGE: &str = "Too many requests, please try again later";

type KeyFn = dyn Fn(&HeaderMap, &str) -> String + Send + Sync;

/// Layer wiring a [`RateLimiter`] and [`RoutePolicy`] into a service stack.
pub struct RateLimitLayer<C> {
    limiter: Arc<RateLimiter<C>>,
    policy: Arc<RoutePolicy>,
    key_fn: Option<Arc<KeyFn>>,
}

impl<C> RateLimitLayer<C> {
    pub fn new(limiter: Arc<RateLimiter<C>>, policy: RoutePolicy) -> Self {
        Self { limiter, policy: Arc::new(policy), key_fn: None }
    }

    /// Replace the default identity+path key derivation.
    pub fn with_key_fn<F>(mut self, derive: F) -> Self
    where
        F: Fn(&HeaderMap, &str) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(derive));
        self
    }
}

impl<C> Clone for RateLimitLayer<C> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            policy: self.policy.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<C> std::fmt::Debug for RateLimitLayer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitLayer").finish_non_exhaustive()
    }
}

impl<S, C> Layer<S> for RateLimitLayer<C> {
    type Service = RateLimitService<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            policy: self.policy.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
pub struct RateLimitService<S, C> {
    inner: S,
    limiter: Arc<RateLimiter<C>>,
    policy: Arc<RoutePolicy>,
    key_fn: Option<Arc<KeyFn>>,
}

impl<S: Clone, C> Clone for RateLimitService<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            policy: self.policy.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<S, C, B, RB> Service<Request<B>> for RateLimitService<S, C>
where
    S: Service<Request<B>, Response = Response<RB>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    C: CounterStore + 'static,
    B: Send + 'static,
    RB: From<String> + Send + 'static,
{
    type Response = Response<RB>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let limiter = self.limiter.clone();
        let policy = self.policy.clone();
        let key_fn = self.key_fn.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();
            let authenticated = req.extensions().get::<CallerId>().map(|caller| caller.0.clone());

            let category = policy.categorize(&path);
            let quota = policy.quota_for(category, authenticated.is_some());
            if quota.is_unlimited() {
                return inner.call(req).await;
            }

            let key = match &key_fn {
                Some(derive) => derive(req.headers(), &path),
                None => {
                    let identity = client_identity(authenticated.as_deref(), req.headers());
                    rate_limit_key(&identity, &path)
                }
            };

            let decision = limiter.check(&key, &quota).await;
            if !decision.allowed {
                tracing::warn!(
                    target: "breakwater::rate_limit",
                    key = %key,
                    ?category,
                    current = decision.current,
                    "request denied by rate limiter"
                );
                let message = quota.message().unwrap_or(DEFAULT_DENIAL_MESSAGE);
                return Ok(denial_response(&decision, message));
            }

            let mut response = inner.call(req).await?;
            apply_limit_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

/// Seconds until the window resets, rounded up and never zero.
fn retry_after_secs(decision: &RateLimitDecision) -> u64 {
    decision
        .retry_after
        .map(|wait| ((wait.as_millis() + 999) / 1000) as u64)
        .unwrap_or(0)
        .max(1)
}

fn denial_response<RB: From<String>>(
    decision: &RateLimitDecision,
    message: &str,
) -> Response<RB> {
    let retry_secs = retry_after_secs(decision);
    let body = serde_json::json!({
        "error": message,
        "retryAfter": retry_secs,
    })
    .to_string();

    let mut response = Response::new(RB::from(body));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_secs));
    apply_limit_headers(headers, decision);
    response
}

fn apply_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let Limit::Bounded(limit) = decision.limit else {
        return;
    };
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if let Some(reset) = chrono::DateTime::from_timestamp_millis(decision.reset_at_ms as i64) {
        let iso = reset.to_rfc3339_opts(SecondsFormat::Secs, true);
        if let Ok(value) = HeaderValue::from_str(&iso) {
            headers.insert(X_RATELIMIT_RESET, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::time::Duration;

    fn denied_decision() -> RateLimitDecision {
        RateLimitDecision {
            allowed: false,
            limit: Limit::Bounded(3),
            current: 4,
            remaining: 0,
            reset_at_ms: 1_700_000_060_000,
            retry_after: Some(Duration::from_millis(12_400)),
        }
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(&denied_decision()), 13);
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let mut decision = denied_decision();
        decision.retry_after = Some(Duration::from_millis(5));
        assert_eq!(retry_after_secs(&decision), 1);
    }

    #[test]
    fn denial_response_carries_contract_headers_and_body() {
        let response: Response<String> = denial_response(&denied_decision(), "slow down");

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "13");
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "3");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "0");
        // Reset header is the window boundary as an RFC 3339 instant.
        assert_eq!(
            response.headers()[X_RATELIMIT_RESET],
            "2023-11-14T22:14:20Z"
        );

        let body: serde_json::Value =
            serde_json::from_str(response.body()).expect("json body");
        assert_eq!(body["error"], "slow down");
        assert_eq!(body["retryAfter"], 13);
    }

    #[test]
    fn allowed_headers_reflect_post_increment_state() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: Limit::Bounded(100),
            current: 7,
            remaining: 93,
            reset_at_ms: 1_700_000_060_000,
            retry_after: None,
        };
        let mut headers = HeaderMap::new();
        apply_limit_headers(&mut headers, &decision);

        assert_eq!(headers[X_RATELIMIT_LIMIT], "100");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "93");
        assert!(headers.contains_key(X_RATELIMIT_RESET));
    }

    #[test]
    fn unlimited_decisions_add_no_headers() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: Limit::Unlimited,
            current: 0,
            remaining: u64::MAX,
            reset_at_ms: 0,
            retry_after: None,
        };
        let mut headers = HeaderMap::new();
        apply_limit_headers(&mut headers, &decision);
        assert!(headers.is_empty());
    }

    // End-to-end middleware behavior is covered in tests/traffic_control.rs;
    // a smoke check here keeps the service bounds honest.
    #[tokio::test]
    async fn exempt_paths_bypass_the_limiter() {
        use super::super::RateLimiter;
        use super::super::store::RedisCounterStore;
        use tower::util::ServiceExt;

        let limiter: Arc<RateLimiter<RedisCounterStore>> =
            Arc::new(RateLimiter::in_process());
        let layer = RateLimitLayer::new(limiter, RoutePolicy::default());
        let service = layer.layer(tower::service_fn(|_req: Request<()>| async {
            Ok::<_, Infallible>(Response::new(String::from("ok")))
        }));

        let request = Request::builder().uri("/health").body(()).expect("request");
        let response = service.oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key(X_RATELIMIT_LIMIT));
    }
}
