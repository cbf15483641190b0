use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
};
use chrono::{DateTime, Utc};
use common::{
    error::{AppError, Res},
    key,
};
use db::{
    models::key::{ApiKey, KeyUsage},
    store::{CredentialStore, UsageLedger},
};
use limiter::{
    headers::QuotaHeaders,
    quota::{self, Decision, Rejection, Window},
};
use std::{
    future::{Future, Ready, ready},
    pin::Pin,
    rc::Rc,
    sync::Arc,
};

use crate::usage::{UsageLogger, UsageReporter};

pub type Clock = fn() -> DateTime<Utc>;

/// Inserted into request extensions for the wrapped handler.
/// Extract it with `web::ReqData<GatewayContext>`.
#[derive(Clone)]
pub struct GatewayContext {
    /// The resolved key, with counters as persisted at admission.
    pub key: ApiKey,
    pub usage: Arc<dyn UsageReporter>,
}

/// Outcome of a successful admission.
#[derive(Debug, Clone)]
pub struct Admission {
    pub key: ApiKey,
    pub window: Window,
}

/// Resolves `token`, evaluates its quota and counts the request with the
/// store's atomic increment-with-ceiling. Rejected requests leave the stored
/// counters untouched.
pub async fn admit(
    store: &dyn CredentialStore,
    token: &str,
    now: DateTime<Utc>,
) -> Res<Admission> {
    key::check_format(token)?;

    let api_key = resolve(store, token).await?;
    if let Decision::Rejected { reason, usage, .. } =
        quota::evaluate(&api_key.limits, &api_key.usage, now)
    {
        return Err(reject(&api_key, reason, &usage));
    }

    let window = Window::at(now);
    if let Some(key) = store
        .consume_request(&api_key.id, window.minute, window.month, now)
        .await?
    {
        return Ok(Admission { key, window });
    }

    // concurrent requests used up the quota since the lookup
    let current = resolve(store, token).await?;
    match quota::evaluate(&current.limits, &current.usage, now) {
        Decision::Rejected { reason, usage, .. } => Err(reject(&current, reason, &usage)),
        Decision::Admitted { usage, .. } => Err(reject(&current, Rejection::MinuteLimit, &usage)),
    }
}

async fn resolve(store: &dyn CredentialStore, token: &str) -> Res<ApiKey> {
    let api_key = store
        .get_by_token(token)
        .await?
        .ok_or_else(|| AppError::InvalidApiKey("Invalid API key".to_string()))?;

    if !api_key.is_active {
        return Err(AppError::InactiveApiKey);
    }
    Ok(api_key)
}

fn reject(api_key: &ApiKey, reason: Rejection, usage: &KeyUsage) -> AppError {
    log::debug!(
        "Key {} rejected: {} ({}/{} this minute, {}/{} this month)",
        api_key.token_prefix,
        reason.message(),
        usage.requests_this_minute,
        api_key.limits.requests_per_minute,
        usage.requests_this_month,
        api_key.limits.requests_per_month,
    );
    AppError::RateLimitExceeded(reason.message().to_string())
}

// GatewayMiddleware struct (as a Transform)
pub struct GatewayMiddleware {
    store: Arc<dyn CredentialStore>,
    ledger: Arc<dyn UsageLedger>,
    clock: Clock,
}

impl GatewayMiddleware {
    pub fn new(store: Arc<dyn CredentialStore>, ledger: Arc<dyn UsageLedger>) -> Self {
        GatewayMiddleware {
            store,
            ledger,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

// Implement the Transform trait for GatewayMiddleware
impl<S, B> Transform<S, ServiceRequest> for GatewayMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<actix_web::body::BoxBody>;
    type Error = Error;
    type Transform = GatewayMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(GatewayMiddlewareService {
            service: Rc::new(service),
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            clock: self.clock,
        }))
    }
}

// Service struct for the middleware
pub struct GatewayMiddlewareService<S> {
    service: Rc<S>,
    store: Arc<dyn CredentialStore>,
    ledger: Arc<dyn UsageLedger>,
    clock: Clock,
}

impl<S, B> Service<ServiceRequest> for GatewayMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<actix_web::body::BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv = Rc::clone(&self.service);
        let store = Arc::clone(&self.store);
        let ledger = Arc::clone(&self.ledger);
        let now = (self.clock)();

        Box::pin(async move {
            // no lookup without a bearer token
            let Some(token) = key::bearer_token(&req) else {
                return Ok(req.error_response(AppError::MissingApiKey));
            };

            let admission = match admit(store.as_ref(), &token, now).await {
                Ok(admission) => admission,
                Err(e) => return Ok(req.error_response(e)),
            };

            let quota_headers = QuotaHeaders::new(
                &admission.key.limits,
                &admission.key.usage,
                admission.window,
            );
            let reporter = UsageLogger::for_request(&req, &admission.key, store, ledger);
            req.extensions_mut().insert(GatewayContext {
                key: admission.key,
                usage: Arc::new(reporter),
            });

            let mut res = srv.call(req).await?.map_into_boxed_body();
            quota_headers.apply(res.headers_mut());
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::UsageReport;
    use actix_web::{App, HttpResponse, http::StatusCode, test, web};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use db::{
        dtos::{
            key::{KeyCreateRequest, KeyUpdateRequest},
            usage::{UsageFilter, UsageCreateRequest},
        },
        memory::MemoryStore,
        models::{
            key::{KeyLimits, KeyUsage},
            usage::UsageEvent,
        },
    };
    use futures::future::join_all;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use uuid::Uuid;

    const TOKEN: &str = "grok_0123456789abcdef";

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 15, 12, 0, 5).unwrap()
    }

    /// Memory store that yields once per read and counter write, like a
    /// database round trip. Counts lookups and can inject failures or a
    /// competing request landing between the lookup and the write.
    #[derive(Default)]
    struct ScriptedStore {
        inner: MemoryStore,
        lookups: AtomicUsize,
        interfere: AtomicBool,
        fail_lookups: AtomicBool,
        fail_reports: AtomicBool,
    }

    fn store_down() -> AppError {
        AppError::Internal("connection reset by peer".to_string())
    }

    #[async_trait]
    impl CredentialStore for ScriptedStore {
        async fn get_by_token(&self, token: &str) -> Res<Option<ApiKey>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            actix_web::rt::task::yield_now().await;
            if self.fail_lookups.load(Ordering::SeqCst) {
                return Err(store_down());
            }
            self.inner.get_by_token(token).await
        }

        async fn consume_request(
            &self,
            key_id: &Uuid,
            minute: i64,
            month: i64,
            used_at: DateTime<Utc>,
        ) -> Res<Option<ApiKey>> {
            actix_web::rt::task::yield_now().await;
            if self.interfere.swap(false, Ordering::SeqCst) {
                self.inner.consume_request(key_id, minute, month, used_at).await?;
            }
            self.inner.consume_request(key_id, minute, month, used_at).await
        }

        async fn add_tokens(&self, key_id: &Uuid, tokens: i64) -> Res<()> {
            if self.fail_reports.load(Ordering::SeqCst) {
                return Err(store_down());
            }
            self.inner.add_tokens(key_id, tokens).await
        }

        async fn insert(&self, data: KeyCreateRequest) -> Res<ApiKey> {
            self.inner.insert(data).await
        }

        async fn get_key(&self, key_id: &Uuid, user_id: &str) -> Res<Option<ApiKey>> {
            self.inner.get_key(key_id, user_id).await
        }

        async fn list_by_user(&self, user_id: &str) -> Res<Vec<ApiKey>> {
            self.inner.list_by_user(user_id).await
        }

        async fn update(
            &self,
            key_id: &Uuid,
            user_id: &str,
            data: KeyUpdateRequest,
        ) -> Res<Option<ApiKey>> {
            self.inner.update(key_id, user_id, data).await
        }

        async fn set_active(
            &self,
            key_id: &Uuid,
            user_id: &str,
            is_active: bool,
        ) -> Res<Option<ApiKey>> {
            self.inner.set_active(key_id, user_id, is_active).await
        }

        async fn delete(&self, key_id: &Uuid, user_id: &str) -> Res<bool> {
            self.inner.delete(key_id, user_id).await
        }
    }

    #[async_trait]
    impl UsageLedger for ScriptedStore {
        async fn append(&self, usage: UsageCreateRequest) -> Res<()> {
            if self.fail_reports.load(Ordering::SeqCst) {
                return Err(store_down());
            }
            self.inner.append(usage).await
        }

        async fn list(&self, filter: UsageFilter) -> Res<Vec<UsageEvent>> {
            self.inner.list(filter).await
        }
    }

    async fn seed(store: &ScriptedStore, limits: KeyLimits, usage: KeyUsage) -> ApiKey {
        let issued = key::IssuedToken::from_token(TOKEN.to_string());
        let mut api_key = store
            .inner
            .insert(KeyCreateRequest {
                user_id: "user-1".to_string(),
                name: "test".to_string(),
                token_hash: issued.hash,
                token_prefix: issued.prefix,
                permissions: vec!["chat.completions".to_string()],
                limits,
            })
            .await
            .unwrap();
        api_key.usage = usage;
        store.inner.put(api_key.clone());
        api_key
    }

    fn limits(per_minute: i64) -> KeyLimits {
        KeyLimits {
            requests_per_minute: per_minute,
            requests_per_month: 10_000,
            tokens_per_month: 1000,
        }
    }

    fn current_usage() -> KeyUsage {
        let window = Window::at(fixed_now());
        KeyUsage {
            last_reset_minute: window.minute,
            last_reset_month: window.month,
            ..KeyUsage::default()
        }
    }

    async fn report_tokens(ctx: web::ReqData<GatewayContext>) -> HttpResponse {
        ctx.usage
            .log_usage(UsageReport {
                model: Some("grok-4-0709".to_string()),
                input_tokens: 20,
                output_tokens: 100,
                ..UsageReport::default()
            })
            .await;
        HttpResponse::Ok().json(serde_json::json!({ "key": ctx.key.token_prefix }))
    }

    macro_rules! gateway_app {
        ($store:expr) => {
            test::init_service(
                App::new()
                    .wrap(GatewayMiddleware::new($store.clone(), $store.clone()).with_clock(fixed_now))
                    .route("/v1/echo", web::post().to(report_tokens))
                    .route("/v1/ping", web::get().to(HttpResponse::Ok)),
            )
            .await
        };
    }

    fn ping(token: &str) -> actix_web::test::TestRequest {
        test::TestRequest::get()
            .uri("/v1/ping")
            .insert_header(("Authorization", format!("Bearer {token}")))
    }

    async fn error_code<B: actix_web::body::MessageBody>(res: ServiceResponse<B>) -> String {
        let body: serde_json::Value = test::read_body_json(res).await;
        body["error"]["code"].as_str().unwrap_or_default().to_string()
    }

    #[actix_web::test]
    async fn missing_or_malformed_header_skips_lookup() {
        let store = Arc::new(ScriptedStore::default());
        let app = gateway_app!(store);

        let res = test::call_service(&app, test::TestRequest::get().uri("/v1/ping").to_request()).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(res).await, "MISSING_API_KEY");

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/v1/ping")
                .insert_header(("Authorization", "Token grok_abc"))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(res).await, "MISSING_API_KEY");

        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn wrong_prefix_is_invalid_without_lookup() {
        let store = Arc::new(ScriptedStore::default());
        let app = gateway_app!(store);

        let res = test::call_service(&app, ping("sk-not-ours").to_request()).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(res).await, "INVALID_API_KEY");
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn unknown_token_is_invalid() {
        let store = Arc::new(ScriptedStore::default());
        let app = gateway_app!(store);

        let res = test::call_service(&app, ping("grok_unknown").to_request()).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["error"]["code"], "INVALID_API_KEY");
        assert_eq!(body["error"]["type"], "api_error");
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn inactive_key_is_rejected_and_untouched() {
        let store = Arc::new(ScriptedStore::default());
        let mut api_key = seed(&store, limits(5), current_usage()).await;
        api_key.is_active = false;
        store.inner.put(api_key.clone());
        let app = gateway_app!(store);

        let res = test::call_service(&app, ping(TOKEN).to_request()).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(res).await, "INACTIVE_API_KEY");

        let stored = store.inner.key(&api_key.id).unwrap();
        assert_eq!(stored.usage, current_usage());
        assert!(stored.last_used_at.is_none());
    }

    #[actix_web::test]
    async fn third_request_in_a_minute_is_rate_limited() {
        let store = Arc::new(ScriptedStore::default());
        let api_key = seed(&store, limits(2), KeyUsage::default()).await;
        let app = gateway_app!(store);

        let first = test::call_service(&app, ping(TOKEN).to_request()).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers().get("X-RateLimit-Limit-Requests").unwrap(), "2");
        assert_eq!(first.headers().get("X-RateLimit-Remaining-Requests").unwrap(), "1");
        let reset = (Window::at(fixed_now()).minute + 1) * 60;
        assert_eq!(
            first.headers().get("X-RateLimit-Reset-Requests").unwrap(),
            reset.to_string().as_str()
        );

        let second = test::call_service(&app, ping(TOKEN).to_request()).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers().get("X-RateLimit-Remaining-Requests").unwrap(), "0");

        let third = test::call_service(&app, ping(TOKEN).to_request()).await;
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
        let body: serde_json::Value = test::read_body_json(third).await;
        assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(body["error"]["type"], "rate_limit_error");

        let stored = store.inner.key(&api_key.id).unwrap();
        assert_eq!(stored.usage.requests_this_minute, 2);
        assert_eq!(stored.usage.requests_this_month, 2);
        assert_eq!(stored.last_used_at, Some(fixed_now()));
    }

    #[actix_web::test]
    async fn reported_tokens_overshoot_and_reach_the_ledger() {
        let store = Arc::new(ScriptedStore::default());
        let usage = KeyUsage {
            tokens_this_month: 950,
            ..current_usage()
        };
        let api_key = seed(&store, limits(5), usage).await;
        let app = gateway_app!(store);

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/v1/echo")
                .insert_header(("Authorization", format!("Bearer {TOKEN}")))
                .insert_header(("User-Agent", "sdk/1.0"))
                .insert_header(("X-Forwarded-For", "203.0.113.9"))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        // headers reflect counters at admission, before the report
        assert_eq!(res.headers().get("X-RateLimit-Remaining-Tokens").unwrap(), "50");

        let stored = store.inner.key(&api_key.id).unwrap();
        assert_eq!(stored.usage.tokens_this_month, 1050);

        let events = store
            .inner
            .list(UsageFilter {
                api_key_id: Some(api_key.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.endpoint, "/v1/echo");
        assert_eq!(event.user_id, "user-1");
        assert_eq!(event.model.as_deref(), Some("grok-4-0709"));
        assert_eq!((event.input_tokens, event.output_tokens), (20, 100));
        assert_eq!(event.user_agent.as_deref(), Some("sdk/1.0"));
        assert_eq!(event.ip_address.as_deref(), Some("203.0.113.9"));
    }

    #[actix_web::test]
    async fn store_failure_during_lookup_is_internal_error() {
        let store = Arc::new(ScriptedStore::default());
        seed(&store, limits(5), current_usage()).await;
        store.fail_lookups.store(true, Ordering::SeqCst);
        let app = gateway_app!(store);

        let res = test::call_service(&app, ping(TOKEN).to_request()).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.headers().get("X-RateLimit-Limit-Requests").is_none());
        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["type"], "server_error");
    }

    #[actix_web::test]
    async fn failed_usage_report_keeps_the_response() {
        let store = Arc::new(ScriptedStore::default());
        let api_key = seed(&store, limits(5), current_usage()).await;
        store.fail_reports.store(true, Ordering::SeqCst);
        let app = gateway_app!(store);

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/v1/echo")
                .insert_header(("Authorization", format!("Bearer {TOKEN}")))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        for name in [
            "X-RateLimit-Limit-Requests",
            "X-RateLimit-Remaining-Requests",
            "X-RateLimit-Reset-Requests",
            "X-RateLimit-Limit-Tokens",
            "X-RateLimit-Remaining-Tokens",
        ] {
            assert!(res.headers().contains_key(name), "missing {name}");
        }
        assert_eq!(res.headers().get("X-RateLimit-Remaining-Requests").unwrap(), "4");
        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["key"], api_key.token_prefix);

        let stored = store.inner.key(&api_key.id).unwrap();
        assert_eq!(stored.usage.requests_this_minute, 1);
        assert_eq!(stored.usage.tokens_this_month, 0);
        let events = store
            .inner
            .list(UsageFilter {
                api_key_id: Some(api_key.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[actix_web::test]
    async fn simultaneous_requests_under_quota_are_all_admitted() {
        let store = Arc::new(ScriptedStore::default());
        let api_key = seed(&store, limits(60), current_usage()).await;

        let outcomes = join_all((0..8).map(|_| admit(store.as_ref(), TOKEN, fixed_now()))).await;
        assert!(outcomes.iter().all(Result::is_ok));

        let mut counts: Vec<i64> = outcomes
            .into_iter()
            .map(|admission| admission.unwrap().key.usage.requests_this_minute)
            .collect();
        counts.sort();
        assert_eq!(counts, (1..=8).collect::<Vec<i64>>());
        assert_eq!(store.inner.key(&api_key.id).unwrap().usage.requests_this_minute, 8);
    }

    #[actix_web::test]
    async fn simultaneous_requests_stop_exactly_at_the_limit() {
        let store = Arc::new(ScriptedStore::default());
        let api_key = seed(&store, limits(3), current_usage()).await;

        let outcomes = join_all((0..8).map(|_| admit(store.as_ref(), TOKEN, fixed_now()))).await;
        let admitted = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(admitted, 3);
        for outcome in outcomes.iter().filter(|outcome| outcome.is_err()) {
            assert!(matches!(
                outcome,
                Err(AppError::RateLimitExceeded(message)) if message == "Rate limit exceeded"
            ));
        }
        assert_eq!(store.inner.key(&api_key.id).unwrap().usage.requests_this_minute, 3);
    }

    #[actix_web::test]
    async fn quota_taken_by_a_competing_request_is_rejected() {
        let store = Arc::new(ScriptedStore::default());
        let usage = KeyUsage {
            requests_this_minute: 1,
            requests_this_month: 1,
            ..current_usage()
        };
        let api_key = seed(&store, limits(2), usage).await;
        store.interfere.store(true, Ordering::SeqCst);
        let app = gateway_app!(store);

        // a competing request takes the last slot between our read and write
        let res = test::call_service(&app, ping(TOKEN).to_request()).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);

        let stored = store.inner.key(&api_key.id).unwrap();
        assert_eq!(stored.usage.requests_this_minute, 2);
    }

    #[actix_web::test]
    async fn admit_returns_post_increment_snapshot() {
        let store = ScriptedStore::default();
        seed(&store, limits(3), KeyUsage::default()).await;

        let admission = admit(&store, TOKEN, fixed_now()).await.unwrap();
        assert_eq!(admission.key.usage.requests_this_minute, 1);
        assert_eq!(admission.window, Window::at(fixed_now()));
        assert_eq!(admission.key.last_used_at, Some(fixed_now()));
    }
}
