use actix_web::web;

pub mod models;
pub mod provider;
pub mod xai;

pub mod routes {
    pub mod chat;
    pub mod models;
}

mod service {
    pub(crate) mod chat;
}
mod dtos {
    pub(crate) mod chat;
}

/// `GET /models`. Must be mounted behind the gateway middleware.
pub fn mount_models() -> actix_web::Scope {
    web::scope("/models").service(routes::models::get_models)
}

/// `POST /chat/completions`. Must be mounted behind the gateway middleware,
/// with a `ChatProvider` registered as app data.
pub fn mount_chat() -> actix_web::Scope {
    web::scope("/chat")
        .app_data(common::http::json_config())
        .service(routes::chat::post_chat_completions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatProvider, ChatRequest, TextStream};
    use actix_web::{App, http::StatusCode, test};
    use async_trait::async_trait;
    use common::{
        error::{AppError, Res},
        key::IssuedToken,
    };
    use db::{
        dtos::{key::KeyCreateRequest, usage::UsageFilter},
        memory::MemoryStore,
        models::{key::KeyLimits, usage::UsageEvent},
        store::{CredentialStore, UsageLedger},
    };
    use serde_json::{Value, json};
    use std::{sync::Arc, time::Duration};
    use uuid::Uuid;

    /// Replies with fixed text, or fails when `reply` is `None`.
    struct StubProvider {
        reply: Option<&'static str>,
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl ChatProvider for StubProvider {
        async fn complete(&self, _req: &ChatRequest) -> Res<String> {
            self.reply
                .map(str::to_string)
                .ok_or_else(|| AppError::Upstream("503 Service Unavailable".to_string()))
        }

        async fn stream(&self, _req: &ChatRequest) -> Res<TextStream> {
            if self.reply.is_none() {
                return Err(AppError::Upstream("503 Service Unavailable".to_string()));
            }
            let chunks: Vec<Res<String>> = self.chunks.iter().map(|c| Ok(c.to_string())).collect();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn working() -> StubProvider {
        StubProvider {
            reply: Some("Hello there, friend!"),
            chunks: vec!["Hel", "lo ", "world"],
        }
    }

    async fn seed(store: &MemoryStore) -> (Uuid, String) {
        let issued = IssuedToken::generate();
        let key = store
            .insert(KeyCreateRequest {
                user_id: "user-1".to_string(),
                name: "sdk".to_string(),
                token_hash: issued.hash,
                token_prefix: issued.prefix,
                permissions: vec!["chat.completions".to_string()],
                limits: KeyLimits {
                    requests_per_minute: 10,
                    requests_per_month: 100,
                    tokens_per_month: 1000,
                },
            })
            .await
            .unwrap();
        (key.id, issued.token)
    }

    macro_rules! v1_app {
        ($store:expr, $provider:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::from(Arc::new($provider) as Arc<dyn ChatProvider>))
                    .service(
                        web::scope("/api/v1")
                            .wrap(api_keys::middleware($store.clone(), $store.clone()))
                            .service(mount_models())
                            .service(mount_chat()),
                    ),
            )
            .await
        };
    }

    fn chat(token: &str, body: Value) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/v1/chat/completions")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .set_json(body)
    }

    async fn ledger(store: &MemoryStore, key_id: Uuid) -> Vec<UsageEvent> {
        store
            .list(UsageFilter {
                api_key_id: Some(key_id),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[actix_web::test]
    async fn models_require_a_key() {
        let store = Arc::new(MemoryStore::new());
        let (_, token) = seed(&store).await;
        let app = v1_app!(store, working());

        let res = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/v1/models").to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/v1/models")
                .insert_header(("Authorization", format!("Bearer {token}")))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-ratelimit-remaining-requests"));
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["object"], "list");
        assert_eq!(body["data"][0]["id"], "grok-4-0709");
        assert_eq!(body["data"][1]["id"], "grok-vision-beta");
    }

    #[actix_web::test]
    async fn completion_reports_usage_once() {
        let store = Arc::new(MemoryStore::new());
        let (key_id, token) = seed(&store).await;
        let app = v1_app!(store, working());

        let res = test::call_service(
            &app,
            chat(
                &token,
                json!({ "model": "unknown", "messages": [{ "role": "user", "content": "hi" }] }),
            )
            .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["model"], "grok-4-0709");
        assert_eq!(body["choices"][0]["message"]["content"], "Hello there, friend!");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        // 20 characters
        assert_eq!(body["usage"]["completion_tokens"], 5);

        let events = ledger(&store, key_id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].endpoint, "/chat/completions");
        assert_eq!(events[0].output_tokens, 5);
        assert_eq!(Some(events[0].input_tokens), body["usage"]["prompt_tokens"].as_i64());

        let key = store.key(&key_id).unwrap();
        assert_eq!(key.usage.tokens_this_month, 5);
        assert_eq!(key.usage.requests_this_minute, 1);
    }

    #[actix_web::test]
    async fn missing_messages_is_invalid_but_counted() {
        let store = Arc::new(MemoryStore::new());
        let (key_id, token) = seed(&store).await;
        let app = v1_app!(store, working());

        let res = test::call_service(&app, chat(&token, json!({ "model": "grok-4-0709" })).to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(res.headers().get("x-ratelimit-remaining-requests").unwrap(), "9");
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["error"]["code"], "INVALID_REQUEST");
        assert_eq!(body["error"]["message"], "Messages array is required");

        assert!(ledger(&store, key_id).await.is_empty());
        assert_eq!(store.key(&key_id).unwrap().usage.requests_this_minute, 1);
    }

    #[actix_web::test]
    async fn upstream_failure_is_bad_gateway() {
        let store = Arc::new(MemoryStore::new());
        let (key_id, token) = seed(&store).await;
        let app = v1_app!(
            store,
            StubProvider {
                reply: None,
                chunks: vec![],
            }
        );

        for stream in [false, true] {
            let res = test::call_service(
                &app,
                chat(
                    &token,
                    json!({ "stream": stream, "messages": [{ "role": "user", "content": "hi" }] }),
                )
                .to_request(),
            )
            .await;
            assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
            let body: Value = test::read_body_json(res).await;
            assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
            assert_eq!(body["error"]["type"], "server_error");
        }

        let events = ledger(&store, key_id).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.output_tokens == 0 && e.input_tokens > 0));
        assert_eq!(store.key(&key_id).unwrap().usage.tokens_this_month, 0);
    }

    #[actix_web::test]
    async fn stream_is_framed_and_reported_when_finished() {
        let store = Arc::new(MemoryStore::new());
        let (key_id, token) = seed(&store).await;
        let app = v1_app!(store, working());

        let res = test::call_service(
            &app,
            chat(
                &token,
                json!({ "stream": true, "messages": [{ "role": "user", "content": "hi" }] }),
            )
            .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        assert!(res.headers().contains_key("x-ratelimit-limit-tokens"));

        let body = test::read_body(res).await;
        let text = std::str::from_utf8(&body).unwrap();
        let frames: Vec<&str> = text
            .split("\n\n")
            .filter(|frame| !frame.is_empty())
            .map(|frame| frame.strip_prefix("data: ").unwrap())
            .collect();
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[4], "[DONE]");

        let contents: Vec<String> = frames[..3]
            .iter()
            .map(|frame| {
                let chunk: Value = serde_json::from_str(frame).unwrap();
                assert_eq!(chunk["object"], "chat.completion.chunk");
                assert!(chunk["choices"][0]["finish_reason"].is_null());
                chunk["choices"][0]["delta"]["content"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(contents.concat(), "Hello world");

        let last: Value = serde_json::from_str(frames[3]).unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert_eq!(last["choices"][0]["delta"], json!({}));

        // the report is spawned when the body is dropped
        actix_web::rt::time::sleep(Duration::from_millis(20)).await;
        let events = ledger(&store, key_id).await;
        assert_eq!(events.len(), 1);
        // "Hello world" is 11 characters
        assert_eq!(events[0].output_tokens, 3);
        assert_eq!(store.key(&key_id).unwrap().usage.tokens_this_month, 3);
    }
}
