use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use chatrelay_core::ResumeOutcome;
use chatrelay_core::registry::FrameStream;
use chatrelay_core::request::PostRequestBody;
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use tracing::info;

use super::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

const DATA_STREAM_HEADER: HeaderName = HeaderName::from_static("x-vercel-ai-data-stream");
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Debug, Deserialize)]
pub struct ResumeQuery {
    #[serde(rename = "chatId")]
    pub chat_id: Option<String>,
}

fn data_stream(body: Body) -> Response {
    (
        [(header::CONTENT_TYPE, TEXT_PLAIN), (DATA_STREAM_HEADER, "v1")],
        body,
    )
        .into_response()
}

fn frame_body(frames: FrameStream) -> Body {
    Body::from_stream(frames.map(Ok::<_, Infallible>))
}

/// POST /api/chat
pub async fn create_chat_stream(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = PostRequestBody::parse(&body)?;
    let chat_id = request.id;
    let started = state.service.start_generation(request, user.as_ref()).await?;

    info!(chat_id = %chat_id, stream_id = %started.stream_id, "Generation started");
    Ok(data_stream(frame_body(started.body)))
}

/// GET /api/chat?chatId=
pub async fn resume_chat_stream(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ResumeQuery>,
) -> Result<Response, ApiError> {
    let outcome = state
        .service
        .resume(query.chat_id.as_deref(), user.as_ref())
        .await?;

    let response = match outcome {
        ResumeOutcome::Disabled => StatusCode::NO_CONTENT.into_response(),
        ResumeOutcome::Live(frames) => data_stream(frame_body(frames)),
        ResumeOutcome::Replay(chunk) => data_stream(Body::from(chunk.encode())),
        ResumeOutcome::Empty => data_stream(Body::empty()),
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use crate::api::AppState;
    use crate::auth::JwtVerifier;
    use crate::auth::test_tokens::{SECRET, token};
    use crate::router::build_router;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chatrelay_core::backend::{BackendClient, BackendConfig};
    use chatrelay_core::commit::ChatStoreCommitter;
    use chatrelay_core::memory_store::MemoryChatStore;
    use chatrelay_core::{ChatService, RegistryBackend, StreamContext, StreamSettings};
    use chatrelay_traits::{
        Chat, ChatStore, MessagePart, MessageRole, StoredMessage, UserType, Visibility,
    };
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BACKEND_BODY: &str = concat!(
        "f:{\"messageId\":\"m-1\"}\n",
        "0:\"Rayleigh\"\n",
        "0:\" scattering\"\n",
        "e:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":1,\"completionTokens\":2},\"isContinued\":false}\n",
        "d:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":1,\"completionTokens\":2}}\n",
    );

    struct TestApp {
        app: Router,
        store: Arc<MemoryChatStore>,
        _server: MockServer,
    }

    async fn test_app(registry: RegistryBackend) -> TestApp {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/api/chats/[0-9a-f-]+/responses$"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BACKEND_BODY))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/titles/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "Sky colour"})))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryChatStore::new());
        let settings = StreamSettings {
            registry,
            ..StreamSettings::default()
        };
        let service = ChatService::new(
            store.clone(),
            Arc::new(BackendClient::new(BackendConfig::new(server.uri(), "s3cret"))),
            Arc::new(ChatStoreCommitter::new(store.clone())),
            Arc::new(StreamContext::new(settings)),
        );
        let state = AppState::new(Arc::new(service), JwtVerifier::new(SECRET));

        TestApp {
            app: build_router(state, &[]),
            store,
            _server: server,
        }
    }

    fn post_body(chat_id: Uuid, text: &str) -> String {
        json!({
            "id": chat_id,
            "message": {
                "id": Uuid::new_v4(),
                "createdAt": Utc::now(),
                "role": "user",
                "parts": [{"type": "text", "text": text}],
            },
            "selectedChatModel": "default-model",
            "selectedVisibilityType": "private"
        })
        .to_string()
    }

    fn post(body: String, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("Content-Type", "application/json");
        if let Some(token) = bearer {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = bearer {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    async fn wait_for_assistant(store: &MemoryChatStore, chat_id: Uuid) -> StoredMessage {
        for _ in 0..100 {
            if let Some(message) = store
                .messages(chat_id)
                .into_iter()
                .find(|m| m.role == MessageRole::Assistant)
            {
                return message;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("assistant message was never committed");
    }

    fn chat(owner: &str, visibility: Visibility) -> Chat {
        Chat {
            id: Uuid::new_v4(),
            user_id: owner.to_string(),
            created_at: Utc::now(),
            title: "t".to_string(),
            visibility,
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let t = test_app(RegistryBackend::Memory).await;
        let response = t.app.oneshot(get("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
    }

    #[tokio::test]
    async fn test_invalid_body_answers_before_auth() {
        let t = test_app(RegistryBackend::Memory).await;
        let response = t
            .app
            .oneshot(post(r#"{"id":"not-a-uuid"}"#.to_string(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(value["error"]["message"], "Invalid request body");
    }

    #[tokio::test]
    async fn test_post_requires_session() {
        let t = test_app(RegistryBackend::Memory).await;
        let response = t
            .app
            .clone()
            .oneshot(post(post_body(Uuid::new_v4(), "hi"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = t
            .app
            .oneshot(post(post_body(Uuid::new_v4(), "hi"), Some("garbage")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_post_streams_and_commits() {
        let t = test_app(RegistryBackend::Memory).await;
        let chat_id = Uuid::new_v4();
        let ada = token("ada", UserType::Regular);

        let response = t
            .app
            .clone()
            .oneshot(post(post_body(chat_id, "Why is the sky blue?"), Some(&ada)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.headers()["x-vercel-ai-data-stream"], "v1");
        assert_eq!(body_text(response).await, BACKEND_BODY);

        let message = wait_for_assistant(&t.store, chat_id).await;
        assert_eq!(message.id, "m-1");
        assert_eq!(message.text(), "Rayleigh scattering");

        let chat = t.store.get_chat(chat_id).await.unwrap().unwrap();
        assert_eq!(chat.user_id, "ada");
        assert_eq!(chat.title, "Sky colour");
        assert_eq!(t.store.get_latest_stream_ids(chat_id).await.unwrap().len(), 1);

        // The stream finished moments ago, so a resume replays the message.
        let response = t
            .app
            .oneshot(get(&format!("/api/chat?chatId={}", chat_id), Some(&ada)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-vercel-ai-data-stream"], "v1");
        let replay = body_text(response).await;
        assert!(replay.starts_with("2:[{"));
        assert!(replay.contains("append-message"));
        assert!(replay.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_post_to_foreign_chat_is_forbidden() {
        let t = test_app(RegistryBackend::Memory).await;
        let owned = chat("ada", Visibility::Private);
        let chat_id = owned.id;
        t.store.insert_chat(owned);

        let response = t
            .app
            .oneshot(post(
                post_body(chat_id, "hijack"),
                Some(&token("mallory", UserType::Regular)),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_guest_quota_exceeded() {
        let t = test_app(RegistryBackend::Memory).await;
        let chat_id = Uuid::new_v4();
        let earlier: Vec<StoredMessage> = (0..6)
            .map(|i| StoredMessage {
                id: format!("u-{}", i),
                chat_id,
                role: MessageRole::User,
                parts: vec![MessagePart::Text {
                    text: "again".to_string(),
                }],
                attachments: Vec::new(),
                created_at: Utc::now(),
            })
            .collect();
        t.store.save_messages("guest-1", &earlier).await.unwrap();

        let response = t
            .app
            .oneshot(post(
                post_body(chat_id, "one more"),
                Some(&token("guest-1", UserType::Guest)),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_resume_checks() {
        let t = test_app(RegistryBackend::Memory).await;
        let ada = token("ada", UserType::Regular);

        let response = t.app.clone().oneshot(get("/api/chat", Some(&ada))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let uri = format!("/api/chat?chatId={}", Uuid::new_v4());
        let response = t.app.clone().oneshot(get(&uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = t.app.clone().oneshot(get(&uri, Some(&ada))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let private = chat("babbage", Visibility::Private);
        let private_uri = format!("/api/chat?chatId={}", private.id);
        t.store.insert_chat(private);
        let response = t.app.clone().oneshot(get(&private_uri, Some(&ada))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let own = chat("ada", Visibility::Private);
        let own_uri = format!("/api/chat?chatId={}", own.id);
        t.store.insert_chat(own);
        let response = t.app.oneshot(get(&own_uri, Some(&ada))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(value["error"]["message"], "No streams found");
    }

    #[tokio::test]
    async fn test_resume_of_stale_stream_is_empty() {
        let t = test_app(RegistryBackend::Memory).await;
        let own = chat("ada", Visibility::Private);
        let chat_id = own.id;
        t.store.insert_chat(own);
        t.store.create_stream_id(chat_id, Uuid::new_v4()).await.unwrap();

        let mut old = StoredMessage::assistant(chat_id, "m-old", "long ago");
        old.created_at = Utc::now() - chrono::Duration::minutes(5);
        t.store.insert_message(old);

        let response = t
            .app
            .oneshot(get(
                &format!("/api/chat?chatId={}", chat_id),
                Some(&token("ada", UserType::Regular)),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "");
    }

    #[tokio::test]
    async fn test_durable_registry_streams() {
        let dir = tempfile::tempdir().unwrap();
        let t = test_app(RegistryBackend::Redb {
            path: dir.path().join("streams.redb"),
        })
        .await;
        let chat_id = Uuid::new_v4();

        let response = t
            .app
            .oneshot(post(
                post_body(chat_id, "go"),
                Some(&token("ada", UserType::Regular)),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, BACKEND_BODY);
        assert_eq!(wait_for_assistant(&t.store, chat_id).await.id, "m-1");
    }

    #[tokio::test]
    async fn test_disabled_registry_streams_directly() {
        let t = test_app(RegistryBackend::Disabled).await;
        let chat_id = Uuid::new_v4();
        let ada = token("ada", UserType::Regular);

        let response = t
            .app
            .clone()
            .oneshot(post(post_body(chat_id, "go"), Some(&ada)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, BACKEND_BODY);

        let response = t
            .app
            .oneshot(get(&format!("/api/chat?chatId={}", chat_id), Some(&ada)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
