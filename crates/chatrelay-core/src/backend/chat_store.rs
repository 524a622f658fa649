//! `ChatStore` backed by the backend REST API.

use async_trait::async_trait;
use chatrelay_traits::{Chat, ChatStore, NewChat, StoredMessage, TraitError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::client::BackendClient;
use super::error::BackendError;

#[derive(Clone)]
pub struct BackendChatStore {
    client: BackendClient,
}

impl BackendChatStore {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveMessagesBody<'a> {
    user_id: &'a str,
    messages: &'a [StoredMessage],
}

#[derive(Serialize)]
struct CreateStreamBody {
    id: Uuid,
}

#[derive(Deserialize)]
struct StreamIdsResponse {
    ids: Vec<Uuid>,
}

#[derive(Deserialize)]
struct MessageCountResponse {
    count: u64,
}

impl From<BackendError> for TraitError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Status { status, body } => TraitError::Backend {
                status,
                message: body,
            },
            BackendError::Decode(message) => TraitError::Invalid(message),
            other => TraitError::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl ChatStore for BackendChatStore {
    async fn get_chat(&self, chat_id: Uuid) -> chatrelay_traits::Result<Option<Chat>> {
        Ok(self.client.get_json(&format!("/api/chats/{}", chat_id)).await?)
    }

    async fn save_chat(&self, chat: NewChat) -> chatrelay_traits::Result<()> {
        Ok(self.client.post_json("/api/chats", &chat).await?)
    }

    async fn get_messages(&self, chat_id: Uuid) -> chatrelay_traits::Result<Vec<StoredMessage>> {
        let messages = self
            .client
            .get_json(&format!("/api/chats/{}/messages", chat_id))
            .await?;
        Ok(messages.unwrap_or_default())
    }

    async fn save_messages(
        &self,
        user_id: &str,
        messages: &[StoredMessage],
    ) -> chatrelay_traits::Result<()> {
        let Some(first) = messages.first() else {
            return Err(TraitError::Invalid("No messages provided".to_string()));
        };
        let path = format!("/api/chats/{}/messages", first.chat_id);
        Ok(self
            .client
            .post_json(&path, &SaveMessagesBody { user_id, messages })
            .await?)
    }

    async fn create_stream_id(&self, chat_id: Uuid, stream_id: Uuid) -> chatrelay_traits::Result<()> {
        let path = format!("/api/chats/{}/streams", chat_id);
        Ok(self
            .client
            .post_json(&path, &CreateStreamBody { id: stream_id })
            .await?)
    }

    async fn get_latest_stream_ids(&self, chat_id: Uuid) -> chatrelay_traits::Result<Vec<Uuid>> {
        let response: Option<StreamIdsResponse> = self
            .client
            .get_json(&format!("/api/chats/{}/streams", chat_id))
            .await?;
        Ok(response.map(|r| r.ids).unwrap_or_default())
    }

    async fn message_count(&self, user_id: &str, hours: u32) -> chatrelay_traits::Result<u64> {
        let hours = hours.to_string();
        let response: Option<MessageCountResponse> = self
            .client
            .get_json_at(
                &["api", "users", user_id, "message-count"],
                &[("hours", hours.as_str())],
            )
            .await?;
        response
            .map(|r| r.count)
            .ok_or_else(|| TraitError::NotFound(format!("user {}", user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendConfig;
    use chatrelay_traits::{MessageRole, Visibility};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> BackendChatStore {
        BackendChatStore::new(BackendClient::new(BackendConfig::new(server.uri(), "key")))
    }

    #[tokio::test]
    async fn test_get_chat_maps_not_found_to_none() {
        let server = MockServer::start().await;
        let chat_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/api/chats/{}", chat_id)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(store_for(&server).get_chat(chat_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_chat_decodes_camel_case() {
        let server = MockServer::start().await;
        let chat_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/api/chats/{}", chat_id)))
            .and(header("authorization", "Bearer key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": chat_id,
                "userId": "ada",
                "createdAt": "2025-01-01T00:00:00Z",
                "title": "Skies",
                "visibility": "private"
            })))
            .mount(&server)
            .await;

        let chat = store_for(&server).get_chat(chat_id).await.unwrap().unwrap();
        assert_eq!(chat.user_id, "ada");
        assert_eq!(chat.visibility, Visibility::Private);
    }

    #[tokio::test]
    async fn test_stream_ids_round_trip_through_endpoints() {
        let server = MockServer::start().await;
        let chat_id = Uuid::new_v4();
        let stream_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path(format!("/api/chats/{}/streams", chat_id)))
            .and(body_partial_json(json!({"id": stream_id})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/api/chats/{}/streams", chat_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ids": [stream_id]})))
            .mount(&server)
            .await;

        let store = store_for(&server);
        store.create_stream_id(chat_id, stream_id).await.unwrap();
        assert_eq!(store.get_latest_stream_ids(chat_id).await.unwrap(), vec![stream_id]);
    }

    #[tokio::test]
    async fn test_save_messages_posts_to_chat_of_first_message() {
        let server = MockServer::start().await;
        let chat_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path(format!("/api/chats/{}/messages", chat_id)))
            .and(body_partial_json(json!({
                "userId": "ada",
                "messages": [{"id": "m-1", "role": "assistant", "parts": [{"type": "text", "text": "hi"}]}]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server);
        let message = StoredMessage::assistant(chat_id, "m-1", "hi");
        store.save_messages("ada", &[message]).await.unwrap();
        assert!(matches!(
            store.save_messages("ada", &[]).await,
            Err(TraitError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_message_count_and_latest_assistant_message() {
        let server = MockServer::start().await;
        let chat_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path("/api/users/ada/message-count"))
            .and(query_param("hours", "24"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 7})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/api/chats/{}/messages", chat_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "u-1", "chatId": chat_id, "role": "user",
                 "parts": [{"type": "text", "text": "q"}], "createdAt": "2025-01-01T00:00:00Z"},
                {"id": "a-1", "chatId": chat_id, "role": "assistant",
                 "parts": [{"type": "text", "text": "a"}], "createdAt": "2025-01-01T00:00:01Z"}
            ])))
            .mount(&server)
            .await;

        let store = store_for(&server);
        assert_eq!(store.message_count("ada", 24).await.unwrap(), 7);

        let latest = store.get_latest_assistant_message(chat_id).await.unwrap().unwrap();
        assert_eq!(latest.id, "a-1");
        assert_eq!(latest.role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_message_count_encodes_user_id() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/users/guest%2F1%3Fx/message-count"))
            .and(query_param("hours", "24"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 2})))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(store_for(&server).message_count("guest/1?x", 24).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let err = store_for(&server).get_messages(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }
}
