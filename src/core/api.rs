use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, Method, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::models::{Conversation, ConversationId, Message, Role};

const RETRY_MIN_DELAY: Duration = Duration::from_millis(100);
const ERROR_BODY_LIMIT: usize = 512;

/// Failure talking to the conversation API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid url: {0}")]
    Url(String),
}

impl ApiError {
    /// Transport failures, throttling and server errors are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::Decode(_) | ApiError::Url(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// The remote conversation/message API the engine consumes.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Conversation>, ApiError>;
    async fn list_archived(&self) -> Result<Vec<Conversation>, ApiError>;
    async fn fetch_messages(&self, id: ConversationId) -> Result<Vec<Message>, ApiError>;
    async fn send_message(&self, id: ConversationId, content: &str) -> Result<Message, ApiError>;
    async fn mark_as_read(&self, id: ConversationId) -> Result<(), ApiError>;
    async fn archive(&self, id: ConversationId) -> Result<(), ApiError>;
    async fn unarchive(&self, id: ConversationId) -> Result<(), ApiError>;
    async fn delete(&self, id: ConversationId) -> Result<(), ApiError>;
}

/// `GET /conversations/:id` answers either shape.
#[derive(Deserialize)]
#[serde(untagged)]
enum MessagesPayload {
    Wrapped { messages: Vec<Message> },
    Bare(Vec<Message>),
}

impl From<MessagesPayload> for Vec<Message> {
    fn from(payload: MessagesPayload) -> Self {
        match payload {
            MessagesPayload::Wrapped { messages } => messages,
            MessagesPayload::Bare(messages) => messages,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SentPayload {
    Wrapped { message: Message },
    Bare(Message),
}

#[derive(Serialize)]
struct SendBody<'a> {
    message: SendContent<'a>,
}

#[derive(Serialize)]
struct SendContent<'a> {
    content: &'a str,
}

/// Connection settings for [`HttpApi`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub base_url: Url,
    pub role: Role,
    /// Opaque bearer credential handed over by the session layer.
    pub credential: String,
    /// Extra attempts on read paths. Writes are never retried.
    pub read_retries: usize,
    pub timeout: Duration,
}

/// `reqwest`-backed [`ConversationApi`].
pub struct HttpApi {
    client: Client,
    base_url: Url,
    role: Role,
    credential: String,
    read_retries: usize,
}

impl HttpApi {
    pub fn new(config: HttpConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        let mut base_url = config.base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(HttpApi {
            client,
            base_url,
            role: config.role,
            credential: config.credential,
            read_retries: config.read_retries,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        let path = format!("{}/{}", self.role.path_prefix(), path.trim_start_matches('/'));
        self.base_url
            .join(&path)
            .map_err(|e| ApiError::Url(format!("{path} on {}: {e}", self.base_url)))
    }

    fn conversation_url(&self, id: ConversationId, action: Option<&str>) -> Result<Url, ApiError> {
        match action {
            Some(action) => self.url(&format!("conversations/{id}/{action}")),
            None => self.url(&format!("conversations/{id}")),
        }
    }

    async fn execute(&self, method: Method, url: Url, body: Option<&SendBody<'_>>) -> Result<Response, ApiError> {
        log::debug!("{} {}", method, url);
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.credential);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > ERROR_BODY_LIMIT {
            let mut cut = ERROR_BODY_LIMIT;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let response = self.execute(Method::GET, url, None).await?;
        Self::decode(response).await
    }

    /// GET with bounded exponential retry for transient failures.
    async fn get_with_retry<T: DeserializeOwned + Send>(&self, url: Url) -> Result<T, ApiError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(RETRY_MIN_DELAY)
            .with_max_times(self.read_retries);

        (|| self.get_json::<T>(url.clone()))
            .retry(backoff)
            .when(ApiError::is_retryable)
            .notify(|err: &ApiError, after: Duration| {
                log::warn!("Read failed ({}), retrying in {:?}", err, after);
            })
            .await
    }

    async fn write(&self, method: Method, url: Url) -> Result<(), ApiError> {
        self.execute(method, url, None).await.map(|_| ())
    }
}

#[async_trait]
impl ConversationApi for HttpApi {
    async fn list_active(&self) -> Result<Vec<Conversation>, ApiError> {
        let url = self.url("conversations")?;
        self.get_with_retry(url).await
    }

    async fn list_archived(&self) -> Result<Vec<Conversation>, ApiError> {
        let url = self.url("conversations/archived")?;
        self.get_with_retry(url).await
    }

    async fn fetch_messages(&self, id: ConversationId) -> Result<Vec<Message>, ApiError> {
        let url = self.conversation_url(id, None)?;
        let payload: MessagesPayload = self.get_with_retry(url).await?;
        Ok(payload.into())
    }

    async fn send_message(&self, id: ConversationId, content: &str) -> Result<Message, ApiError> {
        let url = self.conversation_url(id, Some("send_message"))?;
        let body = SendBody {
            message: SendContent { content },
        };
        let response = self.execute(Method::POST, url, Some(&body)).await?;
        match Self::decode::<SentPayload>(response).await? {
            SentPayload::Wrapped { message } | SentPayload::Bare(message) => Ok(message),
        }
    }

    async fn mark_as_read(&self, id: ConversationId) -> Result<(), ApiError> {
        let url = self.conversation_url(id, Some("mark_as_read"))?;
        self.write(Method::PUT, url).await
    }

    async fn archive(&self, id: ConversationId) -> Result<(), ApiError> {
        let url = self.conversation_url(id, Some("archive"))?;
        self.write(Method::PATCH, url).await
    }

    async fn unarchive(&self, id: ConversationId) -> Result<(), ApiError> {
        let url = self.conversation_url(id, Some("unarchive"))?;
        self.write(Method::PATCH, url).await
    }

    async fn delete(&self, id: ConversationId) -> Result<(), ApiError> {
        let url = self.conversation_url(id, None)?;
        self.write(Method::DELETE, url).await
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server, ServerGuard};
    use pretty_assertions::assert_eq;

    use super::*;

    const MESSAGE_JSON: &str = r#"{
        "id": 1, "conversationId": 42, "senderId": 5, "senderRole": "provider",
        "content": "hi", "createdAt": "2024-03-01T10:00:00Z", "read": true
    }"#;

    async fn setup(role: Role, read_retries: usize) -> (HttpApi, ServerGuard) {
        let server = Server::new_async().await;
        let base_url = Url::parse(&format!("{}/api", server.url())).unwrap();
        let api = HttpApi::new(HttpConfig {
            base_url,
            role,
            credential: "tok-123".to_string(),
            read_retries,
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        (api, server)
    }

    #[tokio::test]
    async fn list_active_uses_role_prefix_and_bearer() {
        let (api, mut server) = setup(Role::Client, 0).await;
        let mock = server
            .mock("GET", "/api/clients/conversations")
            .match_header("authorization", "Bearer tok-123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"id": 7, "counterpart": {"id": 3, "displayName": "Ana", "role": "provider"},
                     "lastMessagePreview": "ok", "unreadCount": 2}]"#,
            )
            .create_async()
            .await;

        let list = api.list_active().await.unwrap();
        mock.assert_async().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].unread_count, 2);
    }

    #[tokio::test]
    async fn archived_list_path() {
        let (api, mut server) = setup(Role::Provider, 0).await;
        let mock = server
            .mock("GET", "/api/providers/conversations/archived")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        assert_eq!(api.list_archived().await.unwrap(), vec![]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_messages_accepts_wrapped_payload() {
        let (api, mut server) = setup(Role::Client, 0).await;
        server
            .mock("GET", "/api/clients/conversations/42")
            .with_status(200)
            .with_body(format!(r#"{{"id": 42, "messages": [{MESSAGE_JSON}]}}"#))
            .create_async()
            .await;

        let messages = api.fetch_messages(42).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hi");
    }

    #[tokio::test]
    async fn fetch_messages_accepts_bare_array() {
        let (api, mut server) = setup(Role::Client, 0).await;
        server
            .mock("GET", "/api/clients/conversations/42")
            .with_status(200)
            .with_body(format!("[{MESSAGE_JSON}]"))
            .create_async()
            .await;

        let messages = api.fetch_messages(42).await.unwrap();
        assert_eq!(messages[0].id, 1);
    }

    #[tokio::test]
    async fn send_message_posts_nested_content() {
        let (api, mut server) = setup(Role::Client, 0).await;
        let mock = server
            .mock("POST", "/api/clients/conversations/42/send_message")
            .match_body(Matcher::Json(serde_json::json!({ "message": { "content": "hi" } })))
            .with_status(201)
            .with_body(MESSAGE_JSON)
            .create_async()
            .await;

        let sent = api.send_message(42, "hi").await.unwrap();
        mock.assert_async().await;
        assert_eq!(sent.conversation_id, 42);
    }

    #[tokio::test]
    async fn write_endpoints_use_documented_methods() {
        let (api, mut server) = setup(Role::Client, 0).await;
        let read = server
            .mock("PUT", "/api/clients/conversations/9/mark_as_read")
            .with_status(204)
            .create_async()
            .await;
        let archive = server
            .mock("PATCH", "/api/clients/conversations/9/archive")
            .with_status(200)
            .create_async()
            .await;
        let unarchive = server
            .mock("PATCH", "/api/clients/conversations/9/unarchive")
            .with_status(200)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/api/clients/conversations/9")
            .with_status(200)
            .create_async()
            .await;

        api.mark_as_read(9).await.unwrap();
        api.archive(9).await.unwrap();
        api.unarchive(9).await.unwrap();
        api.delete(9).await.unwrap();

        read.assert_async().await;
        archive.assert_async().await;
        unarchive.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_maps_to_status_error() {
        let (api, mut server) = setup(Role::Client, 0).await;
        server
            .mock("PUT", "/api/clients/conversations/9/mark_as_read")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let err = api.mark_as_read(9).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Status {
                status: 403,
                body: "forbidden".to_string()
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn reads_retry_on_server_error() {
        let (api, mut server) = setup(Role::Client, 2).await;
        let mock = server
            .mock("GET", "/api/clients/conversations")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let err = api.list_active().await.unwrap_err();
        mock.assert_async().await;
        assert!(matches!(err, ApiError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn writes_are_not_retried() {
        let (api, mut server) = setup(Role::Client, 2).await;
        let mock = server
            .mock("PATCH", "/api/clients/conversations/9/archive")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        assert!(api.archive(9).await.is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn bad_json_is_a_decode_error() {
        let (api, mut server) = setup(Role::Client, 2).await;
        server
            .mock("GET", "/api/clients/conversations")
            .with_status(200)
            .with_body("not json")
            .expect(1)
            .create_async()
            .await;

        assert!(matches!(api.list_active().await, Err(ApiError::Decode(_))));
    }
}
