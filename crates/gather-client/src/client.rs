use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use gather_types::api::{
    ConversationResponse, CreateConversationRequest, EventResponse, LoginRequest, LoginResponse,
    MessagePage, OccurrenceResponse, RegisterRequest, RegisterResponse, RsvpRequest, RsvpResponse,
    SearchResults, SendMessageRequest, SendMessageResponse, Suggestion, UnreadResponse,
};
use gather_types::models::{ConversationSubject, Notification};

use crate::error::ClientError;

/// Thin typed wrapper over the `/api` routes.
#[derive(Clone)]
pub struct GatherClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl GatherClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let token = self.token.as_deref().ok_or(ClientError::NotAuthenticated)?;
        Ok(self
            .http
            .request(method, self.url(path))
            .header("Authorization", format!("Bearer {}", token)))
    }

    async fn check(resp: Response) -> Result<Response, ClientError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ClientError::from_body(status, &body))
    }

    async fn json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, ClientError> {
        let resp = Self::check(req.send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn empty(req: RequestBuilder) -> Result<(), ClientError> {
        Self::check(req.send().await?).await?;
        Ok(())
    }

    fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<RequestBuilder, ClientError> {
        Ok(self.request(Method::POST, path)?.json(body))
    }

    // -- Auth --

    /// Create an account and keep its token for later calls.
    pub async fn register(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<RegisterResponse, ClientError> {
        let req = self.http.post(self.url("/auth/register")).json(&RegisterRequest {
            username: username.to_string(),
            password: password.to_string(),
        });
        let resp: RegisterResponse = Self::json(req).await?;
        self.token = Some(resp.token.clone());
        Ok(resp)
    }

    /// Log in and keep the token for later calls.
    pub async fn login(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, ClientError> {
        let req = self.http.post(self.url("/auth/login")).json(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        });
        let resp: LoginResponse = Self::json(req).await?;
        self.token = Some(resp.token.clone());
        Ok(resp)
    }

    // -- Search --

    pub async fn search(&self, q: &str) -> Result<SearchResults, ClientError> {
        Self::json(self.http.get(self.url("/search")).query(&[("q", q)])).await
    }

    pub async fn suggestions(&self, q: &str) -> Result<Vec<Suggestion>, ClientError> {
        Self::json(self.http.get(self.url("/search/suggestions")).query(&[("q", q)])).await
    }

    // -- Events --

    pub async fn event(&self, event_id: Uuid) -> Result<EventResponse, ClientError> {
        Self::json(self.request(Method::GET, &format!("/events/{}", event_id))?).await
    }

    pub async fn occurrences(
        &self,
        event_id: Uuid,
        count: usize,
        tz_offset_secs: i32,
    ) -> Result<Vec<OccurrenceResponse>, ClientError> {
        let req = self
            .request(Method::GET, &format!("/events/{}/occurrences", event_id))?
            .query(&[("count", count.to_string()), ("tz_offset", tz_offset_secs.to_string())]);
        Self::json(req).await
    }

    pub async fn rsvp(&self, event_id: Uuid, rsvp: &RsvpRequest) -> Result<RsvpResponse, ClientError> {
        Self::json(self.post(&format!("/events/{}/rsvp", event_id), rsvp)?).await
    }

    // -- Conversations --

    pub async fn open_conversation(
        &self,
        subject: ConversationSubject,
    ) -> Result<ConversationResponse, ClientError> {
        Self::json(self.post("/conversations", &CreateConversationRequest { subject })?).await
    }

    pub async fn messages(
        &self,
        conversation_id: Uuid,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<MessagePage, ClientError> {
        let mut req =
            self.request(Method::GET, &format!("/conversations/{}/messages", conversation_id))?;
        if let Some(cursor) = cursor {
            req = req.query(&[("cursor", cursor)]);
        }
        if let Some(limit) = limit {
            req = req.query(&[("limit", limit)]);
        }
        Self::json(req).await
    }

    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        content: &str,
    ) -> Result<SendMessageResponse, ClientError> {
        let body = SendMessageRequest {
            content: content.to_string(),
        };
        Self::json(self.post(&format!("/conversations/{}/messages", conversation_id), &body)?).await
    }

    pub async fn mark_conversation_read(&self, conversation_id: Uuid) -> Result<(), ClientError> {
        Self::empty(self.request(Method::POST, &format!("/conversations/{}/read", conversation_id))?)
            .await
    }

    pub async fn unread_conversations(&self) -> Result<u32, ClientError> {
        let resp: UnreadResponse =
            Self::json(self.request(Method::GET, "/conversations/unread")?).await?;
        Ok(resp.count)
    }

    // -- Notifications --

    pub async fn notifications(&self) -> Result<Vec<Notification>, ClientError> {
        Self::json(self.request(Method::GET, "/notifications")?).await
    }

    pub async fn unread_notifications(&self) -> Result<u32, ClientError> {
        let resp: UnreadResponse =
            Self::json(self.request(Method::GET, "/notifications/unread")?).await?;
        Ok(resp.count)
    }

    pub async fn mark_notification_read(&self, notification_id: Uuid) -> Result<(), ClientError> {
        Self::empty(self.request(Method::POST, &format!("/notifications/{}/read", notification_id))?)
            .await
    }

    pub async fn mark_all_notifications_read(&self) -> Result<(), ClientError> {
        Self::empty(self.request(Method::POST, "/notifications/read-all")?).await
    }
}
