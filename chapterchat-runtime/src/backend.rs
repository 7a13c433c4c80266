//! Typed backend operations over [`ResilientClient`].

use crate::client::{RequestOptions, ResilientClient};
use crate::error::ClientError;
use async_trait::async_trait;
use chapterchat_core::types::{
    Book, BookId, ChapterId, Chapter, ChatMessage, Credential, NotificationId, NotificationRecord,
    UserId,
};
use chapterchat_engine::traits::{BackendError, ChatBackend, NotificationBackend};
use chapterchat_providers::api::{self, ChatSendPayload};
use chapterchat_providers::multipart::AudioFile;
use chapterchat_providers::parse;
use chapterchat_providers::runtime::HttpResponse;
use std::sync::Arc;

#[derive(Clone)]
pub struct HttpBackend {
    client: Arc<ResilientClient>,
}

impl HttpBackend {
    pub fn new(client: Arc<ResilientClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<ResilientClient> {
        &self.client
    }

    fn base(&self) -> &str {
        self.client.base_url()
    }

    /// Exchanges email and password for a credential. Does not sign in.
    pub async fn login(&self, email: &str, password: &str) -> Result<Credential, ClientError> {
        let resp = self.client.send(api::login(self.base(), email, password)).await?;
        parse::parse_login(&resp.body).map_err(ClientError::decode)
    }

    pub async fn books(&self) -> Result<Vec<Book>, ClientError> {
        let resp = self.client.send(api::books(self.base())).await?;
        parse::parse_books(&resp.body).map_err(ClientError::decode)
    }

    pub async fn chapters(&self, book: &BookId) -> Result<Vec<Chapter>, ClientError> {
        let resp = self.client.send(api::chapters(self.base(), book)).await?;
        parse::parse_chapters(&resp.body).map_err(ClientError::decode)
    }

    /// Asks the backend to extract and index a chapter. Can take many minutes.
    pub async fn process_chapter(&self, chapter: &ChapterId) -> Result<serde_json::Value, ClientError> {
        let resp = self
            .client
            .send_with(
                api::process_chapter(self.base(), chapter),
                RequestOptions::long_running(),
            )
            .await?;
        if resp.body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&resp.body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Uploads an already-encoded audio file for transcription.
    pub async fn transcribe_file(&self, file: &AudioFile) -> Result<String, ClientError> {
        let resp = self.client.send(api::transcribe(self.base(), file)).await?;
        parse::parse_transcription(&resp.body).map_err(ClientError::decode)
    }

    async fn first_unseen_notification(&self) -> Result<Option<NotificationRecord>, ClientError> {
        let resp = match self
            .client
            .send(api::first_unseen_notification(self.base()))
            .await
        {
            Ok(resp) => resp,
            Err(ClientError::Backend { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if is_empty_record(&resp) {
            return Ok(None);
        }
        parse::parse_notification(&resp.body)
            .map(Some)
            .map_err(ClientError::decode)
    }
}

fn is_empty_record(resp: &HttpResponse) -> bool {
    let body = String::from_utf8_lossy(&resp.body);
    matches!(body.trim(), "" | "null" | "{}")
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn send_message(
        &self,
        user: &UserId,
        chapter: Option<&ChapterId>,
        text: &str,
    ) -> Result<String, BackendError> {
        let payload = ChatSendPayload {
            message: text,
            user_id: user,
            chapter_id: chapter,
        };
        let resp = self.client.send(api::send_chat(self.base(), &payload)).await?;
        Ok(parse::parse_chat_reply(&resp.body).map_err(ClientError::decode)?)
    }

    async fn chapter_history(&self, chapter: &ChapterId) -> Result<Vec<ChatMessage>, BackendError> {
        let resp = self
            .client
            .send(api::chapter_history(self.base(), chapter))
            .await?;
        Ok(parse::parse_history(&resp.body).map_err(ClientError::decode)?)
    }

    async fn general_history(&self, user: &UserId) -> Result<Vec<ChatMessage>, BackendError> {
        let resp = self.client.send(api::general_history(self.base(), user)).await?;
        Ok(parse::parse_history(&resp.body).map_err(ClientError::decode)?)
    }
}

#[async_trait]
impl NotificationBackend for HttpBackend {
    async fn all(&self) -> Result<Vec<NotificationRecord>, BackendError> {
        let resp = self.client.send(api::notifications(self.base())).await?;
        Ok(parse::parse_notifications(&resp.body).map_err(ClientError::decode)?)
    }

    async fn first_unseen(&self) -> Result<Option<NotificationRecord>, BackendError> {
        Ok(self.first_unseen_notification().await?)
    }

    async fn mark_seen(&self, id: &NotificationId) -> Result<(), BackendError> {
        self.client
            .send(api::mark_notification_seen(self.base(), id))
            .await?;
        Ok(())
    }
}
