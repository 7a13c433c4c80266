use anyhow::{Context, anyhow};
use chapterchat_core::types::{Book, Chapter, ChatMessage, Credential, NotificationRecord};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ChatReply {
    response: String,
}

pub fn parse_chat_reply(body: &[u8]) -> anyhow::Result<String> {
    let resp: ChatReply = serde_json::from_slice(body).context("decode chat reply JSON")?;
    Ok(resp.response)
}

pub fn parse_history(body: &[u8]) -> anyhow::Result<Vec<ChatMessage>> {
    serde_json::from_slice(body).context("decode chat history JSON")
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: Option<String>,
    // Older transcription route.
    transcription: Option<String>,
}

pub fn parse_transcription(body: &[u8]) -> anyhow::Result<String> {
    let resp: TranscriptionResponse =
        serde_json::from_slice(body).context("decode transcription JSON")?;
    resp.text
        .or(resp.transcription)
        .ok_or_else(|| anyhow!("no text in transcription response"))
}

pub fn parse_notifications(body: &[u8]) -> anyhow::Result<Vec<NotificationRecord>> {
    serde_json::from_slice(body).context("decode notifications JSON")
}

pub fn parse_notification(body: &[u8]) -> anyhow::Result<NotificationRecord> {
    serde_json::from_slice(body).context("decode notification JSON")
}

pub fn parse_books(body: &[u8]) -> anyhow::Result<Vec<Book>> {
    serde_json::from_slice(body).context("decode books JSON")
}

pub fn parse_chapters(body: &[u8]) -> anyhow::Result<Vec<Chapter>> {
    serde_json::from_slice(body).context("decode chapters JSON")
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(rename = "userId")]
    user_id: Option<String>,
    user: Option<LoginUser>,
}

#[derive(Debug, Deserialize)]
struct LoginUser {
    #[serde(rename = "_id")]
    id: String,
}

pub fn parse_login(body: &[u8]) -> anyhow::Result<Credential> {
    let resp: LoginResponse = serde_json::from_slice(body).context("decode login JSON")?;
    let user_id = resp
        .user_id
        .or(resp.user.map(|u| u.id))
        .ok_or_else(|| anyhow!("no user id in login response"))?;
    Ok(Credential::new(resp.token, user_id))
}

#[derive(Debug, Deserialize)]
struct ServerError {
    message: Option<String>,
    error: Option<String>,
}

/// The human-readable message a backend error response carries, if any.
pub fn server_error_message(body: &[u8]) -> Option<String> {
    let err: ServerError = serde_json::from_slice(body).ok()?;
    err.message
        .or(err.error)
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
}
