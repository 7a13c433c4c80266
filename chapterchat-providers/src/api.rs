//! Request builders for every backend endpoint the client talks to.
//!
//! Builders only shape requests; the bearer token is attached by the client.

use crate::multipart::{AudioFile, build_file_upload};
use crate::request::{Body, HttpRequest, encode_segment};
use chapterchat_core::types::{BookId, ChapterId, NotificationId, UserId};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatSendPayload<'a> {
    pub message: &'a str,
    #[serde(rename = "userId")]
    pub user_id: &'a UserId,
    #[serde(rename = "chapterId", skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<&'a ChapterId>,
}

pub fn login(base_url: &str, email: &str, password: &str) -> HttpRequest {
    let payload = json!({ "email": email, "password": password });
    HttpRequest::new("POST", base_url, "/auth/login").with_json(payload.to_string())
}

pub fn send_chat(base_url: &str, payload: &ChatSendPayload<'_>) -> HttpRequest {
    // Serializing borrowed strings and ids cannot fail.
    let json = serde_json::to_string(payload).unwrap_or_default();
    HttpRequest::new("POST", base_url, "/chat/send").with_json(json)
}

pub fn chapter_history(base_url: &str, chapter: &ChapterId) -> HttpRequest {
    HttpRequest::new(
        "GET",
        base_url,
        format!("/chat/history/chapter/{}", encode_segment(chapter.as_str())),
    )
}

pub fn general_history(base_url: &str, user: &UserId) -> HttpRequest {
    HttpRequest::new(
        "GET",
        base_url,
        format!("/chat/history/user/{}", encode_segment(user.as_str())),
    )
}

pub fn transcribe(base_url: &str, audio: &AudioFile) -> HttpRequest {
    let (content_type, body) = build_file_upload("audio", audio, &[]);
    let mut req = HttpRequest::new("POST", base_url, "/chat/transcribe");
    req.set_header("Content-Type", content_type);
    req.body = body;
    req
}

pub fn books(base_url: &str) -> HttpRequest {
    HttpRequest::new("GET", base_url, "/books")
}

pub fn chapters(base_url: &str, book: &BookId) -> HttpRequest {
    HttpRequest::new(
        "GET",
        base_url,
        format!("/chapters/book/{}", encode_segment(book.as_str())),
    )
}

/// Long-running: the backend extracts and indexes chapter content.
pub fn process_chapter(base_url: &str, chapter: &ChapterId) -> HttpRequest {
    HttpRequest::new(
        "POST",
        base_url,
        format!("/chapters/{}/process", encode_segment(chapter.as_str())),
    )
}

pub fn notifications(base_url: &str) -> HttpRequest {
    HttpRequest::new("GET", base_url, "/notifications")
}

pub fn first_unseen_notification(base_url: &str) -> HttpRequest {
    HttpRequest::new("GET", base_url, "/notifications/first-unseen")
}

pub fn mark_notification_seen(base_url: &str, id: &NotificationId) -> HttpRequest {
    let mut req = HttpRequest::new(
        "PUT",
        base_url,
        format!("/notifications/{}/seen", encode_segment(id.as_str())),
    );
    req.body = Body::Empty;
    req
}
