use crate::types::{BookId, ChapterId, ChatMessage, NotificationRecord, RecordingState};
use serde::Serialize;

/// Render-ready state of the chat pane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChatView {
    pub active_chapter_id: Option<ChapterId>,
    pub book_id: Option<BookId>,
    pub book_cover_ref: Option<String>,
    pub transcript: Vec<ChatMessage>,

    // History for the current chapter (or general chat) is still being fetched.
    pub loading: bool,
    pub pending_replies: usize,
    pub input_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiEvent {
    Chat(ChatView),
    Recording { state: RecordingState },
    Notifications { unread: usize },
    NotificationModal(NotificationRecord),
    Error { message: String },
    RedirectToLogin,
}

/// Where the core hands state to whatever renders it.
///
/// Implementations must be fast and must not call back into the emitter; some
/// events are emitted while the emitter holds its state lock.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UiEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: UiEvent) {}
}
