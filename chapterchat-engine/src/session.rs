//! The chat pane's state: which chapter is active and what the transcript shows.
//!
//! Failure policy is additive. A failed send never removes the optimistic user
//! message; it appends a system message describing the failure. Transcript
//! entries are only ever appended, except when a chapter switch (or return to
//! general chat) starts a new transcript.
//!
//! While history loads the transcript belongs to the fetch: sending is refused
//! and system notes are held back until the history is in place.
//!
//! Every switch starts a new epoch. Work that finishes after its epoch ended
//! (a slow history fetch, a late reply) is dropped instead of leaking into the
//! transcript of the chapter now on screen. Replies of one epoch land in the
//! order they complete, not the order they were requested.

use crate::traits::{BackendError, ChatBackend};
use chapterchat_core::auth::AuthSession;
use chapterchat_core::events::{ChatView, EventSink, UiEvent};
use chapterchat_core::text::{non_blank, preview};
use chapterchat_core::types::{BookId, ChapterId, ChatMessage};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("not signed in")]
    NotSignedIn,

    #[error("chat history is still loading")]
    HistoryLoading,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Answered(String),
    Failed(BackendError),

    // The user switched chapters before the reply arrived.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { messages: usize },
    Failed,
    Superseded,
    SignedOut,
}

#[derive(Debug, Default)]
struct ChatState {
    epoch: u64,
    active_chapter_id: Option<ChapterId>,
    book_id: Option<BookId>,
    book_cover_ref: Option<String>,
    transcript: Vec<ChatMessage>,
    loading: bool,
    pending_replies: usize,
    // System notes raised during a load, appended after the history.
    held_notes: Vec<ChatMessage>,
}

pub struct ChatSession {
    auth: Arc<AuthSession>,
    backend: Arc<dyn ChatBackend>,
    sink: Arc<dyn EventSink>,
    state: Mutex<ChatState>,
}

impl ChatSession {
    pub fn new(
        auth: Arc<AuthSession>,
        backend: Arc<dyn ChatBackend>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            auth,
            backend,
            sink,
            state: Mutex::new(ChatState::default()),
        }
    }

    pub fn snapshot(&self) -> ChatView {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.view(&state)
    }

    /// Makes `chapter` active and loads its history.
    ///
    /// The new chapter is published together with an empty transcript, so no
    /// render ever pairs it with the previous chapter's messages.
    pub async fn select_chapter(
        &self,
        chapter: ChapterId,
        book: Option<BookId>,
        cover_ref: Option<String>,
    ) -> LoadOutcome {
        let epoch = self.update(|s| {
            s.begin_epoch();
            s.active_chapter_id = Some(chapter.clone());
            s.book_id = book;
            s.book_cover_ref = cover_ref;
            s.loading = true;
            s.epoch
        });

        log::debug!("loading history for chapter {chapter}");
        let result = self.backend.chapter_history(&chapter).await;
        self.finish_load(epoch, result)
    }

    /// Leaves chapter mode and loads the user's general history.
    pub async fn clear_chapter(&self) -> LoadOutcome {
        let user = self.auth.user_id();
        let epoch = self.update(|s| {
            s.begin_epoch();
            s.loading = user.is_some();
            s.epoch
        });

        let Some(user) = user else {
            return LoadOutcome::SignedOut;
        };

        log::debug!("loading general history");
        let result = self.backend.general_history(&user).await;
        self.finish_load(epoch, result)
    }

    /// Shows the user's message immediately, then appends the reply or a failure note.
    pub async fn send_message(&self, text: &str) -> Result<SendOutcome, SendError> {
        let text = non_blank(text).ok_or(SendError::EmptyMessage)?.to_string();
        let user = self.auth.user_id().ok_or(SendError::NotSignedIn)?;

        let (epoch, chapter) = self.update(|s| {
            if s.loading {
                return Err(SendError::HistoryLoading);
            }
            s.transcript.push(ChatMessage::user(text.clone()));
            s.pending_replies += 1;
            Ok((s.epoch, s.active_chapter_id.clone()))
        })?;

        log::debug!("sending chat message: {}", preview(&text, 40));
        let result = self.backend.send_message(&user, chapter.as_ref(), &text).await;

        Ok(self.update(|s| {
            if s.epoch != epoch {
                log::debug!("dropping reply for a transcript that is no longer shown");
                return SendOutcome::Superseded;
            }
            s.pending_replies = s.pending_replies.saturating_sub(1);

            match result {
                Ok(reply) => {
                    s.transcript.push(ChatMessage::assistant(reply.clone()));
                    SendOutcome::Answered(reply)
                }
                Err(e) => {
                    log::warn!("chat send failed: {e}");
                    s.transcript.push(ChatMessage::system(e.user_message()));
                    SendOutcome::Failed(e)
                }
            }
        }))
    }

    /// Appends a system note to whatever transcript is currently visible.
    pub fn append_system(&self, text: impl Into<String>) {
        let text = text.into();
        self.update(|s| {
            let note = ChatMessage::system(text);
            if s.loading {
                s.held_notes.push(note);
            } else {
                s.transcript.push(note);
            }
        });
    }

    /// Back to an empty, chapterless view (logout).
    pub fn reset(&self) {
        self.update(|s| {
            let epoch = s.epoch;
            *s = ChatState::default();
            s.epoch = epoch + 1;
        });
    }

    fn finish_load(
        &self,
        epoch: u64,
        result: Result<Vec<ChatMessage>, BackendError>,
    ) -> LoadOutcome {
        let mut failure = None;
        let outcome = self.update(|s| {
            if s.epoch != epoch {
                log::debug!("dropping history fetched for a superseded selection");
                return LoadOutcome::Superseded;
            }
            s.loading = false;

            let outcome = match result {
                Ok(history) => {
                    let messages = history.len();
                    s.transcript = history;
                    LoadOutcome::Loaded { messages }
                }
                Err(e) => {
                    log::warn!("history fetch failed: {e}");
                    failure = Some(e.user_message());
                    LoadOutcome::Failed
                }
            };
            let held = std::mem::take(&mut s.held_notes);
            s.transcript.extend(held);
            outcome
        });

        if let Some(message) = failure {
            self.sink.emit(UiEvent::Error { message });
        }
        outcome
    }

    // Views are emitted under the lock so the sink sees them in mutation order.
    fn update<T>(&self, f: impl FnOnce(&mut ChatState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut state);
        self.sink.emit(UiEvent::Chat(self.view(&state)));
        out
    }

    fn view(&self, s: &ChatState) -> ChatView {
        ChatView {
            active_chapter_id: s.active_chapter_id.clone(),
            book_id: s.book_id.clone(),
            book_cover_ref: s.book_cover_ref.clone(),
            transcript: s.transcript.clone(),
            loading: s.loading,
            pending_replies: s.pending_replies,
            input_enabled: self.auth.is_authenticated() && !s.loading,
        }
    }
}

impl ChatState {
    fn begin_epoch(&mut self) {
        self.epoch += 1;
        self.active_chapter_id = None;
        self.book_id = None;
        self.book_cover_ref = None;
        self.transcript.clear();
        self.loading = false;
        self.pending_replies = 0;
        self.held_notes.clear();
    }
}
