use async_trait::async_trait;
use chapterchat_core::types::{ChapterId, ChatMessage, NotificationId, NotificationRecord, UserId};
use thiserror::Error;

const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

/// What the engine needs to know about a failed backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("could not reach the server")]
    Network,

    #[error("not authorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("server returned {status}")]
    Server { status: u16, message: Option<String> },

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Text shown to the user as a system message.
    pub fn user_message(&self) -> String {
        match self {
            BackendError::Network => {
                "Network error: could not reach the server. Check your connection and try again."
                    .into()
            }
            BackendError::Unauthorized => "Your session has expired. Please sign in again.".into(),
            BackendError::NotFound => "The requested item could not be found.".into(),
            BackendError::Server {
                message: Some(m), ..
            } => m.clone(),
            BackendError::Server { message: None, .. } | BackendError::Other(_) => {
                GENERIC_FAILURE.into()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioInput {
    // Mono PCM samples at `sample_rate_hz`; capture/resampling happened at the boundary.
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

impl AudioInput {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate_hz == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1_000 / self.sample_rate_hz as u64
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Returns the assistant's reply text.
    async fn send_message(
        &self,
        user: &UserId,
        chapter: Option<&ChapterId>,
        text: &str,
    ) -> Result<String, BackendError>;

    async fn chapter_history(&self, chapter: &ChapterId) -> Result<Vec<ChatMessage>, BackendError>;

    async fn general_history(&self, user: &UserId) -> Result<Vec<ChatMessage>, BackendError>;
}

#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    async fn transcribe(&self, audio: &AudioInput) -> Result<String, BackendError>;
}

#[async_trait]
pub trait NotificationBackend: Send + Sync {
    async fn all(&self) -> Result<Vec<NotificationRecord>, BackendError>;

    /// `Ok(None)` when the backend has nothing unseen.
    async fn first_unseen(&self) -> Result<Option<NotificationRecord>, BackendError>;

    async fn mark_seen(&self, id: &NotificationId) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrophoneErrorKind {
    NoDevice,
    PermissionDenied,
    Aborted,
    DeviceBusy,
    ConstraintsUnsatisfiable,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("microphone error ({kind:?}): {detail}")]
pub struct MicrophoneError {
    pub kind: MicrophoneErrorKind,
    pub detail: String,
}

impl MicrophoneError {
    pub fn new(kind: MicrophoneErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn user_message(&self) -> String {
        match self.kind {
            MicrophoneErrorKind::NoDevice => {
                "No microphone found. Connect a microphone and try again.".into()
            }
            MicrophoneErrorKind::PermissionDenied => {
                "Microphone permission denied. Allow microphone access in your system settings and try again.".into()
            }
            MicrophoneErrorKind::Aborted => "Microphone access was aborted. Please try again.".into(),
            MicrophoneErrorKind::DeviceBusy => {
                "Your microphone is in use by another application. Close it and try again.".into()
            }
            MicrophoneErrorKind::ConstraintsUnsatisfiable => {
                "Your microphone does not support the required recording settings.".into()
            }
            MicrophoneErrorKind::Other => {
                format!("Could not access the microphone: {}", self.detail)
            }
        }
    }
}

/// Grants exclusive access to an input device.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Acquires the device and starts capturing.
    ///
    /// On failure nothing stays held, even if acquisition got partway.
    async fn acquire(&self) -> Result<Box<dyn ActiveCapture>, MicrophoneError>;
}

/// A running capture. Dropping it releases the device.
#[async_trait]
pub trait ActiveCapture: Send {
    /// Stops capture, releases the device and returns the recorded clip.
    async fn finish(self: Box<Self>) -> Result<AudioInput, MicrophoneError>;
}
