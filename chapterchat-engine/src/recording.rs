use crate::session::{ChatSession, SendError, SendOutcome};
use crate::traits::{ActiveCapture, AudioInput, BackendError, Microphone, MicrophoneError, TranscriptionBackend};
use chapterchat_core::events::{EventSink, UiEvent};
use chapterchat_core::text::non_blank;
use chapterchat_core::types::RecordingState;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

const NOTHING_HEARD: &str = "No speech was detected in the recording. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingEvent {
    Acquired,
    AcquireFailed,
    Stop,
    StopFailed,
    Cancel,
    Send,
    SendFinished,
}

/// The recorder's transition table. `None` means the event is not valid in `state`.
pub fn next_state(state: RecordingState, event: RecordingEvent) -> Option<RecordingState> {
    use RecordingEvent as E;
    use RecordingState as S;

    match (state, event) {
        (S::Idle, E::Acquired) => Some(S::Recording),
        (S::Idle, E::AcquireFailed) => Some(S::Idle),
        (S::Recording, E::Stop) => Some(S::Captured),
        (S::Recording, E::StopFailed) => Some(S::Idle),
        (S::Captured, E::Cancel) => Some(S::Idle),
        (S::Captured, E::Send) => Some(S::Sending),
        (S::Sending, E::SendFinished) => Some(S::Idle),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordingError {
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        state: RecordingState,
        action: &'static str,
    },

    #[error(transparent)]
    Microphone(#[from] MicrophoneError),

    #[error("transcription failed: {0}")]
    Transcription(BackendError),

    #[error("no speech detected")]
    NothingHeard,

    #[error("recorder was reset while the microphone was opening")]
    Interrupted,

    #[error(transparent)]
    Send(#[from] SendError),
}

struct RecorderState {
    state: RecordingState,
    acquiring: bool,
    // Bumped by `reset`; an acquire that started under an older value is stale.
    generation: u64,
    capture: Option<Box<dyn ActiveCapture>>,
    buffer: Option<AudioInput>,
}

/// Voice input: one recorded clip per user action, handed to the chat as text.
pub struct Recorder {
    microphone: Arc<dyn Microphone>,
    transcriber: Arc<dyn TranscriptionBackend>,
    session: Arc<ChatSession>,
    sink: Arc<dyn EventSink>,
    inner: Mutex<RecorderState>,
}

impl Recorder {
    pub fn new(
        microphone: Arc<dyn Microphone>,
        transcriber: Arc<dyn TranscriptionBackend>,
        session: Arc<ChatSession>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            microphone,
            transcriber,
            session,
            sink,
            inner: Mutex::new(RecorderState {
                state: RecordingState::Idle,
                acquiring: false,
                generation: 0,
                capture: None,
                buffer: None,
            }),
        }
    }

    pub fn state(&self) -> RecordingState {
        self.lock().state
    }

    pub async fn start_recording(&self) -> Result<(), RecordingError> {
        let generation = {
            let mut inner = self.lock();
            if inner.state != RecordingState::Idle || inner.acquiring {
                return Err(RecordingError::InvalidState {
                    state: inner.state,
                    action: "start recording",
                });
            }
            inner.acquiring = true;
            inner.generation
        };

        match self.microphone.acquire().await {
            Ok(capture) => {
                let mut capture = Some(capture);
                let current = self.transition_current(generation, RecordingEvent::Acquired, |inner| {
                    inner.acquiring = false;
                    inner.capture = capture.take();
                });
                if !current {
                    // Dropping the capture releases the device.
                    drop(capture);
                    log::info!("microphone opened after a reset; released");
                    return Err(RecordingError::Interrupted);
                }
                log::info!("recording started");
                Ok(())
            }
            Err(e) => {
                let current = self.transition_current(generation, RecordingEvent::AcquireFailed, |inner| {
                    inner.acquiring = false;
                });
                if !current {
                    log::debug!("microphone failure after a reset ignored: {e}");
                    return Err(RecordingError::Interrupted);
                }
                log::error!("start_recording failed: {e}");
                self.session.append_system(e.user_message());
                Err(e.into())
            }
        }
    }

    pub async fn stop_recording(&self) -> Result<(), RecordingError> {
        let capture = {
            let mut inner = self.lock();
            match (inner.state, inner.capture.take()) {
                (RecordingState::Recording, Some(capture)) => capture,
                (state, capture) => {
                    inner.capture = capture;
                    return Err(RecordingError::InvalidState {
                        state,
                        action: "stop recording",
                    });
                }
            }
        };

        // `finish` releases the device whether or not it succeeds.
        match capture.finish().await {
            Ok(audio) => {
                log::info!(
                    "captured audio: {} samples (~{}ms)",
                    audio.samples.len(),
                    audio.duration_ms()
                );
                self.transition(RecordingEvent::Stop, |inner| inner.buffer = Some(audio));
                Ok(())
            }
            Err(e) => {
                log::error!("stop_recording failed: {e}");
                self.transition(RecordingEvent::StopFailed, |_| {});
                self.session.append_system(e.user_message());
                Err(e.into())
            }
        }
    }

    pub fn cancel_recording(&self) -> Result<(), RecordingError> {
        self.checked(RecordingEvent::Cancel, "cancel recording", |inner| {
            inner.buffer = None;
        })?;
        log::info!("recording discarded");
        Ok(())
    }

    /// Drops any open capture and captured clip and returns to `Idle` (logout).
    pub fn reset(&self) {
        let capture = {
            let mut inner = self.lock();
            inner.buffer = None;
            inner.state = RecordingState::Idle;
            inner.acquiring = false;
            inner.generation += 1;
            inner.capture.take()
        };
        // Dropping an unfinished capture releases the device.
        drop(capture);
        self.sink.emit(UiEvent::Recording {
            state: RecordingState::Idle,
        });
    }

    /// Transcribes the captured clip and sends the text as a chat message.
    pub async fn send_recording(&self) -> Result<SendOutcome, RecordingError> {
        // The buffer leaves the recorder before any network call, so a second
        // send or a cancel cannot act on the same clip.
        let mut taken = None;
        self.checked(RecordingEvent::Send, "send recording", |inner| {
            taken = inner.buffer.take();
        })?;
        let Some(audio) = taken else {
            self.transition(RecordingEvent::SendFinished, |_| {});
            return Err(RecordingError::NothingHeard);
        };

        let result = self.transcribe_and_send(&audio).await;
        self.transition(RecordingEvent::SendFinished, |_| {});
        result
    }

    async fn transcribe_and_send(&self, audio: &AudioInput) -> Result<SendOutcome, RecordingError> {
        let text = match self.transcriber.transcribe(audio).await {
            Ok(text) => text,
            Err(e) => {
                log::warn!("transcription failed: {e}");
                self.session
                    .append_system(format!("Transcription failed. {}", e.user_message()));
                return Err(RecordingError::Transcription(e));
            }
        };

        let Some(text) = non_blank(&text) else {
            self.session.append_system(NOTHING_HEARD);
            return Err(RecordingError::NothingHeard);
        };

        match self.session.send_message(text).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.session
                    .append_system(format!("Could not send the transcribed message: {e}."));
                Err(e.into())
            }
        }
    }

    fn checked(
        &self,
        event: RecordingEvent,
        action: &'static str,
        f: impl FnOnce(&mut RecorderState),
    ) -> Result<(), RecordingError> {
        let state = {
            let mut inner = self.lock();
            let Some(next) = next_state(inner.state, event) else {
                return Err(RecordingError::InvalidState {
                    state: inner.state,
                    action,
                });
            };
            f(&mut inner);
            inner.state = next;
            next
        };
        self.sink.emit(UiEvent::Recording { state });
        Ok(())
    }

    // For transitions the caller already validated.
    fn transition(&self, event: RecordingEvent, f: impl FnOnce(&mut RecorderState)) {
        let state = {
            let mut inner = self.lock();
            f(&mut inner);
            match next_state(inner.state, event) {
                Some(next) => inner.state = next,
                None => log::warn!("ignored {event:?} in {:?}", inner.state),
            }
            inner.state
        };
        self.sink.emit(UiEvent::Recording { state });
    }

    // Like `transition`, but does nothing and returns false if `reset` ran since `generation`.
    fn transition_current(
        &self,
        generation: u64,
        event: RecordingEvent,
        f: impl FnOnce(&mut RecorderState),
    ) -> bool {
        let state = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return false;
            }
            f(&mut inner);
            match next_state(inner.state, event) {
                Some(next) => inner.state = next,
                None => log::warn!("ignored {event:?} in {:?}", inner.state),
            }
            inner.state
        };
        self.sink.emit(UiEvent::Recording { state });
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecorderState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
