use async_trait::async_trait;
use chapterchat_core::auth::{AuthSession, MemoryCredentialStore};
use chapterchat_core::events::UiEvent;
use chapterchat_core::test::RecordingSink;
use chapterchat_core::types::{
    ChapterId, ChatMessage, Credential, NotificationId, NotificationRecord, RecordingState, Role,
    UserId,
};
use chapterchat_engine::notifications::NotificationCenter;
use chapterchat_engine::recording::{Recorder, RecordingError};
use chapterchat_engine::session::{ChatSession, LoadOutcome, SendError, SendOutcome};
use chapterchat_engine::traits::{
    ActiveCapture, AudioInput, BackendError, ChatBackend, Microphone, MicrophoneError,
    MicrophoneErrorKind, NotificationBackend, TranscriptionBackend,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

type Gate<T> = oneshot::Receiver<Result<T, BackendError>>;

/// Chat backend whose responses are released by the test.
#[derive(Default)]
struct GatedChat {
    history: Mutex<HashMap<String, Gate<Vec<ChatMessage>>>>,
    replies: Mutex<HashMap<String, Gate<String>>>,
}

impl GatedChat {
    fn gate_history(&self, chapter: &str) -> oneshot::Sender<Result<Vec<ChatMessage>, BackendError>> {
        let (tx, rx) = oneshot::channel();
        self.history.lock().unwrap().insert(chapter.into(), rx);
        tx
    }

    fn gate_reply(&self, text: &str) -> oneshot::Sender<Result<String, BackendError>> {
        let (tx, rx) = oneshot::channel();
        self.replies.lock().unwrap().insert(text.into(), rx);
        tx
    }
}

#[async_trait]
impl ChatBackend for GatedChat {
    async fn send_message(
        &self,
        _user: &UserId,
        _chapter: Option<&ChapterId>,
        text: &str,
    ) -> Result<String, BackendError> {
        let gate = self.replies.lock().unwrap().remove(text);
        match gate {
            Some(rx) => rx.await.unwrap_or(Err(BackendError::Network)),
            None => Ok(format!("reply to {text}")),
        }
    }

    async fn chapter_history(&self, chapter: &ChapterId) -> Result<Vec<ChatMessage>, BackendError> {
        let gate = self.history.lock().unwrap().remove(chapter.as_str());
        match gate {
            Some(rx) => rx.await.unwrap_or(Err(BackendError::Network)),
            None => Ok(vec![]),
        }
    }

    async fn general_history(&self, _user: &UserId) -> Result<Vec<ChatMessage>, BackendError> {
        Ok(vec![])
    }
}

struct Fixture {
    chat: Arc<GatedChat>,
    sink: Arc<RecordingSink>,
    auth: Arc<AuthSession>,
    session: Arc<ChatSession>,
}

fn fixture() -> Fixture {
    let auth = Arc::new(AuthSession::new(Arc::new(MemoryCredentialStore::default())));
    auth.sign_in(Credential::new("token", "user-1")).unwrap();
    let chat = Arc::new(GatedChat::default());
    let sink = RecordingSink::shared();
    let session = Arc::new(ChatSession::new(auth.clone(), chat.clone(), sink.clone()));
    Fixture {
        chat,
        sink,
        auth,
        session,
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

fn chat_views(sink: &RecordingSink) -> Vec<chapterchat_core::events::ChatView> {
    sink.events()
        .into_iter()
        .filter_map(|e| match e {
            UiEvent::Chat(v) => Some(v),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn general_chat_reply_is_appended() {
    let f = fixture();
    let release = f.chat.gate_reply("hello");

    let s = f.session.clone();
    let task = tokio::spawn(async move { s.send_message("hello").await });

    wait_until(|| f.session.snapshot().transcript.len() == 1).await;
    assert_eq!(f.session.snapshot().transcript, vec![ChatMessage::user("hello")]);
    assert!(f.session.snapshot().active_chapter_id.is_none());

    release.send(Ok("hi".into())).unwrap();
    let out = task.await.unwrap().unwrap();
    assert_eq!(out, SendOutcome::Answered("hi".into()));
    assert_eq!(
        f.session.snapshot().transcript,
        vec![ChatMessage::user("hello"), ChatMessage::assistant("hi")]
    );
}

#[tokio::test]
async fn network_failure_appends_system_message() {
    let f = fixture();
    let release = f.chat.gate_reply("hello");
    release.send(Err(BackendError::Network)).unwrap();

    let out = f.session.send_message("hello").await.unwrap();
    assert_eq!(out, SendOutcome::Failed(BackendError::Network));

    let t = f.session.snapshot().transcript;
    assert_eq!(t[0], ChatMessage::user("hello"));
    assert_eq!(t[1].role, Role::System);
    assert!(t[1].content.to_lowercase().contains("network"));
    assert!(t.iter().all(|m| m.role != Role::Assistant));
}

#[tokio::test]
async fn latest_chapter_selection_wins() {
    let f = fixture();
    let release_a = f.chat.gate_history("A");
    let release_b = f.chat.gate_history("B");

    let s = f.session.clone();
    let a = tokio::spawn(async move { s.select_chapter(ChapterId::new("A"), None, None).await });
    wait_until(|| f.session.snapshot().active_chapter_id == Some(ChapterId::new("A"))).await;

    let s = f.session.clone();
    let b = tokio::spawn(async move { s.select_chapter(ChapterId::new("B"), None, None).await });
    wait_until(|| f.session.snapshot().active_chapter_id == Some(ChapterId::new("B"))).await;

    release_b
        .send(Ok(vec![ChatMessage::user("b1"), ChatMessage::assistant("b2")]))
        .unwrap();
    assert_eq!(b.await.unwrap(), LoadOutcome::Loaded { messages: 2 });

    release_a.send(Ok(vec![ChatMessage::user("a1")])).unwrap();
    assert_eq!(a.await.unwrap(), LoadOutcome::Superseded);

    let view = f.session.snapshot();
    assert_eq!(view.active_chapter_id, Some(ChapterId::new("B")));
    assert_eq!(
        view.transcript,
        vec![ChatMessage::user("b1"), ChatMessage::assistant("b2")]
    );

    // No render ever showed A's history.
    for v in chat_views(&f.sink) {
        assert!(v.transcript.iter().all(|m| m.content != "a1"));
    }
}

#[tokio::test]
async fn replies_land_in_completion_order_and_transcript_only_grows() {
    let f = fixture();
    let release_first = f.chat.gate_reply("first");
    let release_second = f.chat.gate_reply("second");

    let s = f.session.clone();
    let first = tokio::spawn(async move { s.send_message("first").await });
    wait_until(|| f.session.snapshot().transcript.len() == 1).await;
    let s = f.session.clone();
    let second = tokio::spawn(async move { s.send_message("second").await });
    wait_until(|| f.session.snapshot().transcript.len() == 2).await;
    assert_eq!(f.session.snapshot().pending_replies, 2);

    release_second.send(Ok("answer 2".into())).unwrap();
    second.await.unwrap().unwrap();
    release_first.send(Ok("answer 1".into())).unwrap();
    first.await.unwrap().unwrap();

    assert_eq!(
        f.session.snapshot().transcript,
        vec![
            ChatMessage::user("first"),
            ChatMessage::user("second"),
            ChatMessage::assistant("answer 2"),
            ChatMessage::assistant("answer 1"),
        ]
    );

    let lens: Vec<usize> = chat_views(&f.sink).iter().map(|v| v.transcript.len()).collect();
    assert!(lens.windows(2).all(|w| w[0] <= w[1]), "{lens:?}");

    // Every earlier render is a prefix of the final transcript.
    let last = f.session.snapshot().transcript;
    for v in chat_views(&f.sink) {
        assert_eq!(v.transcript[..], last[..v.transcript.len()]);
    }
}

#[tokio::test]
async fn sending_is_refused_while_history_loads() {
    let f = fixture();
    let release = f.chat.gate_history("C");

    let s = f.session.clone();
    let load = tokio::spawn(async move { s.select_chapter(ChapterId::new("C"), None, None).await });
    wait_until(|| f.session.snapshot().loading).await;
    assert!(!f.session.snapshot().input_enabled);

    assert_eq!(
        f.session.send_message("early question").await,
        Err(SendError::HistoryLoading)
    );
    f.session.append_system("Microphone unavailable.");
    assert!(f.session.snapshot().transcript.is_empty());

    release.send(Ok(vec![ChatMessage::assistant("old answer")])).unwrap();
    assert_eq!(load.await.unwrap(), LoadOutcome::Loaded { messages: 1 });

    let view = f.session.snapshot();
    assert!(view.input_enabled);
    assert_eq!(
        view.transcript,
        vec![
            ChatMessage::assistant("old answer"),
            ChatMessage::system("Microphone unavailable."),
        ]
    );

    // Once the chapter is on screen, each render extends the previous one.
    let views: Vec<_> = chat_views(&f.sink)
        .into_iter()
        .filter(|v| v.active_chapter_id == Some(ChapterId::new("C")))
        .collect();
    for w in views.windows(2) {
        let (before, after) = (&w[0].transcript, &w[1].transcript);
        assert!(after.len() >= before.len());
        assert_eq!(after[..before.len()], before[..]);
    }

    f.session.send_message("now").await.unwrap();
    assert_eq!(f.session.snapshot().transcript.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_render_matches_state_under_concurrent_sends() {
    let f = fixture();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let s = f.session.clone();
            tokio::spawn(async move { s.send_message(&format!("m{i}")).await })
        })
        .collect();
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let views = chat_views(&f.sink);
    assert_eq!(views.last(), Some(&f.session.snapshot()));
    let lens: Vec<usize> = views.iter().map(|v| v.transcript.len()).collect();
    assert!(lens.windows(2).all(|w| w[0] <= w[1]), "{lens:?}");
    assert_eq!(f.session.snapshot().transcript.len(), 32);
}

// --- recording -------------------------------------------------------------

struct FakeMicrophone {
    fail_with: Option<MicrophoneErrorKind>,
    held: Arc<AtomicBool>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

struct FakeCapture {
    held: Arc<AtomicBool>,
}

impl Drop for FakeCapture {
    fn drop(&mut self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn acquire(&self) -> Result<Box<dyn ActiveCapture>, MicrophoneError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(rx) = gate {
            let _ = rx.await;
        }
        if let Some(kind) = self.fail_with {
            return Err(MicrophoneError::new(kind, "fake"));
        }
        self.held.store(true, Ordering::SeqCst);
        Ok(Box::new(FakeCapture {
            held: self.held.clone(),
        }))
    }
}

#[async_trait]
impl ActiveCapture for FakeCapture {
    async fn finish(self: Box<Self>) -> Result<AudioInput, MicrophoneError> {
        Ok(AudioInput {
            sample_rate_hz: 16_000,
            samples: vec![0.1; 1_600],
        })
    }
}

#[derive(Default)]
struct FakeTranscriber {
    text: Option<String>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    calls: AtomicUsize,
}

#[async_trait]
impl TranscriptionBackend for FakeTranscriber {
    async fn transcribe(&self, _audio: &AudioInput) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(rx) = gate {
            let _ = rx.await;
        }
        self.text.clone().ok_or(BackendError::Server {
            status: 500,
            message: Some("Transcription service unavailable".into()),
        })
    }
}

fn recorder(
    f: &Fixture,
    fail_with: Option<MicrophoneErrorKind>,
    transcriber: Arc<FakeTranscriber>,
) -> (Arc<AtomicBool>, Arc<Recorder>) {
    let held = Arc::new(AtomicBool::new(false));
    let mic = Arc::new(FakeMicrophone {
        fail_with,
        held: held.clone(),
        gate: Mutex::new(None),
    });
    let r = Recorder::new(mic, transcriber, f.session.clone(), f.sink.clone());
    (held, Arc::new(r))
}

fn recording_states(sink: &RecordingSink) -> Vec<RecordingState> {
    sink.events()
        .into_iter()
        .filter_map(|e| match e {
            UiEvent::Recording { state } => Some(state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn permission_denied_never_records() {
    let f = fixture();
    let (held, r) = recorder(
        &f,
        Some(MicrophoneErrorKind::PermissionDenied),
        Arc::new(FakeTranscriber::default()),
    );

    let err = r.start_recording().await.unwrap_err();
    assert!(matches!(err, RecordingError::Microphone(_)));
    assert_eq!(r.state(), RecordingState::Idle);
    assert!(!held.load(Ordering::SeqCst));
    assert!(!recording_states(&f.sink).contains(&RecordingState::Recording));

    let t = f.session.snapshot().transcript;
    assert_eq!(t.len(), 1);
    assert_eq!(t[0].role, Role::System);
    assert!(t[0].content.to_lowercase().contains("permission"));
}

#[tokio::test]
async fn recording_is_exclusive() {
    let f = fixture();
    let (held, r) = recorder(&f, None, Arc::new(FakeTranscriber::default()));

    assert!(matches!(
        r.send_recording().await,
        Err(RecordingError::InvalidState { .. })
    ));
    assert!(matches!(
        r.cancel_recording(),
        Err(RecordingError::InvalidState { .. })
    ));

    r.start_recording().await.unwrap();
    assert!(held.load(Ordering::SeqCst));
    assert!(matches!(
        r.start_recording().await,
        Err(RecordingError::InvalidState { state: RecordingState::Recording, .. })
    ));
    assert!(matches!(
        r.send_recording().await,
        Err(RecordingError::InvalidState { .. })
    ));

    r.stop_recording().await.unwrap();
    assert_eq!(r.state(), RecordingState::Captured);
    assert!(!held.load(Ordering::SeqCst), "device released on stop");

    // A new recording needs an explicit cancel first.
    assert!(r.start_recording().await.is_err());
    r.cancel_recording().unwrap();
    assert_eq!(r.state(), RecordingState::Idle);
    r.start_recording().await.unwrap();
}

#[tokio::test]
async fn reset_releases_an_open_capture() {
    let f = fixture();
    let (held, r) = recorder(&f, None, Arc::new(FakeTranscriber::default()));

    r.start_recording().await.unwrap();
    assert!(held.load(Ordering::SeqCst));

    r.reset();
    assert_eq!(r.state(), RecordingState::Idle);
    assert!(!held.load(Ordering::SeqCst));
    assert!(r.stop_recording().await.is_err());
    r.start_recording().await.unwrap();
}

#[tokio::test]
async fn reset_while_microphone_opens_leaves_it_closed() {
    let f = fixture();
    let held = Arc::new(AtomicBool::new(false));
    let (open, gate) = oneshot::channel();
    let mic = Arc::new(FakeMicrophone {
        fail_with: None,
        held: held.clone(),
        gate: Mutex::new(Some(gate)),
    });
    let r = Arc::new(Recorder::new(
        mic.clone(),
        Arc::new(FakeTranscriber::default()),
        f.session.clone(),
        f.sink.clone(),
    ));

    let starting = {
        let r = r.clone();
        tokio::spawn(async move { r.start_recording().await })
    };
    wait_until(|| mic.gate.lock().unwrap().is_none()).await;
    r.reset();
    open.send(()).unwrap();

    assert_eq!(starting.await.unwrap(), Err(RecordingError::Interrupted));
    assert_eq!(r.state(), RecordingState::Idle);
    assert!(!held.load(Ordering::SeqCst));
    assert!(!recording_states(&f.sink).contains(&RecordingState::Recording));
    assert!(f.session.snapshot().transcript.is_empty());

    // The next recording starts normally.
    r.start_recording().await.unwrap();
    assert!(held.load(Ordering::SeqCst));
}

#[tokio::test]
async fn transcribed_text_goes_through_chat() {
    let f = fixture();
    let (_held, r) = recorder(
        &f,
        None,
        Arc::new(FakeTranscriber {
            text: Some("what is osmosis".into()),
            ..Default::default()
        }),
    );

    r.start_recording().await.unwrap();
    r.stop_recording().await.unwrap();
    let out = r.send_recording().await.unwrap();
    assert_eq!(out, SendOutcome::Answered("reply to what is osmosis".into()));
    assert_eq!(r.state(), RecordingState::Idle);
    assert_eq!(
        f.session.snapshot().transcript,
        vec![
            ChatMessage::user("what is osmosis"),
            ChatMessage::assistant("reply to what is osmosis"),
        ]
    );
    assert_eq!(
        recording_states(&f.sink),
        vec![
            RecordingState::Recording,
            RecordingState::Captured,
            RecordingState::Sending,
            RecordingState::Idle,
        ]
    );
}

#[tokio::test]
async fn buffer_is_gone_once_sending_starts() {
    let f = fixture();
    let (tx, rx) = oneshot::channel();
    let transcriber = Arc::new(FakeTranscriber {
        text: Some("hi".into()),
        gate: Mutex::new(Some(rx)),
        ..Default::default()
    });
    let (_held, r) = recorder(&f, None, transcriber.clone());

    r.start_recording().await.unwrap();
    r.stop_recording().await.unwrap();

    let sending = tokio::spawn({
        let r = r.clone();
        async move { r.send_recording().await }
    });
    wait_until(|| r.state() == RecordingState::Sending).await;

    assert!(r.cancel_recording().is_err());
    assert!(r.send_recording().await.is_err());

    tx.send(()).unwrap();
    sending.await.unwrap().unwrap();
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(r.state(), RecordingState::Idle);
}

#[tokio::test]
async fn transcription_failure_is_reported_in_chat() {
    let f = fixture();
    let (_held, r) = recorder(&f, None, Arc::new(FakeTranscriber::default()));

    r.start_recording().await.unwrap();
    r.stop_recording().await.unwrap();
    let err = r.send_recording().await.unwrap_err();
    assert!(matches!(err, RecordingError::Transcription(_)));
    assert_eq!(r.state(), RecordingState::Idle);

    let t = f.session.snapshot().transcript;
    assert_eq!(t.len(), 1);
    assert_eq!(t[0].role, Role::System);
    assert!(t[0].content.contains("Transcription service unavailable"));
}

#[tokio::test]
async fn silent_clip_is_not_sent() {
    let f = fixture();
    let (_held, r) = recorder(
        &f,
        None,
        Arc::new(FakeTranscriber {
            text: Some("   ".into()),
            ..Default::default()
        }),
    );
    r.start_recording().await.unwrap();
    r.stop_recording().await.unwrap();
    assert_eq!(r.send_recording().await, Err(RecordingError::NothingHeard));
    assert_eq!(f.session.snapshot().transcript[0].role, Role::System);
    assert_eq!(r.state(), RecordingState::Idle);
}

// --- notifications ---------------------------------------------------------

#[derive(Default)]
struct NoUnseen {
    calls: AtomicUsize,
}

#[async_trait]
impl NotificationBackend for NoUnseen {
    async fn all(&self) -> Result<Vec<NotificationRecord>, BackendError> {
        Ok(vec![])
    }

    async fn first_unseen(&self) -> Result<Option<NotificationRecord>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn mark_seen(&self, _id: &NotificationId) -> Result<(), BackendError> {
        Ok(())
    }
}

#[tokio::test]
async fn nothing_unseen_shows_no_modal() {
    let f = fixture();
    let backend = Arc::new(NoUnseen::default());
    let center = NotificationCenter::new(f.auth.clone(), backend.clone(), f.sink.clone());

    assert!(center.load_first_unseen().await.is_none());
    assert!(center.modal().is_none());
    assert_eq!(
        f.sink
            .count(|e| matches!(e, UiEvent::NotificationModal(_) | UiEvent::Error { .. })),
        0
    );
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}
