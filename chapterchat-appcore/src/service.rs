use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use thiserror::Error;

use chapterchat_core::auth::{AuthSession, CredentialStore};
use chapterchat_core::config::ClientConfig;
use chapterchat_core::events::{EventSink, UiEvent};
use chapterchat_core::types::{Book, BookId, Chapter, ChapterId, Credential};
use chapterchat_engine::notifications::NotificationCenter;
use chapterchat_engine::recording::Recorder;
use chapterchat_engine::session::{ChatSession, LoadOutcome};
use chapterchat_engine::traits::Microphone;
use chapterchat_providers::multipart::AudioFile;
use chapterchat_providers::runtime::{ReqwestTransport, Transport};
use chapterchat_runtime::{ClientError, ConfigStore, FileCredentialStore, HttpBackend, ResilientClient};

use crate::microphone::default_microphone;
use crate::oauth::{CallbackError, parse_callback};

pub const CONFIG_FILE: &str = "config.json";
pub const CREDENTIAL_FILE: &str = "credential.json";

const REJECTED_LOGIN: &str = "Invalid email or password.";

#[derive(Debug, Error)]
pub enum SignInError {
    /// The server refused the credentials; the message is safe to show.
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Client(ClientError),

    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error("could not store credential: {0:#}")]
    Store(anyhow::Error),
}

impl From<ClientError> for SignInError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Backend {
                status: 400 | 401 | 403,
                message,
            } => SignInError::Rejected(message.unwrap_or_else(|| REJECTED_LOGIN.into())),
            other => SignInError::Client(other),
        }
    }
}

/// Everything a front end needs, wired once per process.
#[derive(Clone)]
pub struct AppService {
    config: ClientConfig,
    auth: Arc<AuthSession>,
    sink: Arc<dyn EventSink>,
    backend: Arc<HttpBackend>,
    chat: Arc<ChatSession>,
    recorder: Arc<Recorder>,
    notifications: Arc<NotificationCenter>,
}

impl AppService {
    /// Loads config and any saved credential from `config_dir`.
    pub fn open(config_dir: &Path, sink: Arc<dyn EventSink>) -> anyhow::Result<Self> {
        let config = ConfigStore::at_path(config_dir.join(CONFIG_FILE)).load_with_env()?;
        let store = Arc::new(FileCredentialStore::at_path(config_dir.join(CREDENTIAL_FILE)));
        let transport = Arc::new(ReqwestTransport::new(config.connect_timeout())?);
        Self::with_parts(config, store, transport, default_microphone(), sink)
    }

    pub fn with_parts(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        microphone: Arc<dyn Microphone>,
        sink: Arc<dyn EventSink>,
    ) -> anyhow::Result<Self> {
        let auth = Arc::new(AuthSession::restore(store).context("restore saved session")?);
        let client = ResilientClient::new(config.clone(), transport, auth.clone(), sink.clone())
            .context("invalid client config")?;
        let backend = Arc::new(HttpBackend::new(Arc::new(client)));

        let chat = Arc::new(ChatSession::new(auth.clone(), backend.clone(), sink.clone()));
        let recorder = Arc::new(Recorder::new(
            microphone,
            backend.clone(),
            chat.clone(),
            sink.clone(),
        ));
        let notifications = Arc::new(NotificationCenter::new(
            auth.clone(),
            backend.clone(),
            sink.clone(),
        ));

        log::info!(
            "app service ready (base_url={}, signed_in={})",
            config.base_url,
            auth.is_authenticated()
        );

        Ok(Self {
            config,
            auth,
            sink,
            backend,
            chat,
            recorder,
            notifications,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    pub fn backend(&self) -> &Arc<HttpBackend> {
        &self.backend
    }

    pub fn chat(&self) -> &Arc<ChatSession> {
        &self.chat
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    pub fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.notifications
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Credential, SignInError> {
        let credential = self.backend.login(email.trim(), password).await?;
        self.establish(credential)
    }

    /// Completes a third-party sign-in from the provider's redirect URL.
    pub fn oauth_callback(&self, callback_url: &str) -> Result<Credential, SignInError> {
        let credential = parse_callback(callback_url)?;
        self.establish(credential)
    }

    fn establish(&self, credential: Credential) -> Result<Credential, SignInError> {
        self.auth
            .sign_in(credential.clone())
            .map_err(SignInError::Store)?;
        // Nothing from a previous account survives a new sign-in.
        self.recorder.reset();
        self.chat.reset();
        self.notifications.reset();
        log::info!("signed in as {}", credential.user_id);
        Ok(credential)
    }

    /// Clears the session everywhere and sends the UI back to the login screen.
    pub fn logout(&self) -> anyhow::Result<()> {
        self.recorder.reset();
        self.chat.reset();
        self.notifications.reset();
        let res = self.auth.sign_out().context("clear saved credential");
        self.sink.emit(UiEvent::RedirectToLogin);
        res
    }

    /// Runs once the main view is shown: unread count, then the one-time modal.
    pub async fn on_mount(&self) {
        if !self.auth.is_authenticated() {
            self.sink.emit(UiEvent::RedirectToLogin);
            return;
        }
        if let Err(e) = self.notifications.load_all().await {
            log::warn!("unread count unavailable: {e}");
        }
        self.notifications.load_first_unseen().await;
    }

    pub async fn books(&self) -> Result<Vec<Book>, ClientError> {
        self.backend.books().await
    }

    pub async fn chapters(&self, book: &BookId) -> Result<Vec<Chapter>, ClientError> {
        self.backend.chapters(book).await
    }

    pub async fn process_chapter(&self, chapter: &ChapterId) -> Result<serde_json::Value, ClientError> {
        self.backend.process_chapter(chapter).await
    }

    pub async fn open_chapter(&self, chapter: &Chapter, book: Option<&Book>) -> LoadOutcome {
        self.chat
            .select_chapter(
                chapter.id.clone(),
                book.map(|b| b.id.clone()).or_else(|| chapter.book_id.clone()),
                book.and_then(|b| b.cover_ref.clone()),
            )
            .await
    }

    pub async fn open_general_chat(&self) -> LoadOutcome {
        self.chat.clear_chapter().await
    }

    /// Transcribes an audio file from disk without going through the recorder.
    pub async fn transcribe_file(&self, path: &Path) -> anyhow::Result<String> {
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let file = AudioFile {
            filename: file_name(path),
            mime_type: "audio/wav".into(),
            bytes,
        };
        Ok(self.backend.transcribe_file(&file).await?)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording.wav".into())
}

/// `<config_dir>/chapterchat`, falling back to the working directory.
pub fn default_config_dir(base: Option<PathBuf>) -> PathBuf {
    base.map(|b| b.join("chapterchat"))
        .unwrap_or_else(|| PathBuf::from(".chapterchat"))
}
