//! The one HTTP client every backend call goes through.
//!
//! Per logical request:
//! `Pending -> Success`,
//! `Pending -> NetworkError -> Retrying -> (Pending | Exhausted)`, or
//! `Pending -> AuthError -> RefreshAttempt -> (Pending | SessionCleared)`.

use crate::error::ClientError;
use async_trait::async_trait;
use chapterchat_core::auth::AuthSession;
use chapterchat_core::config::{ClientConfig, ConfigError};
use chapterchat_core::events::{EventSink, UiEvent};
use chapterchat_providers::parse::server_error_message;
use chapterchat_providers::request::HttpRequest;
use chapterchat_providers::runtime::{HttpResponse, Transport};
use regex::Regex;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    // Content processing: uses the long timeout instead of the standard one.
    pub long_running: bool,
}

impl RequestOptions {
    pub fn long_running() -> Self {
        Self { long_running: true }
    }
}

/// How an authorization failure on a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Chapter browsing; a 401 degrades the page but keeps the session.
    ChapterRead,
    /// Login itself; a 401 means bad credentials.
    Auth,
    Other,
}

/// Obtains a fresh bearer token after a 401.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, auth: &AuthSession) -> anyhow::Result<String>;
}

/// The backend offers no refresh endpoint, so every refresh attempt fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRefresh;

#[async_trait]
impl TokenRefresher for NoRefresh {
    async fn refresh(&self, _auth: &AuthSession) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("no token refresh mechanism available"))
    }
}

pub struct ResilientClient {
    cfg: ClientConfig,
    chapter_read: Regex,
    transport: Arc<dyn Transport>,
    auth: Arc<AuthSession>,
    refresher: Arc<dyn TokenRefresher>,
    sink: Arc<dyn EventSink>,

    // A failed refresh is remembered for `refresh_failure_ttl` so concurrent
    // 401s do not each retry it.
    refresh_failed_at: Mutex<Option<Instant>>,
}

impl ResilientClient {
    pub fn new(
        cfg: ClientConfig,
        transport: Arc<dyn Transport>,
        auth: Arc<AuthSession>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let chapter_read = cfg.chapter_read_regex()?;
        Ok(Self {
            cfg,
            chapter_read,
            transport,
            auth,
            refresher: Arc::new(NoRefresh),
            sink,
            refresh_failed_at: Mutex::new(None),
        })
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = refresher;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.cfg.base_url
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    pub fn classify(&self, req: &HttpRequest) -> RequestClass {
        if req.path.starts_with("/auth/") {
            RequestClass::Auth
        } else if req.is_get() && self.chapter_read.is_match(&req.path) {
            RequestClass::ChapterRead
        } else {
            RequestClass::Other
        }
    }

    pub async fn send(&self, req: HttpRequest) -> Result<HttpResponse, ClientError> {
        self.send_with(req, RequestOptions::default()).await
    }

    /// Sends one logical request. Only 2xx responses come back as `Ok`.
    pub async fn send_with(
        &self,
        req: HttpRequest,
        opts: RequestOptions,
    ) -> Result<HttpResponse, ClientError> {
        let timeout = if opts.long_running {
            self.cfg.long_running_timeout()
        } else {
            self.cfg.request_timeout()
        };
        let class = self.classify(&req);

        // Per-request guard: at most one refresh per logical request.
        let mut refreshed = false;

        loop {
            let mut attempt = req.clone();
            if let Some(token) = self.auth.bearer_token() {
                attempt.set_header("Authorization", format!("Bearer {token}"));
            }

            let resp = self.send_with_retry(&attempt, timeout).await?;

            if resp.status == 401 && class != RequestClass::Auth {
                if !refreshed && self.try_refresh().await {
                    refreshed = true;
                    log::info!("token refreshed; re-sending {} {}", req.method, req.path);
                    continue;
                }
                return Err(self.unauthorized(&req, class));
            }

            if !resp.is_success() {
                let message = server_error_message(&resp.body);
                log::warn!(
                    "{} {} -> {} {}",
                    req.method,
                    req.path,
                    resp.status,
                    message.as_deref().unwrap_or("")
                );
                return Err(ClientError::Backend {
                    status: resp.status,
                    message,
                });
            }

            return Ok(resp);
        }
    }

    async fn send_with_retry(
        &self,
        req: &HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, ClientError> {
        let policy = &self.cfg.retry;
        let mut retry_count: u32 = 0;

        loop {
            log::debug!("-> {req:?}");
            match self.transport.execute(req, timeout).await {
                Ok(resp) => {
                    log::debug!(
                        "<- {} {} {} ({} bytes)",
                        resp.status,
                        req.method,
                        req.path,
                        resp.body.len()
                    );
                    return Ok(resp);
                }
                Err(e) if e.is_network_class() && retry_count < policy.max_retries => {
                    retry_count += 1;
                    let delay = policy.delay_for(retry_count);
                    log::warn!(
                        "{} {} failed ({e}); retry {}/{} in {:?}",
                        req.method,
                        req.path,
                        retry_count,
                        policy.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_network_class() => {
                    log::error!(
                        "{} {} failed after {} attempts: {e}",
                        req.method,
                        req.path,
                        retry_count + 1
                    );
                    return Err(ClientError::Network {
                        attempts: retry_count + 1,
                        last: e.to_string(),
                    });
                }
                Err(e) => return Err(ClientError::Invalid(e.to_string())),
            }
        }
    }

    async fn try_refresh(&self) -> bool {
        let ttl = self.cfg.refresh_failure_ttl();
        if let Some(at) = *self.refresh_failed() {
            if at.elapsed() < ttl {
                log::debug!("skipping token refresh; it failed {:?} ago", at.elapsed());
                return false;
            }
        }

        let token = match self.refresher.refresh(&self.auth).await {
            Ok(token) => token,
            Err(e) => {
                log::warn!("token refresh failed: {e:#}");
                *self.refresh_failed() = Some(Instant::now());
                return false;
            }
        };

        match self.auth.replace_token(token) {
            Ok(()) => {
                *self.refresh_failed() = None;
                true
            }
            Err(e) => {
                log::warn!("could not store refreshed token: {e:#}");
                *self.refresh_failed() = Some(Instant::now());
                false
            }
        }
    }

    fn unauthorized(&self, req: &HttpRequest, class: RequestClass) -> ClientError {
        if class == RequestClass::ChapterRead {
            log::warn!("401 on chapter read {}; keeping session", req.path);
            return ClientError::Unauthorized {
                session_cleared: false,
            };
        }

        log::warn!("401 on {} {}; signing out", req.method, req.path);
        self.auth.invalidate();
        self.sink.emit(UiEvent::RedirectToLogin);
        ClientError::Unauthorized {
            session_cleared: true,
        }
    }

    fn refresh_failed(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.refresh_failed_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chapterchat_core::auth::{CredentialStore, MemoryCredentialStore};
    use chapterchat_core::test::RecordingSink;
    use chapterchat_core::types::Credential;
    use chapterchat_providers::runtime::TransportError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted outcomes; repeats the last one when the script runs out.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        calls: Mutex<Vec<(Instant, HttpRequest, Duration)>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(vec![]),
            })
        }

        fn calls(&self) -> Vec<(Instant, HttpRequest, Duration)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(
            &self,
            req: &HttpRequest,
            timeout: Duration,
        ) -> Result<HttpResponse, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((Instant::now(), req.clone(), timeout));
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    fn status(code: u16, body: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: code,
            body: body.as_bytes().to_vec(),
        })
    }

    struct Harness {
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryCredentialStore>,
        auth: Arc<AuthSession>,
        sink: Arc<RecordingSink>,
        client: ResilientClient,
    }

    fn harness(script: Vec<Result<HttpResponse, TransportError>>) -> Harness {
        let transport = ScriptedTransport::new(script);
        let store = Arc::new(MemoryCredentialStore::default());
        let auth = Arc::new(AuthSession::new(store.clone()));
        auth.sign_in(Credential::new("tok-1", "u1")).unwrap();
        let sink = RecordingSink::shared();
        let client = ResilientClient::new(
            ClientConfig::default().with_base_url("https://edu.example.com/api"),
            transport.clone(),
            auth.clone(),
            sink.clone(),
        )
        .unwrap();
        Harness {
            transport,
            store,
            auth,
            sink,
            client,
        }
    }

    fn get(path: &str) -> HttpRequest {
        HttpRequest::new("GET", "https://edu.example.com/api", path)
    }

    #[tokio::test]
    async fn attaches_bearer_token() {
        let h = harness(vec![status(200, "{}")]);
        h.client.send(get("/books")).await.unwrap();
        let calls = h.transport.calls();
        assert_eq!(calls[0].1.header("authorization"), Some("Bearer tok-1"));
        assert_eq!(calls[0].2, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn missing_token_is_not_an_error() {
        let h = harness(vec![status(200, "{}")]);
        h.auth.sign_out().unwrap();
        h.client.send(get("/books")).await.unwrap();
        assert_eq!(h.transport.calls()[0].1.header("authorization"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn network_failures_retry_three_times_with_backoff() {
        let h = harness(vec![Err(TransportError::Timeout)]);
        let err = h.client.send(get("/chat/history/user/u1")).await.unwrap_err();
        assert!(matches!(err, ClientError::Network { attempts: 4, .. }), "{err:?}");

        let calls = h.transport.calls();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1].0 - w[0].0).collect();
        assert_eq!(
            gaps,
            [
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        // Retries resend the same request.
        assert!(calls.iter().all(|c| c.1 == calls[0].1));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_a_retry_succeeds() {
        let h = harness(vec![
            Err(TransportError::Network("connection reset".into())),
            status(200, r#"{"ok":true}"#),
        ]);
        let resp = h.client.send(get("/books")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(h.transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn invalid_requests_are_not_retried() {
        let h = harness(vec![Err(TransportError::Invalid("bad header".into()))]);
        let err = h.client.send(get("/books")).await.unwrap_err();
        assert!(matches!(err, ClientError::Invalid(_)));
        assert_eq!(h.transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn server_errors_pass_message_through_without_retry() {
        let h = harness(vec![status(504, r#"{"message":"Processing took too long"}"#)]);
        let err = h
            .client
            .send_with(
                HttpRequest::new("POST", "https://edu.example.com/api", "/chapters/c1/process"),
                RequestOptions::long_running(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ClientError::Backend {
                status: 504,
                message: Some("Processing took too long".into())
            }
        );
        let calls = h.transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2, Duration::from_secs(30 * 60));
    }

    #[tokio::test]
    async fn unauthorized_chapter_read_keeps_session() {
        let h = harness(vec![status(401, "")]);
        let err = h.client.send(get("/chapters/book/b1")).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Unauthorized {
                session_cleared: false
            }
        );
        assert!(h.auth.is_authenticated());
        assert!(h.store.load().unwrap().is_some());
        assert!(!h.sink.redirected_to_login());
    }

    #[tokio::test]
    async fn unauthorized_elsewhere_clears_session_and_redirects() {
        let h = harness(vec![status(401, "")]);
        h.auth.mark_notification_shown();
        let err = h.client.send(get("/notifications")).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Unauthorized {
                session_cleared: true
            }
        );
        assert!(!h.auth.is_authenticated());
        assert!(!h.auth.flags().notification_shown);
        assert!(h.store.load().unwrap().is_none());
        assert!(h.sink.redirected_to_login());
    }

    #[tokio::test]
    async fn chapter_write_is_not_a_chapter_read() {
        let h = harness(vec![status(401, "")]);
        let req = HttpRequest::new("POST", "https://edu.example.com/api", "/chapters/c1/process");
        assert_eq!(h.client.classify(&req), RequestClass::Other);
        h.client.send(req).await.unwrap_err();
        assert!(!h.auth.is_authenticated());
    }

    #[tokio::test]
    async fn failed_login_is_a_plain_backend_error() {
        let h = harness(vec![status(401, r#"{"message":"Invalid credentials"}"#)]);
        h.auth.sign_out().unwrap();
        let req = HttpRequest::new("POST", "https://edu.example.com/api", "/auth/login");
        let err = h.client.send(req).await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(matches!(err, ClientError::Backend { .. }));
        assert!(!h.sink.redirected_to_login());
    }

    struct CountingRefresher {
        calls: AtomicUsize,
        token: Option<&'static str>,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _auth: &AuthSession) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.token
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("refresh rejected"))
        }
    }

    #[tokio::test]
    async fn successful_refresh_resends_with_new_token() {
        let h = harness(vec![status(401, ""), status(200, "{}")]);
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            token: Some("tok-2"),
        });
        let client = h.client.with_refresher(refresher.clone());

        client.send(get("/notifications")).await.unwrap();
        let calls = h.transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1.header("authorization"), Some("Bearer tok-2"));
        assert_eq!(h.auth.bearer_token().as_deref(), Some("tok-2"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_is_attempted_once_per_request() {
        let h = harness(vec![status(401, "")]);
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            token: Some("tok-2"),
        });
        let client = h.client.with_refresher(refresher.clone());

        let err = client.send(get("/notifications")).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Unauthorized {
                session_cleared: true
            }
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.transport.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_is_cached_for_a_while() {
        let h = harness(vec![status(401, "")]);
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            token: None,
        });
        let client = h.client.with_refresher(refresher.clone());

        client.send(get("/chapters/c1")).await.unwrap_err();
        client.send(get("/chapters/c2")).await.unwrap_err();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        client.send(get("/chapters/c3")).await.unwrap_err();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);

        // Chapter reads never tore the session down.
        assert!(h.auth.is_authenticated());
    }
}
