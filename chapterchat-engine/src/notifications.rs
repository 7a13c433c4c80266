use crate::traits::{BackendError, NotificationBackend};
use chapterchat_core::auth::AuthSession;
use chapterchat_core::events::{EventSink, UiEvent};
use chapterchat_core::types::{NotificationId, NotificationRecord, SeenStatus};
use futures_util::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};

/// Result of `mark_all_seen`. Local state is fully seen either way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkAllOutcome {
    pub marked: usize,
    pub failed: Vec<NotificationId>,
}

#[derive(Debug, Default)]
struct NotificationState {
    records: Vec<NotificationRecord>,
    unread: usize,
    modal: Option<NotificationRecord>,
    checking_first_unseen: bool,
}

pub struct NotificationCenter {
    auth: Arc<AuthSession>,
    backend: Arc<dyn NotificationBackend>,
    sink: Arc<dyn EventSink>,
    state: Mutex<NotificationState>,
}

impl NotificationCenter {
    pub fn new(
        auth: Arc<AuthSession>,
        backend: Arc<dyn NotificationBackend>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            auth,
            backend,
            sink,
            state: Mutex::new(NotificationState::default()),
        }
    }

    pub fn unread_count(&self) -> usize {
        self.lock().unread
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        self.lock().records.clone()
    }

    pub fn modal(&self) -> Option<NotificationRecord> {
        self.lock().modal.clone()
    }

    /// Fetches the full backlog and recomputes the unread count.
    pub async fn load_all(&self) -> Result<usize, BackendError> {
        let records = self.backend.all().await.inspect_err(|e| {
            log::warn!("loading notifications failed: {e}");
        })?;

        let unread = {
            let mut s = self.lock();
            s.unread = records.iter().filter(|r| r.is_unseen()).count();
            s.records = records;
            s.unread
        };
        self.sink.emit(UiEvent::Notifications { unread });
        Ok(unread)
    }

    /// Shows the first unseen notification once per signed-in session.
    pub async fn load_first_unseen(&self) -> Option<NotificationRecord> {
        if self.auth.flags().notification_shown {
            log::debug!("notification modal already shown this session");
            return None;
        }
        {
            let mut s = self.lock();
            if s.checking_first_unseen {
                return None;
            }
            s.checking_first_unseen = true;
        }

        let result = self.backend.first_unseen().await;
        self.lock().checking_first_unseen = false;

        match result {
            Ok(Some(record)) => {
                self.auth.mark_notification_shown();
                self.lock().modal = Some(record.clone());
                self.sink.emit(UiEvent::NotificationModal(record.clone()));
                Some(record)
            }
            Ok(None) => {
                log::debug!("no unseen notification");
                None
            }
            Err(e) => {
                log::warn!("checking for unseen notifications failed: {e}");
                None
            }
        }
    }

    /// Closes the modal and marks its notification seen.
    pub async fn confirm_modal(&self) {
        let Some(record) = self.lock().modal.take() else {
            return;
        };
        self.mark_seen(&record.id).await;
    }

    /// Marks one notification seen locally, then remotely.
    ///
    /// A remote failure is logged; the local state is not reverted.
    pub async fn mark_seen(&self, id: &NotificationId) {
        let unread = {
            let mut s = self.lock();
            let mut flipped = false;
            if let Some(r) = s.records.iter_mut().find(|r| &r.id == id) {
                flipped = r.is_unseen();
                r.seen_status = SeenStatus::Seen;
            }
            if flipped {
                s.unread = s.unread.saturating_sub(1);
            }
            s.unread
        };
        self.sink.emit(UiEvent::Notifications { unread });

        if let Err(e) = self.backend.mark_seen(id).await {
            log::warn!("marking notification {id} seen failed: {e}");
        }
    }

    /// Marks every unseen notification seen, one remote update per item.
    ///
    /// Partial failure is accepted: failures are logged and reported, and the
    /// local list still ends up fully seen.
    pub async fn mark_all_seen(&self) -> MarkAllOutcome {
        let unseen: Vec<NotificationId> = self
            .lock()
            .records
            .iter()
            .filter(|r| r.is_unseen())
            .map(|r| r.id.clone())
            .collect();

        let results = join_all(unseen.iter().map(|id| self.backend.mark_seen(id))).await;

        let mut outcome = MarkAllOutcome::default();
        for (id, result) in unseen.into_iter().zip(results) {
            match result {
                Ok(()) => outcome.marked += 1,
                Err(e) => {
                    log::warn!("marking notification {id} seen failed: {e}");
                    outcome.failed.push(id);
                }
            }
        }

        {
            let mut s = self.lock();
            for r in &mut s.records {
                r.seen_status = SeenStatus::Seen;
            }
            s.unread = 0;
        }
        self.sink.emit(UiEvent::Notifications { unread: 0 });
        outcome
    }

    /// Drops all local notification state (logout).
    pub fn reset(&self) {
        *self.lock() = NotificationState::default();
        self.sink.emit(UiEvent::Notifications { unread: 0 });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NotificationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
