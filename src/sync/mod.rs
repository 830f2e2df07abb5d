//! Live state synchronization for one attached session.
//!
//! ARCHITECTURE
//! ============
//! [`SyncClient`] is the upward API. Attaching resolves the session and
//! the viewer's identity, starts a new projection generation, and hands
//! the attachment to a [`driver`] task that owns every channel, timer, and
//! fetch. Views read the projection synchronously and subscribe to slice
//! replacements with [`SyncClient::on_snapshot_changed`].
//!
//! ```text
//! attach_to_session --> resolve session --> resolve identity
//!        |                                        |
//!        v                                        v
//!   begin_generation --> Driver::start --> Driver::run (until detach)
//! ```
//!
//! Only one attachment exists at a time. Attaching again (or reloading)
//! fully tears down the previous attachment before anything new is
//! opened.
//!
//! ERROR HANDLING
//! ==============
//! Failures inside the live loop are logged and left to the next push,
//! poll tick, or health check. Only the request/response calls on this
//! type return errors. Channel degradation is exposed through
//! [`SyncClient::is_connection_degraded`].

pub mod channel;
pub mod driver;
pub mod fetcher;
pub mod heartbeat;
pub mod polling;
pub mod projection;
pub mod reconnect;
pub mod registry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

pub use channel::{ChannelId, ChannelStatus};
pub use driver::AttachmentStats;
pub use fetcher::{Role, SessionScope, Viewer};
pub use polling::PollIntervals;
pub use projection::{ListenerId, ProjectionStore, Snapshot};
pub use reconnect::BackoffPolicy;
pub use registry::TimerKey;

use crate::config::SyncConfig;
use crate::error::{SyncError, require_text};
use crate::identity::{IdentityStore, participant_id_key, participant_name_key};
use crate::model::{Participant, ProgressRecord, ResourceKind, Session};
use crate::services::progress::{ProgressSummary, summarize};
use crate::services::{participant, progress, session};
use crate::store::RemoteStore;
use driver::{Driver, DriverCommand};
use fetcher::Fetcher;

/// What an attach resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub session: Session,
    /// The participant identity in use, `None` for the coordinator.
    pub participant: Option<Participant>,
    /// True when a remembered participant was brought back online.
    pub restored: bool,
    pub generation: u64,
}

struct Attachment {
    scope: Arc<SessionScope>,
    role: Role,
    commands: mpsc::UnboundedSender<DriverCommand>,
    task: JoinHandle<()>,
}

pub struct SyncClient {
    store: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityStore>,
    config: SyncConfig,
    projection: Arc<ProjectionStore>,
    degraded: Arc<AtomicBool>,
    attachment: Mutex<Option<Attachment>>,
}

impl SyncClient {
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>, identity: Arc<dyn IdentityStore>, config: SyncConfig) -> Self {
        Self {
            store,
            identity,
            config,
            projection: Arc::new(ProjectionStore::new()),
            degraded: Arc::new(AtomicBool::new(false)),
            attachment: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // =========================================================================
    // ATTACH / DETACH
    // =========================================================================

    /// Attach to the active session behind `code`, replacing any current
    /// attachment.
    ///
    /// A participant first tries the identity remembered for this code;
    /// only when that participant is gone is a new one created under
    /// `name` (or the remembered name).
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a malformed code or a missing name, before
    /// the current attachment is touched. Returns `NotFound` when no active session has the code, or `Store` when the
    /// lookup or the join write fails.
    pub async fn attach_to_session(&self, code: &str, role: Role) -> Result<AttachmentInfo, SyncError> {
        let code = session::normalize_code(code)?;
        let join_name = match &role {
            Role::Coordinator => None,
            Role::Participant { name } => {
                let name = name.clone().or_else(|| self.identity.get(&participant_name_key(&code)));
                Some(require_text("participant name", name.as_deref().unwrap_or_default())?.to_owned())
            }
        };

        let mut slot = self.attachment.lock().await;
        if let Some(previous) = slot.take() {
            self.teardown(previous, true).await;
        }

        let found = session::find_active_by_code(self.store.as_ref(), &code).await?;
        let (viewer, restored) = match join_name {
            None => (Viewer::Coordinator, false),
            Some(name) => {
                let (p, restored) = self.resolve_participant(&found, &name).await?;
                (Viewer::Participant(p), restored)
            }
        };

        let scope = Arc::new(SessionScope { session: found, viewer });
        let generation = self.projection.begin_generation();
        self.degraded.store(false, Ordering::SeqCst);
        let fetcher = Fetcher::new(Arc::clone(&self.store), Arc::clone(&scope));
        let driver = Driver::start(
            Arc::clone(&self.store),
            Arc::clone(&self.projection),
            fetcher,
            self.config.clone(),
            generation,
            Arc::clone(&self.degraded),
        )
        .await;
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(driver.run(commands_rx));

        let participant = match &scope.viewer {
            Viewer::Participant(p) => Some(p.clone()),
            Viewer::Coordinator => None,
        };
        info!(
            session_id = %scope.session.id,
            code = %scope.session.code,
            participant_id = ?participant.as_ref().map(|p| p.id),
            restored,
            generation,
            "attach: attached"
        );
        let info = AttachmentInfo { session: scope.session.clone(), participant, restored, generation };
        *slot = Some(Attachment { scope, role, commands, task });
        Ok(info)
    }

    async fn resolve_participant(&self, found: &Session, name: &str) -> Result<(Participant, bool), SyncError> {
        let id_key = participant_id_key(&found.code);
        let name_key = participant_name_key(&found.code);

        let remembered = self.identity.get(&id_key).and_then(|raw| raw.parse::<Uuid>().ok());
        if let Some(participant_id) = remembered {
            if let Some(p) = participant::restore(self.store.as_ref(), found.id, participant_id).await? {
                return Ok((p, true));
            }
            info!(%participant_id, code = %found.code, "attach: remembered participant is gone");
        }

        let joined = participant::join(self.store.as_ref(), found.id, name).await?;
        for (key, value) in [(id_key, joined.id.to_string()), (name_key, joined.name.clone())] {
            if let Err(e) = self.identity.set(&key, &value) {
                warn!(%key, error = %e, "attach: could not remember identity");
            }
        }
        Ok((joined, false))
    }

    /// Tear down the current attachment, if any. The projection is emptied
    /// and a participant is marked offline.
    pub async fn detach_from_session(&self) {
        let previous = self.attachment.lock().await.take();
        if let Some(previous) = previous {
            self.teardown(previous, true).await;
        }
    }

    /// Tear down the current attachment without the offline write, for
    /// short-lived attachments of a participant that may still be online
    /// elsewhere.
    pub async fn detach_keeping_presence(&self) {
        let previous = self.attachment.lock().await.take();
        if let Some(previous) = previous {
            self.teardown(previous, false).await;
        }
    }

    async fn teardown(&self, attachment: Attachment, mark_offline: bool) {
        let Attachment { scope, commands, task, .. } = attachment;
        self.projection.begin_generation();

        let (ack_tx, ack_rx) = oneshot::channel();
        if commands.send(DriverCommand::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Err(e) = task.await {
            warn!(error = %e, "attach: driver task ended abnormally");
        }
        self.degraded.store(false, Ordering::SeqCst);

        if let Some(participant_id) = scope.participant_id().filter(|_| mark_offline) {
            if let Err(e) = participant::mark_offline(self.store.as_ref(), participant_id).await {
                warn!(%participant_id, error = %e, "attach: offline write failed");
            }
        }
        info!(session_id = %scope.session.id, "attach: detached");
    }

    /// Tear down and attach again to the same session with the same role.
    /// A participant comes back as the remembered identity.
    ///
    /// # Errors
    ///
    /// Returns `NotAttached` when nothing is attached, otherwise whatever
    /// [`SyncClient::attach_to_session`] returns.
    pub async fn reload(&self) -> Result<AttachmentInfo, SyncError> {
        let (code, role) = {
            let slot = self.attachment.lock().await;
            let current = slot.as_ref().ok_or(SyncError::NotAttached)?;
            (current.scope.session.code.clone(), current.role.clone())
        };
        info!(%code, "attach: reloading");
        self.attach_to_session(&code, role).await
    }

    // =========================================================================
    // READS
    // =========================================================================

    #[must_use]
    pub fn get_snapshot(&self, kind: ResourceKind) -> Snapshot {
        self.projection.snapshot(kind)
    }

    /// Completion matrix over the current projection.
    #[must_use]
    pub fn progress_summary(&self) -> ProgressSummary {
        summarize(&self.projection.tasks(), &self.projection.participants(), &self.projection.progress())
    }

    /// Call `listener` with the new slice every time `kind` is replaced.
    pub fn on_snapshot_changed<F>(&self, kind: ResourceKind, listener: F) -> ListenerId
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.projection.on_changed(kind, Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.projection.remove_listener(id)
    }

    /// True while any push channel of the attachment is degraded.
    #[must_use]
    pub fn is_connection_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.attachment.lock().await.as_ref().map(|a| a.scope.session.clone())
    }

    /// Live resources of the current attachment.
    ///
    /// # Errors
    ///
    /// Returns `NotAttached` when nothing is attached.
    pub async fn stats(&self) -> Result<AttachmentStats, SyncError> {
        let (reply, rx) = oneshot::channel();
        {
            let slot = self.attachment.lock().await;
            let current = slot.as_ref().ok_or(SyncError::NotAttached)?;
            current.commands.send(DriverCommand::Inspect(reply)).map_err(|_| SyncError::NotAttached)?;
        }
        rx.await.map_err(|_| SyncError::NotAttached)
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Flip one task for the attached participant. The progress slice is
    /// re-fetched right away instead of waiting for the push round trip.
    ///
    /// # Errors
    ///
    /// Returns `NotAttached`, `NotParticipant` for a coordinator attachment,
    /// or `Store` when the write fails.
    pub async fn toggle_progress(&self, task_id: Uuid) -> Result<ProgressRecord, SyncError> {
        let (participant_id, commands) = {
            let slot = self.attachment.lock().await;
            let current = slot.as_ref().ok_or(SyncError::NotAttached)?;
            let participant_id = current.scope.participant_id().ok_or(SyncError::NotParticipant)?;
            (participant_id, current.commands.clone())
        };
        let record = progress::toggle(self.store.as_ref(), participant_id, task_id).await?;
        let _ = commands.send(DriverCommand::Refresh(ResourceKind::Progress));
        Ok(record)
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
