// src/session/registry.rs

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    sync::Mutex,
    task::{AbortHandle, JoinHandle},
    time::MissedTickBehavior,
};

use crate::{
    config::SimuladoSettings,
    error::AppError,
    models::attempt::{AttemptKey, OpenMode},
    session::{
        controller::{AbandonOutcome, FinishOutcome, SessionController},
        sync::{SyncOutcome, SyncTrigger},
        timer::Tick,
    },
    store::Stores,
};

const TICK: Duration = Duration::from_secs(1);

/// One open attempt plus the background tasks driving it.
///
/// The ticker and the autosave task only hold weak references; dropping the
/// last strong reference aborts both.
pub struct LiveSession {
    pub attempt_id: i64,
    pub user_id: String,
    pub key: AttemptKey,
    pub controller: Mutex<SessionController>,
    tasks: Vec<AbortHandle>,
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct RegistryInner {
    stores: Stores,
    settings: SimuladoSettings,
    sessions: Mutex<HashMap<i64, Arc<LiveSession>>>,
}

/// Owns the live sessions of this process, keyed by attempt id.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(stores: Stores, settings: SimuladoSettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                stores,
                settings,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn settings(&self) -> &SimuladoSettings {
        &self.inner.settings
    }

    pub async fn live_count(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    pub async fn is_live(&self, attempt_id: i64) -> bool {
        self.inner.sessions.lock().await.contains_key(&attempt_id)
    }

    /// Starts or resumes the attempt for the triple. A session already live
    /// in this process is reused, so there is never a second clock.
    pub async fn open(&self, key: AttemptKey, mode: OpenMode) -> Result<Arc<LiveSession>, AppError> {
        let live = {
            let sessions = self.inner.sessions.lock().await;
            sessions.values().find(|s| s.key == key).cloned()
        };
        if let Some(session) = live {
            if !session.controller.lock().await.status().is_terminal() {
                return Ok(session);
            }
            self.retire(session.attempt_id).await;
        }

        let controller =
            SessionController::open(&self.inner.stores, &self.inner.settings, key, mode).await?;
        Ok(self.install(controller).await)
    }

    /// The live session of an attempt, reopening it from the store when this
    /// process does not hold it yet.
    pub async fn session(&self, attempt_id: i64, user_id: &str) -> Result<Arc<LiveSession>, AppError> {
        let live = self.inner.sessions.lock().await.get(&attempt_id).cloned();
        if let Some(session) = live {
            if session.user_id != user_id {
                return Err(AppError::NotFound(format!("Attempt {} not found", attempt_id)));
            }
            return Ok(session);
        }

        let controller = SessionController::reopen(
            &self.inner.stores,
            &self.inner.settings,
            attempt_id,
            user_id,
        )
        .await?;
        Ok(self.install(controller).await)
    }

    async fn install(&self, controller: SessionController) -> Arc<LiveSession> {
        let attempt_id = controller.attempt_id();
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(existing) = sessions.get(&attempt_id) {
            return existing.clone();
        }

        let registry = Arc::downgrade(&self.inner);
        let autosave = self.inner.settings.autosave_interval;
        let session = Arc::new_cyclic(|weak: &Weak<LiveSession>| {
            let mut tasks = vec![
                tokio::spawn(run_ticker(registry, weak.clone())).abort_handle(),
            ];
            if !autosave.is_zero() {
                tasks.push(tokio::spawn(run_autosave(weak.clone(), autosave)).abort_handle());
            }
            LiveSession {
                attempt_id,
                user_id: controller.user_id().to_string(),
                key: controller.key(),
                controller: Mutex::new(controller),
                tasks,
            }
        });

        sessions.insert(attempt_id, session.clone());
        session
    }

    /// Forgets a session; its drivers stop once the last handle is gone.
    pub async fn retire(&self, attempt_id: i64) {
        self.inner.sessions.lock().await.remove(&attempt_id);
    }

    /// Finishes a live or stored attempt. Terminal attempts resolve to their
    /// stored outcome.
    pub async fn finish(
        &self,
        attempt_id: i64,
        user_id: &str,
        confirmed: bool,
    ) -> Result<FinishOutcome, AppError> {
        let outcome = match self.session(attempt_id, user_id).await {
            Ok(session) => {
                let mut controller = session.controller.lock().await;
                controller.finish(confirmed).await?
            }
            Err(AppError::AlreadyFinalized(_)) => {
                let mut stored = SessionController::load(
                    &self.inner.stores,
                    &self.inner.settings,
                    attempt_id,
                    user_id,
                )
                .await?;
                stored.finish(true).await?
            }
            Err(e) => return Err(e),
        };

        if !matches!(outcome, FinishOutcome::ConfirmationRequired { .. }) {
            self.retire(attempt_id).await;
        }
        Ok(outcome)
    }

    pub async fn abandon(&self, attempt_id: i64, user_id: &str) -> Result<AbandonOutcome, AppError> {
        let outcome = match self.session(attempt_id, user_id).await {
            Ok(session) => {
                let mut controller = session.controller.lock().await;
                controller.abandon().await?
            }
            Err(AppError::AlreadyFinalized(_)) => {
                let mut stored = SessionController::load(
                    &self.inner.stores,
                    &self.inner.settings,
                    attempt_id,
                    user_id,
                )
                .await?;
                stored.abandon().await?
            }
            Err(e) => return Err(e),
        };

        self.retire(attempt_id).await;
        Ok(outcome)
    }

    /// Pause/exit: stops the clock, makes one bounded save, drops the session.
    pub async fn close(&self, attempt_id: i64, user_id: &str) -> Result<SyncOutcome, AppError> {
        let session = self.live(attempt_id, user_id).await?;
        let limit = self.inner.settings.exit_save_timeout;
        let outcome = session.controller.lock().await.close(limit).await;
        self.retire(attempt_id).await;
        Ok(outcome)
    }

    /// The host is about to go away: back up synchronously, then fire off a
    /// bounded save without waiting for it.
    pub async fn unload(&self, attempt_id: i64, user_id: &str) -> Result<(), AppError> {
        let session = self.live(attempt_id, user_id).await?;
        self.retire(attempt_id).await;
        drop(self.unload_session(&session).await);
        Ok(())
    }

    /// Process shutdown: every live session is unloaded and the bounded
    /// saves are awaited.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<LiveSession>> = {
            let mut sessions = self.inner.sessions.lock().await;
            sessions.drain().map(|(_, s)| s).collect()
        };

        tracing::info!("Unloading {} live session(s)", sessions.len());
        let mut saves = Vec::with_capacity(sessions.len());
        for session in &sessions {
            saves.extend(self.unload_session(session).await);
        }
        for save in saves {
            if let Err(e) = save.await {
                tracing::warn!("Final save task failed: {}", e);
            }
        }
    }

    async fn unload_session(&self, session: &LiveSession) -> Option<JoinHandle<()>> {
        let mut controller = session.controller.lock().await;
        if controller.status().is_terminal() {
            return None;
        }
        if let Err(e) = controller.on_terminate() {
            tracing::warn!("Failed to back up attempt {}: {}", session.attempt_id, e);
        }

        let sync = controller.synchronizer().clone();
        let snapshot = controller.snapshot();
        drop(controller);
        let limit = self.inner.settings.exit_save_timeout;
        Some(tokio::spawn(async move {
            sync.sync_within(snapshot, SyncTrigger::Exit, limit).await;
        }))
    }

    /// Only sessions held by this process; nothing is reopened.
    async fn live(&self, attempt_id: i64, user_id: &str) -> Result<Arc<LiveSession>, AppError> {
        self.inner
            .sessions
            .lock()
            .await
            .get(&attempt_id)
            .filter(|s| s.user_id == user_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("No open session for attempt {}", attempt_id)))
    }
}

/// Advances the session clock once per second and forces the finish on
/// timeout. A failed forced finish is retried on the next tick.
///
/// Ticks missed while the session lock was busy are delivered in a burst,
/// so the clock catches up with wall time instead of drifting.
async fn run_ticker(registry: Weak<RegistryInner>, session: Weak<LiveSession>) {
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(session) = session.upgrade() else {
            break;
        };

        let mut controller = session.controller.lock().await;
        let tick = controller.tick();
        match tick {
            Tick::TimedOut => {
                let finished = controller.on_timeout().await;
                drop(controller);
                match finished {
                    Ok(_) => {
                        if let Some(registry) = registry.upgrade() {
                            registry.sessions.lock().await.remove(&session.attempt_id);
                        }
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Forced finish of attempt {} failed, retrying: {}",
                            session.attempt_id,
                            e
                        );
                    }
                }
            }
            Tick::Idle if controller.status().is_terminal() => break,
            _ => {}
        }
    }
}

/// Periodic save. Snapshots under the lock and writes outside it, so it may
/// overlap with request-driven saves; the synchronizer keeps the newest.
async fn run_autosave(session: Weak<LiveSession>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(session) = session.upgrade() else {
            break;
        };

        let Some(save) = session.controller.lock().await.pending_save(SyncTrigger::Periodic) else {
            break;
        };
        save.run().await;
    }
}
