// src/session/sync.rs

use std::{
    io,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::{
    error::AppError,
    models::attempt::ProgressSnapshot,
    session::backup::LocalBackup,
    store::AttemptStore,
};

/// Why a save was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Answer,
    Navigation,
    Periodic,
    /// Host went to the background (tab hidden, app minimized).
    Hidden,
    /// Explicit pause or exit.
    Exit,
}

#[derive(Debug)]
pub enum SyncOutcome {
    /// The snapshot, or a newer one, reached the store.
    Saved,
    /// Another save was in flight and took this snapshot along, or a newer
    /// snapshot had already been stored.
    Skipped,
    /// The store rejected or never answered. The snapshot was copied to the
    /// local backup and the next trigger retries with fresher data.
    Failed(AppError),
}

impl SyncOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SyncOutcome::Saved)
    }
}

/// Clears the in-flight flag on every exit path, including cancellation.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight writer of session snapshots.
///
/// Every request first offers its snapshot to a one-slot mailbox that keeps
/// the highest revision. Whoever holds the in-flight flag drains the mailbox,
/// so the store only ever receives the newest snapshot known at write time
/// and an older snapshot never lands after a newer one. Clones share all
/// state, so the periodic task and the request path coordinate through it.
#[derive(Clone)]
pub struct ProgressSynchronizer {
    attempt_id: i64,
    store: Arc<dyn AttemptStore>,
    backup: LocalBackup,
    in_flight: Arc<AtomicBool>,
    unsynced: Arc<AtomicBool>,
    pending: Arc<Mutex<Option<ProgressSnapshot>>>,
    persisted: Arc<AtomicU64>,
}

impl ProgressSynchronizer {
    pub fn new(attempt_id: i64, store: Arc<dyn AttemptStore>, backup: LocalBackup) -> Self {
        Self {
            attempt_id,
            store,
            backup,
            in_flight: Arc::new(AtomicBool::new(false)),
            unsynced: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(Mutex::new(None)),
            persisted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn attempt_id(&self) -> i64 {
        self.attempt_id
    }

    /// Captures a save to run later, outside whatever lock produced the
    /// snapshot.
    pub fn prepare(&self, snapshot: ProgressSnapshot, trigger: SyncTrigger) -> PendingSave {
        PendingSave {
            sync: self.clone(),
            snapshot,
            trigger,
        }
    }

    pub async fn sync(&self, snapshot: ProgressSnapshot, trigger: SyncTrigger) -> SyncOutcome {
        self.offer(snapshot);

        let mut outcome = SyncOutcome::Skipped;
        loop {
            let Some(guard) = InFlightGuard::acquire(&self.in_flight) else {
                tracing::debug!(
                    "Save for attempt {} coalesced ({:?}): another save in flight",
                    self.attempt_id,
                    trigger
                );
                return outcome;
            };

            while let Some(next) = self.take_pending() {
                if next.revision < self.persisted.load(Ordering::Acquire) {
                    continue;
                }
                match self.store.save(self.attempt_id, &next).await {
                    Ok(()) => {
                        self.persisted.fetch_max(next.revision, Ordering::AcqRel);
                        self.unsynced.store(false, Ordering::Release);
                        tracing::debug!(
                            "Progress saved for attempt {} ({:?}): {} answers, index {}, {}s left, revision {}",
                            self.attempt_id,
                            trigger,
                            next.answers.len(),
                            next.current_index,
                            next.time_remaining_seconds,
                            next.revision
                        );
                        outcome = SyncOutcome::Saved;
                    }
                    Err(e) => {
                        let err = match e {
                            AppError::AlreadyFinalized(_) | AppError::SyncFailure(_) => e,
                            other => AppError::SyncFailure(format!(
                                "Save for attempt {} failed: {}",
                                self.attempt_id, other
                            )),
                        };
                        self.record_failure(&next, trigger, &err);
                        return SyncOutcome::Failed(err);
                    }
                }
            }

            drop(guard);
            // A snapshot offered after the drain but before the release
            // would otherwise wait for the next trigger.
            if !self.has_pending() {
                return outcome;
            }
        }
    }

    /// Like `sync`, but gives up after `limit`. Used on exit and teardown,
    /// where the caller must not wait on the network indefinitely.
    pub async fn sync_within(
        &self,
        snapshot: ProgressSnapshot,
        trigger: SyncTrigger,
        limit: Duration,
    ) -> SyncOutcome {
        match tokio::time::timeout(limit, self.sync(snapshot.clone(), trigger)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let err = AppError::SyncFailure(format!(
                    "Save for attempt {} timed out after {:?}",
                    self.attempt_id, limit
                ));
                self.record_failure(&snapshot, trigger, &err);
                SyncOutcome::Failed(err)
            }
        }
    }

    /// Synchronous backup write for the about-to-terminate hook.
    pub fn write_backup(&self, snapshot: &ProgressSnapshot) -> io::Result<()> {
        self.backup.write(self.attempt_id, snapshot)
    }

    /// Drop the backup once the attempt is terminal.
    pub fn clear_backup(&self) {
        if let Err(e) = self.backup.clear(self.attempt_id) {
            tracing::warn!("Failed to clear backup of attempt {}: {}", self.attempt_id, e);
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// True when the latest save attempt did not reach the store.
    pub fn has_unsynced(&self) -> bool {
        self.unsynced.load(Ordering::Acquire)
    }

    /// Revision of the newest snapshot known to be stored.
    pub fn persisted_revision(&self) -> u64 {
        self.persisted.load(Ordering::Acquire)
    }

    fn offer(&self, snapshot: ProgressSnapshot) {
        if snapshot.revision < self.persisted.load(Ordering::Acquire) {
            return;
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.as_ref().is_none_or(|p| p.revision <= snapshot.revision) {
            *pending = Some(snapshot);
        }
    }

    fn take_pending(&self) -> Option<ProgressSnapshot> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn record_failure(&self, snapshot: &ProgressSnapshot, trigger: SyncTrigger, err: &AppError) {
        tracing::warn!(
            "Save for attempt {} failed ({:?}): {}",
            self.attempt_id,
            trigger,
            err
        );
        // A terminal attempt has nothing left to recover
        if matches!(err, AppError::AlreadyFinalized(_)) {
            return;
        }
        self.unsynced.store(true, Ordering::Release);
        if let Err(e) = self.backup.write(self.attempt_id, snapshot) {
            tracing::warn!("Failed to write backup of attempt {}: {}", self.attempt_id, e);
        }
    }
}

/// A save captured under the session lock and sent after it is released.
#[must_use = "a pending save does nothing until it is run"]
pub struct PendingSave {
    sync: ProgressSynchronizer,
    snapshot: ProgressSnapshot,
    trigger: SyncTrigger,
}

impl std::fmt::Debug for PendingSave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSave")
            .field("attempt_id", &self.sync.attempt_id)
            .field("revision", &self.snapshot.revision)
            .field("trigger", &self.trigger)
            .finish()
    }
}

impl PendingSave {
    pub fn revision(&self) -> u64 {
        self.snapshot.revision
    }

    pub async fn run(self) -> SyncOutcome {
        self.sync.sync(self.snapshot, self.trigger).await
    }
}
