// src/session/controller.rs

use std::{collections::HashMap, io, time::Duration};

use chrono::Utc;

use crate::{
    config::SimuladoSettings,
    error::AppError,
    models::{
        attempt::{
            Attempt, AttemptKey, AttemptStatus, Finalization, FinalizeOutcome, NewAttempt,
            OpenMode, ProgressSnapshot, SessionView,
        },
        question::{PublicQuestion, Question},
        result::{NewResult, SimuladoResult},
    },
    session::{
        backup::LocalBackup,
        scoring::{score_attempt, time_spent},
        sync::{PendingSave, ProgressSynchronizer, SyncOutcome, SyncTrigger},
        timer::{CountdownTimer, Tick},
    },
    store::Stores,
};

/// Result of `finish()` and of a timeout.
#[derive(Debug, Clone, PartialEq)]
pub enum FinishOutcome {
    /// Unanswered questions remain; call again with confirmation.
    ConfirmationRequired { unanswered: usize },
    Completed(SimuladoResult),
    /// The attempt had been abandoned; there is no result.
    Abandoned,
}

/// Result of `abandon()`.
#[derive(Debug, Clone, PartialEq)]
pub enum AbandonOutcome {
    Abandoned,
    /// The attempt had already completed elsewhere.
    Completed(SimuladoResult),
}

/// Result of a cursor move.
#[derive(Debug)]
pub enum Navigation {
    Moved { index: u32, sync: SyncOutcome },
    /// `next()` past the last question.
    Finished(FinishOutcome),
}

/// A cursor move whose save has not been sent yet.
#[derive(Debug)]
pub enum Step {
    Moved { index: u32, save: PendingSave },
    /// `next` on the last question; the caller finishes instead.
    PastEnd,
}

/// Drives one open attempt: owns its timer, its synchronizer and the
/// in-memory answers and cursor.
pub struct SessionController {
    attempt: Attempt,
    questions: Vec<Question>,
    answers: HashMap<i64, String>,
    cursor: u32,
    status: AttemptStatus,
    timer: CountdownTimer,
    timeout_pending: bool,
    /// Bumped on every change to answers, cursor or clock.
    revision: u64,
    result: Option<SimuladoResult>,
    sync: ProgressSynchronizer,
    stores: Stores,
}

impl SessionController {
    /// Resolves the attempt for the triple and seeds a session from it.
    ///
    /// * `NotFound`: unknown package, variation out of range, empty or
    ///   unresolvable question sequence, or nothing to resume.
    /// * `AlreadyFinalized`: `Resume` requested but the latest attempt is terminal.
    pub async fn open(
        stores: &Stores,
        settings: &SimuladoSettings,
        key: AttemptKey,
        mode: OpenMode,
    ) -> Result<Self, AppError> {
        let simulado = stores
            .catalog
            .simulado(key.simulado_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Simulado {} not found", key.simulado_id)))?;

        if key.variation_index >= simulado.variations(settings) {
            return Err(AppError::NotFound(format!(
                "Simulado {} has no variation {}",
                key.simulado_id, key.variation_index
            )));
        }

        let questions = stores
            .questions
            .questions_for(key.simulado_id, key.variation_index)
            .await?;
        if questions.is_empty() {
            return Err(AppError::NotFound(format!(
                "No questions for simulado {} variation {}",
                key.simulado_id, key.variation_index
            )));
        }

        let attempt = match mode {
            OpenMode::Start => {
                stores
                    .attempts
                    .resolve(&NewAttempt {
                        key: key.clone(),
                        question_ids: questions.iter().map(|q| q.id).collect(),
                        time_limit_seconds: simulado.time_limit_seconds(settings),
                    })
                    .await?
            }
            OpenMode::Resume => match stores.attempts.find_in_progress(&key).await? {
                Some(attempt) => attempt,
                None => {
                    return Err(match stores.attempts.latest(&key).await? {
                        Some(attempt) => AppError::AlreadyFinalized(format!(
                            "Attempt {} is already {:?}",
                            attempt.id, attempt.status
                        )),
                        None => AppError::NotFound("No attempt to resume".to_string()),
                    });
                }
            },
        };

        Self::seed(stores, settings, attempt, questions)
    }

    /// Reopens a stored in-progress attempt by id, e.g. after a restart.
    pub async fn reopen(
        stores: &Stores,
        settings: &SimuladoSettings,
        attempt_id: i64,
        user_id: &str,
    ) -> Result<Self, AppError> {
        let controller = Self::load(stores, settings, attempt_id, user_id).await?;
        if controller.status.is_terminal() {
            return Err(AppError::AlreadyFinalized(format!(
                "Attempt {} is already {:?}",
                attempt_id, controller.status
            )));
        }
        Ok(controller)
    }

    /// Loads a stored attempt of the user in whatever status it is in.
    /// Terminal attempts come back with a stopped clock.
    pub async fn load(
        stores: &Stores,
        settings: &SimuladoSettings,
        attempt_id: i64,
        user_id: &str,
    ) -> Result<Self, AppError> {
        let attempt = stores
            .attempts
            .get(attempt_id)
            .await?
            .filter(|a| a.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", attempt_id)))?;

        let questions = stores
            .questions
            .questions_for(attempt.simulado_id, attempt.variation_index)
            .await?;

        Self::seed(stores, settings, attempt, questions)
    }

    fn seed(
        stores: &Stores,
        settings: &SimuladoSettings,
        attempt: Attempt,
        catalog: Vec<Question>,
    ) -> Result<Self, AppError> {
        // The stored sequence is authoritative; the catalog only supplies bodies.
        let by_id: HashMap<i64, Question> = catalog.into_iter().map(|q| (q.id, q)).collect();
        let questions = attempt
            .question_ids
            .iter()
            .map(|id| {
                by_id.get(id).cloned().ok_or_else(|| {
                    AppError::NotFound(format!(
                        "Question {} of attempt {} is no longer available",
                        id, attempt.id
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if questions.is_empty() {
            return Err(AppError::NotFound(format!(
                "Attempt {} has an empty question sequence",
                attempt.id
            )));
        }

        let last = questions.len() as u32 - 1;
        let mut timer = CountdownTimer::new();
        timer.start(attempt.time_remaining_seconds);
        if attempt.status.is_terminal() {
            timer.stop();
        }

        let sync = ProgressSynchronizer::new(
            attempt.id,
            stores.attempts.clone(),
            LocalBackup::new(&settings.backup_dir),
        );

        tracing::info!(
            "Opened attempt {} ({:?}) for user {}: {} answers, index {}, {}s left",
            attempt.id,
            attempt.status,
            attempt.user_id,
            attempt.answers.len(),
            attempt.current_index,
            attempt.time_remaining_seconds
        );

        Ok(SessionController {
            answers: attempt.answers.0.clone(),
            cursor: attempt.current_index.min(last),
            status: attempt.status,
            timer,
            timeout_pending: false,
            revision: 0,
            result: None,
            sync,
            stores: stores.clone(),
            questions,
            attempt,
        })
    }

    pub fn attempt_id(&self) -> i64 {
        self.attempt.id
    }

    pub fn user_id(&self) -> &str {
        &self.attempt.user_id
    }

    pub fn key(&self) -> AttemptKey {
        self.attempt.key()
    }

    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn remaining(&self) -> u32 {
        self.timer.remaining()
    }

    pub fn answers(&self) -> &HashMap<i64, String> {
        &self.answers
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn result(&self) -> Option<&SimuladoResult> {
        self.result.as_ref()
    }

    pub fn timer_running(&self) -> bool {
        self.timer.is_running()
    }

    pub fn synchronizer(&self) -> &ProgressSynchronizer {
        &self.sync
    }

    /// Questions of the sequence without a recorded answer.
    pub fn unanswered(&self) -> usize {
        self.questions
            .iter()
            .filter(|q| !self.answers.contains_key(&q.id))
            .count()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            answers: self.answers.clone(),
            current_index: self.cursor,
            time_remaining_seconds: self.timer.remaining(),
            revision: self.revision,
        }
    }

    /// A save of the current snapshot, to be run after the session lock is
    /// released. `None` once the attempt is terminal.
    pub fn pending_save(&self, trigger: SyncTrigger) -> Option<PendingSave> {
        if self.status.is_terminal() {
            return None;
        }
        Some(self.sync.prepare(self.snapshot(), trigger))
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            attempt_id: self.attempt.id,
            simulado_id: self.attempt.simulado_id,
            variation_index: self.attempt.variation_index,
            status: self.status,
            questions: self.questions.iter().map(PublicQuestion::from).collect(),
            answers: self.answers.clone(),
            current_index: self.cursor,
            time_remaining_seconds: self.timer.remaining(),
            answered_count: self.questions.len() - self.unanswered(),
        }
    }

    fn ensure_in_progress(&self) -> Result<(), AppError> {
        if self.status.is_terminal() {
            return Err(AppError::AlreadyFinalized(format!(
                "Attempt {} is already {:?}",
                self.attempt.id, self.status
            )));
        }
        Ok(())
    }

    /// Input is refused once the clock ran out, even while the forced
    /// finish is still being retried.
    fn ensure_accepting_input(&self) -> Result<(), AppError> {
        self.ensure_in_progress()?;
        if self.timeout_pending {
            return Err(AppError::AlreadyFinalized(format!(
                "Time is up for attempt {}",
                self.attempt.id
            )));
        }
        Ok(())
    }

    /// Records (or overwrites) the choice for a question. The returned save
    /// carries the new snapshot and should run once the lock is released.
    pub fn record_answer(&mut self, question_id: i64, choice: String) -> Result<PendingSave, AppError> {
        self.ensure_accepting_input()?;
        if !self.questions.iter().any(|q| q.id == question_id) {
            return Err(AppError::BadRequest(format!(
                "Question {} is not part of attempt {}",
                question_id, self.attempt.id
            )));
        }

        self.answers.insert(question_id, choice);
        self.revision += 1;
        Ok(self.sync.prepare(self.snapshot(), SyncTrigger::Answer))
    }

    /// Records an answer and saves.
    pub async fn answer(&mut self, question_id: i64, choice: String) -> Result<SyncOutcome, AppError> {
        Ok(self.record_answer(question_id, choice)?.run().await)
    }

    pub fn step_next(&mut self) -> Result<Step, AppError> {
        self.ensure_accepting_input()?;
        if self.cursor + 1 >= self.questions.len() as u32 {
            return Ok(Step::PastEnd);
        }
        Ok(self.step_to(self.cursor + 1))
    }

    pub fn step_previous(&mut self) -> Result<Step, AppError> {
        self.ensure_accepting_input()?;
        Ok(self.step_to(self.cursor.saturating_sub(1)))
    }

    /// Jump to `index`, clamped into the sequence.
    pub fn step_go_to(&mut self, index: i64) -> Result<Step, AppError> {
        self.ensure_accepting_input()?;
        let last = self.questions.len() as i64 - 1;
        Ok(self.step_to(index.clamp(0, last) as u32))
    }

    fn step_to(&mut self, index: u32) -> Step {
        self.cursor = index;
        self.revision += 1;
        Step::Moved {
            index,
            save: self.sync.prepare(self.snapshot(), SyncTrigger::Navigation),
        }
    }

    /// Advances the cursor; past the last question this is `finish(false)`.
    pub async fn next(&mut self) -> Result<Navigation, AppError> {
        let step = self.step_next()?;
        self.complete_step(step).await
    }

    pub async fn previous(&mut self) -> Result<Navigation, AppError> {
        let step = self.step_previous()?;
        self.complete_step(step).await
    }

    pub async fn go_to(&mut self, index: i64) -> Result<Navigation, AppError> {
        let step = self.step_go_to(index)?;
        self.complete_step(step).await
    }

    async fn complete_step(&mut self, step: Step) -> Result<Navigation, AppError> {
        match step {
            Step::Moved { index, save } => Ok(Navigation::Moved {
                index,
                sync: save.run().await,
            }),
            Step::PastEnd => Ok(Navigation::Finished(self.finish(false).await?)),
        }
    }

    /// Advances the countdown by one second.
    ///
    /// Returns `TimedOut` when the time budget ran out and the forced
    /// finish has not gone through yet; the host then calls `on_timeout()`.
    pub fn tick(&mut self) -> Tick {
        if self.status.is_terminal() {
            return Tick::Idle;
        }
        if self.timeout_pending {
            return Tick::TimedOut;
        }
        let tick = self.timer.tick();
        match tick {
            Tick::Running(_) => self.revision += 1,
            Tick::TimedOut => {
                self.revision += 1;
                self.timeout_pending = true;
            }
            Tick::Idle => {}
        }
        tick
    }

    /// Saves the current snapshot. Never fails the caller: a failed save
    /// leaves the snapshot in memory and in the local backup.
    pub async fn sync_now(&self, trigger: SyncTrigger) -> SyncOutcome {
        match self.pending_save(trigger) {
            Some(save) => save.run().await,
            None => SyncOutcome::Skipped,
        }
    }

    /// Completes the attempt. Without `confirmed`, unanswered questions make
    /// this return `ConfirmationRequired` and change nothing.
    pub async fn finish(&mut self, confirmed: bool) -> Result<FinishOutcome, AppError> {
        if let Some(outcome) = self.terminal_outcome() {
            return Ok(outcome);
        }

        if self.status == AttemptStatus::InProgress && !confirmed {
            let unanswered = self.unanswered();
            if unanswered > 0 {
                return Ok(FinishOutcome::ConfirmationRequired { unanswered });
            }
        }

        self.complete().await
    }

    /// Forced finish when the time budget is exhausted. Skips confirmation.
    pub async fn on_timeout(&mut self) -> Result<FinishOutcome, AppError> {
        if let Some(outcome) = self.terminal_outcome() {
            return Ok(outcome);
        }
        self.timeout_pending = true;
        tracing::info!("Attempt {} timed out, finishing", self.attempt.id);
        let outcome = self.complete().await?;
        self.timeout_pending = false;
        Ok(outcome)
    }

    fn terminal_outcome(&self) -> Option<FinishOutcome> {
        match (self.status, &self.result) {
            (AttemptStatus::Completed, Some(result)) => Some(FinishOutcome::Completed(result.clone())),
            (AttemptStatus::Abandoned, _) => Some(FinishOutcome::Abandoned),
            _ => None,
        }
    }

    async fn complete(&mut self) -> Result<FinishOutcome, AppError> {
        // Completed locally but the result write did not go through earlier
        if self.status == AttemptStatus::Completed {
            let attempt = self.stored_attempt().await?;
            let result = self.result_for(&attempt).await?;
            self.result = Some(result.clone());
            return Ok(FinishOutcome::Completed(result));
        }

        self.timer.stop();
        let finalization = Finalization {
            status: AttemptStatus::Completed,
            completed_at: Some(Utc::now()),
            snapshot: self.snapshot(),
        };

        let outcome = match self.stores.attempts.finalize(self.attempt.id, &finalization).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.resume_after_failed_finalize(&e);
                return Err(e);
            }
        };

        let attempt = match outcome {
            FinalizeOutcome::Finalized(attempt) => attempt,
            FinalizeOutcome::AlreadyTerminal(attempt) => {
                tracing::info!(
                    "Attempt {} was already {:?}; adopting stored outcome",
                    attempt.id,
                    attempt.status
                );
                if attempt.status == AttemptStatus::Abandoned {
                    self.enter_terminal(AttemptStatus::Abandoned);
                    return Ok(FinishOutcome::Abandoned);
                }
                attempt
            }
        };

        self.enter_terminal(AttemptStatus::Completed);
        let result = self.result_for(&attempt).await?;
        tracing::info!(
            "Attempt {} completed: score {} ({}/{})",
            attempt.id,
            result.score,
            result.correct_count,
            result.total_questions
        );
        self.result = Some(result.clone());
        Ok(FinishOutcome::Completed(result))
    }

    /// Ends the attempt without a result.
    pub async fn abandon(&mut self) -> Result<AbandonOutcome, AppError> {
        match self.status {
            AttemptStatus::Abandoned => return Ok(AbandonOutcome::Abandoned),
            AttemptStatus::Completed => {
                let result = match &self.result {
                    Some(result) => result.clone(),
                    None => {
                        let attempt = self.stored_attempt().await?;
                        self.result_for(&attempt).await?
                    }
                };
                self.result = Some(result.clone());
                return Ok(AbandonOutcome::Completed(result));
            }
            AttemptStatus::InProgress => {}
        }

        self.timer.stop();
        let finalization = Finalization {
            status: AttemptStatus::Abandoned,
            completed_at: None,
            snapshot: self.snapshot(),
        };

        let outcome = match self.stores.attempts.finalize(self.attempt.id, &finalization).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.resume_after_failed_finalize(&e);
                return Err(e);
            }
        };

        match outcome {
            FinalizeOutcome::AlreadyTerminal(attempt) if attempt.status == AttemptStatus::Completed => {
                self.enter_terminal(AttemptStatus::Completed);
                let result = self.result_for(&attempt).await?;
                self.result = Some(result.clone());
                Ok(AbandonOutcome::Completed(result))
            }
            _ => {
                self.enter_terminal(AttemptStatus::Abandoned);
                tracing::info!("Attempt {} abandoned", self.attempt.id);
                Ok(AbandonOutcome::Abandoned)
            }
        }
    }

    /// Pause/exit: freezes the clock and makes one bounded save.
    pub async fn close(&mut self, limit: Duration) -> SyncOutcome {
        self.timer.stop();
        if self.status.is_terminal() {
            return SyncOutcome::Skipped;
        }
        self.sync.sync_within(self.snapshot(), SyncTrigger::Exit, limit).await
    }

    /// About-to-terminate hook: synchronous local backup of the snapshot.
    pub fn on_terminate(&mut self) -> io::Result<()> {
        self.timer.stop();
        if self.status.is_terminal() {
            return Ok(());
        }
        self.sync.write_backup(&self.snapshot())
    }

    fn enter_terminal(&mut self, status: AttemptStatus) {
        self.timer.stop();
        self.status = status;
        self.attempt.status = status;
        self.sync.clear_backup();
    }

    fn resume_after_failed_finalize(&mut self, err: &AppError) {
        tracing::warn!("Finalizing attempt {} failed: {}", self.attempt.id, err);
        if let Err(e) = self.sync.write_backup(&self.snapshot()) {
            tracing::warn!("Failed to write backup of attempt {}: {}", self.attempt.id, e);
        }
        // Time keeps running until the transition goes through
        if !self.timer.has_fired() {
            self.timer.start(self.timer.remaining());
        }
    }

    async fn stored_attempt(&self) -> Result<Attempt, AppError> {
        self.stores
            .attempts
            .get(self.attempt.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", self.attempt.id)))
    }

    /// The stored result of a completed attempt, scoring it when missing.
    async fn result_for(&self, attempt: &Attempt) -> Result<SimuladoResult, AppError> {
        if let Some(existing) = self.stores.results.for_attempt(attempt.id).await? {
            return Ok(existing);
        }

        let card = score_attempt(
            &self.questions,
            &attempt.answers,
            time_spent(attempt.time_limit_seconds, attempt.time_remaining_seconds),
        );

        self.stores
            .results
            .insert(&NewResult {
                user_id: attempt.user_id.clone(),
                simulado_id: attempt.simulado_id,
                variation_index: attempt.variation_index,
                attempt_id: attempt.id,
                score: card.score,
                correct_count: card.correct_count,
                error_count: card.error_count,
                total_questions: card.total_questions,
                time_spent_seconds: card.time_spent_seconds,
                completed_at: attempt.completed_at.unwrap_or_else(Utc::now),
            })
            .await
    }
}
