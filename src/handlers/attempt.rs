// src/handlers/attempt.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Value, json};
use validator::Validate;

use crate::{
    error::AppError,
    models::attempt::{
        AnswerRequest, AttemptKey, FinishRequest, GoToRequest, OpenAttemptRequest, SessionView,
    },
    session::{AbandonOutcome, FinishOutcome, SessionRegistry, Step, SyncTrigger},
    utils::identity::CurrentUser,
};

/// Serializes a finish outcome as `{"status": ..., ...}`.
fn finish_json(outcome: &FinishOutcome) -> Value {
    match outcome {
        FinishOutcome::ConfirmationRequired { unanswered } => json!({
            "status": "confirmation_required",
            "unanswered": unanswered,
        }),
        FinishOutcome::Completed(result) => json!({
            "status": "completed",
            "result": result,
        }),
        FinishOutcome::Abandoned => json!({ "status": "abandoned" }),
    }
}

/// Starts or resumes the attempt of the caller for one variation.
///
/// * `?mode=start` (default) reuses the in-progress attempt or allocates one.
/// * `?mode=resume` never allocates; a terminal attempt yields 409.
pub async fn open_attempt(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
    Path((simulado_id, variation_index)): Path<(i64, u32)>,
    Query(req): Query<OpenAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let key = AttemptKey {
        user_id: user.id,
        simulado_id,
        variation_index,
    };

    let session = registry.open(key, req.mode).await?;
    let view = session.controller.lock().await.view();

    Ok(Json(view))
}

/// Current state of a session.
pub async fn get_attempt(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<i64>,
) -> Result<Json<SessionView>, AppError> {
    let session = registry.session(attempt_id, &user.id).await?;
    let view = session.controller.lock().await.view();
    Ok(Json(view))
}

/// Records an answer and saves progress.
pub async fn answer(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<i64>,
    Json(req): Json<AnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = req.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let session = registry.session(attempt_id, &user.id).await?;
    // The clock keeps ticking while the save is on the wire
    let (view, save) = {
        let mut controller = session.controller.lock().await;
        let save = controller.record_answer(req.question_id, req.choice)?;
        (controller.view(), save)
    };
    let sync = save.run().await;

    Ok(Json(json!({
        "session": view,
        "synced": sync.is_saved(),
    })))
}

#[derive(Debug, Clone, Copy)]
enum Move {
    Next,
    Previous,
    To(i64),
}

async fn navigate(
    registry: &SessionRegistry,
    user: &CurrentUser,
    attempt_id: i64,
    movement: Move,
) -> Result<Json<Value>, AppError> {
    let session = registry.session(attempt_id, &user.id).await?;
    let mut controller = session.controller.lock().await;

    let step = match movement {
        Move::Next => controller.step_next()?,
        Move::Previous => controller.step_previous()?,
        Move::To(index) => controller.step_go_to(index)?,
    };

    match step {
        Step::Moved { save, .. } => {
            let view = controller.view();
            drop(controller);
            let sync = save.run().await;
            Ok(Json(json!({
                "status": "moved",
                "session": view,
                "synced": sync.is_saved(),
            })))
        }
        Step::PastEnd => {
            let outcome = controller.finish(false).await?;
            drop(controller);
            if !matches!(outcome, FinishOutcome::ConfirmationRequired { .. }) {
                registry.retire(attempt_id).await;
            }
            Ok(Json(finish_json(&outcome)))
        }
    }
}

/// Moves forward; on the last question this behaves like `finish`.
pub async fn next(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    navigate(&registry, &user, attempt_id, Move::Next).await
}

pub async fn previous(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    navigate(&registry, &user, attempt_id, Move::Previous).await
}

pub async fn go_to(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<i64>,
    Json(req): Json<GoToRequest>,
) -> Result<Json<Value>, AppError> {
    navigate(&registry, &user, attempt_id, Move::To(req.index)).await
}

/// Finishes the attempt. Without `confirm`, unanswered questions produce a
/// `confirmation_required` answer instead of a result.
pub async fn finish(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<i64>,
    Json(req): Json<FinishRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = registry.finish(attempt_id, &user.id, req.confirm).await?;
    Ok(Json(finish_json(&outcome)))
}

pub async fn abandon(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let body = match registry.abandon(attempt_id, &user.id).await? {
        AbandonOutcome::Abandoned => json!({ "status": "abandoned" }),
        AbandonOutcome::Completed(result) => json!({
            "status": "completed",
            "result": result,
        }),
    };
    Ok(Json(body))
}

/// The client went to the background.
pub async fn hidden(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let session = registry.session(attempt_id, &user.id).await?;
    let save = session.controller.lock().await.pending_save(SyncTrigger::Hidden);
    let synced = match save {
        Some(save) => save.run().await.is_saved(),
        None => false,
    };
    Ok(Json(json!({ "synced": synced })))
}

/// Pause/exit.
pub async fn close(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let outcome = registry.close(attempt_id, &user.id).await?;
    Ok(Json(json!({ "synced": outcome.is_saved() })))
}

/// Last call from a page that is going away.
pub async fn unload(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    registry.unload(attempt_id, &user.id).await?;
    Ok(StatusCode::ACCEPTED)
}
