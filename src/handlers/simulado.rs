// src/handlers/simulado.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::{
        attempt::{Attempt, AttemptStatus},
        result::{ProvaStatus, SimuladoResult, UserStats},
    },
    session::SessionRegistry,
    utils::identity::CurrentUser,
};

/// Builds the per-variation status list from a user's attempts and results.
fn prova_statuses(
    variations: u32,
    attempts: &[Attempt],
    results: &[SimuladoResult],
) -> Vec<ProvaStatus> {
    (0..variations)
        .map(|i| {
            let in_progress = attempts
                .iter()
                .find(|a| a.variation_index == i && a.status == AttemptStatus::InProgress);
            let completed = attempts
                .iter()
                .find(|a| a.variation_index == i && a.status == AttemptStatus::Completed);
            // Both lists come newest first
            let result = results.iter().find(|r| r.variation_index == i).cloned();

            ProvaStatus {
                variation_index: i,
                label: format!("Prova {}", i + 1),
                is_completed: completed.is_some(),
                is_in_progress: in_progress.is_some(),
                result,
                attempt: in_progress.or(completed).cloned(),
            }
        })
        .collect()
}

/// Lists the variations ("provas") of a package with the caller's progress.
pub async fn list_provas(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
    Path(simulado_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let stores = registry.stores();
    let simulado = stores
        .catalog
        .simulado(simulado_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Simulado {} not found", simulado_id)))?;

    let attempts = stores.attempts.list_for_user(&user.id, simulado_id).await?;
    let results: Vec<SimuladoResult> = stores
        .results
        .list_for_user(&user.id)
        .await?
        .into_iter()
        .filter(|r| r.simulado_id == simulado_id)
        .collect();

    let provas = prova_statuses(simulado.variations(registry.settings()), &attempts, &results);
    Ok(Json(provas))
}

/// The caller's results, newest first.
pub async fn my_results(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let results = registry.stores().results.list_for_user(&user.id).await?;
    Ok(Json(results))
}

/// Completed count, rounded average score and best ranking of the caller.
pub async fn my_stats(
    State(registry): State<SessionRegistry>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let results = registry.stores().results.list_for_user(&user.id).await?;
    Ok(Json(UserStats::from_results(&results)))
}
