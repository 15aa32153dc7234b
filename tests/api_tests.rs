// tests/api_tests.rs

mod common;

use common::{new_user, seed_basic, test_pool, test_settings};
use serde_json::{Value, json};
use simulado::{
    config::Config, routes, session::SessionRegistry, state::AppState, store::Stores,
};
use tempfile::TempDir;

struct TestApp {
    address: String,
    client: reqwest::Client,
    simulado_id: i64,
    _backups: TempDir,
}

/// Helper function to spawn the app on a random port for testing.
/// The database is in memory and seeded with one package.
async fn spawn_app() -> TestApp {
    // 1. Create a pool and apply the schema
    let pool = test_pool().await;

    // 2. Seed the catalog
    let simulado_id = seed_basic(&pool).await;

    // 3. Create test configuration and state
    let (settings, backups) = test_settings();
    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        rust_log: "error".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        simulado: settings.clone(),
    };

    let sessions = SessionRegistry::new(Stores::sqlite(pool.clone()), settings);
    let state = AppState {
        pool,
        config,
        sessions,
    };

    // 4. Create the router with the app state
    let app = routes::create_router(state);

    // 5. Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    // 6. Spawn the server in the background
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address,
        client: reqwest::Client::new(),
        simulado_id,
        _backups: backups,
    }
}

impl TestApp {
    async fn post(&self, user: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .header("x-user-id", user)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn get(&self, user: &str, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .header("x-user-id", user)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Opens variation 0 and returns the session view.
    async fn open(&self, user: &str, mode: &str) -> reqwest::Response {
        self.post(
            user,
            &format!("/api/simulados/{}/provas/0/open?mode={}", self.simulado_id, mode),
            json!({}),
        )
        .await
    }
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = spawn_app().await;

    let response = app.get(&new_user(), "/random_path_that_does_not_exist").await;

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn missing_identity_is_401() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/api/results/me", app.address))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 401);

    let response = app.get("   ", "/api/results/me").await;
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn open_returns_a_session_view() {
    let app = spawn_app().await;
    let user = new_user();

    let response = app.open(&user, "start").await;
    assert_eq!(response.status().as_u16(), 200);

    let view: Value = response.json().await.unwrap();
    assert_eq!(view["status"], "in_progress");
    assert_eq!(view["current_index"], 0);
    assert_eq!(view["time_remaining_seconds"], 60);
    assert_eq!(view["answered_count"], 0);
    assert_eq!(view["questions"].as_array().unwrap().len(), 3);
    // Answer keys never leave the server
    assert!(view["questions"][0].get("answer").is_none());

    // Opening again resumes the same attempt
    let again: Value = app.open(&user, "start").await.json().await.unwrap();
    assert_eq!(again["attempt_id"], view["attempt_id"]);
}

#[tokio::test]
async fn open_unknown_package_or_variation_is_404() {
    let app = spawn_app().await;
    let user = new_user();

    let response = app
        .post(&user, "/api/simulados/9999/provas/0/open", json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 404);

    let response = app
        .post(
            &user,
            &format!("/api/simulados/{}/provas/7/open", app.simulado_id),
            json!({}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 404);

    let response = app.open(&user, "resume").await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn answer_validates_and_saves() {
    let app = spawn_app().await;
    let user = new_user();
    let view: Value = app.open(&user, "start").await.json().await.unwrap();
    let id = view["attempt_id"].as_i64().unwrap();

    let response = app
        .post(&user, &format!("/api/attempts/{}/answer", id), json!({ "question_id": 1, "choice": "" }))
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .post(&user, &format!("/api/attempts/{}/answer", id), json!({ "question_id": 99, "choice": "A" }))
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .post(&user, &format!("/api/attempts/{}/answer", id), json!({ "question_id": 1, "choice": "A" }))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["synced"], true);
    assert_eq!(body["session"]["answers"]["1"], "A");
    assert_eq!(body["session"]["answered_count"], 1);

    // Another user cannot see the attempt
    let response = app.get(&new_user(), &format!("/api/attempts/{}", id)).await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn navigation_moves_and_clamps() {
    let app = spawn_app().await;
    let user = new_user();
    let view: Value = app.open(&user, "start").await.json().await.unwrap();
    let id = view["attempt_id"].as_i64().unwrap();

    let body: Value = app
        .post(&user, &format!("/api/attempts/{}/next", id), json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "moved");
    assert_eq!(body["session"]["current_index"], 1);

    let body: Value = app
        .post(&user, &format!("/api/attempts/{}/goto", id), json!({ "index": 42 }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["session"]["current_index"], 2);

    let body: Value = app
        .post(&user, &format!("/api/attempts/{}/previous", id), json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["session"]["current_index"], 1);

    let body: Value = app
        .post(&user, &format!("/api/attempts/{}/goto", id), json!({ "index": 2 }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["session"]["current_index"], 2);

    // next() on the last question is finish() without confirmation
    let body: Value = app
        .post(&user, &format!("/api/attempts/{}/next", id), json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "confirmation_required");
    assert_eq!(body["unanswered"], 3);
}

#[tokio::test]
async fn finish_flow_scores_and_locks_the_attempt() {
    let app = spawn_app().await;
    let user = new_user();
    let view: Value = app.open(&user, "start").await.json().await.unwrap();
    let id = view["attempt_id"].as_i64().unwrap();

    for (question_id, choice) in [(1, "A"), (2, "B")] {
        let response = app
            .post(
                &user,
                &format!("/api/attempts/{}/answer", id),
                json!({ "question_id": question_id, "choice": choice }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 200);
    }

    let body: Value = app
        .post(&user, &format!("/api/attempts/{}/finish", id), json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "confirmation_required");
    assert_eq!(body["unanswered"], 1);

    let response = app
        .post(&user, &format!("/api/attempts/{}/finish", id), json!({ "confirm": true }))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["correct_count"], 1);
    assert_eq!(body["result"]["error_count"], 2);
    assert_eq!(body["result"]["total_questions"], 3);
    assert_eq!(body["result"]["score"], 33);

    // Finishing again returns the same result
    let replay: Value = app
        .post(&user, &format!("/api/attempts/{}/finish", id), json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(replay["result"], body["result"]);

    // The attempt no longer accepts answers
    let response = app
        .post(&user, &format!("/api/attempts/{}/answer", id), json!({ "question_id": 3, "choice": "A" }))
        .await;
    assert_eq!(response.status().as_u16(), 409);

    // Resume refuses a terminal attempt
    let response = app.open(&user, "resume").await;
    assert_eq!(response.status().as_u16(), 409);

    let results: Value = app.get(&user, "/api/results/me").await.json().await.unwrap();
    assert_eq!(results.as_array().unwrap().len(), 1);

    let stats: Value = app.get(&user, "/api/results/me/stats").await.json().await.unwrap();
    assert_eq!(stats["total_completed"], 1);
    assert_eq!(stats["average_score"], 33);

    let provas: Value = app
        .get(&user, &format!("/api/simulados/{}/provas", app.simulado_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(provas.as_array().unwrap().len(), 2);
    assert_eq!(provas[0]["is_completed"], true);
    assert_eq!(provas[0]["is_in_progress"], false);
    assert_eq!(provas[0]["result"]["score"], 33);
    assert_eq!(provas[1]["is_completed"], false);
}

#[tokio::test]
async fn abandon_ends_without_a_result() {
    let app = spawn_app().await;
    let user = new_user();
    let view: Value = app.open(&user, "start").await.json().await.unwrap();
    let id = view["attempt_id"].as_i64().unwrap();

    let body: Value = app
        .post(&user, &format!("/api/attempts/{}/abandon", id), json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "abandoned");

    let body: Value = app
        .post(&user, &format!("/api/attempts/{}/abandon", id), json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "abandoned");

    let body: Value = app
        .post(&user, &format!("/api/attempts/{}/finish", id), json!({ "confirm": true }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "abandoned");

    let results: Value = app.get(&user, "/api/results/me").await.json().await.unwrap();
    assert!(results.as_array().unwrap().is_empty());

    // A fresh start allocates a new attempt
    let fresh: Value = app.open(&user, "start").await.json().await.unwrap();
    assert_ne!(fresh["attempt_id"], view["attempt_id"]);
}

#[tokio::test]
async fn close_then_resume_keeps_progress() {
    let app = spawn_app().await;
    let user = new_user();
    let view: Value = app.open(&user, "start").await.json().await.unwrap();
    let id = view["attempt_id"].as_i64().unwrap();

    app.post(&user, &format!("/api/attempts/{}/answer", id), json!({ "question_id": 2, "choice": "C" }))
        .await;
    app.post(&user, &format!("/api/attempts/{}/goto", id), json!({ "index": 1 }))
        .await;

    let body: Value = app
        .post(&user, &format!("/api/attempts/{}/hidden", id), json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["synced"], true);

    let body: Value = app
        .post(&user, &format!("/api/attempts/{}/close", id), json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["synced"], true);

    // Closing twice: the session is no longer live
    let response = app
        .post(&user, &format!("/api/attempts/{}/close", id), json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 404);

    let resumed: Value = app.open(&user, "resume").await.json().await.unwrap();
    assert_eq!(resumed["attempt_id"], view["attempt_id"]);
    assert_eq!(resumed["current_index"], 1);
    assert_eq!(resumed["answers"]["2"], "C");
    assert!(resumed["time_remaining_seconds"].as_u64().unwrap() <= 60);
}

#[tokio::test]
async fn unload_is_accepted() {
    let app = spawn_app().await;
    let user = new_user();
    let view: Value = app.open(&user, "start").await.json().await.unwrap();
    let id = view["attempt_id"].as_i64().unwrap();

    let response = app
        .post(&user, &format!("/api/attempts/{}/unload", id), json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 202);

    // The attempt is still resumable
    let response = app.get(&user, &format!("/api/attempts/{}", id)).await;
    assert_eq!(response.status().as_u16(), 200);
}
