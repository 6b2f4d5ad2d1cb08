use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use reqwest::StatusCode;
use serde_json::json;

use playpulse_api::app::{build_app, IngestServices};
use playpulse_core::{
    AppConfig, AppId, HistoryId, NewHistory, ProviderTimestamp, RunType, TimeWindow,
};
use playpulse_infra::provider::ScriptedProvider;
use playpulse_infra::store::{IngestStore, InMemoryIngestStore};
use playpulse_infra::IngestConfig;

struct TestServer {
    base_url: String,
    services: Arc<IngestServices>,
    store: Arc<InMemoryIngestStore>,
    app: AppConfig,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(provider: ScriptedProvider) -> Self {
        let store = Arc::new(InMemoryIngestStore::new());
        let app = AppConfig {
            id: AppId::new(),
            name: "puzzle".to_string(),
            provider_app_id: "4242".to_string(),
            api_token: "secret".to_string(),
            is_active: true,
            schedule_anchor: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            interval_minutes: 60,
        };
        store.insert_app(app.clone());

        // Same router as prod, on the in-memory store and an ephemeral port.
        let services = Arc::new(IngestServices::new(
            IngestConfig::default(),
            store.clone(),
            Arc::new(provider),
        ));
        let router = build_app(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url,
            services,
            store,
            app,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn wait_for_history(store: &InMemoryIngestStore, app_id: AppId) -> HistoryId {
    for _ in 0..100 {
        if let Some(h) = store.histories_for(app_id).first() {
            return h.id;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run did not open a history within timeout");
}

#[tokio::test]
async fn health_reports_ok() {
    let server = TestServer::spawn(ScriptedProvider::new([])).await;
    let res = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["busy_apps"], 0);
}

#[tokio::test]
async fn manual_trigger_queues_one_ticket_per_window() {
    let server = TestServer::spawn(ScriptedProvider::new([])).await;
    let client = reqwest::Client::new();
    let path = format!("/apps/{}/runs", server.app.id);

    let res = client
        .post(server.url(&path))
        .json(&json!({"run_type": "manual"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["ticket_id"].is_string());
    assert_eq!(body["run_type"], "manual");

    let tickets = server.store.tickets_for(server.app.id);
    assert_eq!(tickets.len(), 1);

    // Same minute, same window start.
    let res = client
        .post(server.url(&path))
        .json(&json!({"run_type": "manual"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(server.store.tickets_for(server.app.id).len(), 1);
}

#[tokio::test]
async fn trigger_rejects_bad_requests() {
    let server = TestServer::spawn(ScriptedProvider::new([])).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url(&format!("/apps/{}/runs", AppId::new())))
        .json(&json!({"run_type": "manual"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let path = format!("/apps/{}/runs", server.app.id);
    for body in [
        json!({"run_type": "hourly"}),
        json!({"run_type": "schedule"}),
        json!({"run_type": "retry"}),
        json!({"run_type": "retry", "retry_of_history_id": "not-a-uuid"}),
    ] {
        let res = client
            .post(server.url(&path))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "body: {body}");
    }

    let res = client
        .post(server.url("/apps/not-a-uuid/runs"))
        .json(&json!({"run_type": "manual"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(server.url(&path))
        .json(&json!({"run_type": "retry", "retry_of_history_id": HistoryId::new().to_string()}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(server.store.tickets_for(server.app.id).is_empty());
}

#[tokio::test]
async fn retry_must_reference_the_apps_own_history() {
    let server = TestServer::spawn(ScriptedProvider::new([])).await;
    let client = reqwest::Client::new();

    let other = AppConfig {
        id: AppId::new(),
        name: "racing".to_string(),
        ..server.app.clone()
    };
    server.store.insert_app(other.clone());
    let window = TimeWindow::new(
        ProviderTimestamp::parse("2024-04-30 22:00:00").unwrap(),
        ProviderTimestamp::parse("2024-04-30 23:00:00").unwrap(),
    )
    .unwrap();
    let foreign = server
        .store
        .create_history(NewHistory::processing(
            other.id,
            RunType::Schedule,
            window,
            chrono::Utc::now(),
        ))
        .await
        .unwrap();

    let res = client
        .post(server.url(&format!("/apps/{}/runs", server.app.id)))
        .json(&json!({"run_type": "retry", "retry_of_history_id": foreign.to_string()}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_request");
    assert!(server.store.tickets_for(server.app.id).is_empty());
}

#[tokio::test]
async fn cancel_stops_a_run_waiting_on_the_provider() {
    let server = TestServer::spawn(ScriptedProvider::statuses([(202, "")])).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url(&format!("/apps/{}/runs", server.app.id)))
        .json(&json!({"run_type": "demo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let started = server.services.dispatcher().dispatch_once().await.unwrap();
    assert_eq!(started.len(), 1);

    let history_id = wait_for_history(&server.store, server.app.id).await;
    let cancel_path = format!("/runs/{}/cancel", history_id);

    // The token is registered right after the history opens.
    let mut accepted = false;
    for _ in 0..100 {
        let res = client.post(server.url(&cancel_path)).send().await.unwrap();
        if res.status() == StatusCode::ACCEPTED {
            accepted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(accepted, "cancel was never accepted");

    for handle in started {
        handle.await.unwrap();
    }

    let res = client
        .get(server.url(&format!("/runs/{}", history_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "Cancelled");
    assert_eq!(body["run_type"], "demo");

    // Nothing left to cancel.
    let res = client.post(server.url(&cancel_path)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_runs_are_not_found() {
    let server = TestServer::spawn(ScriptedProvider::new([])).await;
    let client = reqwest::Client::new();
    let id = HistoryId::new();

    let res = client
        .post(server.url(&format!("/runs/{}/cancel", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(server.url(&format!("/runs/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
