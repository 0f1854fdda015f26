#![cfg(unix)]

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tdsoft::config::WorkerTimings;
use tdsoft::{AppConfig, GetMembersRequest, SessionController, SessionError};
use tdsoft_worker_supervisor::StopOutcome;
use tempfile::TempDir;

type Calls = Arc<Mutex<Vec<(String, HashMap<String, String>)>>>;

fn record(calls: &Calls, endpoint: &str, query: HashMap<String, String>) {
    calls
        .lock()
        .expect("calls")
        .push((endpoint.to_string(), query));
}

async fn serve_login_worker() -> (String, Calls) {
    let calls: Calls = Arc::default();
    let app = Router::new()
        .route(
            "/ping",
            get(|| async { Json(json!({ "message": "pong" })) }),
        )
        .route(
            "/shutdown",
            get(|State(calls): State<Calls>| async move {
                record(&calls, "shutdown", HashMap::new());
                Json(json!({ "message": "server shutting down" }))
            }),
        )
        .route(
            "/session_path",
            post(
                |State(calls): State<Calls>, Query(query): Query<HashMap<String, String>>| async move {
                    record(&calls, "session_path", query);
                    Json(json!({ "message": "session path set" }))
                },
            ),
        )
        .route(
            "/api_data",
            post(
                |State(calls): State<Calls>, Query(query): Query<HashMap<String, String>>| async move {
                    record(&calls, "api_data", query);
                    Json(json!({ "message": "client initialized" }))
                },
            ),
        )
        .route(
            "/send_code",
            post(
                |State(calls): State<Calls>, Query(query): Query<HashMap<String, String>>| async move {
                    record(&calls, "send_code", query);
                    Json(json!({}))
                },
            ),
        )
        .route(
            "/sign_in",
            post(|| async { Json(json!({ "error": "password required: SESSION_PASSWORD_NEEDED" })) }),
        )
        .route(
            "/check_password",
            post(
                |Query(query): Query<HashMap<String, String>>| async move {
                    if query.get("password").map(String::as_str) == Some("hunter2") {
                        Json(json!({ "message": "signed in" }))
                    } else {
                        Json(json!({ "error": "PASSWORD_HASH_INVALID" }))
                    }
                },
            ),
        )
        .with_state(calls.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub worker");
    let addr = listener.local_addr().expect("stub address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), calls)
}

fn config(dir: &TempDir, creator_uri: String) -> AppConfig {
    let bin = dir.path().join("venv").join("bin");
    fs::create_dir_all(&bin).expect("venv dir");
    std::os::unix::fs::symlink("/bin/sh", bin.join("python3")).expect("interpreter");
    let scripts = dir.path().join("scripts");
    fs::create_dir_all(&scripts).expect("scripts dir");
    fs::write(scripts.join("connect.py"), "exec sleep 30\n").expect("login worker");

    AppConfig {
        venv_path: dir.path().join("venv"),
        scripts_path: scripts,
        session_name: dir.path().join("account").to_string_lossy().into_owned(),
        creator_log_path: dir.path().join("logs").join("creator_server.log"),
        app_log_path: None,
        creator_uri,
        api_id: None,
        api_hash: None,
        worker: WorkerTimings {
            poll_interval_ms: Some(20),
            ..WorkerTimings::default()
        },
    }
}

#[tokio::test]
async fn two_step_login_through_the_controller() {
    let dir = TempDir::new().expect("tempdir");
    let (uri, calls) = serve_login_worker().await;
    let controller = SessionController::new(config(&dir, uri));
    assert!(!controller.credentials().is_complete());

    controller.start_worker().await.expect("worker starts");
    assert!(controller.worker_running().await);

    controller
        .send_api_data(" 12345 ", "0123456789abcdef")
        .await
        .expect("api data");
    controller.send_phone("+10000000000").await.expect("code sent");

    let err = controller
        .sign_in("+10000000000", "11111")
        .await
        .expect_err("second factor");
    assert!(err.is_password_needed(), "{err:?}");

    let err = controller
        .check_password("wrong")
        .await
        .expect_err("bad password");
    assert!(matches!(err, SessionError::Supervisor(_)));
    assert!(!err.is_password_needed());
    controller
        .check_password("hunter2")
        .await
        .expect("password accepted");

    let outcome = controller.stop_worker().await.expect("worker stops");
    assert!(matches!(outcome, StopOutcome::Graceful(_)), "{outcome:?}");
    assert!(!controller.worker_running().await);

    let credentials = controller.credentials();
    assert_eq!(credentials.api_id, "12345");
    assert_eq!(credentials.phone, "+10000000000");

    let calls = calls.lock().expect("calls").clone();
    let endpoints: Vec<&str> = calls.iter().map(|(endpoint, _)| endpoint.as_str()).collect();
    assert_eq!(
        endpoints,
        vec!["session_path", "api_data", "send_code", "shutdown"]
    );
    let session_name = dir.path().join("account").to_string_lossy().into_owned();
    assert_eq!(
        calls[0].1.get("path").map(String::as_str),
        Some(session_name.as_str())
    );
    assert_eq!(calls[1].1.get("api_id").map(String::as_str), Some("12345"));
    assert_eq!(
        calls[2].1.get("phone").map(String::as_str),
        Some("+10000000000")
    );

    let log = fs::read_to_string(dir.path().join("logs").join("creator_server.log"));
    assert!(log.is_ok(), "worker log created");
}

#[tokio::test]
async fn credentials_from_login_outlive_the_controller() {
    let dir = TempDir::new().expect("tempdir");
    let (uri, _calls) = serve_login_worker().await;
    let config = config(&dir, uri);
    fs::write(
        config.script("get_members.py"),
        "printf '%s\\n' \"$API_ID:$API_HASH\" > \"$(dirname \"$0\")/env.txt\"\n",
    )
    .expect("task script");

    {
        let login = SessionController::new(config.clone());
        login.start_worker().await.expect("worker starts");
        login
            .send_api_data("12345", "0123456789abcdef")
            .await
            .expect("api data");
        login.send_phone("+10000000000").await.expect("code sent");
        login.save_credentials().expect("credentials saved");
        login.stop_worker().await.expect("worker stops");
    }
    // The worker writes the session file once signed in.
    fs::write(config.session_file(), b"sqlite").expect("session file");

    let controller = SessionController::new(config.clone());
    assert!(!controller.needs_auth());
    assert_eq!(controller.credentials().api_id, "12345");
    assert_eq!(controller.credentials().phone, "+10000000000");

    controller.set_user_logger(|_| {});
    controller
        .get_members(GetMembersRequest {
            chat: "@durov".to_string(),
            ..GetMembersRequest::default()
        })
        .await
        .expect("task runs");
    let env = fs::read_to_string(config.scripts_path.join("env.txt")).expect("env recorded");
    assert_eq!(env.trim(), "12345:0123456789abcdef");

    controller.delete_session().expect("logout");
    assert!(!config.credentials_file().exists());
    assert!(SessionController::new(config).needs_auth());
}

#[tokio::test]
async fn unreachable_worker_is_a_transport_failure() {
    let dir = TempDir::new().expect("tempdir");
    let controller = SessionController::new(config(&dir, "http://127.0.0.1:9".to_string()));

    let err = controller
        .send_phone("+10000000000")
        .await
        .expect_err("no worker");
    assert!(matches!(
        err,
        SessionError::Supervisor(tdsoft_worker_supervisor::SupervisorError::PingFailed)
    ));
    assert_eq!(
        controller.stop_worker().await.expect("nothing to stop"),
        StopOutcome::NotRunning
    );
}
