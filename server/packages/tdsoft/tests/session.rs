#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tdsoft::config::WorkerTimings;
use tdsoft::{
    AppConfig, GetChatStatsRequest, GetMembersRequest, PrintDialogsRequest,
    SearchMessagesRequest, SessionController, SessionError, TaskRequest,
};
use tdsoft_error::{ErrorKind, ValidationError};
use tdsoft_worker_stream::TaskError;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    lines: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let bin = dir.path().join("venv").join("bin");
        fs::create_dir_all(&bin).expect("venv dir");
        // Worker scripts in these tests are shell scripts.
        std::os::unix::fs::symlink("/bin/sh", bin.join("python3")).expect("interpreter");
        fs::create_dir_all(dir.path().join("scripts")).expect("scripts dir");
        Self {
            dir,
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn script(&self, name: &str, body: &str) -> &Self {
        fs::write(self.path().join("scripts").join(name), body).expect("write script");
        self
    }

    fn config(&self, creator_uri: &str) -> AppConfig {
        AppConfig {
            venv_path: self.path().join("venv"),
            scripts_path: self.path().join("scripts"),
            session_name: self.path().join("account").to_string_lossy().into_owned(),
            creator_log_path: self.path().join("creator_server.log"),
            app_log_path: None,
            creator_uri: creator_uri.to_string(),
            api_id: Some("12345".to_string()),
            api_hash: Some("0123456789abcdef".to_string()),
            worker: WorkerTimings {
                poll_interval_ms: Some(20),
                stop_grace_ms: Some(2_000),
                ..WorkerTimings::default()
            },
        }
    }

    fn controller(&self) -> Arc<SessionController> {
        let controller = Arc::new(SessionController::new(self.config("http://127.0.0.1:9")));
        let lines = self.lines.clone();
        controller.set_user_logger(move |line| lines.lock().expect("lines").push(line.to_string()));
        controller
    }

    fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("lines").clone()
    }

    fn recorded(&self, name: &str) -> Option<Vec<String>> {
        fs::read_to_string(self.path().join("scripts").join(name))
            .ok()
            .map(|raw| raw.lines().map(str::to_string).collect())
    }

    fn session_name(&self) -> String {
        self.path().join("account").to_string_lossy().into_owned()
    }
}

const RECORD_ARGS: &str = r#"printf '%s\n' "$@" > "$(dirname "$0")/args.txt"
printf '%s\n' "$API_ID:$API_HASH" > "$(dirname "$0")/env.txt"
"#;

fn with_args(body: &str) -> String {
    format!("{RECORD_ARGS}{body}")
}

#[tokio::test]
async fn members_task_streams_events_to_the_user_log() {
    let fixture = Fixture::new();
    fixture.script(
        "get_members.py",
        &with_args(
            r#"
echo '{"info":{"code":"SCRIPT_STARTED","details":{"script":"get_members.py"}}}'
echo 'Connecting to Telegram...'
echo '{"info":{"code":"MEMBERS_FETCHED","details":{"total":42}}}'
echo '{"warn":{"code":"FLOOD_WAIT","details":{"seconds":3}}}'
echo '{"info":{"code":"ALL_DONE","details":{"output":"/tmp/members.csv"}}}'
"#,
        ),
    );
    let controller = fixture.controller();

    controller
        .get_members(GetMembersRequest {
            chat: " @durov ".to_string(),
            limit: 10,
            ..GetMembersRequest::default()
        })
        .await
        .expect("task succeeds");

    assert_eq!(
        fixture.lines(),
        vec![
            "fetched 42 members",
            "Warning! Flood wait: 3 seconds, program will pause. You can stop it, data has been saved",
            "All done, result in /tmp/members.csv",
        ]
    );
    assert_eq!(
        fixture.recorded("args.txt").expect("args recorded"),
        vec![fixture.session_name(), "@durov".to_string(), "--limit".to_string(), "10".to_string()]
    );
    assert_eq!(
        fixture.recorded("env.txt").expect("env recorded"),
        vec!["12345:0123456789abcdef"]
    );
}

#[tokio::test]
async fn structured_error_reaches_the_user_and_fails_the_task() {
    let fixture = Fixture::new();
    fixture.script(
        "get_members.py",
        r#"
echo '{"info":{"code":"SCRIPT_STARTED","details":null}}'
echo '{"error":{"code":"INVALID_CHAT_NAME","details":{"name":"@ghost_chat"}}}' >&2
exit 1
"#,
    );
    let controller = fixture.controller();

    let err = controller
        .get_members(GetMembersRequest {
            chat: "@ghost_chat".to_string(),
            ..GetMembersRequest::default()
        })
        .await
        .expect_err("task fails");
    assert!(matches!(err, SessionError::Task(TaskError::Exited { .. })), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::Domain);
    assert_eq!(
        fixture.lines(),
        vec!["Error! invalid chat name: @ghost_chat"]
    );
}

#[tokio::test]
async fn silent_crash_is_reported_once_by_the_worker_and_once_by_the_controller() {
    let fixture = Fixture::new();
    fixture.script(
        "get_chat_statistic.py",
        r#"
echo 'Traceback (most recent call last):' >&2
echo 'ModuleNotFoundError: No module named pyrogram' >&2
exit 1
"#,
    );
    let controller = fixture.controller();

    let err = controller
        .get_chat_stats(GetChatStatsRequest {
            chat: "@durov".to_string(),
            ..GetChatStatsRequest::default()
        })
        .await
        .expect_err("task fails");
    assert_eq!(err.kind(), ErrorKind::Domain);
    assert_eq!(
        fixture.lines(),
        vec!["Error! something went wrong", "Error! something went wrong"]
    );
}

#[tokio::test]
async fn invalid_request_never_starts_a_worker() {
    let fixture = Fixture::new();
    fixture.script("get_members.py", &with_args("exit 0\n"));
    let controller = fixture.controller();

    let err = controller
        .get_members(GetMembersRequest {
            chat: "@durov".to_string(),
            limit: 60_000,
            ..GetMembersRequest::default()
        })
        .await
        .expect_err("rejected");
    assert!(matches!(
        err,
        SessionError::Validation(ValidationError::OutOfRange { field: "limit", .. })
    ));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(fixture.recorded("args.txt").is_none());
    assert!(fixture.lines().is_empty());
}

#[tokio::test]
async fn tasks_require_a_user_log_sink() {
    let fixture = Fixture::new();
    fixture.script("print_dialogs.py", &with_args("exit 0\n"));
    let controller = SessionController::new(fixture.config("http://127.0.0.1:9"));

    let err = controller
        .print_dialogs(PrintDialogsRequest::default())
        .await
        .expect_err("no sink");
    assert!(matches!(err, SessionError::NoUserLogSink));
    assert!(fixture.recorded("args.txt").is_none());
}

#[tokio::test]
async fn search_forwards_dates_month_first() {
    let fixture = Fixture::new();
    fixture.script(
        "search_messages.py",
        &with_args(r#"echo '{"info":{"code":"MESSAGES_FETCHED","details":{"total":7}}}'
"#),
    );
    let controller = fixture.controller();

    controller
        .search_messages(SearchMessagesRequest {
            chat: "@somegroup".to_string(),
            username: "@someone".to_string(),
            from_date: chrono::NaiveDate::from_ymd_opt(2024, 3, 9),
            to_date: chrono::NaiveDate::from_ymd_opt(2024, 11, 30),
            output: Some(PathBuf::from("out.csv")),
        })
        .await
        .expect("task succeeds");

    assert_eq!(fixture.lines(), vec!["found 7 messages"]);
    assert_eq!(
        fixture.recorded("args.txt").expect("args recorded"),
        vec![
            fixture.session_name(),
            "@somegroup".to_string(),
            "@someone".to_string(),
            "--output".to_string(),
            "out.csv".to_string(),
            "--from-date".to_string(),
            "03/09/2024".to_string(),
            "--to-date".to_string(),
            "11/30/2024".to_string(),
        ]
    );
}

#[tokio::test]
async fn dialogs_are_rendered_one_per_line() {
    let fixture = Fixture::new();
    fixture.script(
        "print_dialogs.py",
        &with_args(
            r#"
echo '{"info":{"code":"DIALOG","details":{"index":1,"id":-1001,"type":"ChatType.SUPERGROUP","title":"Rustaceans","username":"rust"}}}'
echo '{"info":{"code":"DIALOG","details":{"index":2,"id":777,"type":"ChatType.PRIVATE","title":"Ann","username":null}}}'
"#,
        ),
    );
    let controller = fixture.controller();

    controller
        .print_dialogs(PrintDialogsRequest { limit: 5 })
        .await
        .expect("task succeeds");

    assert_eq!(
        fixture.lines(),
        vec![
            "[1] id=-1001, type=ChatType.SUPERGROUP, title=Rustaceans, username=@rust",
            "[2] id=777, type=ChatType.PRIVATE, title=Ann, username=",
        ]
    );
    assert_eq!(
        fixture.recorded("args.txt").expect("args recorded"),
        vec![fixture.session_name(), "--limit".to_string(), "5".to_string()]
    );
}

#[tokio::test]
async fn unknown_codes_are_only_diagnostics() {
    let fixture = Fixture::new();
    fixture.script(
        "get_chat_statistic.py",
        r#"
echo '{"info":{"code":"SOMETHING_NEW","details":{"x":1}}}'
echo '{"error":{"code":"BRAND_NEW_ERROR"}}' >&2
exit 0
"#,
    );
    let controller = fixture.controller();

    controller
        .get_chat_stats(GetChatStatsRequest {
            chat: "123456".to_string(),
            ..GetChatStatsRequest::default()
        })
        .await
        .expect("task succeeds");
    assert!(fixture.lines().is_empty());
}

#[tokio::test]
async fn spawned_task_reports_through_the_receiver() {
    let fixture = Fixture::new();
    fixture.script(
        "get_chat_statistic.py",
        &with_args(
            r#"sleep 0.1
echo '{"info":{"code":"CHAT_STATS_FETCHED","details":{"total":100}}}'
"#,
        ),
    );
    let controller = fixture.controller();

    let receiver = controller.spawn_task(TaskRequest::ChatStats(GetChatStatsRequest {
        chat: "@durov".to_string(),
        messages_limit: 100,
        output: None,
    }));
    let result = tokio::time::timeout(Duration::from_secs(10), receiver)
        .await
        .expect("task finished in time")
        .expect("result delivered");
    result.expect("task succeeds");

    assert_eq!(fixture.lines(), vec!["read 100 messages of history"]);
    assert_eq!(
        fixture.recorded("args.txt").expect("args recorded"),
        vec![
            fixture.session_name(),
            "@durov".to_string(),
            "--history-limit".to_string(),
            "100".to_string(),
        ]
    );
}

#[tokio::test]
async fn auth_state_follows_the_session_file() {
    let fixture = Fixture::new();
    let controller = fixture.controller();
    let session_file = fixture.config("http://127.0.0.1:9").session_file();

    assert!(controller.needs_auth());
    fs::write(&session_file, b"sqlite").expect("session file");
    assert!(!controller.needs_auth());

    controller.delete_session().expect("delete");
    assert!(!session_file.exists());
    assert!(controller.needs_auth());
    assert!(!controller.credentials().is_complete());

    controller.delete_session().expect("deleting twice is fine");
}
