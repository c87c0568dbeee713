//! Continuity coordinator: resume decisions, record updates, and failure
//! handling.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use feature_relay::assistant::AssistantRunner;
use feature_relay::config::GlobalConfig;
use feature_relay::errors::InvocationPhase;
use feature_relay::models::session::{SessionRecord, SessionStatus};
use feature_relay::orchestrator::{ContinuityCoordinator, ResumePolicy, SessionRequest};
use feature_relay::persistence::SessionStore;
use feature_relay::project::{FeatureName, ProjectLayout};
use feature_relay::AppError;

use super::test_helpers::ScriptedInvoker;

struct Fixture {
    _dir: tempfile::TempDir,
    layout: ProjectLayout,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = ProjectLayout::new(dir.path());
        Self { _dir: dir, layout }
    }

    fn store(&self) -> SessionStore {
        SessionStore::new(self.layout.sessions_path())
    }

    fn coordinator(&self, invoker: ScriptedInvoker) -> ContinuityCoordinator<ScriptedInvoker> {
        self.coordinator_with(GlobalConfig::default(), invoker)
    }

    fn coordinator_with(
        &self,
        config: GlobalConfig,
        invoker: ScriptedInvoker,
    ) -> ContinuityCoordinator<ScriptedInvoker> {
        ContinuityCoordinator::new(self.layout.clone(), config, invoker)
    }

    /// Seed a current record for `feature`, started an hour ago.
    fn seed(&self, feature: &str, external: Option<&str>) -> SessionRecord {
        let started = Utc::now() - ChronoDuration::hours(1);
        let record = SessionRecord::new(
            feature,
            external.map(str::to_owned),
            SessionStatus::Active,
            started,
            started,
        );
        self.store()
            .save(&FeatureName::parse(feature).unwrap(), &record)
            .expect("seed");
        record
    }
}

fn name(feature: &str) -> FeatureName {
    FeatureName::parse(feature).unwrap()
}

#[tokio::test]
async fn resumable_session_is_resumed() {
    let fx = Fixture::new();
    let seeded = fx.seed("auth", Some("abc-123"));
    let invoker = ScriptedInvoker::new();
    invoker.push_ok("done\nSession ID: abc-123\n", Some("abc-123"), 0);

    let record = fx
        .coordinator(invoker.clone())
        .run(SessionRequest::new("auth", "continue the login form"))
        .await
        .expect("run");

    let calls = invoker.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].resume.as_deref(), Some("abc-123"));
    assert_eq!(calls[0].prompt, "continue the login form");
    assert!(calls[0].print_session_id);

    assert_eq!(record.status, SessionStatus::Active);
    assert!(record.resumable);
    assert_eq!(record.external_session_id.as_deref(), Some("abc-123"));
    assert_eq!(record.started_at, seeded.started_at);
    assert!(record.last_activity > seeded.last_activity);

    let store = fx.store();
    assert_eq!(store.get(&name("auth")).unwrap(), Some(record));
    assert_eq!(store.list(&name("auth")).unwrap(), vec![seeded]);
}

#[tokio::test]
async fn new_feature_starts_without_resume() {
    let fx = Fixture::new();
    let invoker = ScriptedInvoker::new();
    invoker.push_ok("Session ID: xyz-999\n", Some("xyz-999"), 0);

    let before = Utc::now();
    let record = fx
        .coordinator(invoker.clone())
        .run(SessionRequest::new("new-feat", "start"))
        .await
        .expect("run");

    assert_eq!(invoker.calls()[0].resume, None);
    assert!(record.resumable);
    assert_eq!(record.external_session_id.as_deref(), Some("xyz-999"));
    assert_eq!(record.status, SessionStatus::Active);
    assert!(record.started_at >= before);
    assert!(fx.store().is_resumable(&name("new-feat")).unwrap());
    assert!(fx.store().list(&name("new-feat")).unwrap().is_empty());
}

#[tokio::test]
async fn non_zero_exit_marks_interrupted() {
    let fx = Fixture::new();
    let invoker = ScriptedInvoker::new();
    invoker.push_ok("crashed halfway\n", None, 1);

    let record = fx
        .coordinator(invoker)
        .run(SessionRequest::new("auth", "go"))
        .await
        .expect("non-zero exit is not an error");

    assert_eq!(record.status, SessionStatus::Interrupted);
    assert!(!record.resumable);
    assert_eq!(record.external_session_id, None);
    let metadata = record.metadata.as_ref().expect("metadata");
    assert_eq!(metadata.exit_code, Some(1));
    assert_eq!(metadata.duration, Some(25));
}

#[tokio::test]
async fn missing_id_makes_record_unresumable() {
    let fx = Fixture::new();
    fx.seed("auth", Some("abc-123"));
    let invoker = ScriptedInvoker::new();
    invoker.push_ok("no id printed\n", None, 0);

    let record = fx
        .coordinator(invoker)
        .run(SessionRequest::new("auth", "go"))
        .await
        .expect("run");

    assert!(!record.resumable);
    assert_eq!(record.external_session_id, None);
    assert!(!fx.store().is_resumable(&name("auth")).unwrap());
}

#[tokio::test]
async fn malformed_feature_is_rejected_before_any_io() {
    let fx = Fixture::new();
    let invoker = ScriptedInvoker::new();

    let err = fx
        .coordinator(invoker.clone())
        .run(SessionRequest::new("../x", "go"))
        .await
        .expect_err("invalid name");

    assert!(matches!(err, AppError::Validation(_)), "got {err:?}");
    assert!(invoker.calls().is_empty());
    assert!(!fx.layout.tooling_dir().exists());
}

#[tokio::test]
async fn zero_timeout_is_rejected_before_any_io() {
    let fx = Fixture::new();
    let invoker = ScriptedInvoker::new();

    let err = fx
        .coordinator(invoker.clone())
        .run(SessionRequest::new("auth", "go").timeout(Duration::ZERO))
        .await
        .expect_err("zero timeout");

    assert!(matches!(err, AppError::Validation(_)), "got {err:?}");
    assert!(invoker.calls().is_empty());
    assert!(!fx.layout.tooling_dir().exists());
}

#[tokio::test]
async fn fresh_policy_skips_resume() {
    let fx = Fixture::new();
    let seeded = fx.seed("auth", Some("abc-123"));
    let invoker = ScriptedInvoker::new();
    invoker.push_ok("", Some("fed-001"), 0);

    let record = fx
        .coordinator(invoker.clone())
        .run(SessionRequest::new("auth", "start over").resume(ResumePolicy::Fresh))
        .await
        .expect("run");

    assert_eq!(invoker.calls()[0].resume, None);
    assert_eq!(record.external_session_id.as_deref(), Some("fed-001"));
    assert!(record.started_at > seeded.started_at);
}

#[tokio::test]
async fn explicit_resume_overrides_stored_session() {
    let fx = Fixture::new();
    fx.seed("auth", Some("abc-123"));
    let invoker = ScriptedInvoker::new();
    invoker.push_ok("", Some("def-000"), 0);

    fx.coordinator(invoker.clone())
        .run(SessionRequest::new("auth", "go").resume(ResumePolicy::Explicit("def-000".into())))
        .await
        .expect("run");

    assert_eq!(invoker.calls()[0].resume.as_deref(), Some("def-000"));
}

#[tokio::test]
async fn invocation_failure_writes_nothing() {
    let fx = Fixture::new();
    let seeded = fx.seed("auth", Some("abc-123"));
    let before = std::fs::read_to_string(fx.layout.sessions_path()).unwrap();
    let invoker = ScriptedInvoker::new();
    invoker.push_err(AppError::Timeout(Duration::from_millis(50)));

    let err = fx
        .coordinator(invoker)
        .run(SessionRequest::new("auth", "go"))
        .await
        .expect_err("timeout propagates");

    match &err {
        AppError::Invocation { feature, phase, .. } => {
            assert_eq!(feature, "auth");
            assert_eq!(*phase, InvocationPhase::Invoke);
        }
        other => panic!("expected invocation context, got {other:?}"),
    }
    assert!(matches!(err.root(), AppError::Timeout(_)));
    assert_eq!(
        std::fs::read_to_string(fx.layout.sessions_path()).unwrap(),
        before
    );
    assert_eq!(fx.store().get(&name("auth")).unwrap(), Some(seeded));
}

#[tokio::test]
async fn launch_failure_writes_nothing() {
    let fx = Fixture::new();
    let invoker = ScriptedInvoker::new();
    invoker.push_err(AppError::Launch("no such file".into()));

    let err = fx
        .coordinator(invoker)
        .run(SessionRequest::new("auth", "go"))
        .await
        .expect_err("launch failure propagates");

    assert!(matches!(err.root(), AppError::Launch(_)));
    assert!(!fx.layout.sessions_path().exists());
}

#[tokio::test]
async fn corrupt_store_fails_in_load_phase() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.layout.tooling_dir()).unwrap();
    std::fs::write(fx.layout.sessions_path(), "not json").unwrap();
    let invoker = ScriptedInvoker::new();

    let err = fx
        .coordinator(invoker.clone())
        .run(SessionRequest::new("auth", "go"))
        .await
        .expect_err("corrupt store");

    assert!(matches!(
        err,
        AppError::Invocation {
            phase: InvocationPhase::LoadSession,
            ..
        }
    ));
    assert!(matches!(err.root(), AppError::Persistence(_)));
    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn required_feature_dir_must_exist() {
    let fx = Fixture::new();
    let config = GlobalConfig {
        require_feature_dir: true,
        ..GlobalConfig::default()
    };
    let invoker = ScriptedInvoker::new();
    invoker.push_ok("", Some("abc-123"), 0);
    let coordinator = fx.coordinator_with(config, invoker.clone());

    let err = coordinator
        .run(SessionRequest::new("auth", "go"))
        .await
        .expect_err("no feature dir");
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(invoker.calls().is_empty());

    std::fs::create_dir_all(fx.layout.feature_dir(&name("auth"))).unwrap();
    coordinator
        .run(SessionRequest::new("auth", "go"))
        .await
        .expect("feature dir present");
    assert_eq!(invoker.calls().len(), 1);
}

#[tokio::test]
async fn configured_defaults_fill_model_and_timeout() {
    let fx = Fixture::new();
    let mut config = GlobalConfig::default();
    config.assistant.model = Some("sonnet".into());
    config.assistant.timeout_seconds = 90;
    let invoker = ScriptedInvoker::new();
    invoker.push_ok("", None, 0);
    invoker.push_ok("", None, 0);
    let coordinator = fx.coordinator_with(config, invoker.clone());

    let record = coordinator
        .run(SessionRequest::new("auth", "go"))
        .await
        .expect("run");
    coordinator
        .run(
            SessionRequest::new("auth", "go")
                .model("opus")
                .timeout(Duration::from_secs(5)),
        )
        .await
        .expect("run");

    let calls = invoker.calls();
    assert_eq!(calls[0].model.as_deref(), Some("sonnet"));
    assert_eq!(calls[0].timeout, Duration::from_secs(90));
    assert_eq!(record.model(), Some("sonnet"));
    assert_eq!(calls[1].model.as_deref(), Some("opus"));
    assert_eq!(calls[1].timeout, Duration::from_secs(5));
}

#[tokio::test]
async fn output_sink_is_forwarded() {
    let fx = Fixture::new();
    let invoker = ScriptedInvoker::new();
    invoker.push_ok("streamed text", None, 0);
    let seen = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&seen);

    fx.coordinator(invoker)
        .run(
            SessionRequest::new("auth", "go")
                .on_output(move |chunk| sink.lock().unwrap().push_str(chunk)),
        )
        .await
        .expect("run");

    assert_eq!(*seen.lock().unwrap(), "streamed text");
}

#[tokio::test]
async fn same_feature_runs_are_serialised() {
    let fx = Fixture::new();
    let invoker = ScriptedInvoker::with_delay(Duration::from_millis(50));
    invoker.push_ok("", Some("aaa-1"), 0);
    invoker.push_ok("", Some("bbb-2"), 0);
    let coordinator = fx.coordinator(invoker.clone());

    let (first, second) = tokio::join!(
        coordinator.run(SessionRequest::new("auth", "one")),
        coordinator.run(SessionRequest::new("auth", "two")),
    );
    first.expect("first run");
    second.expect("second run");

    let calls = invoker.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].resume, None);
    assert_eq!(calls[1].resume.as_deref(), Some("aaa-1"));
    assert_eq!(fx.store().list(&name("auth")).unwrap().len(), 1);
}

#[tokio::test]
async fn feature_locks_are_released_after_runs() {
    let fx = Fixture::new();
    let invoker = ScriptedInvoker::with_delay(Duration::from_millis(20));
    invoker.push_ok("", Some("aaa-1"), 0);
    invoker.push_ok("", Some("bbb-2"), 0);
    invoker.push_ok("", Some("ccc-3"), 0);
    invoker.push_err(AppError::Timeout(Duration::from_secs(1)));
    let coordinator = fx.coordinator(invoker.clone());

    let (first, second, third) = tokio::join!(
        coordinator.run(SessionRequest::new("auth", "one")),
        coordinator.run(SessionRequest::new("auth", "two")),
        coordinator.run(SessionRequest::new("billing", "three")),
    );
    first.expect("first run");
    second.expect("second run");
    third.expect("third run");
    assert_eq!(coordinator.active_features(), 0);

    coordinator
        .run(SessionRequest::new("search", "four"))
        .await
        .expect_err("scripted failure");
    assert_eq!(coordinator.active_features(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn end_to_end_with_real_process_resumes_on_second_run() {
    let fx = Fixture::new();
    let staging = tempfile::tempdir().expect("tempdir");
    let mut config = GlobalConfig::default();
    config.assistant = super::test_helpers::script_config(
        r#"cat >/dev/null; printf 'args:%s\n' "$*"; echo "Session ID: abc-123""#,
        staging.path(),
    );
    let runner = AssistantRunner::new(config.assistant.clone());
    let coordinator = ContinuityCoordinator::new(fx.layout.clone(), config, runner);

    let first = coordinator
        .run(SessionRequest::new("auth", "first"))
        .await
        .expect("first run");
    assert_eq!(first.external_session_id.as_deref(), Some("abc-123"));
    assert_eq!(first.status, SessionStatus::Active);

    let seen = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&seen);
    let second = coordinator
        .run(
            SessionRequest::new("auth", "second")
                .on_output(move |chunk| sink.lock().unwrap().push_str(chunk)),
        )
        .await
        .expect("second run");

    assert!(seen.lock().unwrap().contains("--resume abc-123"));
    assert_eq!(second.started_at, first.started_at);
    assert_eq!(fx.store().list(&name("auth")).unwrap(), vec![first]);
}
