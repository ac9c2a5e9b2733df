// ABOUTME: Integration tests for scripthost-telegram.
// ABOUTME: Tests config loading, command parsing, and command execution against a real core.

use async_trait::async_trait;
use chrono::Duration;
use scripthost_core::{
    AdmissionControl, ApprovalStore, HostConfig, NameResolver, Registry, SilentNotifier,
    Supervisor, SupervisorSettings, Uid, UserId,
};
use scripthost_telegram::bridge::HostState;
use scripthost_telegram::commands::{execute_command, Command, CommandContext, DurationArg};
use scripthost_telegram::config::Config;
use std::io::Write;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};

const OWNER: UserId = 1;
const ALICE: UserId = 100;

// ============================================================================
// Command Parsing Tests
// ============================================================================

#[test]
fn test_command_parsing_help_aliases() {
    assert_eq!(Command::from_message("/help"), Some(Command::Help));
    assert_eq!(Command::from_message("/start"), Some(Command::Help));
    assert_eq!(Command::from_message("/menu"), Some(Command::Help));
    assert_eq!(Command::from_message("hello"), None);
}

#[test]
fn test_command_parsing_host() {
    assert_eq!(
        Command::from_message("/host  weather bot "),
        Some(Command::Host("weather bot".to_string()))
    );
    assert!(matches!(
        Command::from_message("/host"),
        Some(Command::Invalid(msg)) if msg.contains("requires a name")
    ));
}

#[test]
fn test_command_parsing_rename() {
    let uid = Uid::parse("R123JABC").unwrap();
    assert_eq!(
        Command::parse("rename r123jabc My New Name"),
        Command::Rename(uid, "My New Name".to_string())
    );
    assert!(matches!(Command::parse("rename R123JABC"), Command::Invalid(_)));
}

#[test]
fn test_command_parsing_approve() {
    assert_eq!(
        Command::parse("approve 123456789 7d 2"),
        Command::Approve {
            user_id: 123456789,
            duration: DurationArg {
                raw: "7d".to_string(),
                value: Duration::days(7),
            },
            max_scripts: 2,
        }
    );
}

#[test]
fn test_command_parsing_approve_errors() {
    match Command::parse("approve 123 7x 2") {
        Command::Invalid(msg) => assert!(msg.contains("Invalid duration")),
        other => panic!("Expected Invalid, got {other:?}"),
    }
    match Command::parse("approve 123 7d 0") {
        Command::Invalid(msg) => assert!(msg.contains("positive number")),
        other => panic!("Expected Invalid, got {other:?}"),
    }
    match Command::parse("approve abc 7d 1") {
        Command::Invalid(msg) => assert!(msg.contains("Invalid user id")),
        other => panic!("Expected Invalid, got {other:?}"),
    }
    assert!(matches!(Command::parse("approve 123"), Command::Invalid(_)));
}

#[test]
fn test_command_parsing_renewals() {
    assert!(matches!(
        Command::parse("renew_time 55 2w"),
        Command::RenewTime { user_id: 55, .. }
    ));
    assert_eq!(
        Command::parse("renew_quota 55 4"),
        Command::RenewQuota {
            user_id: 55,
            max_scripts: 4
        }
    );
}

#[test]
fn test_command_parsing_unknown() {
    assert_eq!(
        Command::parse("frobnicate"),
        Command::Unknown("frobnicate".to_string())
    );
}

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
fn test_config_load_full() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[telegram]
bot_token = "123456:ABC-DEF"

[host]
owner_id = 42
hosting_dir = "/srv/scripthost/files"
interpreter = "python3.12"

[supervisor]
capture_window_ms = 1500
grace_period_secs = 10
"#
    )
    .unwrap();

    let config = Config::load(Some(file.path().to_path_buf())).unwrap();
    assert_eq!(config.host.owner_id, 42);
    assert_eq!(config.host.interpreter, "python3.12");
    assert_eq!(config.host.extension(), "py");
    assert_eq!(config.supervisor.capture_window_ms, 1500);
    assert_eq!(config.supervisor.grace_period_secs, 10);
    assert_eq!(config.supervisor.settle_delay_secs, 5);
}

#[test]
fn test_config_defaults_supervisor_section() {
    let config = Config::parse(
        r#"
[telegram]
bot_token = "1:x"

[host]
owner_id = 7
"#,
    )
    .unwrap();
    assert_eq!(config.supervisor, SupervisorSettings::default());
}

#[test]
fn test_config_env_expansion() {
    std::env::set_var("SCRIPTHOST_TEST_TOKEN", "999:from-env");
    let config = Config::parse(
        r#"
[telegram]
bot_token = "${SCRIPTHOST_TEST_TOKEN}"

[host]
owner_id = 7
"#,
    )
    .unwrap();
    assert_eq!(config.telegram.bot_token, "999:from-env");
}

#[test]
fn test_config_undefined_env_fails_validation() {
    let result = Config::parse(
        r#"
[telegram]
bot_token = "${SCRIPTHOST_TEST_SURELY_UNDEFINED}"

[host]
owner_id = 7
"#,
    );
    assert!(result.unwrap_err().to_string().contains("bot_token"));
}

#[test]
fn test_config_missing_file() {
    let result = Config::load(Some("/nonexistent/scripthost/bot.toml".into()));
    assert!(result.unwrap_err().to_string().contains("Failed to read config"));
}

// ============================================================================
// Command Execution Tests
// ============================================================================

struct FixedName;

#[async_trait]
impl NameResolver for FixedName {
    async fn display_name(&self, _user_id: UserId) -> Option<String> {
        Some("Ada".to_string())
    }
}

fn host_state() -> (HostState, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = HostConfig::new(OWNER);
    config.hosting_dir = dir.path().join("files").display().to_string();
    config.registry_file = dir.path().join("db.json").display().to_string();
    config.approvals_file = dir.path().join("approved.json").display().to_string();
    config.interpreter = "sh".to_string();
    config.script_extension = "sh".to_string();

    let registry = Registry::open(config.registry_path(), config.hosting_dir_expanded()).unwrap();
    let settings = SupervisorSettings {
        capture_window_ms: 300,
        poll_interval_ms: 20,
        grace_period_secs: 2,
        ..Default::default()
    };
    let supervisor = Supervisor::new(registry, &config, settings, Arc::new(SilentNotifier));
    let admission = AdmissionControl::new(ApprovalStore::load(config.approvals_path(), OWNER));
    (
        HostState {
            supervisor,
            admission,
        },
        dir,
    )
}

async fn run(state: &mut HostState, user_id: UserId, text: &str) -> Option<String> {
    run_with_upload(state, user_id, text, None).await
}

async fn run_with_upload(
    state: &mut HostState,
    user_id: UserId,
    text: &str,
    upload: Option<Vec<u8>>,
) -> Option<String> {
    let command = Command::from_message(text).unwrap();
    let ctx = CommandContext {
        state,
        user_id,
        resolver: &FixedName,
        upload,
    };
    execute_command(command, ctx).await.unwrap()
}

#[tokio::test]
async fn test_owner_commands_ignored_for_users() {
    let (mut state, _dir) = host_state();
    assert_eq!(run(&mut state, ALICE, "/approved").await, None);
    assert_eq!(run(&mut state, ALICE, "/approve 5 1d 1").await, None);
}

#[tokio::test]
async fn test_approve_and_list() {
    let (mut state, _dir) = host_state();
    let reply = run(&mut state, OWNER, "/approve 100 3d 2").await.unwrap();
    assert!(reply.contains("Ada (100) approved successfully!"));
    assert!(reply.contains("Max Scripts: 2"));

    let reply = run(&mut state, OWNER, "/approved").await.unwrap();
    assert!(reply.contains("1. Ada (100)"));
    assert!(reply.contains("Scripts Limit: 2"));

    let reply = run(&mut state, OWNER, "/approve 1 3d 2").await.unwrap();
    assert!(reply.contains("No need to approve the owner"));
}

#[tokio::test]
async fn test_host_and_manage_script() {
    let (mut state, _dir) = host_state();
    run(&mut state, OWNER, "/approve 100 1d 1").await;

    let reply =
        run_with_upload(&mut state, ALICE, "/host runner", Some(b"sleep 30\n".to_vec())).await;
    assert_eq!(reply, None);

    let listing = run(&mut state, ALICE, "/scripts").await.unwrap();
    assert!(listing.contains("runner"));
    assert!(listing.contains("🟢"));

    // Quota of one is now used up
    let reply =
        run_with_upload(&mut state, ALICE, "/host second", Some(b"exit 0\n".to_vec())).await;
    assert!(reply.unwrap().contains("Hosting Limit Reached!"));

    let uid = state
        .supervisor
        .registry()
        .user(ALICE)
        .unwrap()
        .hosted_scripts
        .keys()
        .next()
        .cloned()
        .unwrap();

    let reply = run(&mut state, ALICE, &format!("/pause {uid}")).await.unwrap();
    assert!(reply.contains("Successfully Paused!"));
    let reply = run(&mut state, ALICE, &format!("/pause {uid}")).await.unwrap();
    assert!(reply.contains("already Paused"));

    let reply = run(&mut state, ALICE, &format!("/rename {uid} better name"))
        .await
        .unwrap();
    assert!(reply.contains("'better name'"));

    let reply = run(&mut state, ALICE, &format!("/terminate {uid}")).await.unwrap();
    assert!(reply.contains("Successfully Terminated!"));
    assert_eq!(state.supervisor.registry().hosted_count(ALICE), 0);
}

#[tokio::test]
async fn test_host_without_document() {
    let (mut state, _dir) = host_state();
    let reply = run(&mut state, OWNER, "/host lonely").await.unwrap();
    assert!(reply.contains("as a document"));
}

#[tokio::test]
async fn test_unknown_uid_reply() {
    let (mut state, _dir) = host_state();
    let reply = run(&mut state, OWNER, "/restart R000J000").await.unwrap();
    assert!(reply.contains("was not found"));
}

#[tokio::test]
async fn test_revoke_reports_count() {
    let (mut state, _dir) = host_state();
    run(&mut state, OWNER, "/approve 100 1d 3").await;
    for name in ["a", "b"] {
        run_with_upload(
            &mut state,
            ALICE,
            &format!("/host {name}"),
            Some(b"sleep 30\n".to_vec()),
        )
        .await;
    }

    let reply = run(&mut state, OWNER, "/revoke 100").await.unwrap();
    assert!(reply.contains("access revoked"));
    assert!(reply.contains("2 script(s)"));
    assert_eq!(state.supervisor.tracked_count(), 0);

    let reply = run(&mut state, OWNER, "/revoke 100").await.unwrap();
    assert!(reply.contains("was not approved"));
}

#[tokio::test]
async fn test_renew_quota_below_hosted() {
    let (mut state, _dir) = host_state();
    run(&mut state, OWNER, "/approve 100 1d 3").await;
    for name in ["a", "b"] {
        run_with_upload(
            &mut state,
            ALICE,
            &format!("/host {name}"),
            Some(b"exit 0\n".to_vec()),
        )
        .await;
    }

    let reply = run(&mut state, OWNER, "/renew_quota 100 1").await.unwrap();
    assert!(reply.contains("Limit must be 2 or more"));
    let reply = run(&mut state, OWNER, "/renew_quota 100 2").await.unwrap();
    assert!(reply.contains("updated to 2"));

    let reply = run(&mut state, OWNER, "/renew_time 100 2w").await.unwrap();
    assert!(reply.contains("extended by 2w"));
}
