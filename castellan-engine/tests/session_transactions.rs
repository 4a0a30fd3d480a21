//! Transactional behavior of the session state machine against the
//! in-memory admin endpoint: operation ordering, lock contention, and the
//! rollback guarantee on activation failure.

mod common;

use std::sync::Arc;

use castellan_core::SessionPhase;
use castellan_engine::session::{SessionError, SessionStateMachine};
use common::{admin_credentials, base_config, target, write_template, InMemoryAdmin};
use serde_json::json;

fn admin() -> Arc<InMemoryAdmin> {
    Arc::new(InMemoryAdmin::new(admin_credentials(), base_config()))
}

fn machine(admin: &Arc<InMemoryAdmin>, domains_root: &std::path::Path) -> SessionStateMachine<InMemoryAdmin> {
    SessionStateMachine::new(admin.clone(), target(7001, domains_root))
}

// ============================================================================
// Operation Ordering
// ============================================================================

#[tokio::test]
async fn mutations_while_closed_are_rejected_and_leave_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let admin = admin();
    let mut session = machine(&admin, dir.path());

    let err = session.set("/Servers/AdminServer", "ListenPort", json!(9999)).await;
    assert!(matches!(err, Err(SessionError::InvalidTransition(_))));

    let err = session.navigate("/Servers");
    assert!(matches!(err, Err(SessionError::InvalidTransition(_))));

    // A subsequent online session observes pristine configuration.
    session.begin_online(&admin_credentials()).await.unwrap();
    assert_eq!(admin.config(), base_config());
    session.abandon().await;
}

#[tokio::test]
async fn begin_online_twice_on_one_machine_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let admin = admin();
    let mut session = machine(&admin, dir.path());

    session.begin_online(&admin_credentials()).await.unwrap();
    let err = session.begin_online(&admin_credentials()).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidTransition(_)));

    session.abandon().await;
}

#[tokio::test]
async fn commit_on_closed_session_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let admin = admin();
    let session = machine(&admin, dir.path());

    let err = session.commit().await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidTransition(_)));
}

// ============================================================================
// Lock Contention
// ============================================================================

#[tokio::test]
async fn second_edit_session_fails_lock_held_and_first_is_unaffected() {
    let dir = tempfile::tempdir().unwrap();
    let admin = admin();

    let mut first = machine(&admin, dir.path());
    first.begin_online(&admin_credentials()).await.unwrap();

    let mut second = machine(&admin, dir.path());
    let err = second.begin_online(&admin_credentials()).await.unwrap_err();
    assert!(matches!(err, SessionError::LockHeld { .. }));
    assert_eq!(second.state().phase(), SessionPhase::Closed);

    // The first session keeps working and commits normally.
    assert!(first.state().is_open());
    first
        .set("/Servers/AdminServer", "ListenPort", json!(8001))
        .await
        .unwrap();
    let receipt = first.commit().await.unwrap();
    assert_eq!(receipt.changes_applied, 1);
    assert!(!receipt.requires_restart);
    assert_eq!(admin.config()["Servers"]["AdminServer"]["ListenPort"], json!(8001));
    assert!(!admin.lock_held());
}

#[tokio::test]
async fn lock_is_free_again_after_abandon() {
    let dir = tempfile::tempdir().unwrap();
    let admin = admin();

    let mut first = machine(&admin, dir.path());
    first.begin_online(&admin_credentials()).await.unwrap();
    first.abandon().await;
    assert!(!admin.lock_held());

    let mut second = machine(&admin, dir.path());
    second.begin_online(&admin_credentials()).await.unwrap();
    second.abandon().await;
}

// ============================================================================
// Rollback on Activation Failure
// ============================================================================

#[tokio::test]
async fn failed_activation_rolls_back_to_pre_edit_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let admin = admin();
    let before = admin.config();

    let mut session = machine(&admin, dir.path());
    session.begin_online(&admin_credentials()).await.unwrap();
    session.set("/", "AdministrationPortEnabled", json!(true)).await.unwrap();
    session.set("/", "AdministrationPort", json!(9002)).await.unwrap();

    admin.fail_activation();
    let err = session.commit().await.unwrap_err();
    assert!(matches!(err, SessionError::ActivationFailed { .. }));

    // Observable configuration is identical to its pre-edit value and the
    // lock is released, never left dangling.
    assert_eq!(admin.config(), before);
    assert!(!admin.lock_held());
}

// ============================================================================
// Online Commit
// ============================================================================

#[tokio::test]
async fn online_commit_applies_changes_and_flags_restart() {
    let dir = tempfile::tempdir().unwrap();
    let admin = admin();

    let mut session = machine(&admin, dir.path());
    session.begin_online(&admin_credentials()).await.unwrap();
    session.navigate("/Servers/AdminServer").unwrap();
    session.set("SSL/AdminServer", "Enabled", json!(true)).await.unwrap();
    let receipt = session.commit().await.unwrap();

    assert!(receipt.requires_restart);
    assert_eq!(
        admin.config()["Servers"]["AdminServer"]["SSL"]["AdminServer"]["Enabled"],
        json!(true)
    );
}

#[tokio::test]
async fn set_on_unknown_online_path_is_a_remote_failure() {
    let dir = tempfile::tempdir().unwrap();
    let admin = admin();

    let mut session = machine(&admin, dir.path());
    session.begin_online(&admin_credentials()).await.unwrap();
    let err = session
        .set("/Servers/NoSuchServer", "ListenPort", json!(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Admin(_)));

    session.abandon().await;
    assert!(!admin.lock_held());
}

// ============================================================================
// Offline Template Editing
// ============================================================================

#[tokio::test]
async fn offline_commit_writes_domain_directory() {
    let dir = tempfile::tempdir().unwrap();
    let admin = admin();
    let template = write_template(dir.path());

    let mut session = machine(&admin, dir.path());
    session.begin_offline(&template).unwrap();
    session.navigate("/Servers/AdminServer").unwrap();
    session.set(".", "ListenPort", json!(7101)).await.unwrap();
    let receipt = session.commit().await.unwrap();
    assert_eq!(receipt.changes_applied, 1);

    let config_path = dir.path().join("base_domain/config/config.json");
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(config_path).unwrap()).unwrap();
    assert_eq!(written["Servers"]["AdminServer"]["ListenPort"], json!(7101));
}

#[tokio::test]
async fn offline_commit_replaces_existing_domain() {
    let dir = tempfile::tempdir().unwrap();
    let admin = admin();
    let template = write_template(dir.path());

    let stale = dir.path().join("base_domain/stale-artifact");
    std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
    std::fs::write(&stale, "stale").unwrap();

    let mut session = machine(&admin, dir.path());
    session.begin_offline(&template).unwrap();
    session.commit().await.unwrap();

    assert!(!stale.exists());
    assert!(dir.path().join("base_domain/config/config.json").exists());
}

#[tokio::test]
async fn offline_set_on_missing_path_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let admin = admin();
    let template = write_template(dir.path());

    let mut session = machine(&admin, dir.path());
    session.begin_offline(&template).unwrap();
    let err = session
        .set("/Servers/NoSuchServer", "ListenPort", json!(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::PathNotFound { .. }));
    session.abandon().await;
}

#[tokio::test]
async fn unreadable_template_fails_open_and_session_stays_usable() {
    let dir = tempfile::tempdir().unwrap();
    let admin = admin();

    let mut session = machine(&admin, dir.path());
    let err = session.begin_offline(&dir.path().join("missing.json")).unwrap_err();
    assert!(matches!(err, SessionError::TemplateIo { .. }));
    assert_eq!(session.state().phase(), SessionPhase::Closed);

    // A failed open leaves the machine reusable.
    let template = write_template(dir.path());
    session.begin_offline(&template).unwrap();
    session.commit().await.unwrap();
}
