//! Integration tests for distsession-core infrastructure

use distsession_core::{
    backend_error, config_error, illegal_state_error, init_logging, performance, DistSessionError,
    LogFormat, LoggingConfig, SessionAttributeMarshaller, SessionPersistenceGranularity,
    SessionStoreConfig,
};
use std::io::Write;

#[tokio::test]
async fn test_error_macros_carry_context() {
    let error = backend_error!("Cache write rejected", "local_backend");

    match &error {
        DistSessionError::Backend {
            message, context, ..
        } => {
            assert_eq!(message, "Cache write rejected");
            assert_eq!(context.component, "local_backend");
            assert!(!context.error_id.is_empty());
        }
        _ => panic!("Expected Backend error"),
    }
    assert!(error.is_recoverable());
    error.log();

    let config_err = config_error!("Unknown marshaller", "config");
    assert!(!config_err.is_recoverable());
    assert!(config_err
        .context()
        .is_some_and(|c| !c.recovery_suggestions.is_empty()));

    let state_err = illegal_state_error!("Store is closing", "lifecycle");
    assert!(state_err.to_string().contains("Store is closing"));
}

#[tokio::test]
async fn test_logging_initialization() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoggingConfig {
        level: "debug".to_string(),
        format: LogFormat::Json,
        include_location: false,
        include_thread: false,
        log_file_path: Some(dir.path().join("store.log").display().to_string()),
        enable_performance_monitoring: true,
        filter_directives: vec!["distsession_core=debug".to_string()],
    };

    // A subscriber may already be installed by another test in this binary
    let _ = init_logging(&config);

    let value = performance::measure_async("noop", async { 42 }).await;
    assert_eq!(value, 42);
    assert_eq!(performance::measure_sync("noop_sync", || "done"), "done");
}

#[tokio::test]
async fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let config = SessionStoreConfig {
        deployment_name: "orders".to_string(),
        granularity: SessionPersistenceGranularity::Session,
        marshaller: SessionAttributeMarshaller::Json,
        max_active_sessions: Some(500),
        idle_timeout_ms: Some(120_000),
        ..Default::default()
    };
    config.save_to_file(&path).unwrap();

    let loaded = SessionStoreConfig::from_file(&path).unwrap();
    assert_eq!(loaded, config);
    assert!(loaded.validate().is_ok());
}

#[tokio::test]
async fn test_config_file_uses_framework_keys() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "deploymentName = \"catalog\"\ngranularity = \"SESSION\"\nsessionIdentifierLength = 33"
    )
    .unwrap();

    let config = SessionStoreConfig::from_file(file.path()).unwrap();
    assert_eq!(config.deployment_name, "catalog");
    assert_eq!(config.session_id_length, 33);
    assert!(config.validate().is_ok());
}

#[tokio::test]
async fn test_config_errors() {
    let result = SessionStoreConfig::from_file("/nonexistent/distsession.toml");
    match result {
        Err(DistSessionError::Config { context, .. }) => {
            assert_eq!(context.operation.as_deref(), Some("read_file"));
        }
        _ => panic!("Expected Config error"),
    }

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "granularity = [").unwrap();
    assert!(matches!(
        SessionStoreConfig::from_file(file.path()),
        Err(DistSessionError::Config { .. })
    ));

    let config = SessionStoreConfig {
        session_id_length: 32,
        ..Default::default()
    };
    match config.validate() {
        Err(DistSessionError::Config { message, .. }) => assert!(message.contains("32")),
        _ => panic!("Expected Config error"),
    }
}

#[test]
fn test_blocking_helpers_outside_async_test() {
    let value = tokio_test::block_on(distsession_core::run_blocking("double", || Ok(21 * 2)));
    assert_eq!(tokio_test::assert_ok!(value), 42);

    let timed_out = tokio_test::block_on(distsession_core::with_timeout(
        tokio::time::sleep(std::time::Duration::from_millis(200)),
        5,
        "sleep",
    ));
    tokio_test::assert_err!(timed_out);
}
