use fleet_telemetry::logging;

#[test]
fn test_init_logging_human() {
    // Should not panic; second call is a safe no-op.
    logging::init_logging("test-service", "debug");
    logging::init_logging("test-service", "info");

    tracing::info!(key = "value", "human-readable log line");
}

#[test]
fn test_init_logging_json() {
    // The global subscriber may already be set by another test; that is fine.
    logging::init_logging_json("test-service-json", "info");

    tracing::info!(key = "value", "json log line");
}

#[test]
fn test_sink_file_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let sink = dir.path().join("logs").join("fleetd.log");

    logging::init_logging_with_sink("test-sink", "info", &sink).expect("open sink");
    assert!(sink.exists());
}

#[test]
fn test_unwritable_sink_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    // A directory cannot be opened as a log file.
    let result = logging::init_logging_with_sink("test-sink", "info", dir.path());
    assert!(result.is_err());
}
