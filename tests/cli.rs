//! End-to-end checks of the `polydb` binary

#![cfg(feature = "postgres")]

use std::process::Command;

fn polydb() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_polydb"));
    for var in [
        "POLYDB_DRIVER",
        "POLYDB_HOST",
        "POLYDB_PORT",
        "POLYDB_DATABASE",
        "POLYDB_USER",
        "POLYDB_PASSWORD",
        "POLYDB_LOG_FILE",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_unreachable_backend_logs_and_exits() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("logs").join("error_log.txt");

    let output = polydb()
        .args(["--driver", "pgsql", "--host", "127.0.0.1", "--port", "1"])
        .args(["--database", "shop", "--user", "app", "--log-file"])
        .arg(&log)
        .args(["select", "users"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(polydb::diagnostics::USER_MESSAGE));

    let report = std::fs::read_to_string(&log).unwrap();
    assert!(report.contains("Database connection failed"));
    assert!(report.contains("Driver: pgsql"));
    assert!(report.contains("Function: select"));
    assert!(report.contains("Error: Connection failed:"));
}

#[test]
fn test_unsupported_operation_fails_without_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("error_log.txt");

    let output = polydb()
        .args(["--driver", "redis", "--port", "1", "--log-file"])
        .arg(&log)
        .args(["select", "users"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("'select' is not implemented"));
    assert!(!stderr.contains(polydb::diagnostics::USER_MESSAGE));
    assert!(!log.exists());
}
