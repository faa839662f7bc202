use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn fabstation() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fabstation"));
    cmd.env("FAB_LOG_DIR", std::env::temp_dir().join("fabstation-test-logs"));
    cmd
}

#[test]
fn orders_lists_unique_order_numbers() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("orders.txt");
    fs::write(
        &file,
        "order-no: 1001, sku: fab\norder-no: 1002, sku: fab\norder-no: 1001, sku: fab\n",
    )
    .unwrap();

    let output = fabstation()
        .args(["orders", "--file"])
        .arg(&file)
        .output()
        .expect("failed to run fabstation binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["1001", "1002"]);
}

#[test]
fn provision_rejects_incomplete_config() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("station.toml");
    fs::write(
        &config,
        "tool = \"esptool.py\"\n[s3]\nport = \"/dev/ttyUSB0\"\n",
    )
    .unwrap();

    let output = fabstation()
        .args(["provision", "--config"])
        .arg(&config)
        .output()
        .expect("failed to run fabstation binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Missing configuration"), "{}", stderr);
}

#[test]
fn provision_reports_unreadable_config() {
    let output = fabstation()
        .args(["provision", "--config", "/nonexistent/station.toml"])
        .output()
        .expect("failed to run fabstation binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read"), "{}", stderr);
}

#[test]
fn check_tool_fails_for_missing_tool() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("station.toml");
    fs::write(&config, "tool = \"/nonexistent/esptool\"\n").unwrap();

    let output = fabstation()
        .args(["check-tool", "--config"])
        .arg(&config)
        .output()
        .expect("failed to run fabstation binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "{}", stderr);
}
