//! Runs the `peach-probe` binary against simulated devices.

use std::process::{Command, Output};

fn probe(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_peach-probe"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("PEACH_CONFIG")
        .output()
        .expect("failed to spawn peach-probe")
}

#[test]
fn simulated_devices_validate() {
    let out = probe(&["--simulate", "2"]);
    let stdout = String::from_utf8_lossy(&out.stdout);

    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout.contains("OpenCL: Found 1 platforms and 2 devices"));
    assert_eq!(stdout.matches("Build with level 1 successful").count(), 2);
    assert!(stdout.contains("Probe finished: 2 validated, 0 failed, 0 skipped"));
}

#[test]
fn no_devices_exits_with_device_code() {
    let out = probe(&["--simulate", "0"]);
    assert_eq!(out.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&out.stdout).contains("No OpenCL devices detected."));
}

#[test]
fn json_report_is_machine_readable() {
    let out = probe(&["--simulate", "1", "--format", "json", "--passes", "0,1,2"]);
    assert_eq!(out.status.code(), Some(0));

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["backend"], "simulated");
    assert_eq!(report["outcomes"][0]["status"], "validated");
    assert_eq!(
        report["outcomes"][0]["final_options"],
        "-cl-fp32-correctly-rounded-divide-sqrt -O2"
    );
}

#[test]
fn list_stops_after_enumeration() {
    let out = probe(&["--simulate", "3", "--list"]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout.contains("Device 2: Peach Simulated GPU 2 4096 MB"));
    assert!(!stdout.contains("Building with level 0"));
}

#[test]
fn device_ceiling_is_enforced() {
    let out = probe(&["--simulate", "3", "--max-devices", "2"]);
    assert_eq!(out.status.code(), Some(3));
}

#[test]
fn malformed_config_exits_with_config_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("peach.toml");
    std::fs::write(&path, "[probe]\npasses = \"fast\"\n").unwrap();

    let out = probe(&["--simulate", "1", "--config", path.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(2));
}
