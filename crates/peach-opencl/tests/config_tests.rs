//! Configuration loading from files and the environment.
//!
//! Environment-mutating tests run under `serial_test` so they never observe
//! each other's variables.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use peach_opencl::config::parse_passes;
use peach_opencl::{ConfigError, LogLevel, OptLevel, ProbeConfig};
use serial_test::serial;

/// Sets an environment variable for the lifetime of the guard.
struct EnvGuard {
    key: &'static str,
    prev: Option<String>,
}

impl EnvGuard {
    fn set(key: &'static str, val: &str) -> Self {
        let prev = std::env::var(key).ok();
        std::env::set_var(key, val);
        Self { key, prev }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => std::env::set_var(self.key, v),
            None => std::env::remove_var(self.key),
        }
    }
}

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn missing_file_yields_defaults() {
    let cfg = ProbeConfig::from_toml(Path::new("/nonexistent/peach-probe.toml")).unwrap();
    assert_eq!(cfg, ProbeConfig::default());
}

#[test]
fn file_values_are_loaded() {
    let file = write_config(
        r#"
[probe]
kernel_path = "/opt/peach/cl_minimal.cl"
max_devices = 8
passes = [0, 1, 2]
extra_options = ["-cl-mad-enable"]
wait_timeout_ms = 500
difficulty = 22
block_number = 1000
log_level = "debug"
"#,
    );
    let cfg = ProbeConfig::from_toml(file.path()).unwrap();
    assert_eq!(cfg.kernel_path, Path::new("/opt/peach/cl_minimal.cl"));
    assert_eq!(cfg.max_devices, 8);
    assert_eq!(cfg.passes, vec![OptLevel(0), OptLevel(1), OptLevel(2)]);
    assert_eq!(cfg.log_level, LogLevel::Debug);
    assert!(cfg.validate().is_ok());

    let opts = cfg.probe_options();
    assert_eq!(opts.validation.deadline, Some(Duration::from_millis(500)));
    assert_eq!(opts.workload.difficulty, 22);
    assert_eq!(opts.workload.block_number, 1000_u64.to_le_bytes());
    assert_eq!(
        opts.policy.options_for(OptLevel(2)).render(),
        "-cl-fp32-correctly-rounded-divide-sqrt -O2 -cl-mad-enable"
    );
}

#[test]
fn malformed_file_is_a_parse_error() {
    let file = write_config("[probe]\nmax_devices = \"many\"\n");
    assert!(matches!(ProbeConfig::from_toml(file.path()), Err(ConfigError::TomlParse(_))));
}

#[test]
#[serial(peach_env)]
fn env_overrides_defaults() {
    let _a = EnvGuard::set("PEACH_KEEP_GOING", "yes");
    let _b = EnvGuard::set("PEACH_PASSES", "0,3");
    let _c = EnvGuard::set("PEACH_BLOCK_NUMBER", "77");

    let cfg = ProbeConfig::from_env().unwrap();
    assert!(cfg.keep_going);
    assert_eq!(cfg.passes, vec![OptLevel(0), OptLevel(3)]);
    assert_eq!(cfg.block_number, 77);
}

#[test]
#[serial(peach_env)]
fn env_overlays_file() {
    let file = write_config("[probe]\nmax_devices = 8\ndifficulty = 20\n");
    let _a = EnvGuard::set("PEACH_MAX_DEVICES", "2");

    let cfg = ProbeConfig::load(Some(file.path())).unwrap();
    assert_eq!(cfg.max_devices, 2);
    assert_eq!(cfg.difficulty, 20);
}

#[test]
#[serial(peach_env)]
fn env_default_values_still_override_file() {
    let file = write_config(
        r#"
[probe]
keep_going = true
passes = [0, 2]
difficulty = 20
max_devices = 8
correctly_rounded_div_sqrt = false
log_level = "trace"
"#,
    );
    let _a = EnvGuard::set("PEACH_KEEP_GOING", "false");
    let _b = EnvGuard::set("PEACH_PASSES", "0,1");
    let _c = EnvGuard::set("PEACH_DIFFICULTY", "18");
    let _d = EnvGuard::set("PEACH_MAX_DEVICES", "64");
    let _e = EnvGuard::set("PEACH_CORRECTLY_ROUNDED_DIV_SQRT", "true");
    let _f = EnvGuard::set("PEACH_LOG_LEVEL", "info");

    let cfg = ProbeConfig::load(Some(file.path())).unwrap();
    assert_eq!(cfg, ProbeConfig::default());
}

#[test]
#[serial(peach_env)]
fn invalid_env_value_names_the_variable() {
    let _a = EnvGuard::set("PEACH_DIFFICULTY", "300");
    let err = ProbeConfig::from_env().unwrap_err();
    match err {
        ConfigError::InvalidEnvVar { key, value } => {
            assert_eq!(key, "PEACH_DIFFICULTY");
            assert_eq!(value, "300");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn pass_lists_accept_both_spellings() {
    assert_eq!(parse_passes("0 1"), parse_passes("-O0,-O1"));
    assert_eq!(parse_passes(""), Some(vec![]));
}
