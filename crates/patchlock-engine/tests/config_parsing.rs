use std::{env, fs};

use patchlock_engine::BackpressurePolicy;
use patchlock_engine::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("patchlock.toml");

    let toml_content = r#"
[notifications]
capacity = 16
policy = "fail_fast"

[controller]
workers = 2
base_backoff_ms = 10
max_backoff_ms = 5000

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.notifications.capacity, 16);
    assert_eq!(cfg.notifications.policy, BackpressurePolicy::FailFast);
    assert_eq!(cfg.controller.workers, 2);
    assert_eq!(cfg.controller.max_backoff_ms, 5000);
    assert_eq!(cfg.logging.level, "debug");

    // 2) Env override should win over file
    unsafe {
        env::set_var("PATCHLOCK__CONTROLLER__WORKERS", "4");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.controller.workers, 4);
    unsafe {
        env::remove_var("PATCHLOCK__CONTROLLER__WORKERS");
    }

    // 3) Invalid values are rejected
    let bad = dir.path().join("bad.toml");
    fs::write(&bad, "[controller]\nworkers = 0\n").expect("write toml");
    let err = load_config(bad.to_str()).expect_err("workers = 0 must fail");
    assert!(err.contains("controller.workers"));

    // 4) A missing file falls back to defaults
    let cfg_default = load_config(dir.path().join("absent.toml").to_str()).expect("defaults");
    assert_eq!(cfg_default.notifications.capacity, 64);
    assert_eq!(cfg_default.notifications.policy, BackpressurePolicy::Block);
}
