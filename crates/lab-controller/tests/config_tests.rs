//! Configuration loading from files and the process environment.

use lab_controller::ControllerConfig;
use serial_test::serial;
use std::io::Write;

const VARS: [&str; 6] = [
    "ALLOWED_CONCURRENT_LABS",
    "K8S_NAMESPACE",
    "AWS_S3_BUCKET_NAME",
    "LAB_DOMAIN",
    "BIND_ADDRESS",
    "QUEST_CATALOG_URL",
];

fn clear() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_process_environment_overrides_file() {
    clear();
    let dir = std::env::temp_dir().join(format!("lab-controller-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.yaml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        "namespace: labs\nmaxConcurrentLabs: 3\ningress:\n  domain: labs.example.com\n"
    )
    .unwrap();

    std::env::set_var("ALLOWED_CONCURRENT_LABS", "8");
    std::env::set_var("LAB_DOMAIN", "labs.devsarena.dev");
    std::env::set_var("QUEST_CATALOG_URL", "http://quests:8080");

    let config = ControllerConfig::from_mounted_file(path.to_str().unwrap())
        .unwrap()
        .with_env_overrides();

    assert_eq!(config.namespace, "labs");
    assert_eq!(config.max_concurrent_labs, 8);
    assert_eq!(config.ingress.domain, "labs.devsarena.dev");
    assert_eq!(config.catalog.base_url.as_deref(), Some("http://quests:8080"));
    assert!(config.validate().is_ok());

    clear();
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn test_without_overrides_defaults_hold() {
    clear();
    let config = ControllerConfig::default().with_env_overrides();
    assert_eq!(config.namespace, "devsarena");
    assert_eq!(config.max_concurrent_labs, 5);
    assert_eq!(config.server.bind_address, "0.0.0.0:8080");
    assert!(config.catalog.base_url.is_none());
}
