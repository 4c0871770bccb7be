//! Configuration system tests
//!
//! Tests configuration parsing, validation and the trait table

use std::fs;
use std::path::PathBuf;

use personality_net::config::{self, NodeConfig};
use personality_net::personality::TraitValue;
use tempfile::TempDir;

struct ConfigFixture {
    temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        Self { temp_dir, config_path }
    }

    fn write_config(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    fn parse(&self) -> NodeConfig {
        NodeConfig::from_file(&self.config_path).unwrap()
    }

    fn validate_cmd(&self) -> assert_cmd::assert::Assert {
        assert_cmd::Command::cargo_bin("personality-net")
            .unwrap()
            .current_dir(self.temp_dir.path())
            .env("HOME", self.temp_dir.path())
            .args(["config", "validate", "--config"])
            .arg(self.path())
            .assert()
    }
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_empty_config_uses_defaults() {
    let fixture = ConfigFixture::new();
    fixture.write_config("");

    let cfg = fixture.parse();
    assert_eq!(cfg.agent.version, "1.0");
    assert_eq!(cfg.coordinator.mcp_registry_port, 9000);
    assert_eq!(cfg.storage.data_dir, ".koi");
    assert!(cfg.network.first_contact.is_none());
    cfg.validate().unwrap();
}

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[agent]
name = "weather"
version = "2.1"
base_url = "http://127.0.0.1:8200"
mcp_port = 8200

[agent.traits]
mood = { description = "Current mood", value = "sunny", is_callable = true }
temperature = 21
forecast = { value = ["rain", "sun"] }

[coordinator]
name = "hub"
base_url = "http://127.0.0.1:9100/koi-net"
mcp_registry_port = 9100

[network]
first_contact = "http://127.0.0.1:9100/koi-net"
listen_host = "127.0.0.1"
request_timeout_ms = 2000

[network.retry]
max_attempts = 5
initial_delay_ms = 100
max_delay_ms = 1000

[logging]
level = "debug"
json_format = true

[storage]
data_dir = "/tmp/pnet"
"#,
    );

    let cfg = fixture.parse();
    cfg.validate().unwrap();
    assert_eq!(cfg.agent.name, "weather");
    assert_eq!(cfg.network.retry.max_attempts, 5);
    assert_eq!(cfg.node_dir("weather"), PathBuf::from("/tmp/pnet/weather"));

    fixture.validate_cmd().success();
}

#[test]
fn test_trait_table_in_file_order() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[agent.traits]
mood = { description = "Current mood", value = "sunny", is_callable = true }
temperature = 21
forecast = { value = ["rain", "sun"] }
"#,
    );

    let traits = fixture.parse().agent.personality_traits();
    let names: Vec<&str> = traits.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["mood", "temperature", "forecast"]);

    assert!(traits[0].is_callable);
    assert_eq!(traits[0].description, "Current mood");
    assert_eq!(traits[0].trait_type, "str");

    // Bare values are never callable
    assert!(!traits[1].is_callable);
    assert_eq!(traits[1].trait_type, "int");
    assert_eq!(traits[1].value, TraitValue::Integer(21));

    assert_eq!(traits[2].trait_type, "list");
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_base_url() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[agent]
base_url = "not a url"
"#,
    );

    assert!(fixture.parse().validate().is_err());
    fixture.validate_cmd().failure();
}

#[test]
fn test_name_with_slash_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[agent]
name = "bad/name"
"#,
    );

    assert!(fixture.parse().validate().is_err());
}

#[test]
fn test_zero_retry_attempts_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[network.retry]
max_attempts = 0
"#,
    );

    assert!(fixture.parse().validate().is_err());
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[logging]
level = "invalid_level"
"#,
    );

    fixture.validate_cmd().failure();
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[coordinator
name = "hub"
"#,
    );

    assert!(NodeConfig::from_file(&fixture.config_path).is_err());
    fixture.validate_cmd().failure();
}

// ─────────────────────────────────────────────────────────────────
// Generated Config Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_generated_default_config_is_valid() {
    let fixture = ConfigFixture::new();
    fixture.write_config(&config::generate_default_config());

    let cfg = fixture.parse();
    cfg.validate().unwrap();
    assert_eq!(cfg.agent.name, "helpful-agent");
    assert!(cfg.agent.personality_traits().iter().any(|t| t.is_callable));
}

#[test]
fn test_to_toml_round_trips() {
    let fixture = ConfigFixture::new();
    fixture.write_config(&config::generate_default_config());
    let cfg = fixture.parse();

    fixture.write_config(&cfg.to_toml().unwrap());
    let reparsed = fixture.parse();
    assert_eq!(reparsed.agent.name, cfg.agent.name);
    assert_eq!(
        reparsed.agent.personality_traits().len(),
        cfg.agent.personality_traits().len()
    );
}
