//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.


use meshnode::config::{ConfigError, MeshConfig};
use meshnode::mesh::NodeType;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_file() {
    let temp_file = write_config(test_helpers::FOUR_NODE_TOML);
    let config = MeshConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.nodes.len(), 4);
    assert_eq!(config.links.len(), 4);
    assert_eq!(config.mesh.mesh_id, test_helpers::MESH_ID);
    assert_eq!(config.bridge.recv_timeout_ms, 200);

    let leaf = config.node("Leaf_01").unwrap();
    assert_eq!(leaf.role, NodeType::Leaf);
    assert_eq!(
        leaf.parent.allow_list,
        vec![test_helpers::RELAY_A, test_helpers::RELAY_B]
    );
    assert_eq!(leaf.parent.fallback_attempts, 5);
    assert_eq!(config.root().unwrap().address, test_helpers::ROOT);
}

#[test]
fn test_missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = MeshConfig::load_from_file(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let temp_file = write_config("[mesh\nrouter_ssid = ");
    let result = MeshConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_bad_address_is_rejected() {
    let content = test_helpers::FOUR_NODE_TOML.replace("24:6f:28:00:00:01", "24:6f:28:zz:00:01");
    let temp_file = write_config(&content);
    assert!(MeshConfig::load_from_file(temp_file.path()).is_err());
}

#[test]
fn test_allow_list_longer_than_two_is_rejected() {
    let content = test_helpers::FOUR_NODE_TOML.replace(
        r#"allow_list = ["88:57:21:b3:56:f5", "00:70:07:7e:6f:bd"]"#,
        r#"allow_list = ["88:57:21:b3:56:f5", "00:70:07:7e:6f:bd", "24:6f:28:00:00:10"]"#,
    );
    let err = MeshConfig::from_toml_str(&content).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidConfig(_)));
    assert!(err.to_string().contains("allow_list"));
}

#[test]
fn test_duplicate_node_address_is_rejected() {
    let content = test_helpers::FOUR_NODE_TOML.replace("00:70:07:7e:6f:bd\"\n", "88:57:21:b3:56:f5\"\n");
    let err = MeshConfig::from_toml_str(&content).unwrap_err();
    assert!(err.to_string().contains("duplicate node address"));
}

#[test]
fn test_two_roots_are_rejected() {
    let content = test_helpers::FOUR_NODE_TOML.replace(
        "id = \"Relay_B\"\nrole = \"relay\"",
        "id = \"Relay_B\"\nrole = \"root\"",
    );
    let err = MeshConfig::from_toml_str(&content).unwrap_err();
    assert!(err.to_string().contains("exactly one root"));
}

#[test]
fn test_link_to_unknown_node_is_rejected() {
    let content = format!(
        "{}\n[[links]]\nobserver = \"Leaf_01\"\ntarget = \"Relay_C\"\nrssi = -60\n",
        test_helpers::FOUR_NODE_TOML
    );
    let err = MeshConfig::from_toml_str(&content).unwrap_err();
    assert!(err.to_string().contains("Relay_C"));
}

#[test]
fn test_zero_fallback_attempts_is_rejected() {
    let content =
        test_helpers::FOUR_NODE_TOML.replace("fallback_attempts = 5", "fallback_attempts = 0");
    assert!(MeshConfig::from_toml_str(&content).is_err());
}

#[test]
fn test_router_password_read_from_environment() {
    let mut config = test_helpers::four_node_config();
    config.mesh.router_password_env = Some("MESHNODE_IT_ROUTER_PASSWORD".to_string());

    std::env::set_var("MESHNODE_IT_ROUTER_PASSWORD", "hunter2");
    assert_eq!(
        config.get_router_password().unwrap().as_deref(),
        Some("hunter2")
    );
    std::env::remove_var("MESHNODE_IT_ROUTER_PASSWORD");
}

#[test]
fn test_serialized_config_reloads_identically() {
    let config = test_helpers::four_node_config();
    let text = toml::to_string_pretty(&config).unwrap();
    let temp_file = write_config(&text);
    let reloaded = MeshConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(reloaded, config);
}
