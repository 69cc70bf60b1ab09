//! Deployment configuration
//!
//! One TOML file describes the whole mesh: shared link parameters, the broker
//! the root bridges into, and one section per node. Secrets are never stored in
//! the file; sections name the environment variables that hold them.

use crate::mesh::{MeshAddr, NodeType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Largest allow-list a forced-topology node may carry
pub const MAX_ALLOW_LIST: usize = 2;

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeshConfig {
    pub mesh: MeshSection,
    /// Broker settings, required when a root node is configured
    pub mqtt: Option<MqttSection>,
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub nodes: Vec<NodeSection>,
    /// Simulated signal table, ignored on real hardware
    #[serde(default)]
    pub links: Vec<LinkSection>,
}

/// Link parameters shared by every node in the mesh
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeshSection {
    #[serde(default = "default_mesh_id")]
    pub mesh_id: MeshAddr,
    pub router_ssid: String,
    /// Environment variable containing the router password
    pub router_password_env: Option<String>,
    /// 0 follows the router's channel
    #[serde(default)]
    pub channel: u8,
    #[serde(default = "default_max_layer")]
    pub max_layer: u8,
}

fn default_mesh_id() -> MeshAddr {
    MeshAddr::new([0x7a, 0x10, 0x20, 0x30, 0x40, 0x50])
}

fn default_max_layer() -> u8 {
    6
}

/// Broker connection for the root bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_keep_alive() -> u64 {
    30
}

/// Root bridge settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSection {
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            base_topic: default_base_topic(),
            recv_timeout_ms: default_recv_timeout_ms(),
        }
    }
}

fn default_base_topic() -> String {
    "mesh".to_string()
}

fn default_recv_timeout_ms() -> u64 {
    1000
}

/// One physical (or simulated) node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
    /// Node identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    pub role: NodeType,
    pub address: MeshAddr,
    /// Channel the node's soft-AP advertises
    #[serde(default = "default_node_channel")]
    pub channel: u8,
    #[serde(default)]
    pub parent: ParentSection,
    #[serde(default)]
    pub sensor: SensorSection,
}

fn default_node_channel() -> u8 {
    1
}

/// Forced-topology parent selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentSection {
    #[serde(default)]
    pub allow_list: Vec<MeshAddr>,
    #[serde(default)]
    pub single_candidate_only: bool,
    #[serde(default)]
    pub auto_fallback: bool,
    #[serde(default = "default_fallback_attempts")]
    pub fallback_attempts: u32,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
}

impl Default for ParentSection {
    fn default() -> Self {
        Self {
            allow_list: Vec::new(),
            single_candidate_only: false,
            auto_fallback: false,
            fallback_attempts: default_fallback_attempts(),
            scan_interval_ms: default_scan_interval_ms(),
        }
    }
}

fn default_fallback_attempts() -> u32 {
    20
}

fn default_scan_interval_ms() -> u64 {
    1000
}

/// Leaf reporting cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_gate_poll_ms")]
    pub gate_poll_ms: u64,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            gate_poll_ms: default_gate_poll_ms(),
        }
    }
}

fn default_interval_secs() -> u64 {
    5
}

fn default_gate_poll_ms() -> u64 {
    300
}

/// What `observer` hears of `target` when scanning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkSection {
    pub observer: String,
    pub target: String,
    pub rssi: i8,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid node ID format: {0}")]
    InvalidNodeId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MeshConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: MeshConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-section consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mesh.max_layer == 0 || self.mesh.max_layer > 25 {
            return Err(ConfigError::InvalidConfig(format!(
                "max_layer {} must be within 1..=25",
                self.mesh.max_layer
            )));
        }

        let mut ids = HashSet::new();
        let mut addresses = HashSet::new();
        for node in &self.nodes {
            validate_node_id(&node.id)?;
            if !ids.insert(node.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            if node.address.is_unset() {
                return Err(ConfigError::InvalidConfig(format!(
                    "node '{}' has an unset address",
                    node.id
                )));
            }
            if !addresses.insert(node.address) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate node address {}",
                    node.address
                )));
            }
            node.parent.validate(&node.id)?;
        }

        let roots = self
            .nodes
            .iter()
            .filter(|n| n.role == NodeType::Root)
            .count();
        if !self.nodes.is_empty() && roots != 1 {
            return Err(ConfigError::InvalidConfig(format!(
                "exactly one root node required, found {roots}"
            )));
        }
        if roots > 0 && self.mqtt.is_none() {
            return Err(ConfigError::InvalidConfig(
                "a root node requires an [mqtt] section".to_string(),
            ));
        }

        if self.bridge.base_topic.is_empty()
            || self.bridge.base_topic.contains(['#', '+'])
        {
            return Err(ConfigError::InvalidConfig(format!(
                "base_topic '{}' must be a non-empty topic without wildcards",
                self.bridge.base_topic
            )));
        }

        for link in &self.links {
            for id in [&link.observer, &link.target] {
                if !ids.contains(id.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "link references unknown node '{id}'"
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&NodeSection> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn root(&self) -> Option<&NodeSection> {
        self.nodes.iter().find(|n| n.role == NodeType::Root)
    }

    /// Router password; a named variable that is unset is an error
    pub fn get_router_password(&self) -> Result<Option<String>, ConfigError> {
        match &self.mesh.router_password_env {
            Some(name) => std::env::var(name)
                .map(Some)
                .map_err(|_| ConfigError::EnvVarNotFound(name.clone())),
            None => Ok(None),
        }
    }
}

impl ParentSection {
    fn validate(&self, node_id: &str) -> Result<(), ConfigError> {
        if self.allow_list.len() > MAX_ALLOW_LIST {
            return Err(ConfigError::InvalidConfig(format!(
                "node '{node_id}' allow_list has {} entries, at most {MAX_ALLOW_LIST} allowed",
                self.allow_list.len()
            )));
        }
        if self.fallback_attempts == 0 {
            return Err(ConfigError::InvalidConfig(format!(
                "node '{node_id}' fallback_attempts must be at least 1"
            )));
        }
        Ok(())
    }
}

/// Validate node ID format
pub fn validate_node_id(node_id: &str) -> Result<(), ConfigError> {
    let valid_chars = node_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if node_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidNodeId(format!(
            "Node ID '{node_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_NODE: &str = r#"
[mesh]
router_ssid = "lab"

[mqtt]
broker_url = "mqtt://localhost:1883"

[[nodes]]
id = "Root"
role = "root"
address = "24:6f:28:00:00:10"

[[nodes]]
id = "Relay_A"
role = "relay"
address = "88:57:21:b3:56:f5"

[[nodes]]
id = "Leaf_01"
role = "leaf"
address = "24:6f:28:00:00:01"
[nodes.parent]
allow_list = ["88:57:21:B3:56:F5"]
"#;

    #[test]
    fn test_defaults_applied() {
        let config = MeshConfig::from_toml_str(THREE_NODE).unwrap();
        assert_eq!(config.mesh.mesh_id.to_string(), "7a:10:20:30:40:50");
        assert_eq!(config.mesh.max_layer, 6);
        assert_eq!(config.mesh.channel, 0);
        assert_eq!(config.bridge.base_topic, "mesh");
        assert_eq!(config.bridge.recv_timeout_ms, 1000);

        let leaf = config.node("Leaf_01").unwrap();
        assert_eq!(leaf.role, NodeType::Leaf);
        assert!(!leaf.parent.auto_fallback);
        assert_eq!(leaf.parent.fallback_attempts, 20);
        assert_eq!(leaf.parent.scan_interval_ms, 1000);
        assert_eq!(leaf.sensor.interval_secs, 5);
        assert_eq!(leaf.sensor.gate_poll_ms, 300);
        assert_eq!(
            leaf.parent.allow_list[0].to_string(),
            "88:57:21:b3:56:f5"
        );
        assert_eq!(config.root().unwrap().id, "Root");
    }

    #[test]
    fn test_invalid_node_id() {
        assert!(validate_node_id("Leaf@01").is_err());
        assert!(validate_node_id("").is_err());
        assert!(validate_node_id("Leaf_01.b-2").is_ok());
    }

    #[test]
    fn test_root_requires_mqtt() {
        let without_mqtt = THREE_NODE.replace("[mqtt]\nbroker_url = \"mqtt://localhost:1883\"\n", "");
        let err = MeshConfig::from_toml_str(&without_mqtt).unwrap_err();
        assert!(err.to_string().contains("[mqtt]"));
    }

    #[test]
    fn test_max_layer_bounds() {
        let toml_content = THREE_NODE.replace("router_ssid = \"lab\"", "router_ssid = \"lab\"\nmax_layer = 0");
        assert!(MeshConfig::from_toml_str(&toml_content).is_err());
    }

    #[test]
    fn test_wildcard_base_topic_rejected() {
        let toml_content = format!("{THREE_NODE}\n[bridge]\nbase_topic = \"mesh/#\"\n");
        assert!(MeshConfig::from_toml_str(&toml_content).is_err());
    }

    #[test]
    fn test_missing_router_password_env() {
        let mut config = MeshConfig::from_toml_str(THREE_NODE).unwrap();
        assert_eq!(config.get_router_password().unwrap(), None);

        config.mesh.router_password_env = Some("MESHNODE_TEST_UNSET_PASSWORD_VAR".to_string());
        assert!(matches!(
            config.get_router_password(),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }
}
