//! Broker endpoint, credentials and reconnect policy for the MQTT sink
//!
//! Pure functions only; the supervisor in [`super::client`] does the I/O.

use crate::config::MqttSection;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const MQTT_PORT: u16 = 1883;
const MQTTS_PORT: u16 = 8883;
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// What the bridge can expect from the sink right now
#[derive(Debug, Clone, PartialEq)]
pub enum SinkState {
    /// Client built, no ConnAck yet
    Connecting,
    /// ConnAck received; publishes go out
    Online,
    /// Lost the broker, reason attached
    Offline(String),
    /// Waiting out the backoff before reconnect attempt `n`
    Retrying(u32),
    /// Retry budget spent; the sink stays offline until restarted
    Abandoned(String),
}

/// Reconnect backoff: stepped delays, then a steady delay
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// None retries forever
    pub max_attempts: Option<u32>,
    pub steps: Vec<Duration>,
    pub steady: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            steps: vec![
                Duration::from_millis(250),
                Duration::from_secs(1),
                Duration::from_secs(2),
            ],
            steady: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before 1-based reconnect attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.steps.get(index).copied().unwrap_or(self.steady)
    }
}

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid reconnect policy: {0}")]
    InvalidPolicy(String),
    #[error("Sink supervisor already running")]
    AlreadyRunning,
}

/// Broker host, port and whether TLS is on, from an `mqtt://` or `mqtts://` URL
pub fn broker_endpoint(broker_url: &str) -> Result<(String, u16, bool), MqttError> {
    let invalid = || MqttError::InvalidBrokerUrl(broker_url.to_string());
    let url = Url::parse(broker_url).map_err(|_| invalid())?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(invalid()),
    };
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(invalid)?
        .to_string();
    let port = url.port().unwrap_or(if tls { MQTTS_PORT } else { MQTT_PORT });

    Ok((host, port, tls))
}

/// Username and password from the environment variables the config names
///
/// No username variable, or an unset one, means an anonymous connection.
pub fn resolve_credentials(config: &MqttSection) -> Option<(String, String)> {
    let username = std::env::var(config.username_env.as_ref()?).ok()?;
    let password = config
        .password_env
        .as_ref()
        .and_then(|name| std::env::var(name).ok())
        .unwrap_or_default();
    Some((username, password))
}

/// Client options for one connection attempt
pub fn client_options(client_name: &str, config: &MqttSection) -> Result<MqttOptions, MqttError> {
    let (host, port, tls) = broker_endpoint(&config.broker_url)?;

    // A new client id per attempt keeps a stale broker session from kicking us
    let client_id = format!(
        "meshnode-{client_name}-{}",
        chrono::Utc::now().timestamp_millis()
    );
    let mut options = MqttOptions::new(client_id, host, port);
    if tls {
        options.set_transport(RumqttcTransport::tls_with_default_config());
    }
    if let Some((username, password)) = resolve_credentials(config) {
        options.set_credentials(username, password);
    }
    options.set_keep_alive(Duration::from_secs(
        config.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
    ));

    Ok(options)
}

/// Topic construction for republished sensor traffic
pub struct TopicBuilder;

impl TopicBuilder {
    /// `<base>/<routing key>`
    pub fn sensor_topic(base_topic: &str, routing_key: &str) -> String {
        format!("{}/{}", base_topic.trim_end_matches('/'), routing_key)
    }

    /// Filter matching every node under `base`
    pub fn subscription_filter(base_topic: &str) -> String {
        format!("{}/#", base_topic.trim_end_matches('/'))
    }

    /// Inverse of [`TopicBuilder::sensor_topic`]
    pub fn routing_key_from_topic<'a>(base_topic: &str, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(base_topic.trim_end_matches('/'))
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(broker_url: &str) -> MqttSection {
        MqttSection {
            broker_url: broker_url.to_string(),
            username_env: None,
            password_env: None,
            keep_alive_secs: 30,
        }
    }

    #[test]
    fn test_policy_steps_then_holds_steady() {
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(500), Duration::from_secs(5));
        // attempt 0 is treated like the first
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
    }

    #[test]
    fn test_broker_endpoint_defaults_port_by_scheme() {
        assert_eq!(
            broker_endpoint("mqtt://192.168.1.9").unwrap(),
            ("192.168.1.9".to_string(), 1883, false)
        );
        assert_eq!(
            broker_endpoint("mqtts://broker.example:9999").unwrap(),
            ("broker.example".to_string(), 9999, true)
        );
        assert_eq!(broker_endpoint("mqtts://broker.example").unwrap().1, 8883);
    }

    #[test]
    fn test_broker_endpoint_rejects_other_schemes() {
        for url in ["invalid-url", "http://broker:1883", "mqtt://"] {
            assert!(
                matches!(broker_endpoint(url), Err(MqttError::InvalidBrokerUrl(_))),
                "accepted {url}"
            );
        }
    }

    #[test]
    fn test_credentials_need_a_username_variable() {
        assert_eq!(resolve_credentials(&section("mqtt://localhost")), None);

        let mut config = section("mqtt://localhost");
        config.username_env = Some("MESHNODE_TEST_UNSET_MQTT_USER".to_string());
        assert_eq!(resolve_credentials(&config), None);
    }

    #[test]
    fn test_client_options_for_valid_url() {
        assert!(client_options("root", &section("mqtt://localhost:1883")).is_ok());
        assert!(client_options("root", &section("nope")).is_err());
    }

    #[test]
    fn test_topics() {
        assert_eq!(
            TopicBuilder::sensor_topic("mesh", "aa:bb:cc:11:22:33"),
            "mesh/aa:bb:cc:11:22:33"
        );
        assert_eq!(
            TopicBuilder::sensor_topic("site/mesh/", "aa:bb:cc:11:22:33"),
            "site/mesh/aa:bb:cc:11:22:33"
        );
        assert_eq!(TopicBuilder::subscription_filter("mesh"), "mesh/#");
        assert_eq!(
            TopicBuilder::routing_key_from_topic("mesh", "mesh/aa:bb:cc:11:22:33"),
            Some("aa:bb:cc:11:22:33")
        );
        assert_eq!(TopicBuilder::routing_key_from_topic("mesh", "other/x"), None);
        assert_eq!(TopicBuilder::routing_key_from_topic("mesh", "mesh/"), None);
    }
}
