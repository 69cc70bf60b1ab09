//! Sink health: what a broker signal does to the sink state, and whether to
//! try the broker again

use super::connection::{MqttError, ReconnectPolicy, SinkState};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Something the event loop told us about the broker
#[derive(Debug, Clone)]
pub enum BrokerSignal {
    ConnAck,
    BrokerDisconnect,
    NetworkError(String),
    RetryScheduled(u32),
    BudgetSpent(u32),
}

/// What the supervisor does after losing the broker
#[derive(Debug, PartialEq)]
pub enum ReconnectStep {
    Retry { attempt: u32, delay: Duration },
    Shutdown,
    GiveUp,
}

pub struct HealthMonitor;

impl HealthMonitor {
    pub fn next_step(
        attempts_so_far: u32,
        policy: &ReconnectPolicy,
        shutting_down: bool,
    ) -> ReconnectStep {
        if shutting_down {
            return ReconnectStep::Shutdown;
        }
        match policy.max_attempts {
            Some(max) if attempts_so_far >= max => ReconnectStep::GiveUp,
            _ => {
                let attempt = attempts_so_far + 1;
                ReconnectStep::Retry {
                    attempt,
                    delay: policy.delay_for(attempt),
                }
            }
        }
    }

    pub fn state_after(signal: BrokerSignal) -> SinkState {
        match signal {
            BrokerSignal::ConnAck => SinkState::Online,
            BrokerSignal::BrokerDisconnect => SinkState::Offline("broker sent DISCONNECT".into()),
            BrokerSignal::NetworkError(reason) => SinkState::Offline(reason),
            BrokerSignal::RetryScheduled(attempt) => SinkState::Retrying(attempt),
            BrokerSignal::BudgetSpent(attempts) => {
                SinkState::Abandoned(format!("gave up after {attempts} reconnect attempts"))
            }
        }
    }

    /// The bridge's connected flag is exactly this
    pub fn is_online(state: &SinkState) -> bool {
        matches!(state, SinkState::Online)
    }

    pub fn log_transition(from: &SinkState, to: &SinkState) {
        match (from, to) {
            (SinkState::Retrying(attempt), SinkState::Online) => {
                info!(attempt, "MQTT sink reconnected");
            }
            (_, SinkState::Online) => info!("MQTT sink online"),
            (SinkState::Online, SinkState::Offline(reason)) => {
                warn!(reason = %reason, "MQTT sink offline, bridged messages will be dropped");
            }
            (_, SinkState::Abandoned(reason)) => {
                error!(reason = %reason, "MQTT sink abandoned");
            }
            _ => debug!(from = ?from, to = ?to, "MQTT sink state"),
        }
    }

    pub fn validate_policy(policy: &ReconnectPolicy) -> Result<(), MqttError> {
        if policy.max_attempts == Some(0) {
            return Err(MqttError::InvalidPolicy(
                "max_attempts must be at least 1, or None to retry forever".into(),
            ));
        }
        if policy.steady.is_zero() {
            return Err(MqttError::InvalidPolicy(
                "steady delay must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_forever_by_default() {
        let policy = ReconnectPolicy::default();

        assert_eq!(
            HealthMonitor::next_step(0, &policy, false),
            ReconnectStep::Retry {
                attempt: 1,
                delay: Duration::from_millis(250)
            }
        );
        assert_eq!(
            HealthMonitor::next_step(1_000, &policy, false),
            ReconnectStep::Retry {
                attempt: 1_001,
                delay: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn test_shutdown_wins_over_retry() {
        assert_eq!(
            HealthMonitor::next_step(0, &ReconnectPolicy::default(), true),
            ReconnectStep::Shutdown
        );
    }

    #[test]
    fn test_bounded_policy_gives_up() {
        let policy = ReconnectPolicy {
            max_attempts: Some(3),
            ..ReconnectPolicy::default()
        };
        assert!(matches!(
            HealthMonitor::next_step(2, &policy, false),
            ReconnectStep::Retry { attempt: 3, .. }
        ));
        assert_eq!(HealthMonitor::next_step(3, &policy, false), ReconnectStep::GiveUp);
    }

    #[test]
    fn test_only_connack_brings_sink_online() {
        assert!(HealthMonitor::is_online(&HealthMonitor::state_after(
            BrokerSignal::ConnAck
        )));
        for signal in [
            BrokerSignal::BrokerDisconnect,
            BrokerSignal::NetworkError("connection refused".into()),
            BrokerSignal::RetryScheduled(2),
            BrokerSignal::BudgetSpent(5),
        ] {
            assert!(!HealthMonitor::is_online(&HealthMonitor::state_after(signal)));
        }
        assert!(!HealthMonitor::is_online(&SinkState::Connecting));
    }

    #[test]
    fn test_network_error_reason_is_kept() {
        assert_eq!(
            HealthMonitor::state_after(BrokerSignal::NetworkError("refused".into())),
            SinkState::Offline("refused".into())
        );
    }

    #[test]
    fn test_validate_policy() {
        assert!(HealthMonitor::validate_policy(&ReconnectPolicy::default()).is_ok());

        let zero_attempts = ReconnectPolicy {
            max_attempts: Some(0),
            ..ReconnectPolicy::default()
        };
        assert!(HealthMonitor::validate_policy(&zero_attempts).is_err());

        let zero_steady = ReconnectPolicy {
            steady: Duration::ZERO,
            ..ReconnectPolicy::default()
        };
        assert!(HealthMonitor::validate_policy(&zero_steady).is_err());
    }
}
