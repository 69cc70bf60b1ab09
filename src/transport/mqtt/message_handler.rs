//! Classification of rumqttc notifications for the sink supervisor
//!
//! The sink never subscribes, so the only incoming packets that matter are
//! the ones that change whether publishes can go out.

use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::Event;

#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    Disconnected,
    /// PingResp and similar keep-alive chatter
    Chatter(String),
    Outgoing,
}

pub struct MessageHandler;

impl MessageHandler {
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => EventRoute::ConnectionAcknowledged,
            Event::Incoming(Packet::Disconnect(_)) => EventRoute::Disconnected,
            Event::Incoming(other) => EventRoute::Chatter(format!("{other:?}")),
            Event::Outgoing(_) => EventRoute::Outgoing,
        }
    }

    /// Bridged sensor traffic is at-most-once
    pub fn publish_qos() -> QoS {
        QoS::AtMostOnce
    }
}
