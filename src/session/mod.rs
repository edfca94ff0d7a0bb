//! The `session` module owns the MQTT subscription.
//!
//! `state` holds the connect/subscribe state machine, `tls` loads certificate
//! material and `manager` drives the client event loop, forwarding delivered
//! messages to a `NotificationHandler`.

pub mod manager;
pub mod state;
pub mod tls;

pub use manager::{DELIVERY_CAPACITY, DeliveryQueue, SessionManager, deliver, mqtt_options};
pub use state::{Backoff, BrokerClient, Session, SessionState};
