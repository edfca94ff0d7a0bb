//! The `notification` module decodes broker payloads into `NotificationMessage`
//! values and selects the canonical links that should be downloaded.

pub mod message;

pub use message::{Link, NotificationMessage};
