use serde::Deserialize;

use crate::utils::error::DecodeError;

/// Relation label marking the authoritative download target of a notification.
pub const CANONICAL_REL: &str = "canonical";

/// A link carried by a notification.
///
/// Only `href` is mandatory. A link without `rel` is kept but never
/// considered canonical.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(default, rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub rel: String,
}

impl Link {
    pub fn is_canonical(&self) -> bool {
        self.rel.eq_ignore_ascii_case(CANONICAL_REL)
    }
}

/// A decoded notification. Lives only while its message is being handled.
///
/// Members other than `links` are ignored, so full WIS2 GeoJSON
/// notifications decode as well as the bare `{"links": [...]}` shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotificationMessage {
    pub links: Vec<Link>,
}

impl NotificationMessage {
    /// Parses a raw payload. `links` must be present and be an array of
    /// objects with a string `href`.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Links eligible for download, in notification order.
    pub fn canonical_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(|link| link.is_canonical())
    }
}
