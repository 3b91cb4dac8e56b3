//! Per-peer subscriptions and BLOB delivery policy
//!
//! Every peer, client or device, carries one [`Subscription`]. Plain value
//! updates are delivered to anyone listening; BLOB updates additionally
//! need an explicit `Also` or `Only` policy.

use indi_core::BlobEnable;
use std::collections::{BTreeMap, BTreeSet};

/// What a peer listens to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscription {
    listen_all: bool,
    devices: BTreeSet<String>,
    properties: BTreeSet<(String, String)>,
    blob_policies: BTreeMap<(String, Option<String>), BlobEnable>,
}

impl Subscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `getProperties` request
    ///
    /// No device means everything; a device alone means the whole device;
    /// both narrow the subscription to one property.
    pub fn record_subscription(&mut self, device: Option<&str>, property: Option<&str>) {
        match (device, property) {
            (None, _) => self.listen_all = true,
            (Some(device), None) => {
                self.devices.insert(device.to_string());
            }
            (Some(device), Some(property)) => {
                self.properties
                    .insert((device.to_string(), property.to_string()));
            }
        }
    }

    /// Set the BLOB policy for a device or one of its properties, replacing
    /// the previous one
    pub fn set_blob_policy(&mut self, device: &str, property: Option<&str>, policy: BlobEnable) {
        self.blob_policies
            .insert((device.to_string(), property.map(str::to_string)), policy);
    }

    pub fn listens_to_all(&self) -> bool {
        self.listen_all
    }

    /// Whether device-wide traffic (messages, deletions) reaches this peer
    ///
    /// Includes peers subscribed to a single property of the device.
    pub fn listens_to_device(&self, device: &str) -> bool {
        self.covers_device(device) || self.properties.iter().any(|(d, _)| d == device)
    }

    /// Whether updates of one property reach this peer
    pub fn listens_to_property(&self, device: &str, property: &str) -> bool {
        self.covers_device(device)
            || self
                .properties
                .contains(&(device.to_string(), property.to_string()))
    }

    fn covers_device(&self, device: &str) -> bool {
        self.listen_all || self.devices.contains(device)
    }

    fn policy(&self, device: &str, property: Option<&str>) -> Option<BlobEnable> {
        self.blob_policies
            .get(&(device.to_string(), property.map(str::to_string)))
            .copied()
    }

    /// Non-BLOB updates are accepted unless the device policy is `Only`
    pub fn accepts_non_blob(&self, device: &str) -> bool {
        self.policy(device, None) != Some(BlobEnable::Only)
    }

    /// BLOB updates need an explicit policy; the property entry wins over
    /// the device entry
    pub fn accepts_blob(&self, device: &str, property: &str) -> bool {
        match self
            .policy(device, Some(property))
            .or_else(|| self.policy(device, None))
        {
            Some(BlobEnable::Also) | Some(BlobEnable::Only) => true,
            Some(BlobEnable::Never) | None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_all() {
        let mut sub = Subscription::new();
        assert!(!sub.listens_to_device("CCD"));

        sub.record_subscription(None, None);
        assert!(sub.listens_to_all());
        assert!(sub.listens_to_device("CCD"));
        assert!(sub.listens_to_property("Mount", "PARK"));
    }

    #[test]
    fn test_device_subscription() {
        let mut sub = Subscription::new();
        sub.record_subscription(Some("CCD"), None);
        assert!(sub.listens_to_device("CCD"));
        assert!(sub.listens_to_property("CCD", "EXPOSURE"));
        assert!(!sub.listens_to_device("Mount"));
    }

    #[test]
    fn test_property_subscription() {
        let mut sub = Subscription::new();
        sub.record_subscription(Some("D1"), Some("P1"));

        assert!(sub.listens_to_property("D1", "P1"));
        assert!(!sub.listens_to_property("D1", "P2"));
        assert!(!sub.listens_to_property("D2", "P1"));
        // Device messages still reach a property-scoped peer
        assert!(sub.listens_to_device("D1"));
        assert!(!sub.listens_to_device("D2"));
    }

    #[test]
    fn test_blob_defaults() {
        let sub = Subscription::new();
        assert!(sub.accepts_non_blob("CCD"));
        assert!(!sub.accepts_blob("CCD", "CCD1"));
    }

    #[test]
    fn test_blob_only() {
        let mut sub = Subscription::new();
        sub.set_blob_policy("CCD", None, BlobEnable::Only);
        assert!(!sub.accepts_non_blob("CCD"));
        assert!(sub.accepts_blob("CCD", "CCD1"));
        assert!(sub.accepts_non_blob("Mount"));
    }

    #[test]
    fn test_property_policy_overrides_device() {
        let mut sub = Subscription::new();
        sub.set_blob_policy("CCD", None, BlobEnable::Also);
        sub.set_blob_policy("CCD", Some("PREVIEW"), BlobEnable::Never);

        assert!(sub.accepts_blob("CCD", "CCD1"));
        assert!(!sub.accepts_blob("CCD", "PREVIEW"));
        assert!(sub.accepts_non_blob("CCD"));

        sub.set_blob_policy("CCD", Some("PREVIEW"), BlobEnable::Only);
        assert!(sub.accepts_blob("CCD", "PREVIEW"));
    }

    #[test]
    fn test_policy_replaced() {
        let mut sub = Subscription::new();
        sub.set_blob_policy("CCD", None, BlobEnable::Only);
        sub.set_blob_policy("CCD", None, BlobEnable::Never);
        assert!(sub.accepts_non_blob("CCD"));
        assert!(!sub.accepts_blob("CCD", "CCD1"));
    }
}
