//! In-memory registry of every device ever seen

use super::types::{DeviceMap, DeviceRecord, Registration, UNKNOWN_EXTERNAL_ID};
use super::DeviceIdentity;

/// Registry of known devices
///
/// Mutated only by the session manager, which keeps the `active` flag in
/// step with its live session table.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    devices: DeviceMap,
}

impl DeviceRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a loaded snapshot
    ///
    /// Every record comes back inactive: nothing is connected to a process
    /// that just started, whatever the snapshot claims.
    #[must_use]
    pub fn from_snapshot(mut devices: DeviceMap) -> Self {
        for record in devices.values_mut() {
            record.active = false;
        }
        Self { devices }
    }

    /// Record a successful registration
    ///
    /// Returns the updated record and whether this identity was seen for
    /// the first time.
    pub fn upsert_on_register(
        &mut self,
        identity: &DeviceIdentity,
        registration: Registration,
        now: i64,
    ) -> (&DeviceRecord, bool) {
        let first_time = !self.devices.contains_key(identity);

        let record = self
            .devices
            .entry(identity.clone())
            .and_modify(|record| {
                record.active = true;
                record.last_seen = record.last_seen.max(now);
                record.last_disconnect_reason = None;
                if registration.remote_address.is_some() {
                    record.remote_address.clone_from(&registration.remote_address);
                }
            })
            .or_insert_with(|| DeviceRecord {
                external_id: registration
                    .external_id
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_EXTERNAL_ID.to_string()),
                start_time: registration.start_time.unwrap_or(now),
                first_seen: now,
                last_seen: now,
                active: true,
                remote_address: registration.remote_address.clone(),
                last_disconnect_reason: None,
            });

        (record, first_time)
    }

    /// Record a heartbeat; unknown identities are ignored
    pub fn mark_heartbeat(&mut self, identity: &DeviceIdentity, now: i64) {
        if let Some(record) = self.devices.get_mut(identity) {
            record.active = true;
            record.last_seen = record.last_seen.max(now);
        }
    }

    /// Record a disconnection; unknown identities are ignored
    pub fn mark_offline(&mut self, identity: &DeviceIdentity, now: i64, reason: &str) {
        if let Some(record) = self.devices.get_mut(identity) {
            record.active = false;
            record.last_seen = record.last_seen.max(now);
            record.last_disconnect_reason = Some(reason.to_string());
        }
    }

    /// Get a device record
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<&DeviceRecord> {
        self.devices.get(identity)
    }

    /// Identities with a live session, in identity order
    #[must_use]
    pub fn list_active(&self) -> Vec<DeviceIdentity> {
        self.devices
            .iter()
            .filter(|(_, record)| record.active)
            .map(|(identity, _)| identity.clone())
            .collect()
    }

    /// All known devices with their records
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceIdentity, &DeviceRecord)> {
        self.devices.iter()
    }

    /// Total number of known devices
    #[must_use]
    pub fn count(&self) -> usize {
        self.devices.len()
    }

    /// Number of devices with a live session
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.devices.values().filter(|record| record.active).count()
    }

    /// Copy of the full device map for persistence
    #[must_use]
    pub fn snapshot(&self) -> DeviceMap {
        self.devices.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> DeviceIdentity {
        DeviceIdentity::parse(name).unwrap()
    }

    fn registration(external_id: &str) -> Registration {
        Registration {
            external_id: Some(external_id.to_string()),
            start_time: Some(42),
            remote_address: Some("127.0.0.1:9000".to_string()),
        }
    }

    #[test]
    fn first_registration_creates_record() {
        let mut registry = DeviceRegistry::new();
        let (record, first_time) =
            registry.upsert_on_register(&id("agentA"), registration("m-1"), 1_000);

        assert!(first_time);
        assert!(record.active);
        assert_eq!(record.external_id, "m-1");
        assert_eq!(record.start_time, 42);
        assert_eq!(record.first_seen, 1_000);
        assert_eq!(record.last_seen, 1_000);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn defaults_when_agent_sends_nothing() {
        let mut registry = DeviceRegistry::new();
        let (record, _) =
            registry.upsert_on_register(&id("agentA"), Registration::default(), 7_000);

        assert_eq!(record.external_id, UNKNOWN_EXTERNAL_ID);
        assert_eq!(record.start_time, 7_000);
    }

    #[test]
    fn reregistration_keeps_original_metadata() {
        let mut registry = DeviceRegistry::new();
        registry.upsert_on_register(&id("agentA"), registration("m-1"), 1_000);
        registry.mark_offline(&id("agentA"), 2_000, "remote_close:1000");

        let (record, first_time) = registry.upsert_on_register(
            &id("agentA"),
            Registration {
                external_id: Some("m-2".to_string()),
                start_time: Some(99),
                remote_address: Some("10.1.1.1:1".to_string()),
            },
            3_000,
        );

        assert!(!first_time);
        assert!(record.active);
        assert_eq!(record.external_id, "m-1");
        assert_eq!(record.start_time, 42);
        assert_eq!(record.first_seen, 1_000);
        assert_eq!(record.last_seen, 3_000);
        assert_eq!(record.remote_address.as_deref(), Some("10.1.1.1:1"));
        assert!(record.last_disconnect_reason.is_none());
    }

    #[test]
    fn heartbeat_and_offline_ignore_unknown_identities() {
        let mut registry = DeviceRegistry::new();
        registry.mark_heartbeat(&id("ghost"), 1_000);
        registry.mark_offline(&id("ghost"), 1_000, "heartbeat_timeout");
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn mark_offline_records_reason() {
        let mut registry = DeviceRegistry::new();
        registry.upsert_on_register(&id("agentA"), registration("m-1"), 1_000);
        registry.mark_offline(&id("agentA"), 5_000, "heartbeat_timeout");

        let record = registry.get("agentA").unwrap();
        assert!(!record.active);
        assert_eq!(record.last_seen, 5_000);
        assert_eq!(
            record.last_disconnect_reason.as_deref(),
            Some("heartbeat_timeout")
        );
    }

    #[test]
    fn last_seen_never_decreases() {
        let mut registry = DeviceRegistry::new();
        registry.upsert_on_register(&id("agentA"), registration("m-1"), 5_000);
        registry.mark_heartbeat(&id("agentA"), 4_000);
        assert_eq!(registry.get("agentA").unwrap().last_seen, 5_000);

        registry.upsert_on_register(&id("agentA"), registration("m-1"), 3_000);
        assert_eq!(registry.get("agentA").unwrap().last_seen, 5_000);

        registry.mark_heartbeat(&id("agentA"), 6_000);
        assert_eq!(registry.get("agentA").unwrap().last_seen, 6_000);
    }

    #[test]
    fn list_active_and_counts() {
        let mut registry = DeviceRegistry::new();
        registry.upsert_on_register(&id("charlie"), Registration::default(), 1);
        registry.upsert_on_register(&id("alpha"), Registration::default(), 1);
        registry.upsert_on_register(&id("bravo"), Registration::default(), 1);
        registry.mark_offline(&id("bravo"), 2, "remote_close:1000");

        assert_eq!(registry.list_active(), vec![id("alpha"), id("charlie")]);
        assert_eq!(registry.count(), 3);
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn from_snapshot_forces_inactive() {
        let mut registry = DeviceRegistry::new();
        registry.upsert_on_register(&id("agentA"), registration("m-1"), 1_000);
        registry.upsert_on_register(&id("agentB"), registration("m-2"), 1_000);

        let restored = DeviceRegistry::from_snapshot(registry.snapshot());
        assert_eq!(restored.count(), 2);
        assert!(restored.list_active().is_empty());
        assert!(restored.iter().all(|(_, record)| !record.active));
    }
}
