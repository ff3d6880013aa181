//! Lease records and the per-family lease tables.
//!
//! The v4 table is keyed by the client identity (option 61 when present,
//! otherwise the hardware address), hex-encoded. The v6 table is two-level:
//! DUID, then IAID, because one client may hold bindings under several
//! identity associations.
//!
//! Expiry is pull-based. Nothing in here reads a clock; callers pass `now`
//! and the tables only compare.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// Colon-separated lowercase hex, used for table keys and log lines.
pub fn format_client_id(id: &[u8]) -> String {
    id.iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(":")
}

#[derive(Debug, Clone, Serialize)]
pub struct Lease4 {
    pub ip_address: Ipv4Addr,
    pub mac_address: String,
    /// Hex-encoded client identity; also the table key.
    pub client_id: String,
    pub hostname: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Client-supplied context worth remembering, e.g. vendor class (60).
    pub extra_options: Vec<(u16, Vec<u8>)>,
}

impl Lease4 {
    pub fn new(
        ip_address: Ipv4Addr,
        mac_address: String,
        client_id: String,
        duration_seconds: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            ip_address,
            mac_address,
            client_id,
            hostname: None,
            expires_at: now + TimeDelta::seconds(i64::from(duration_seconds)),
            created_at: now,
            last_seen: now,
            extra_options: Vec::new(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn renew(&mut self, duration_seconds: u32, now: DateTime<Utc>) {
        self.expires_at = now + TimeDelta::seconds(i64::from(duration_seconds));
        self.last_seen = now;
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Lease6 {
    pub address: Ipv6Addr,
    pub duid: Vec<u8>,
    pub iaid: u32,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Unrecognised IAADDR sub-options carried through from the client.
    pub extra_options: Vec<(u16, Vec<u8>)>,
}

impl Lease6 {
    pub fn new(
        address: Ipv6Addr,
        duid: Vec<u8>,
        iaid: u32,
        preferred_lifetime: u32,
        valid_lifetime: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            address,
            duid,
            iaid,
            preferred_lifetime,
            valid_lifetime,
            expires_at: now + TimeDelta::seconds(i64::from(valid_lifetime)),
            created_at: now,
            extra_options: Vec::new(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn renew(&mut self, valid_lifetime: u32, now: DateTime<Utc>) {
        self.valid_lifetime = valid_lifetime;
        self.expires_at = now + TimeDelta::seconds(i64::from(valid_lifetime));
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeaseSet4 {
    by_client: HashMap<String, Lease4>,
}

impl LeaseSet4 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Lease4> {
        self.by_client.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Lease4> {
        self.by_client.get_mut(key)
    }

    pub fn insert(&mut self, lease: Lease4) {
        self.by_client.insert(lease.client_id.clone(), lease);
    }

    pub fn remove(&mut self, key: &str) -> Option<Lease4> {
        self.by_client.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lease4> {
        self.by_client.values()
    }

    pub fn len(&self) -> usize {
        self.by_client.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_client.is_empty()
    }

    /// Keys of leases whose `expires_at <= now`.
    pub fn expired_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        self.by_client
            .iter()
            .filter(|(_, lease)| lease.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeaseSet6 {
    by_duid: HashMap<Vec<u8>, HashMap<u32, Lease6>>,
}

impl LeaseSet6 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, duid: &[u8], iaid: u32) -> Option<&Lease6> {
        self.by_duid.get(duid).and_then(|bindings| bindings.get(&iaid))
    }

    pub fn get_mut(&mut self, duid: &[u8], iaid: u32) -> Option<&mut Lease6> {
        self.by_duid
            .get_mut(duid)
            .and_then(|bindings| bindings.get_mut(&iaid))
    }

    pub fn insert(&mut self, lease: Lease6) {
        self.by_duid
            .entry(lease.duid.clone())
            .or_default()
            .insert(lease.iaid, lease);
    }

    pub fn remove(&mut self, duid: &[u8], iaid: u32) -> Option<Lease6> {
        let bindings = self.by_duid.get_mut(duid)?;
        let removed = bindings.remove(&iaid);
        if bindings.is_empty() {
            self.by_duid.remove(duid);
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lease6> {
        self.by_duid.values().flat_map(|bindings| bindings.values())
    }

    pub fn len(&self) -> usize {
        self.by_duid.values().map(|bindings| bindings.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_duid.is_empty()
    }

    /// (duid, iaid) pairs of leases whose `expires_at <= now`.
    pub fn expired_keys(&self, now: DateTime<Utc>) -> Vec<(Vec<u8>, u32)> {
        self.by_duid
            .iter()
            .flat_map(|(duid, bindings)| {
                bindings
                    .values()
                    .filter(|lease| lease.is_expired(now))
                    .map(|lease| (duid.clone(), lease.iaid))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_format_client_id() {
        assert_eq!(format_client_id(&[0x01, 0xaa, 0xbb]), "01:aa:bb");
        assert_eq!(format_client_id(&[]), "");
    }

    #[test]
    fn test_lease4_expiry_and_renewal() {
        let now = epoch();
        let mut lease = Lease4::new(
            Ipv4Addr::new(192, 168, 1, 100),
            "aa:bb:cc:dd:ee:ff".to_string(),
            "01:aa:bb:cc:dd:ee:ff".to_string(),
            3600,
            now,
        );

        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + TimeDelta::seconds(3600)));
        assert_eq!(lease.remaining_seconds(now), 3600);

        let later = now + TimeDelta::seconds(1800);
        lease.renew(3600, later);
        assert_eq!(lease.remaining_seconds(later), 3600);
        assert_eq!(lease.last_seen, later);
    }

    #[test]
    fn test_lease6_two_level_table() {
        let now = epoch();
        let duid = b"test-client-duid".to_vec();
        let mut set = LeaseSet6::new();

        set.insert(Lease6::new(
            "2001:db8::1000".parse().unwrap(),
            duid.clone(),
            12345,
            1800,
            3600,
            now,
        ));
        set.insert(Lease6::new(
            "2001:db8::1001".parse().unwrap(),
            duid.clone(),
            99,
            1800,
            3600,
            now,
        ));

        assert_eq!(set.len(), 2);
        assert!(set.get(&duid, 12345).is_some());
        assert!(set.get(&duid, 99).is_some());
        assert!(set.get(b"other-duid", 12345).is_none());

        set.remove(&duid, 12345).unwrap();
        assert_eq!(set.len(), 1);
        set.remove(&duid, 99).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_expired_key_sweeping() {
        let now = epoch();
        let mut set = LeaseSet4::new();
        let mut fresh = Lease4::new(
            Ipv4Addr::new(192, 168, 1, 100),
            "aa:bb:cc:dd:ee:01".to_string(),
            "01:aa".to_string(),
            3600,
            now,
        );
        fresh.expires_at = now + TimeDelta::seconds(10);
        let mut stale = Lease4::new(
            Ipv4Addr::new(192, 168, 1, 101),
            "aa:bb:cc:dd:ee:02".to_string(),
            "01:bb".to_string(),
            3600,
            now,
        );
        stale.expires_at = now;
        set.insert(fresh);
        set.insert(stale);

        let expired = set.expired_keys(now);
        assert_eq!(expired, vec!["01:bb".to_string()]);
    }
}
