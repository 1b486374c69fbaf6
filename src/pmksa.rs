//! PMKSA cache
//!
//! Cached PMKs indexed three ways over one arena of entries:
//! - by expiration (ordered; expiry sweep and eviction)
//! - by PMKID (fast lookup while validating a station's RSN IE)
//! - by station address (at most one current entry per station)
//!
//! Entries are referenced by [`EntryId`] handles, so removing an entry can
//! never leave an index pointing at freed memory.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use crate::crypto::prf::{self, Pmkid, PMK_LEN};
use crate::error::PmksaError;
use crate::protocol::suites::{mac_to_string, Akm, MacAddr};

/// Default PMK lifetime (dot11RSNAConfigPMKLifetime)
pub const DEFAULT_PMK_LIFETIME: Duration = Duration::from_secs(43200);

/// Default maximum number of cached entries
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Longest lifetime accepted from a Session-Timeout (32-bit seconds)
pub const MAX_PMK_LIFETIME: Duration = Duration::from_secs(u32::MAX as u64);

/// Stable handle to a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

/// Attributes from the authentication layer cached alongside the PMK
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PmksaAttrs {
    pub identity: Option<Vec<u8>>,
    pub radius_class: Option<Vec<u8>>,
    pub vlan_id: u16,
}

/// One cached PMK security association
#[derive(Clone)]
pub struct PmksaEntry {
    pub pmkid: Pmkid,
    pub pmk: [u8; PMK_LEN],
    pub spa: MacAddr,
    pub akm: Akm,
    pub expiration: Instant,
    pub attrs: PmksaAttrs,
}

impl std::fmt::Debug for PmksaEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PmksaEntry")
            .field("pmkid", &hex::encode(self.pmkid))
            .field("spa", &mac_to_string(&self.spa))
            .field("akm", &self.akm)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// Result of a successful insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmksaAdded {
    pub id: EntryId,
    pub pmkid: Pmkid,
    /// Entries dropped to make room (same station or capacity eviction)
    pub removed: Vec<EntryId>,
}

/// Bounded PMKSA cache
#[derive(Debug)]
pub struct PmksaCache {
    entries: HashMap<EntryId, PmksaEntry>,
    by_expiry: BTreeSet<(Instant, EntryId)>,
    by_pmkid: HashMap<Pmkid, EntryId>,
    by_sta: HashMap<MacAddr, EntryId>,
    next_id: u64,
    max_entries: usize,
    default_lifetime: Duration,
}

impl Default for PmksaCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_PMK_LIFETIME)
    }
}

impl PmksaCache {
    pub fn new(max_entries: usize, default_lifetime: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            by_expiry: BTreeSet::new(),
            by_pmkid: HashMap::new(),
            by_sta: HashMap::new(),
            next_id: 0,
            max_entries: max_entries.max(1),
            default_lifetime,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache a PMK for `spa`
    ///
    /// A missing or zero `session_timeout` means the configured default
    /// lifetime. Any existing entry for the station is replaced; when the
    /// cache is full the entry expiring soonest is evicted. On allocation
    /// failure nothing is changed.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        pmk: &[u8; PMK_LEN],
        aa: &MacAddr,
        spa: &MacAddr,
        akm: Akm,
        session_timeout: Option<Duration>,
        attrs: PmksaAttrs,
        now: Instant,
    ) -> Result<PmksaAdded, PmksaError> {
        self.entries
            .try_reserve(1)
            .map_err(|_| PmksaError::AllocationFailed)?;
        self.by_pmkid
            .try_reserve(1)
            .map_err(|_| PmksaError::AllocationFailed)?;
        self.by_sta
            .try_reserve(1)
            .map_err(|_| PmksaError::AllocationFailed)?;

        let lifetime = match session_timeout {
            Some(t) if !t.is_zero() => t.min(MAX_PMK_LIFETIME),
            _ => self.default_lifetime,
        };
        let expiration = now
            .checked_add(lifetime)
            .ok_or(PmksaError::LifetimeOutOfRange)?;
        let pmkid = prf::pmkid(pmk, aa, spa);

        let mut removed = Vec::new();
        if let Some(old) = self.by_sta.get(spa).copied() {
            self.remove(old);
            removed.push(old);
        }
        if let Some(old) = self.by_pmkid.get(&pmkid).copied() {
            self.remove(old);
            removed.push(old);
        }
        while self.entries.len() >= self.max_entries {
            let Some(&(_, oldest)) = self.by_expiry.iter().next() else {
                break;
            };
            tracing::debug!(
                "PMKSA cache full, evicting entry for {}",
                self.entries
                    .get(&oldest)
                    .map(|e| mac_to_string(&e.spa))
                    .unwrap_or_default()
            );
            self.remove(oldest);
            removed.push(oldest);
        }

        let id = EntryId(self.next_id);
        self.next_id += 1;

        self.entries.insert(
            id,
            PmksaEntry {
                pmkid,
                pmk: *pmk,
                spa: *spa,
                akm,
                expiration,
                attrs,
            },
        );
        self.by_expiry.insert((expiration, id));
        self.by_pmkid.insert(pmkid, id);
        self.by_sta.insert(*spa, id);

        tracing::debug!(
            "Added PMKSA cache entry for {} (lifetime {}s)",
            mac_to_string(spa),
            lifetime.as_secs()
        );
        tracing::trace!("PMKID {}", hex::encode(pmkid));

        Ok(PmksaAdded { id, pmkid, removed })
    }

    pub fn get(&self, id: EntryId) -> Option<&PmksaEntry> {
        self.entries.get(&id)
    }

    /// Find the entry for `spa` whose PMKID matches
    pub fn lookup(&self, spa: &MacAddr, pmkid: &Pmkid) -> Option<EntryId> {
        let id = *self.by_pmkid.get(pmkid)?;
        let entry = self.entries.get(&id)?;
        (entry.spa == *spa).then_some(id)
    }

    pub fn lookup_pmkid(&self, pmkid: &Pmkid) -> Option<&PmksaEntry> {
        self.by_pmkid.get(pmkid).and_then(|id| self.entries.get(id))
    }

    pub fn lookup_sta(&self, spa: &MacAddr) -> Option<&PmksaEntry> {
        self.by_sta.get(spa).and_then(|id| self.entries.get(id))
    }

    /// Drop every entry cached for `spa`
    pub fn remove_all_for_sta(&mut self, spa: &MacAddr) -> Vec<EntryId> {
        let ids: Vec<EntryId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.spa == *spa)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.remove(*id);
        }
        ids
    }

    /// Remove entries whose expiration is at or before `now`
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<EntryId> {
        let mut removed = Vec::new();
        while let Some(&(expiration, id)) = self.by_expiry.iter().next() {
            if expiration > now {
                break;
            }
            if let Some(entry) = self.entries.get(&id) {
                tracing::debug!("PMKSA cache entry for {} expired", mac_to_string(&entry.spa));
            }
            self.remove(id);
            removed.push(id);
        }
        removed
    }

    /// Soonest expiration, for arming the sweep timer
    pub fn next_expiration(&self) -> Option<Instant> {
        self.by_expiry.iter().next().map(|(t, _)| *t)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &PmksaEntry)> {
        self.by_expiry
            .iter()
            .filter_map(|(_, id)| self.entries.get(id).map(|e| (*id, e)))
    }

    pub fn remove(&mut self, id: EntryId) -> Option<PmksaEntry> {
        let entry = self.entries.remove(&id)?;
        self.by_expiry.remove(&(entry.expiration, id));
        if self.by_pmkid.get(&entry.pmkid) == Some(&id) {
            self.by_pmkid.remove(&entry.pmkid);
        }
        if self.by_sta.get(&entry.spa) == Some(&id) {
            self.by_sta.remove(&entry.spa);
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const AA: MacAddr = [0x02, 0, 0, 0, 0, 0x01];

    fn sta(n: u8) -> MacAddr {
        [0x02, 0, 0, 0, 1, n]
    }

    fn add(cache: &mut PmksaCache, n: u8, timeout: u64, now: Instant) -> PmksaAdded {
        cache
            .add(
                &[n; 32],
                &AA,
                &sta(n),
                Akm::Ieee8021x,
                Some(Duration::from_secs(timeout)),
                PmksaAttrs::default(),
                now,
            )
            .unwrap()
    }

    #[test]
    fn test_lookup_after_add() {
        let now = Instant::now();
        let mut cache = PmksaCache::default();
        let added = add(&mut cache, 1, 100, now);

        assert_eq!(added.pmkid, prf::pmkid(&[1; 32], &AA, &sta(1)));
        assert_eq!(cache.lookup(&sta(1), &added.pmkid), Some(added.id));
        assert_eq!(cache.lookup(&sta(2), &added.pmkid), None);
        assert_eq!(cache.lookup_pmkid(&added.pmkid).unwrap().spa, sta(1));
        assert_eq!(cache.lookup_sta(&sta(1)).unwrap().pmk, [1; 32]);
    }

    #[test]
    fn test_replaces_station_entry() {
        let now = Instant::now();
        let mut cache = PmksaCache::default();
        let first = add(&mut cache, 1, 100, now);
        let second = cache
            .add(
                &[9; 32],
                &AA,
                &sta(1),
                Akm::Ieee8021x,
                None,
                PmksaAttrs::default(),
                now,
            )
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(second.removed, vec![first.id]);
        assert!(cache.lookup_pmkid(&first.pmkid).is_none());
    }

    #[test]
    fn test_eviction_removes_soonest_expiration() {
        let now = Instant::now();
        let mut cache = PmksaCache::new(2, DEFAULT_PMK_LIFETIME);
        let long = add(&mut cache, 1, 500, now);
        let short = add(&mut cache, 2, 10, now);
        let third = add(&mut cache, 3, 300, now);

        assert_eq!(third.removed, vec![short.id]);
        assert!(cache.get(long.id).is_some());
        assert!(cache.get(short.id).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_session_timeout_uses_default_lifetime() {
        let now = Instant::now();
        let mut cache = PmksaCache::default();
        let added = cache
            .add(
                &[1; 32],
                &AA,
                &sta(1),
                Akm::Ieee8021x,
                Some(Duration::ZERO),
                PmksaAttrs::default(),
                now,
            )
            .unwrap();

        let entry = cache.get(added.id).unwrap();
        assert_eq!(entry.expiration, now + DEFAULT_PMK_LIFETIME);
        assert!(cache.sweep_expired(now + Duration::from_secs(1)).is_empty());
        assert_eq!(cache.next_expiration(), Some(now + DEFAULT_PMK_LIFETIME));
    }

    #[test]
    fn test_huge_session_timeout_is_clamped() {
        let now = Instant::now();
        let mut cache = PmksaCache::default();
        let added = cache
            .add(
                &[1; 32],
                &AA,
                &sta(1),
                Akm::Ieee8021x,
                Some(Duration::MAX),
                PmksaAttrs::default(),
                now,
            )
            .unwrap();

        let entry = cache.get(added.id).unwrap();
        assert_eq!(entry.expiration, now + MAX_PMK_LIFETIME);
        assert!(cache.lookup_pmkid(&added.pmkid).is_some());
    }

    #[test]
    fn test_sweep_expired() {
        let now = Instant::now();
        let mut cache = PmksaCache::default();
        let a = add(&mut cache, 1, 10, now);
        let b = add(&mut cache, 2, 20, now);

        assert_eq!(cache.sweep_expired(now + Duration::from_secs(10)), vec![a.id]);
        assert_eq!(cache.next_expiration(), Some(now + Duration::from_secs(20)));
        assert_eq!(cache.sweep_expired(now + Duration::from_secs(60)), vec![b.id]);
        assert!(cache.is_empty());
        assert_eq!(cache.next_expiration(), None);
    }

    #[test]
    fn test_remove_all_for_sta() {
        let now = Instant::now();
        let mut cache = PmksaCache::default();
        let a = add(&mut cache, 1, 10, now);
        add(&mut cache, 2, 10, now);

        assert_eq!(cache.remove_all_for_sta(&sta(1)), vec![a.id]);
        assert!(cache.lookup_sta(&sta(1)).is_none());
        assert_eq!(cache.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_eviction_never_drops_newer(timeouts in proptest::collection::vec(1u64..10_000, 1..40), max in 1usize..8) {
            let now = Instant::now();
            let mut cache = PmksaCache::new(max, DEFAULT_PMK_LIFETIME);
            for (i, timeout) in timeouts.iter().enumerate() {
                let before: Vec<Instant> = cache.iter().map(|(_, e)| e.expiration).collect();
                let added = add(&mut cache, i as u8, *timeout, now);
                prop_assert!(cache.len() <= max);
                prop_assert!(cache.lookup_pmkid(&added.pmkid).is_some());
                if let Some(evicted_max) = before.iter().take(added.removed.len()).max() {
                    for (_, e) in cache.iter() {
                        if e.pmkid != added.pmkid {
                            prop_assert!(e.expiration >= *evicted_max);
                        }
                    }
                }
            }
        }
    }
}
