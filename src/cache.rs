use slab::Slab;

use crate::clock::Timeval;
use crate::config::EngineConfig;
use crate::hash::{bucket_of, LPRIME};
use crate::query::QueryId;
use crate::resource::{RecordType, Resource};

pub type CacheId = usize;

pub struct CacheEntry {
    pub name: String,
    pub rtype: RecordType,
    pub rdata: crate::resource::Rdata,
    pub orig_ttl: u32,
    expires_at: Timeval,
    /// Queries this entry should notify again if it expires; populated by
    /// the ingest pipeline, which is the only place that knows both the
    /// cache and the query registry.
    pub queries: Vec<QueryId>,
}

impl CacheEntry {
    pub fn resource(&self, now: Timeval) -> Resource {
        let remaining = self.expires_at.diff_micros(&now).max(0) / 1_000_000;
        Resource {
            name: self.name.clone(),
            rtype: self.rtype,
            ttl: remaining as u32,
            rdata: self.rdata.clone(),
        }
    }

    pub fn is_expired(&self, now: Timeval) -> bool {
        self.expires_at <= now
    }

    pub fn expires_at(&self) -> Timeval {
        self.expires_at
    }
}

/// An entry removed from the cache (by expiry, a goodbye packet, or a
/// cache-flush rewrite), snapshotted with a zero ttl and its linked queries
/// so the ingest pipeline can notify them the answer is gone.
pub struct ExpiredEntry {
    pub resource: Resource,
    pub queries: Vec<QueryId>,
}

/// Outcome of adding an inbound answer to the cache: entries that were
/// purged (either by a cache-flush rewrite or a goodbye packet) and, unless
/// this was purely a goodbye, the entry that now holds the answer.
pub struct AddOutcome {
    pub expired: Vec<ExpiredEntry>,
    pub added: Option<CacheId>,
}

/// Everything this instance has learned from the network, keyed the same
/// way as the published-record store.
pub struct Cache {
    entries: Slab<CacheEntry>,
    buckets: Vec<Vec<CacheId>>,
}

impl Default for Cache {
    fn default() -> Self {
        Cache::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Cache {
            entries: Slab::new(),
            buckets: vec![Vec::new(); LPRIME],
        }
    }

    pub fn get(&self, id: CacheId) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: CacheId) -> Option<&mut CacheEntry> {
        self.entries.get_mut(id)
    }

    /// Returns the first cache entry for `name`/`rtype` after `last` (or the
    /// first one at all, if `last` is `None`), for a host walking every
    /// known answer for a name.
    pub fn list_cached(&self, name: &str, rtype: RecordType, last: Option<CacheId>) -> Option<(CacheId, &CacheEntry)> {
        let bucket = &self.buckets[bucket_of(name, LPRIME)];
        let mut seen_last = last.is_none();
        for &id in bucket {
            if !seen_last {
                if Some(id) == last {
                    seen_last = true;
                }
                continue;
            }
            let entry = &self.entries[id];
            if entry.name.eq_ignore_ascii_case(name)
                && (entry.rtype == rtype || rtype == RecordType::Any)
            {
                return Some((id, entry));
            }
        }
        None
    }

    fn remove_from_bucket(&mut self, id: CacheId) {
        let name = self.entries[id].name.clone();
        let bucket = bucket_of(&name, LPRIME);
        if let Some(pos) = self.buckets[bucket].iter().position(|&x| x == id) {
            self.buckets[bucket].remove(pos);
        }
    }

    pub fn remove(&mut self, id: CacheId) -> CacheEntry {
        self.remove_from_bucket(id);
        self.entries.remove(id)
    }

    fn expire(&mut self, id: CacheId) -> ExpiredEntry {
        let mut resource = self.entries[id].resource(self.entries[id].expires_at);
        resource.ttl = 0;
        let entry = self.remove(id);
        ExpiredEntry { resource, queries: entry.queries }
    }

    fn matches_rdata(entry: &CacheEntry, resource: &Resource) -> bool {
        entry.rdata == resource.rdata
    }

    /// Folds an inbound answer into the cache: a cache-flush bit marks every
    /// existing same name/type entry (regardless of rdata — this answer is
    /// treated as authoritative for the full rrset) with ttl 0 and expires
    /// it, a ttl of 0 is a goodbye and purges only the exact matching entry,
    /// and anything else either refreshes an existing entry's expiry or
    /// inserts a new one.
    pub fn add(&mut self, resource: &Resource, flush: bool, now: Timeval, config: &EngineConfig) -> AddOutcome {
        let bucket_idx = bucket_of(&resource.name, LPRIME);
        let mut expired = Vec::new();

        if flush || resource.ttl == 0 {
            let candidates: Vec<CacheId> = self.buckets[bucket_idx]
                .iter()
                .copied()
                .filter(|&id| {
                    let entry = &self.entries[id];
                    entry.name.eq_ignore_ascii_case(&resource.name) && entry.rtype == resource.rtype
                })
                .collect();
            for id in candidates {
                let should_expire = if resource.ttl == 0 {
                    Self::matches_rdata(&self.entries[id], resource)
                } else {
                    true
                };
                if should_expire {
                    expired.push(self.expire(id));
                }
            }
        }

        if resource.ttl == 0 {
            return AddOutcome { expired, added: None };
        }

        if let Some(existing) = self.buckets[bucket_idx].iter().copied().find(|&id| {
            let entry = &self.entries[id];
            entry.name.eq_ignore_ascii_case(&resource.name)
                && entry.rtype == resource.rtype
                && Self::matches_rdata(entry, resource)
        }) {
            self.entries[existing].expires_at = Self::haircut(now, resource.ttl, config);
            self.entries[existing].orig_ttl = resource.ttl;
            return AddOutcome { expired, added: Some(existing) };
        }

        let id = self.entries.insert(CacheEntry {
            name: resource.name.clone(),
            rtype: resource.rtype,
            rdata: resource.rdata.clone(),
            orig_ttl: resource.ttl,
            expires_at: Self::haircut(now, resource.ttl, config),
            queries: Vec::new(),
        });
        self.buckets[bucket_idx].insert(0, id);
        AddOutcome { expired, added: Some(id) }
    }

    fn haircut(now: Timeval, ttl: u32, config: &EngineConfig) -> Timeval {
        now.add_secs((ttl / config.cache_ttl_divisor) as u64 + config.cache_ttl_padding_secs as u64)
    }

    /// Sweeps every bucket for entries that have expired, removing them and
    /// returning them so the caller can fire any linked queries with a
    /// zero-ttl answer.
    pub fn gc_all(&mut self, now: Timeval) -> Vec<ExpiredEntry> {
        let due: Vec<CacheId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(id, _)| id)
            .collect();
        due.into_iter().map(|id| self.expire(id)).collect()
    }

    /// Registers `query_id` against the entry so a future expiry notifies it.
    pub fn link_query(&mut self, id: CacheId, query_id: QueryId) {
        if let Some(entry) = self.entries.get_mut(id) {
            if !entry.queries.contains(&query_id) {
                entry.queries.push(query_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Rdata;
    use std::net::Ipv4Addr;

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    fn a_resource(name: &str, ttl: u32, ip: Ipv4Addr) -> Resource {
        Resource {
            name: name.to_string(),
            rtype: RecordType::A,
            ttl,
            rdata: Rdata::Ip(ip),
        }
    }

    #[test]
    fn add_inserts_with_haircut_ttl() {
        let mut cache = Cache::new();
        let now = Timeval::from_secs(1000);
        let outcome = cache.add(&a_resource("host.local", 120, Ipv4Addr::new(10, 0, 0, 1)), false, now, &cfg());
        let id = outcome.added.unwrap();
        let entry = cache.get(id).unwrap();
        assert_eq!(entry.orig_ttl, 120);
        assert!(entry.resource(now).ttl <= 120 / 2 + 8);
    }

    #[test]
    fn goodbye_removes_matching_entry_only() {
        let mut cache = Cache::new();
        let now = Timeval::from_secs(0);
        cache.add(&a_resource("host.local", 120, Ipv4Addr::new(10, 0, 0, 1)), false, now, &cfg());
        let outcome = cache.add(&a_resource("host.local", 0, Ipv4Addr::new(10, 0, 0, 1)), false, now, &cfg());
        assert_eq!(outcome.expired.len(), 1);
        assert!(outcome.added.is_none());
        assert!(cache.list_cached("host.local", RecordType::A, None).is_none());
    }

    #[test]
    fn flush_purges_stale_rdata_for_same_name_type() {
        let mut cache = Cache::new();
        let now = Timeval::from_secs(0);
        cache.add(&a_resource("host.local", 120, Ipv4Addr::new(10, 0, 0, 1)), false, now, &cfg());
        let outcome = cache.add(&a_resource("host.local", 120, Ipv4Addr::new(10, 0, 0, 2)), true, now, &cfg());
        assert_eq!(outcome.expired.len(), 1);
        assert!(outcome.added.is_some());
    }

    #[test]
    fn flush_purges_matching_rdata_too() {
        let mut cache = Cache::new();
        let now = Timeval::from_secs(0);
        cache.add(&a_resource("host.local", 120, Ipv4Addr::new(10, 0, 0, 1)), false, now, &cfg());
        let outcome = cache.add(&a_resource("host.local", 120, Ipv4Addr::new(10, 0, 0, 1)), true, now, &cfg());
        assert_eq!(outcome.expired.len(), 1);
        assert!(outcome.added.is_some());
    }

    #[test]
    fn gc_all_removes_expired_entries() {
        let mut cache = Cache::new();
        let now = Timeval::from_secs(0);
        cache.add(&a_resource("host.local", 2, Ipv4Addr::new(10, 0, 0, 1)), false, now, &cfg());
        let later = now.add_secs(1000);
        let expired = cache.gc_all(later);
        assert_eq!(expired.len(), 1);
    }
}
