use std::collections::VecDeque;

use rand::Rng;
use slab::Slab;

use crate::callback::ConflictObserver;
use crate::clock::Timeval;
use crate::config::EngineConfig;
use crate::hash::{bucket_of, SPRIME};
use crate::resource::{Rdata, RecordType, Resource, Srv};

pub type RecordId = usize;

/// How far along a unique name is in claiming itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uniqueness {
    /// A shared record: no claim to make, multiple hosts may answer for it.
    Shared,
    /// Probing round `n` (1..=4) of the tentative claim.
    Probing(u8),
    /// The name has finished probing and is now asserted as this host's own.
    Claimed,
}

/// Which scheduler queue a record currently sits on. A record is on at most
/// one queue at a time, tracked explicitly here rather than via a shared
/// intrusive list pointer reused across all four queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Now,
    Pause,
    Publish,
    Probing,
}

pub struct PublishedRecord {
    pub name: String,
    pub rtype: RecordType,
    pub ttl: u32,
    pub rdata: Rdata,
    pub uniqueness: Uniqueness,
    pub tries: u8,
    pub on_queue: Option<Queue>,
    due: Timeval,
    conflict: Option<Box<dyn ConflictObserver>>,
}

impl PublishedRecord {
    pub fn resource(&self) -> Resource {
        Resource {
            name: self.name.clone(),
            rtype: self.rtype,
            ttl: self.ttl,
            rdata: self.rdata.clone(),
        }
    }

    pub fn is_unique(&self) -> bool {
        !matches!(self.uniqueness, Uniqueness::Shared)
    }
}

/// The published-record store: every resource this instance answers for on
/// its own behalf, plus the four scheduler queues that decide when each one
/// next goes out.
pub struct Store {
    records: Slab<PublishedRecord>,
    buckets: Vec<Vec<RecordId>>,
    pub a_now: VecDeque<RecordId>,
    pub a_pause: VecDeque<RecordId>,
    pub a_publish: VecDeque<RecordId>,
    pub probing: VecDeque<RecordId>,
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store {
            records: Slab::new(),
            buckets: vec![Vec::new(); SPRIME],
            a_now: VecDeque::new(),
            a_pause: VecDeque::new(),
            a_publish: VecDeque::new(),
            probing: VecDeque::new(),
        }
    }

    pub fn get(&self, id: RecordId) -> Option<&PublishedRecord> {
        self.records.get(id)
    }

    /// Every record in `name`'s bucket, narrowed to ones matching `rtype` (or
    /// any, for `RecordType::Any` questions — in either direction, since a
    /// published `ANY` record would also answer a specific-type question).
    pub fn matching<'a>(
        &'a self,
        name: &'a str,
        rtype: RecordType,
    ) -> impl Iterator<Item = RecordId> + 'a {
        let bucket = bucket_of(name, SPRIME);
        self.buckets[bucket].iter().copied().filter(move |&id| {
            let rec = &self.records[id];
            rec.name.eq_ignore_ascii_case(name)
                && (rec.rtype == rtype || rtype == RecordType::Any || rec.rtype == RecordType::Any)
        })
    }

    fn queue_of(&mut self, queue: Queue) -> &mut VecDeque<RecordId> {
        match queue {
            Queue::Now => &mut self.a_now,
            Queue::Pause => &mut self.a_pause,
            Queue::Publish => &mut self.a_publish,
            Queue::Probing => &mut self.probing,
        }
    }

    fn move_to_queue(&mut self, id: RecordId, queue: Queue, due: Timeval) {
        let current = self.records[id].on_queue;
        if current != Some(queue) {
            if let Some(old) = current {
                let q = self.queue_of(old);
                if let Some(pos) = q.iter().position(|&x| x == id) {
                    q.remove(pos);
                }
            }
            self.queue_of(queue).push_back(id);
        }
        self.records[id].on_queue = Some(queue);
        self.records[id].due = due;
    }

    fn unlink_from_queue(&mut self, id: RecordId) {
        if let Some(queue) = self.records[id].on_queue {
            let q = self.queue_of(queue);
            if let Some(pos) = q.iter().position(|&x| x == id) {
                q.remove(pos);
            }
        }
        self.records[id].on_queue = None;
    }

    fn insert(&mut self, name: &str, rtype: RecordType, uniqueness: Uniqueness, now: Timeval) -> RecordId {
        let id = self.records.insert(PublishedRecord {
            name: name.to_string(),
            rtype,
            ttl: 0,
            rdata: Rdata::Empty,
            uniqueness,
            tries: 0,
            on_queue: None,
            due: now,
            conflict: None,
        });
        self.buckets[bucket_of(name, SPRIME)].push(id);
        id
    }

    /// Allocates a shared record: no probing, answerable as soon as rdata is
    /// set and [`Store::publish_record`] runs.
    pub fn alloc_shared(&mut self, name: &str, rtype: RecordType, ttl: u32, now: Timeval) -> RecordId {
        let id = self.insert(name, rtype, Uniqueness::Shared, now);
        self.records[id].ttl = ttl;
        id
    }

    /// Allocates a unique record and immediately arms its first probe round.
    pub fn alloc_unique(
        &mut self,
        name: &str,
        rtype: RecordType,
        ttl: u32,
        conflict: impl ConflictObserver + 'static,
        now: Timeval,
    ) -> RecordId {
        let id = self.insert(name, rtype, Uniqueness::Probing(1), now);
        self.records[id].ttl = ttl;
        self.records[id].conflict = Some(Box::new(conflict));
        self.move_to_queue(id, Queue::Probing, now);
        id
    }

    pub fn set_raw(&mut self, id: RecordId, rdata: Vec<u8>, now: Timeval) {
        self.records[id].rdata = Rdata::Raw(rdata);
        self.publish_record(id, now);
    }

    pub fn set_host(&mut self, id: RecordId, target: &str, now: Timeval) {
        self.records[id].rdata = Rdata::Name(target.to_string());
        self.publish_record(id, now);
    }

    pub fn set_ip(&mut self, id: RecordId, ip: std::net::Ipv4Addr, now: Timeval) {
        self.records[id].rdata = Rdata::Ip(ip);
        self.publish_record(id, now);
    }

    pub fn set_srv(&mut self, id: RecordId, priority: u16, weight: u16, port: u16, target: &str, now: Timeval) {
        self.records[id].rdata = Rdata::Srv {
            target: target.to_string(),
            srv: Srv { priority, weight, port },
        };
        self.publish_record(id, now);
    }

    /// Arms (or re-arms) a record's announce cycle. A record still probing
    /// does nothing here: it cannot be announced until its claim succeeds.
    pub fn publish_record(&mut self, id: RecordId, now: Timeval) {
        if matches!(self.records[id].uniqueness, Uniqueness::Probing(_)) {
            return;
        }
        self.records[id].tries = 0;
        self.move_to_queue(id, Queue::Publish, now);
    }

    /// Called while walking `a_publish` in the emit pipeline: advances a
    /// record one retry step, appending it to the queue again if it hasn't
    /// finished its announce cycle, otherwise leaving it established (off
    /// every queue).
    pub fn advance_publish(&mut self, id: RecordId, now: Timeval, config: &EngineConfig) {
        let rec = &mut self.records[id];
        rec.tries += 1;
        if rec.tries >= config.max_publish_tries {
            self.unlink_from_queue(id);
        } else {
            let due = now.add_secs(config.publish_retry_secs);
            self.move_to_queue(id, Queue::Publish, due);
        }
    }

    /// Called from the ingest pipeline when an inbound question matches this
    /// published record and it should be answered. Unique records that have
    /// finished announcing reply immediately; shared records reply after a
    /// random delay to avoid synchronized responses from other responders.
    pub fn send_record(&mut self, id: RecordId, now: Timeval, config: &EngineConfig, rng: &mut impl Rng) {
        let (tries, is_unique) = {
            let rec = &self.records[id];
            (rec.tries, rec.is_unique())
        };
        if tries < config.max_publish_tries {
            self.move_to_queue(id, Queue::Publish, now);
            return;
        }
        if is_unique {
            self.move_to_queue(id, Queue::Now, now);
        } else {
            let delay_ms = rng.gen_range(config.shared_delay_min_ms..=config.shared_delay_max_ms);
            let due = now.add_micros(delay_ms * 1000);
            self.move_to_queue(id, Queue::Pause, due);
        }
    }

    /// Retires a record: a still-probing one is discarded outright (it was
    /// never announced, so no one needs to hear it's gone); an established
    /// one has its ttl zeroed and is routed through
    /// [`Store::send_record`], the same path an ordinary answer takes, so
    /// the goodbye still obeys the tries-remaining and unique-vs-shared
    /// anti-collision rules instead of jumping the queue.
    pub fn done(&mut self, id: RecordId, now: Timeval, config: &EngineConfig, rng: &mut impl Rng) {
        if matches!(self.records[id].uniqueness, Uniqueness::Probing(_)) {
            self.remove(id);
            return;
        }
        self.records[id].ttl = 0;
        self.send_record(id, now, config, rng);
    }

    fn remove(&mut self, id: RecordId) {
        self.unlink_from_queue(id);
        let name = self.records[id].name.clone();
        let bucket = bucket_of(&name, SPRIME);
        if let Some(pos) = self.buckets[bucket].iter().position(|&x| x == id) {
            self.buckets[bucket].remove(pos);
        }
        self.records.remove(id);
    }

    /// Frees a record already written out with ttl 0 (goodbye), or one
    /// conceded during probing due to a conflict.
    pub fn free(&mut self, id: RecordId) {
        self.remove(id);
    }

    /// Every id currently held in the store, regardless of queue.
    pub fn all_ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|(id, _)| id).collect()
    }

    /// Re-arms an established record to probe again from round 1, for a
    /// network-change flush: unique names must be reasserted once the
    /// network they were claimed on is no longer reachable.
    pub fn restart_probing(&mut self, id: RecordId, now: Timeval) {
        self.records[id].uniqueness = Uniqueness::Probing(1);
        self.records[id].tries = 0;
        self.move_to_queue(id, Queue::Probing, now);
    }

    /// Re-queues a probing record (already popped off `probing` by
    /// [`Store::pop_due`]) for its next round at `due`.
    pub fn requeue_probe(&mut self, id: RecordId, due: Timeval) {
        self.move_to_queue(id, Queue::Probing, due);
    }

    pub fn pop_due(&mut self, queue: Queue, now: Timeval) -> Option<RecordId> {
        let q = self.queue_of(queue);
        let front = *q.front()?;
        if self.records[front].due <= now {
            q.pop_front();
            self.records[front].on_queue = None;
            Some(front)
        } else {
            None
        }
    }

    pub fn peek_due(&self, queue: &VecDeque<RecordId>) -> Option<Timeval> {
        queue.front().map(|&id| self.records[id].due)
    }

    /// Advances a probing record one round. Returns `true` once it has
    /// finished all four rounds and should be converted to `Claimed` and
    /// handed to [`Store::publish_record`] by the caller.
    pub fn advance_probe(&mut self, id: RecordId) -> bool {
        match self.records[id].uniqueness {
            Uniqueness::Probing(4) => {
                self.records[id].uniqueness = Uniqueness::Claimed;
                true
            }
            Uniqueness::Probing(n) => {
                self.records[id].uniqueness = Uniqueness::Probing(n + 1);
                false
            }
            _ => false,
        }
    }

    pub fn notify_conflict(&mut self, id: RecordId, now: Timeval, config: &EngineConfig, rng: &mut impl Rng) {
        let (name, rtype) = {
            let rec = &self.records[id];
            (rec.name.clone(), rec.rtype)
        };
        if let Some(mut conflict) = self.records[id].conflict.take() {
            conflict.on_conflict(&name, rtype);
        }
        self.done(id, now, config, rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::RecordType;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn t(sec: u64) -> Timeval {
        Timeval::from_secs(sec)
    }

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(42)
    }

    #[test]
    fn shared_record_goes_straight_to_publish_queue() {
        let mut store = Store::new();
        let id = store.alloc_shared("host.local", RecordType::A, 120, t(0));
        store.set_ip(id, std::net::Ipv4Addr::new(10, 0, 0, 1), t(0));
        assert_eq!(store.get(id).unwrap().on_queue, Some(Queue::Publish));
    }

    #[test]
    fn unique_record_starts_probing_and_does_not_publish_early() {
        let mut store = Store::new();
        let id = store.alloc_unique("host.local", RecordType::A, 120, |_: &str, _: RecordType| {}, t(0));
        store.set_ip(id, std::net::Ipv4Addr::new(10, 0, 0, 1), t(0));
        assert_eq!(store.get(id).unwrap().on_queue, Some(Queue::Probing));
        assert!(matches!(store.get(id).unwrap().uniqueness, Uniqueness::Probing(1)));
    }

    #[test]
    fn probing_completes_after_four_rounds() {
        let mut store = Store::new();
        let id = store.alloc_unique("host.local", RecordType::A, 120, |_: &str, _: RecordType| {}, t(0));
        assert!(!store.advance_probe(id));
        assert!(!store.advance_probe(id));
        assert!(!store.advance_probe(id));
        assert!(store.advance_probe(id));
        assert!(matches!(store.get(id).unwrap().uniqueness, Uniqueness::Claimed));
    }

    #[test]
    fn done_while_probing_frees_without_goodbye() {
        let mut store = Store::new();
        let id = store.alloc_unique("host.local", RecordType::A, 120, |_: &str, _: RecordType| {}, t(0));
        store.done(id, t(1), &cfg(), &mut rng());
        assert!(store.get(id).is_none());
    }

    #[test]
    fn done_after_claim_queues_goodbye() {
        let config = cfg();
        let mut store = Store::new();
        let id = store.alloc_unique("host.local", RecordType::A, 120, |_: &str, _: RecordType| {}, t(0));
        store.advance_probe(id);
        store.advance_probe(id);
        store.advance_probe(id);
        store.advance_probe(id);
        store.publish_record(id, t(0));
        for _ in 0..config.max_publish_tries {
            store.advance_publish(id, t(0), &config);
        }
        assert_eq!(store.get(id).unwrap().on_queue, None);
        store.done(id, t(5), &config, &mut rng());
        assert_eq!(store.get(id).unwrap().ttl, 0);
        assert_eq!(store.get(id).unwrap().on_queue, Some(Queue::Now));
    }

    #[test]
    fn shared_record_goodbye_pauses_for_anti_collision_delay() {
        let config = cfg();
        let mut store = Store::new();
        let id = store.alloc_shared("host.local", RecordType::A, 120, t(0));
        store.set_ip(id, std::net::Ipv4Addr::new(10, 0, 0, 1), t(0));
        for _ in 0..config.max_publish_tries {
            store.advance_publish(id, t(0), &config);
        }
        assert_eq!(store.get(id).unwrap().on_queue, None);
        store.done(id, t(5), &config, &mut rng());
        assert_eq!(store.get(id).unwrap().ttl, 0);
        assert_eq!(store.get(id).unwrap().on_queue, Some(Queue::Pause));
    }
}
