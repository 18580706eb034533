use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::cache::{Cache, CacheId};
use crate::callback::{AnswerObserver, ConflictObserver};
use crate::clock::{Clock, SystemClock, Timeval};
use crate::config::EngineConfig;
use crate::query::{QueryId, Registry};
use crate::record::{Queue, RecordId, Store, Uniqueness};
use crate::resource::{RecordType, Resource};
use crate::wire::record::match_answer;
use crate::wire::{Message, MessageBuilder, Question, WireRecord};

/// A unicast reply waiting to go out, snapshotted at enqueue time so it
/// never refers to a record that might be freed before it's sent.
struct PendingUnicastReply {
    resource: Resource,
    cache_flush: bool,
    to_addr: Ipv4Addr,
    dest_port: u16,
    msg_id: u16,
}

/// The whole of one mDNS engine's state: everything a host needs to drive
/// via [`Instance::ingest`], [`Instance::emit`] and [`Instance::sleep_hint`].
/// Not `Sync`: a host embedding this across threads is responsible for its
/// own mutual exclusion, the three entry points already require `&mut self`.
pub struct Instance {
    config: EngineConfig,
    clock: Box<dyn Clock>,
    rng: SmallRng,
    store: Store,
    cache: Cache,
    queries: Registry,
    uanswers: VecDeque<PendingUnicastReply>,
    shutdown: bool,
    checkqlist_due: Timeval,
    expireall_due: Timeval,
}

impl Instance {
    pub fn new(config: EngineConfig) -> Self {
        let clock: Box<dyn Clock> = Box::new(SystemClock);
        let now = clock.now();
        Instance {
            checkqlist_due: now,
            expireall_due: now.add_secs(config.gc_period_secs),
            config,
            clock,
            rng: SmallRng::from_entropy(),
            store: Store::new(),
            cache: Cache::new(),
            queries: Registry::new(),
            uanswers: VecDeque::new(),
            shutdown: false,
        }
    }

    /// Builds an instance with an explicit clock, for deterministic tests.
    pub fn with_clock(config: EngineConfig, clock: Box<dyn Clock>) -> Self {
        let now = clock.now();
        Instance {
            checkqlist_due: now,
            expireall_due: now.add_secs(config.gc_period_secs),
            config,
            clock,
            rng: SmallRng::from_entropy(),
            store: Store::new(),
            cache: Cache::new(),
            queries: Registry::new(),
            uanswers: VecDeque::new(),
            shutdown: false,
        }
    }

    fn now(&self) -> Timeval {
        self.clock.now()
    }

    // ---- public record API -------------------------------------------------

    pub fn alloc_shared(&mut self, name: &str, rtype: RecordType, ttl: u32) -> RecordId {
        let now = self.now();
        self.store.alloc_shared(name, rtype, ttl, now)
    }

    pub fn alloc_unique(
        &mut self,
        name: &str,
        rtype: RecordType,
        ttl: u32,
        conflict: impl ConflictObserver + 'static,
    ) -> RecordId {
        let now = self.now();
        self.store.alloc_unique(name, rtype, ttl, conflict, now)
    }

    pub fn set_raw(&mut self, id: RecordId, rdata: Vec<u8>) {
        let now = self.now();
        self.store.set_raw(id, rdata, now);
    }

    pub fn set_host(&mut self, id: RecordId, target: &str) {
        let now = self.now();
        self.store.set_host(id, target, now);
    }

    pub fn set_ip(&mut self, id: RecordId, ip: Ipv4Addr) {
        let now = self.now();
        self.store.set_ip(id, ip, now);
    }

    pub fn set_srv(&mut self, id: RecordId, priority: u16, weight: u16, port: u16, target: &str) {
        let now = self.now();
        self.store.set_srv(id, priority, weight, port, target, now);
    }

    pub fn done(&mut self, id: RecordId) {
        let now = self.now();
        self.store.done(id, now, &self.config, &mut self.rng);
    }

    // ---- public query API ---------------------------------------------------

    pub fn query(&mut self, name: &str, rtype: RecordType, answer: impl AnswerObserver + 'static) -> QueryId {
        let now = self.now();
        let id = self.queries.query(name, rtype, answer, now);
        self.checkqlist_due = now;

        let mut last = None;
        while let Some((cache_id, entry)) = self.cache.list_cached(name, rtype, last) {
            self.cache.link_query(cache_id, id);
            self.queries.invoke_answer(id, entry.resource(now));
            last = Some(cache_id);
        }
        id
    }

    pub fn cancel_query(&mut self, id: QueryId) {
        self.queries.cancel(id);
    }

    pub fn list_cached(&self, name: &str, rtype: RecordType, last: Option<CacheId>) -> Option<(CacheId, Resource)> {
        let now = self.now();
        self.cache
            .list_cached(name, rtype, last)
            .map(|(id, entry)| (id, entry.resource(now)))
    }

    // ---- lifecycle ------------------------------------------------------

    /// Withdraws every published record (moving each straight to a goodbye
    /// announcement) and marks the instance shut down: further [`Instance::ingest`]
    /// calls are ignored, while [`Instance::emit`] keeps draining the
    /// goodbye queue until it runs dry.
    pub fn shutdown(&mut self) {
        let now = self.now();
        let ids: Vec<RecordId> = self
            .store
            .a_now
            .iter()
            .chain(self.store.a_pause.iter())
            .chain(self.store.a_publish.iter())
            .chain(self.store.probing.iter())
            .copied()
            .collect();
        for id in ids {
            self.store.done(id, now, &self.config, &mut self.rng);
        }
        self.shutdown = true;
    }

    /// Treats the cache as fully stale (as on a network change) without
    /// individually cancelling queries, forces every query to re-ask
    /// immediately, and re-probes every published unique name.
    pub fn flush(&mut self) {
        let now = self.now();

        // Every cache entry is stale on a network change; discard the lot
        // without individually notifying queries (a reset + immediate
        // requery below will repopulate it).
        self.cache.gc_all(now.add_secs(u32::MAX as u64));

        for query_id in self.queries.all_ids() {
            self.queries.reset(query_id, Some(now));
        }
        self.checkqlist_due = now;

        for id in self.store.all_ids() {
            if let Some(rec) = self.store.get(id) {
                if !matches!(rec.uniqueness, Uniqueness::Probing(_)) {
                    self.store.restart_probing(id, now);
                }
            }
        }
    }

    // ---- ingest -----------------------------------------------------------

    #[tracing::instrument(skip(self, msg), fields(src = %src_ip, port = src_port))]
    pub fn ingest(&mut self, msg: &Message, src_ip: Ipv4Addr, src_port: u16) {
        if self.shutdown {
            return;
        }
        if msg.header.response {
            self.ingest_response(msg);
        } else {
            self.ingest_query(msg, src_ip, src_port);
        }
    }

    fn ingest_query(&mut self, msg: &Message, src_ip: Ipv4Addr, src_port: u16) {
        let now = self.now();
        for question in &msg.questions {
            let ids: Vec<RecordId> = self.store.matching(&question.qname, question.qtype).collect();
            for id in ids {
                let (uniqueness, resource) = {
                    let rec = match self.store.get(id) {
                        Some(r) => r,
                        None => continue,
                    };
                    (rec.uniqueness, rec.resource())
                };

                if src_port != 5353 || question.unicast_response {
                    self.uanswers.push_back(PendingUnicastReply {
                        resource: resource.clone(),
                        cache_flush: !matches!(uniqueness, Uniqueness::Shared),
                        to_addr: src_ip,
                        dest_port: src_port,
                        msg_id: msg.header.id,
                    });
                }

                if matches!(uniqueness, Uniqueness::Probing(_)) {
                    let mut may_conflict = false;
                    let mut have_match = false;
                    for authority in &msg.authorities {
                        if authority.resource.name.eq_ignore_ascii_case(&resource.name)
                            && authority.resource.rtype == resource.rtype
                        {
                            may_conflict = true;
                            if match_answer(&resource, &authority.resource) {
                                have_match = true;
                            }
                        }
                    }
                    if may_conflict && !have_match {
                        self.store.notify_conflict(id, now, &self.config, &mut self.rng);
                    }
                } else {
                    let suppressed = msg
                        .answers
                        .iter()
                        .any(|answer| match_answer(&resource, &answer.resource));
                    if !suppressed {
                        self.store.send_record(id, now, &self.config, &mut self.rng);
                    }
                }
            }
        }
    }

    fn ingest_response(&mut self, msg: &Message) {
        let now = self.now();

        // First pass: across every answer, find which of our unique
        // published records are named by this response and whether any of
        // those answers actually matches the value we hold (this needs a
        // full scan across *all* answers before we can tell a conflict from
        // a confirmation, so it runs to completion before the second pass
        // acts on it).
        let mut conflict_state: HashMap<RecordId, (bool, bool)> = HashMap::new();
        for answer in &msg.answers {
            for id in self.store.matching(&answer.resource.name, answer.resource.rtype).collect::<Vec<_>>() {
                let rec = match self.store.get(id) {
                    Some(r) => r,
                    None => continue,
                };
                if rec.is_unique() {
                    let resource = rec.resource();
                    let entry = conflict_state.entry(id).or_insert((false, false));
                    entry.0 = true;
                    if match_answer(&resource, &answer.resource) {
                        entry.1 = true;
                    }
                }
            }
        }
        // Second, independent pass over the same state: act on every
        // genuine conflict found above.
        for (id, (may_conflict, have_match)) in conflict_state {
            if may_conflict && !have_match {
                self.store.notify_conflict(id, now, &self.config, &mut self.rng);
            }
        }

        for answer in &msg.answers {
            let outcome = self.cache.add(&answer.resource, answer.cache_flush, now, &self.config);
            for expired in outcome.expired {
                for query_id in expired.queries {
                    self.queries.invoke_answer(query_id, expired.resource.clone());
                }
            }
            if let Some(cache_id) = outcome.added {
                let matching_queries: Vec<QueryId> = self
                    .queries
                    .matching(&answer.resource.name, answer.resource.rtype)
                    .collect();
                for query_id in matching_queries {
                    self.cache.link_query(cache_id, query_id);
                    if let Some(entry) = self.cache.get(cache_id) {
                        self.queries.invoke_answer(query_id, entry.resource(now));
                    }
                }
            }
        }
    }

    // ---- emit ---------------------------------------------------------------

    /// Writes as much as fits of the next thing this instance needs to say
    /// into `out`, in priority order: a pending unicast reply, then
    /// immediate announcements, then due retries/probes/queries. Returns the
    /// written length plus where to send it — a unicast reply goes back to
    /// its asker, everything else goes to the multicast group on port 5353.
    #[tracing::instrument(skip(self, out))]
    pub fn emit(&mut self, out: &mut MessageBuilder) -> (usize, Ipv4Addr, u16) {
        let now = self.now();
        out.set_response(true, true);

        if let Some(reply) = self.uanswers.pop_front() {
            out.set_id(reply.msg_id);
            let question = Question {
                qname: reply.resource.name.clone(),
                qtype: reply.resource.rtype,
                qclass: self.config.class,
                unicast_response: false,
            };
            let _ = out.add_question(&question);
            let record = WireRecord {
                resource: reply.resource,
                class: self.config.class,
                cache_flush: reply.cache_flush,
            };
            let _ = out.add_answer(&record);
            return (out.current_length(), reply.to_addr, reply.dest_port);
        }

        let mut wrote_any = false;
        while let Some(id) = self.store.pop_due(Queue::Now, now) {
            wrote_any |= self.write_published(out, id);
        }

        if matches!(self.store.peek_due(&self.store.a_publish), Some(due) if due <= now) {
            self.drain_publish_queue(out, now);
            wrote_any = true;
        }

        if self.shutdown {
            return (out.current_length(), Ipv4Addr::new(224, 0, 0, 251), 5353);
        }

        while let Some(id) = self.store.pop_due(Queue::Pause, now) {
            wrote_any |= self.write_published(out, id);
        }

        if wrote_any {
            return (out.current_length(), Ipv4Addr::new(224, 0, 0, 251), 5353);
        }

        out.set_response(false, false);
        self.drive_probing(out, now);
        self.drive_queries(out, now);

        if now >= self.expireall_due {
            let expired = self.cache.gc_all(now);
            for entry in expired {
                for query_id in entry.queries {
                    self.queries.invoke_answer(query_id, entry.resource.clone());
                }
            }
            self.expireall_due = now.add_secs(self.config.gc_period_secs);
        }

        (out.current_length(), Ipv4Addr::new(224, 0, 0, 251), 5353)
    }

    fn write_published(&mut self, out: &mut MessageBuilder, id: RecordId) -> bool {
        let rec = match self.store.get(id) {
            Some(r) => r,
            None => return false,
        };
        let resource = rec.resource();
        let cache_flush = rec.is_unique();
        if !out.fits(&resource) {
            return false;
        }
        let record = WireRecord { resource: resource.clone(), class: self.config.class, cache_flush };
        let _ = out.add_answer(&record);
        if resource.ttl == 0 {
            self.store.free(id);
        }
        true
    }

    fn drain_publish_queue(&mut self, out: &mut MessageBuilder, now: Timeval) {
        let due: Vec<RecordId> = {
            let mut ids = Vec::new();
            while let Some(id) = self.store.pop_due(Queue::Publish, now) {
                ids.push(id);
            }
            ids
        };
        for id in due {
            self.write_published(out, id);
            self.store.advance_publish(id, now, &self.config);
        }
    }

    fn drive_probing(&mut self, out: &mut MessageBuilder, now: Timeval) {
        let due: Vec<RecordId> = {
            let mut ids = Vec::new();
            while let Some(id) = self.store.pop_due(Queue::Probing, now) {
                ids.push(id);
            }
            ids
        };
        for id in due {
            let finished = self.store.advance_probe(id);
            if finished {
                self.store.publish_record(id, now);
                continue;
            }
            if let Some(rec) = self.store.get(id) {
                let question = Question {
                    qname: rec.name.clone(),
                    qtype: rec.rtype,
                    qclass: self.config.class,
                    unicast_response: false,
                };
                let _ = out.add_question(&question);
                let record = WireRecord { resource: rec.resource(), class: self.config.class, cache_flush: false };
                let _ = out.add_authority(&record);
            }
            self.store.requeue_probe(id, now.add_micros(self.config.probe_interval_ms * 1000));
        }
    }

    /// The earliest `expires_at - 7s` across every cache entry matching
    /// `name`/`rtype`, or `None` if nothing is cached — the query goes
    /// dormant until a fresh answer arrives or [`Instance::query`] is
    /// called again.
    fn next_query_try(&self, name: &str, rtype: RecordType) -> Option<Timeval> {
        let mut next: Option<Timeval> = None;
        let mut last = None;
        while let Some((cache_id, entry)) = self.cache.list_cached(name, rtype, last) {
            let candidate = entry.expires_at().sub_secs(7);
            next = Some(match next {
                Some(current) if current <= candidate => current,
                _ => candidate,
            });
            last = Some(cache_id);
        }
        next
    }

    fn drive_queries(&mut self, out: &mut MessageBuilder, now: Timeval) {
        if now < self.checkqlist_due {
            return;
        }
        let due = self.queries.due(now);
        let mut next_best: Option<Timeval> = None;
        for id in due {
            let tries = self.queries.tries(id);
            if tries >= self.config.max_query_tries {
                let (name, rtype) = match self.queries.get(id) {
                    Some(q) => (q.name.clone(), q.rtype),
                    None => continue,
                };
                let next_try = self.next_query_try(&name, rtype);
                self.queries.reset(id, next_try);
                if let Some(t) = next_try {
                    next_best = Some(match next_best {
                        Some(current) if current <= t => current,
                        _ => t,
                    });
                }
                continue;
            }
            let backoff = self.config.query_backoff_secs[tries as usize % 3] as u64;
            let next_try = now.add_secs(backoff);
            self.queries.bump_try(id, next_try);
            next_best = Some(match next_best {
                Some(current) if current <= next_try => current,
                _ => next_try,
            });

            if let Some(query) = self.queries.get(id) {
                let question = Question {
                    qname: query.name.clone(),
                    qtype: query.rtype,
                    qclass: self.config.class,
                    unicast_response: false,
                };
                let _ = out.add_question(&question);

                let mut last = None;
                while let Some((cache_id, entry)) = self.cache.list_cached(&query.name, query.rtype, last) {
                    let resource = entry.resource(now);
                    if out.fits(&resource) {
                        let record = WireRecord { resource, class: self.config.class, cache_flush: false };
                        let _ = out.add_answer(&record);
                    }
                    last = Some(cache_id);
                }
            }
        }
        self.checkqlist_due = next_best.unwrap_or_else(|| now.add_secs(self.config.gc_period_secs));
    }

    /// The longest this instance can be left alone before [`Instance::emit`]
    /// needs calling again, bounded by whichever timer is soonest: a pending
    /// unicast reply or non-empty immediate queue (zero), a due pause/probe,
    /// the next publish retry, the next query, or the next GC sweep.
    pub fn sleep_hint(&self) -> Duration {
        let now = self.now();
        if !self.uanswers.is_empty() || !self.store.a_now.is_empty() {
            return Duration::ZERO;
        }

        let mut soonest: Option<Timeval> = None;
        let mut consider = |candidate: Option<Timeval>| {
            if let Some(t) = candidate {
                soonest = Some(match soonest {
                    Some(current) if current <= t => current,
                    _ => t,
                });
            }
        };

        consider(self.store.peek_due(&self.store.a_pause));
        consider(self.store.peek_due(&self.store.probing));
        consider(self.store.peek_due(&self.store.a_publish));
        consider(Some(self.checkqlist_due));
        consider(Some(self.expireall_due));

        match soonest {
            Some(t) if t > now => {
                let micros = t.diff_micros(&now).max(0) as u64;
                Duration::from_micros(micros)
            }
            _ => Duration::ZERO,
        }
    }
}
