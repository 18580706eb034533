use slab::Slab;

use crate::callback::{AnswerObserver, QueryDisposition};
use crate::clock::Timeval;
use crate::hash::{bucket_of, SPRIME};
use crate::resource::{RecordType, Resource};

pub type QueryId = usize;

pub struct Query {
    pub name: String,
    pub rtype: RecordType,
    pub tries: u8,
    /// When this query is next due to be (re-)asked. `None` means dormant:
    /// it will not be re-asked until a fresh cache entry or a new
    /// [`Registry::reset`] call re-arms it.
    pub next_try: Option<Timeval>,
    answer: Box<dyn AnswerObserver>,
}

/// Every name/type a host has asked this instance to keep resolved,
/// re-asking on the network until an answer (or cancellation) arrives and
/// backing off afterwards per RFC 6762 §5.2.
pub struct Registry {
    queries: Slab<Query>,
    buckets: Vec<Vec<QueryId>>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            queries: Slab::new(),
            buckets: vec![Vec::new(); SPRIME],
        }
    }

    pub fn get(&self, id: QueryId) -> Option<&Query> {
        self.queries.get(id)
    }

    /// Registers a new continuous query, armed to ask immediately.
    pub fn query(&mut self, name: &str, rtype: RecordType, answer: impl AnswerObserver + 'static, now: Timeval) -> QueryId {
        let id = self.queries.insert(Query {
            name: name.to_string(),
            rtype,
            tries: 0,
            next_try: Some(now),
            answer: Box::new(answer),
        });
        self.buckets[bucket_of(name, SPRIME)].push(id);
        id
    }

    pub fn cancel(&mut self, id: QueryId) {
        if let Some(query) = self.queries.get(id) {
            let bucket = bucket_of(&query.name, SPRIME);
            if let Some(pos) = self.buckets[bucket].iter().position(|&x| x == id) {
                self.buckets[bucket].remove(pos);
            }
        }
        self.queries.remove(id);
    }

    /// All registered queries matching `name`/`rtype`, for the ingest
    /// pipeline to notify when a fresh answer lands in the cache.
    pub fn matching<'a>(&'a self, name: &'a str, rtype: RecordType) -> impl Iterator<Item = QueryId> + 'a {
        let bucket = bucket_of(name, SPRIME);
        self.buckets[bucket].iter().copied().filter(move |&id| {
            let q = &self.queries[id];
            q.name.eq_ignore_ascii_case(name) && (q.rtype == rtype || q.rtype == RecordType::Any)
        })
    }

    /// Delivers `resource` to the query's observer. A caller reporting an
    /// expired or withdrawn answer is expected to have already normalized
    /// `resource.ttl` to 0. If the observer asks to cancel, the query is
    /// torn down.
    pub fn invoke_answer(&mut self, id: QueryId, resource: Resource) {
        let disposition = match self.queries.get_mut(id) {
            Some(query) => query.answer.on_answer(&resource),
            None => return,
        };
        if disposition == QueryDisposition::Cancel {
            self.cancel(id);
        }
    }

    /// Resets a query's retry counter and arms its next ask for `next_try`,
    /// the caller's choice of when to pick the query back up — `Some` for an
    /// immediate re-query, or a computed time derived from cache state; `None`
    /// leaves the query dormant until a fresh cache entry or a new
    /// [`Registry::query`]/[`Registry::reset`] call reactivates it.
    pub fn reset(&mut self, id: QueryId, next_try: Option<Timeval>) {
        if let Some(query) = self.queries.get_mut(id) {
            query.tries = 0;
            query.next_try = next_try;
        }
    }

    /// Every registered query id, regardless of whether it's due.
    pub fn all_ids(&self) -> Vec<QueryId> {
        self.queries.iter().map(|(id, _)| id).collect()
    }

    /// Every query due to be (re-)asked at or before `now`.
    pub fn due(&self, now: Timeval) -> Vec<QueryId> {
        self.queries
            .iter()
            .filter(|(_, q)| matches!(q.next_try, Some(t) if t <= now))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn tries(&self, id: QueryId) -> u8 {
        self.queries.get(id).map(|q| q.tries).unwrap_or(0)
    }

    pub fn bump_try(&mut self, id: QueryId, next_try: Timeval) {
        if let Some(query) = self.queries.get_mut(id) {
            query.tries += 1;
            query.next_try = Some(next_try);
        }
    }
}
