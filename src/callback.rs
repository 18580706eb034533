use crate::resource::{RecordType, Resource};

/// What a query's answer observer wants to happen after being shown an
/// answer (or a cache expiry, surfaced as a zero-ttl answer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryDisposition {
    /// Keep the query registered; more answers may still arrive.
    Keep,
    /// Unregister the query; no further answers will be delivered.
    Cancel,
}

/// Observer notified with every matching answer a registered query sees.
pub trait AnswerObserver {
    fn on_answer(&mut self, resource: &Resource) -> QueryDisposition;
}

impl<F> AnswerObserver for F
where
    F: FnMut(&Resource) -> QueryDisposition,
{
    fn on_answer(&mut self, resource: &Resource) -> QueryDisposition {
        self(resource)
    }
}

/// Observer notified when a unique record this instance is probing for (or
/// already owns) is claimed by another host.
pub trait ConflictObserver {
    fn on_conflict(&mut self, name: &str, rtype: RecordType);
}

impl<F> ConflictObserver for F
where
    F: FnMut(&str, RecordType),
{
    fn on_conflict(&mut self, name: &str, rtype: RecordType) {
        self(name, rtype)
    }
}
