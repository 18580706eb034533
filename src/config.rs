use serde::{Deserialize, Serialize};

/// Tunable timing constants and limits for an [`crate::instance::Instance`],
/// loadable from a TOML file layered over [`EngineConfig::default`], which
/// matches the documented RFC 6762 defaults exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Outgoing-message frame size in bytes; records queued to go out are
    /// flushed before exceeding this. Defaults to the Ethernet MTU.
    pub frame: usize,
    /// Probing interval in milliseconds (RFC 6762 §8.1: 250ms between the
    /// four probe queries).
    pub probe_interval_ms: u64,
    /// Delay, in seconds, before retrying an unacknowledged publish.
    pub publish_retry_secs: u64,
    /// Inclusive random delay range, in milliseconds, applied before
    /// announcing a shared (non-unique) record, to avoid synchronized
    /// replies from multiple responders (RFC 6762 §6).
    pub shared_delay_min_ms: u64,
    pub shared_delay_max_ms: u64,
    /// Cache TTL is stored as `now + ttl/cache_ttl_divisor +
    /// cache_ttl_padding_secs`, a deliberate haircut so a record is
    /// refreshed before it strictly expires.
    pub cache_ttl_divisor: u32,
    pub cache_ttl_padding_secs: u32,
    /// Back-off, in seconds, applied to query retries: try 1 waits
    /// `query_backoff_secs[0]`, try 2 waits `[1]`, and so on; once
    /// exhausted (`max_query_tries` reached) the query resets.
    pub query_backoff_secs: [u32; 3],
    /// Cache garbage-collection sweep period, in seconds.
    pub gc_period_secs: u64,
    /// Number of times a non-unique record is retried before it is
    /// considered published and moved off the retry queue.
    pub max_publish_tries: u8,
    /// Number of times a query is retried (asking again) before its answer
    /// list is re-sent as known-answers and its try counter resets.
    pub max_query_tries: u8,
    /// Class value written into every question/record this instance emits.
    /// 1 is IN (Internet), the only class mDNS uses.
    pub class: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            frame: 1500,
            probe_interval_ms: 250,
            publish_retry_secs: 2,
            shared_delay_min_ms: 20,
            shared_delay_max_ms: 120,
            cache_ttl_divisor: 2,
            cache_ttl_padding_secs: 8,
            query_backoff_secs: [1, 2, 3],
            gc_period_secs: 60,
            max_publish_tries: 4,
            max_query_tries: 3,
            class: 1,
        }
    }
}

impl EngineConfig {
    /// Loads overrides from `path` (TOML) layered over the documented
    /// defaults.
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?)
            .add_source(config::File::with_name(path))
            .build()?;
        settings.try_deserialize()
    }
}
