//! Embeddable Multicast DNS engine: an RFC 6762 protocol state machine with
//! no sockets, threads, or scheduling of its own. A host drives it through
//! [`instance::Instance`]'s `ingest`/`emit`/`sleep_hint` entry points.

pub mod cache;
pub mod callback;
pub mod clock;
pub mod config;
pub mod error;
pub mod hash;
pub mod instance;
pub mod query;
pub mod record;
pub mod resource;
pub mod telemetry;
pub mod wire;

pub use callback::{AnswerObserver, ConflictObserver, QueryDisposition};
pub use config::EngineConfig;
pub use instance::Instance;
pub use resource::{Rdata, RecordType, Resource, Srv};
