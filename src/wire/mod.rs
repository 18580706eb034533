//! DNS/mDNS wire codec: buffer cursor, header, question/record parsing and
//! serialization, and a message builder. The engine core never touches a
//! byte buffer directly — only these types and `std::net` addresses.

pub mod buffer;
pub mod header;
pub mod message;
pub mod record;

pub use buffer::Buffer;
pub use header::Header;
pub use message::{Message, MessageBuilder};
pub use record::{match_answer, estimated_rr_size, Question, WireRecord};
