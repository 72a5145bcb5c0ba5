//! Mission writer: every mutation to `.mission/` goes through here so the
//! invariants in the data model hold on disk as well as in memory.

pub mod mission_writer;

pub use mission_writer::{MissionWriter, WriterError, WriterResult};
