//! Topic-scoped pub/sub event hub.

pub mod hub;
pub mod types;

pub use hub::{EventHub, HubError, HubResult, Subscription};
pub use types::{Event, Topic, TopicFilter};
