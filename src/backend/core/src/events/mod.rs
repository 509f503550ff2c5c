//! Contract events
//!
//! - **`event`**: the raw [`Event`] retrieved from the crawler's event log, its
//!   content hash, and the push [`Notification`] wire type.
//! - **`decode`**: typed decoding of payloads into [`GovernanceEvent`].

pub mod decode;
pub mod event;

pub use decode::GovernanceEvent;
pub use event::{Event, Notification};
