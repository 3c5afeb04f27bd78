//! Utility modules.

pub mod poll;

pub use poll::{PollConfig, PollOutcome, poll_until};
