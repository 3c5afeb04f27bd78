//! Record sources and batching.
//!
//! A source yields records lazily, one at a time; [`Batcher`] groups them into
//! fixed-size batches for the ingestion scheduler.

mod batcher;
mod jsonl;

pub use batcher::Batcher;
pub use jsonl::{JsonlSource, RecordFields};

use crate::error::SourceError;
use crate::models::Record;

/// A lazy, possibly unbounded, ordered sequence of records.
pub trait RecordSource: Iterator<Item = Result<Record, SourceError>> + Send {}

impl<T> RecordSource for T where T: Iterator<Item = Result<Record, SourceError>> + Send {}
