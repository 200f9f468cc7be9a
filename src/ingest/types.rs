// src/ingest/types.rs
use std::sync::Arc;

use crate::error::SourceError;
use crate::snapshot::{Snapshot, Source};

/// Uniform contract every upstream venue is consumed through.
///
/// Implementations normalize prices into `[0, 1]` and timestamps into epoch
/// milliseconds, drop records they cannot normalize, and report transport or
/// body failures as [`SourceError`].
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;
    async fn fetch(&self, limit: usize) -> Result<Vec<Snapshot>, SourceError>;
}

pub type DynAdapter = Arc<dyn SourceAdapter>;
