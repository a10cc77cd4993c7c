//! Chunked persistence with an insert-then-upsert fallback.

use tracing::{debug, warn};
use vitals_store::{HotStore, Sample, StoreError};

use crate::config::WritePolicy;

/// Counts from persisting one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Rows persisted.
    pub written: usize,
    /// Rows skipped after the policy was exhausted.
    pub rejected: usize,
    /// Chunks that had to be split and upserted.
    pub fallbacks: usize,
}

/// Writes samples following a [`WritePolicy`].
///
/// Each chunk of the first size is inserted unconditionally. On failure it is
/// split into chunks of the next size and upserted, recursing down the
/// schedule. A one-size schedule upserts at the same size. Chunks are
/// disjoint by key, so one bad row only costs its smallest enclosing chunk.
pub struct ChunkWriter<'a> {
    store: &'a dyn HotStore,
    policy: &'a WritePolicy,
}

impl<'a> ChunkWriter<'a> {
    /// Creates a writer.
    #[must_use]
    pub fn new(store: &'a dyn HotStore, policy: &'a WritePolicy) -> Self {
        Self { store, policy }
    }

    /// Persists `samples` and returns what happened.
    pub fn write(&self, samples: &[Sample]) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        let Some(&first) = self.policy.chunk_sizes.first() else {
            outcome.rejected = samples.len();
            return outcome;
        };
        for chunk in samples.chunks(first) {
            match self.attempt(|| self.store.insert_samples(chunk)) {
                Ok(n) => outcome.written += n,
                Err(err) => {
                    debug!(rows = chunk.len(), error = %err, "insert failed, falling back to upsert");
                    outcome.fallbacks += 1;
                    self.upsert(chunk, 0, &mut outcome);
                }
            }
        }
        outcome
    }

    fn upsert_sizes(&self) -> &[usize] {
        match self.policy.chunk_sizes.as_slice() {
            [only] => std::slice::from_ref(only),
            [_, rest @ ..] => rest,
            [] => &[],
        }
    }

    fn upsert(&self, rows: &[Sample], level: usize, outcome: &mut WriteOutcome) {
        let Some(&size) = self.upsert_sizes().get(level) else {
            return;
        };
        let last_level = level + 1 >= self.upsert_sizes().len();
        for chunk in rows.chunks(size) {
            match self.attempt(|| self.store.upsert_samples(chunk)) {
                Ok(n) => outcome.written += n,
                Err(err) if last_level => {
                    warn!(
                        rows = chunk.len(),
                        first_point = chunk.first().map(|s| s.point_id),
                        first_timestamp = chunk.first().map(|s| s.timestamp),
                        error = %err,
                        "skipping rows after exhausting write policy"
                    );
                    outcome.rejected += chunk.len();
                }
                Err(err) => {
                    debug!(rows = chunk.len(), level, error = %err, "upsert failed, splitting chunk");
                    outcome.fallbacks += 1;
                    self.upsert(chunk, level + 1, outcome);
                }
            }
        }
    }

    /// Retries transient errors up to `max_attempts`. Conflicts and writes
    /// into compressed partitions fail the same way every time.
    fn attempt<F>(&self, mut write: F) -> Result<usize, StoreError>
    where
        F: FnMut() -> Result<usize, StoreError>,
    {
        let mut tries = 0;
        loop {
            tries += 1;
            match write() {
                Ok(n) => return Ok(n),
                Err(err @ (StoreError::Conflict(_) | StoreError::ImmutablePartition { .. })) => {
                    return Err(err);
                }
                Err(err) if tries >= self.policy.max_attempts => return Err(err),
                Err(err) => debug!(tries, error = %err, "retrying write"),
            }
        }
    }
}
