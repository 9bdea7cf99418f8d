//! Batched ingestion.
//!
//! `upsert_batch` splits its input into batches, applies retry policy per
//! batch, reports progress after each completed batch, and observes
//! cancellation between batches. Preparation may run for several batches
//! concurrently; every mutation still serialises through the collection's
//! write lock, so parallelism never reorders writes within a batch.

use crate::collection::{Collection, UpsertResult};
use crate::config::BatchConfig;
use crate::context::Context;
use crate::document::Document;
use crate::error::{Error, Result};
use futures::stream::{self, StreamExt};
use std::time::Instant;
use tracing::{debug, warn};

impl Collection {
    /// Store documents in batches under the given policy.
    ///
    /// With `continue_on_error` (the default), a batch that still fails
    /// after its retries moves its documents into the failed counters and
    /// processing continues; otherwise the first failure aborts the call.
    /// Cancellation between batches surfaces as an [`Error::Cancelled`]
    /// entry in the returned result's `errors`, alongside whatever partial
    /// progress was committed — already-applied batches are never rolled
    /// back.
    pub async fn upsert_batch(
        &self,
        ctx: &Context,
        docs: Vec<Document>,
        config: &BatchConfig,
    ) -> Result<UpsertResult> {
        let start = Instant::now();
        config.validate()?;

        let total = docs.len();
        if total == 0 {
            return Ok(UpsertResult::default());
        }

        if config.validate_before_batch {
            for (index, doc) in docs.iter().enumerate() {
                doc.validate(index)?;
            }
        }

        let batches: Vec<Vec<Document>> = {
            let mut batches = Vec::with_capacity(total.div_ceil(config.batch_size));
            let mut docs = docs;
            while docs.len() > config.batch_size {
                let rest = docs.split_off(config.batch_size);
                batches.push(docs);
                docs = rest;
            }
            batches.push(docs);
            batches
        };

        let mut result = UpsertResult::default();
        let mut processed = 0usize;

        // Completion preserves batch order; `buffered` only overlaps the
        // validation and auto-embedding work ahead of the write lock.
        let mut outcomes = stream::iter(batches.into_iter().map(|batch| {
            let batch_len = batch.len();
            async move {
                let ids: Vec<String> = batch.iter().map(|d| d.id.clone()).collect();
                (batch_len, ids, self.upsert_with_retry(ctx, batch, config).await)
            }
        }))
        .buffered(config.parallelism);

        while let Some((batch_len, ids, outcome)) = outcomes.next().await {
            match outcome {
                Ok(batch_result) => {
                    result.merge(batch_result);
                }
                Err(err) if err.is_cancellation() => {
                    drop(outcomes);
                    warn!(collection = %self.name(), processed, total, "batch upsert cancelled");
                    result.failed += batch_len;
                    result.failed_ids.extend(ids);
                    result.errors.push(err);
                    result.timing = start.elapsed();
                    return Ok(result);
                }
                Err(err) => {
                    if config.continue_on_error {
                        result.failed += batch_len;
                        result.failed_ids.extend(ids);
                        result.errors.push(err);
                    } else {
                        return Err(err);
                    }
                }
            }

            processed += batch_len;
            if let Some(progress) = &config.progress {
                progress(processed, total);
            }
        }

        result.timing = start.elapsed();
        debug!(
            collection = %self.name(),
            total,
            inserted = result.inserted,
            updated = result.updated,
            failed = result.failed,
            "batch upsert completed"
        );
        Ok(result)
    }

    async fn upsert_with_retry(
        &self,
        ctx: &Context,
        batch: Vec<Document>,
        config: &BatchConfig,
    ) -> Result<UpsertResult> {
        let mut attempt = 0u32;
        loop {
            ctx.check()?;
            match self.upsert(ctx, batch.clone()).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    if attempt >= config.max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    warn!(
                        collection = %self.name(),
                        attempt,
                        max_retries = config.max_retries,
                        error = %err,
                        "batch attempt failed; retrying"
                    );
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(config.retry_delay) => {}
                    }
                }
            }
        }
    }
}
