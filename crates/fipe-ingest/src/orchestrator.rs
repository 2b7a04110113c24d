//! Brand orchestrator
//!
//! Enumerates brands, builds one [`BrandPipeline`] per brand and runs them in
//! consecutive chunks of `chunk_size`. Pipelines inside a chunk run
//! concurrently; the next chunk starts only after the current one has been
//! extracted and exported. The first pipeline failure cancels its chunk
//! siblings and aborts the run; chunks exported earlier stay committed.

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::export::ExportSink;
use crate::parser::CatalogItem;
use crate::pipeline::{BrandPipeline, CrawlContext};
use fipe_common::types::{BatchSummary, Brand, ExtractionResult};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Totals for a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub chunks: usize,
    pub extracted: BatchSummary,
    /// Table exports that failed and were rolled back
    pub failed_exports: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} chunks, {} ({} failed table exports)",
            self.chunks, self.extracted, self.failed_exports
        )
    }
}

/// Sizes of the consecutive chunks `total` brands are split into
pub fn chunk_sizes(total: usize, chunk_size: usize) -> Vec<usize> {
    if chunk_size == 0 {
        return Vec::new();
    }

    (0..total)
        .step_by(chunk_size)
        .map(|start| chunk_size.min(total - start))
        .collect()
}

pub struct Orchestrator<S> {
    context: Arc<CrawlContext>,
    sink: S,
    chunk_size: usize,
    /// Abort the run when a table export fails instead of logging and moving on
    strict_export: bool,
    cancel: CancellationToken,
}

impl<S: ExportSink> Orchestrator<S> {
    pub fn new(config: &IngestConfig, sink: S) -> Result<Self> {
        Ok(Self {
            context: Arc::new(CrawlContext::new(config)?),
            sink,
            chunk_size: config.chunk_size,
            strict_export: false,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_strict_export(mut self, strict: bool) -> Self {
        self.strict_export = strict;
        self
    }

    /// Token that stops every running pipeline when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// One listing fetch; fatal when the fetcher gives up
    pub async fn fetch_brands(&self) -> Result<Vec<Brand>> {
        let url = self.context.catalog.brands_url();
        info!(%url, "Extracting brands");

        let listing: Vec<CatalogItem> = self.context.fetcher.fetch_json(&url).await?;

        Ok(listing.into_iter().map(CatalogItem::into_brand).collect())
    }

    /// Crawl the whole catalog
    pub async fn run(&self) -> Result<RunSummary> {
        let brands = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(IngestError::Cancelled),
            brands = self.fetch_brands() => brands?,
        };
        self.run_brands(brands).await
    }

    /// Crawl the given brands chunk by chunk, exporting after each chunk
    pub async fn run_brands(&self, brands: Vec<Brand>) -> Result<RunSummary> {
        let plan = chunk_sizes(brands.len(), self.chunk_size);
        info!(
            brands = brands.len(),
            chunks = plan.len(),
            chunk_size = self.chunk_size,
            "Starting extraction"
        );

        let mut summary = RunSummary::default();

        for (index, chunk) in brands.chunks(self.chunk_size).enumerate() {
            info!("Processing chunk {} / {} ({} brands)", index + 1, plan.len(), chunk.len());

            let results = self.run_chunk(chunk).await.inspect_err(|e| {
                error!(chunk = index + 1, error = %e, "Chunk failed, aborting run");
            })?;

            let batch = ExtractionResult::unify(results);
            let extracted = batch.summary();
            let report = self.sink.export_batch(&batch).await;
            let failed = report.failed_tables();

            summary.chunks += 1;
            summary.extracted += extracted;
            summary.failed_exports += failed.len();

            if failed.is_empty() {
                info!(chunk = index + 1, %extracted, "Chunk exported");
            } else {
                warn!(chunk = index + 1, failed = ?failed, "Chunk exported with failed tables");
                if self.strict_export {
                    return Err(IngestError::Export {
                        chunk: index + 1,
                        tables: failed.iter().map(|table| table.to_string()).collect(),
                    });
                }
            }
        }

        info!(%summary, "Extraction finished");
        Ok(summary)
    }

    /// Run every pipeline of `brands` concurrently
    ///
    /// Results come back in `brands` order. The first failure cancels the
    /// chunk; the error reported is the first one that is not itself a
    /// cancellation.
    async fn run_chunk(&self, brands: &[Brand]) -> Result<Vec<ExtractionResult>> {
        let chunk_cancel = self.cancel.child_token();
        let mut tasks = JoinSet::new();

        for (position, brand) in brands.iter().cloned().enumerate() {
            let pipeline =
                BrandPipeline::new(brand, self.context.clone(), chunk_cancel.child_token());
            tasks.spawn(async move { (position, pipeline.stream().await) });
        }

        let mut results: Vec<Option<ExtractionResult>> = vec![None; brands.len()];
        let mut failure: Option<IngestError> = None;

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok((position, Ok(result))) => {
                    results[position] = Some(result);
                    continue;
                },
                Ok((_, Err(e))) => e,
                Err(join_error) => IngestError::Task(join_error),
            };

            chunk_cancel.cancel();
            keep_root_cause(&mut failure, outcome);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(results.into_iter().flatten().collect()),
        }
    }
}

fn keep_root_cause(slot: &mut Option<IngestError>, error: IngestError) {
    let replace = match slot {
        None => true,
        Some(existing) => existing.is_cancellation() && !error.is_cancellation(),
    };

    if replace {
        *slot = Some(error);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_sizes() {
        assert_eq!(chunk_sizes(45, 20), vec![20, 20, 5]);
        assert_eq!(chunk_sizes(40, 20), vec![20, 20]);
        assert_eq!(chunk_sizes(3, 20), vec![3]);
        assert!(chunk_sizes(0, 20).is_empty());
        assert!(chunk_sizes(10, 0).is_empty());
    }

    #[test]
    fn test_chunk_sizes_match_slice_chunks() {
        let brands: Vec<u32> = (0..45).collect();
        let sizes: Vec<usize> = brands.chunks(20).map(|c| c.len()).collect();
        assert_eq!(sizes, chunk_sizes(45, 20));
    }

    #[test]
    fn test_keep_root_cause_prefers_real_failure() {
        let mut slot = None;
        keep_root_cause(&mut slot, IngestError::Cancelled);
        keep_root_cause(&mut slot, IngestError::config("boom"));
        keep_root_cause(&mut slot, IngestError::Cancelled);
        keep_root_cause(&mut slot, IngestError::config("later"));

        match slot {
            Some(IngestError::Config(message)) => assert_eq!(message, "boom"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_run_summary_display() {
        let summary = RunSummary {
            chunks: 2,
            extracted: BatchSummary {
                brands: 3,
                models: 4,
                years: 5,
                details: 6,
            },
            failed_exports: 0,
        };
        assert_eq!(
            summary.to_string(),
            "2 chunks, 3 brands, 4 models, 5 years, 6 details (0 failed table exports)"
        );
    }
}
