//! Per-brand stage pipeline
//!
//! Three stages run concurrently for one brand and hand entities down two
//! bounded queues:
//!
//! ```text
//! models stage --models queue--> years stage --years queue--> details stage
//! ```
//!
//! - The models stage fetches the brand's model listing once.
//! - The years stage fetches the year listing of every model it dequeues.
//! - The details stage fetches and normalizes one detail document per year.
//!
//! Each queue ends with [`StreamItem::EndOfStream`]. When the per-brand limit
//! is reached a consumer simply returns; dropping its receiver closes the
//! queue, and the producer treats the failed send as the end of its work.
//!
//! All stages share one [`CancellationToken`]. The first stage to fail cancels
//! it and the others stop at their next fetch, receive or send.

use crate::config::{CatalogConfig, IngestConfig, PipelineConfig};
use crate::error::{IngestError, Result};
use crate::fetcher::Fetcher;
use crate::parser::{CatalogItem, DetailDocument, ModelListing, Normalizer};
use fipe_common::types::{Brand, Detail, ExtractionResult, Model, Year};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Queue message: an entity or the end-of-stream marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem<T> {
    Item(T),
    EndOfStream,
}

/// Everything brand pipelines share during a run
#[derive(Debug)]
pub struct CrawlContext {
    pub fetcher: Fetcher,
    pub catalog: CatalogConfig,
    pub normalizer: Normalizer,
    pub pipeline: PipelineConfig,
}

impl CrawlContext {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        config.validate().map_err(IngestError::Config)?;

        Ok(Self {
            fetcher: Fetcher::new(&config.catalog, config.retry.clone())?,
            catalog: config.catalog.clone(),
            normalizer: Normalizer::new()?,
            pipeline: config.pipeline.clone(),
        })
    }
}

/// Crawl of one brand subtree
pub struct BrandPipeline {
    brand: Arc<Brand>,
    context: Arc<CrawlContext>,
    cancel: CancellationToken,
    /// Details produced so far, read by the years stage to stop early
    details: AtomicUsize,
}

impl BrandPipeline {
    pub fn new(brand: Brand, context: Arc<CrawlContext>, cancel: CancellationToken) -> Self {
        Self {
            brand: Arc::new(brand),
            context,
            cancel,
            details: AtomicUsize::new(0),
        }
    }

    /// Run all three stages to completion
    ///
    /// Returns the brand singleton plus the models, years and details buffers
    /// in the order their stages consumed or produced them. The first stage
    /// failure (or an external cancellation) ends the whole pipeline.
    pub async fn stream(self) -> Result<ExtractionResult> {
        let span = info_span!("brand", id = %self.brand.id, name = %self.brand.name);

        async move {
            let result = match self.context.pipeline.timeout {
                Some(limit) => tokio::time::timeout(limit, self.run())
                    .await
                    .unwrap_or_else(|_| {
                        Err(IngestError::Timeout {
                            brand: self.brand.name.clone(),
                            secs: limit.as_secs(),
                        })
                    }),
                None => self.run().await,
            };

            match &result {
                Ok(extracted) => info!(summary = %extracted.summary(), "Brand extracted"),
                Err(e) if e.is_cancellation() => debug!("Brand pipeline cancelled"),
                Err(e) => {
                    self.cancel.cancel();
                    warn!(error = %e, "Brand pipeline failed");
                },
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self) -> Result<ExtractionResult> {
        let capacity = self.context.pipeline.queue_capacity;
        let (models_tx, models_rx) = mpsc::channel(capacity);
        let (years_tx, years_rx) = mpsc::channel(capacity);

        let ((), models, (years, data)) = tokio::try_join!(
            self.guard(self.extract_models(models_tx)),
            self.guard(self.extract_years(models_rx, years_tx)),
            self.guard(self.extract_details(years_rx)),
        )?;

        Ok(ExtractionResult {
            brand: vec![(*self.brand).clone()],
            models,
            years,
            data,
        })
    }

    // ========================================================================
    // Stages
    // ========================================================================

    async fn extract_models(&self, models: Sender<StreamItem<Model>>) -> Result<()> {
        let url = self.context.catalog.models_url(&self.brand);
        info!(%url, "Extracting models");

        let listing: ModelListing = self.cancellable(self.context.fetcher.fetch_json(&url)).await?;

        for item in listing.modelos {
            let model = item.into_model(self.brand.clone());
            if !self.push(&models, StreamItem::Item(model)).await? {
                debug!("Years stage stopped early, dropping remaining models");
                return Ok(());
            }
        }

        self.push(&models, StreamItem::EndOfStream).await?;
        Ok(())
    }

    async fn extract_years(
        &self,
        mut models: Receiver<StreamItem<Model>>,
        years: Sender<StreamItem<Year>>,
    ) -> Result<Vec<Model>> {
        let mut buffer = Vec::new();

        loop {
            if self.truncated() {
                debug!(models = buffer.len(), "Detail limit reached, no more models needed");
                break;
            }

            let model = match self.pull(&mut models).await? {
                Some(model) => Arc::new(model),
                None => break,
            };
            buffer.push((*model).clone());

            let url = self.context.catalog.years_url(&model);
            info!(%url, "Extracting years");

            let listing: Vec<CatalogItem> =
                self.cancellable(self.context.fetcher.fetch_json(&url)).await?;

            for item in listing {
                if !self.push(&years, StreamItem::Item(item.into_year(model.clone()))).await? {
                    debug!("Details stage stopped early, dropping remaining years");
                    return Ok(buffer);
                }
            }
        }

        // Closes the models queue before the sentinel goes downstream
        drop(models);
        self.push(&years, StreamItem::EndOfStream).await?;

        Ok(buffer)
    }

    async fn extract_details(
        &self,
        mut years: Receiver<StreamItem<Year>>,
    ) -> Result<(Vec<Year>, Vec<Detail>)> {
        let mut buffer = Vec::new();
        let mut data = Vec::new();

        while !self.context.pipeline.limit_reached(data.len()) {
            let year = match self.pull(&mut years).await? {
                Some(year) => year,
                None => break,
            };
            buffer.push(year);
            let year = &buffer[buffer.len() - 1];

            let url = self.context.catalog.detail_url(year);
            info!(%url, "Extracting data");

            let document: DetailDocument =
                self.cancellable(self.context.fetcher.fetch_json(&url)).await?;
            let detail = self.context.normalizer.detail(document, year)?;

            data.push(detail);
            self.details.store(data.len(), Ordering::Release);
        }

        Ok((buffer, data))
    }

    // ========================================================================
    // Queue and cancellation helpers
    // ========================================================================

    fn truncated(&self) -> bool {
        self.context
            .pipeline
            .limit_reached(self.details.load(Ordering::Acquire))
    }

    /// Cancel siblings when `stage` fails
    async fn guard<T, F>(&self, stage: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = stage.await;
        if result.is_err() {
            self.cancel.cancel();
        }
        result
    }

    async fn cancellable<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IngestError::Cancelled),
            result = operation => result,
        }
    }

    /// Next entity, or `None` once the queue has ended
    async fn pull<T>(&self, queue: &mut Receiver<StreamItem<T>>) -> Result<Option<T>> {
        let message = self.cancellable(async { Ok(queue.recv().await) }).await?;

        Ok(match message {
            Some(StreamItem::Item(item)) => Some(item),
            // A closed queue without the marker means the producer is gone
            Some(StreamItem::EndOfStream) | None => None,
        })
    }

    /// Send downstream; `false` when the consumer has already finished
    async fn push<T>(&self, queue: &Sender<StreamItem<T>>, message: StreamItem<T>) -> Result<bool> {
        let sent = self.cancellable(async { Ok(queue.send(message).await) }).await?;
        Ok(sent.is_ok())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use std::time::Duration;

    fn context(limit: Option<usize>) -> Arc<CrawlContext> {
        let config = IngestConfig {
            catalog: CatalogConfig::new("http://127.0.0.1:9"),
            retry: RetryConfig {
                max_retries: 1,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                jitter: Duration::ZERO,
                request_timeout: Duration::from_secs(1),
            },
            pipeline: PipelineConfig {
                limit,
                ..PipelineConfig::default()
            },
            ..IngestConfig::default()
        };
        Arc::new(CrawlContext::new(&config).unwrap())
    }

    #[tokio::test]
    async fn test_pull_and_push_follow_queue_order() {
        let pipeline = BrandPipeline::new(
            Brand::new("1", "Acura"),
            context(None),
            CancellationToken::new(),
        );
        let (tx, mut rx) = mpsc::channel(4);

        assert!(pipeline.push(&tx, StreamItem::Item(1)).await.unwrap());
        assert!(pipeline.push(&tx, StreamItem::Item(2)).await.unwrap());
        assert!(pipeline.push(&tx, StreamItem::EndOfStream).await.unwrap());

        assert_eq!(pipeline.pull(&mut rx).await.unwrap(), Some(1));
        assert_eq!(pipeline.pull(&mut rx).await.unwrap(), Some(2));
        assert_eq!(pipeline.pull(&mut rx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_push_to_finished_consumer() {
        let pipeline = BrandPipeline::new(
            Brand::new("1", "Acura"),
            context(None),
            CancellationToken::new(),
        );
        let (tx, rx) = mpsc::channel::<StreamItem<u32>>(1);
        drop(rx);

        assert!(!pipeline.push(&tx, StreamItem::Item(7)).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_pull_does_not_wait_for_sentinel() {
        let cancel = CancellationToken::new();
        let pipeline = BrandPipeline::new(Brand::new("1", "Acura"), context(None), cancel.clone());
        let (_tx, mut rx) = mpsc::channel::<StreamItem<u32>>(1);

        cancel.cancel();

        assert!(matches!(
            pipeline.pull(&mut rx).await,
            Err(IngestError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_zero_limit_extracts_nothing() {
        // Nothing listens on the discard port, so any fetch would fail
        let pipeline = BrandPipeline::new(
            Brand::new("1", "Acura"),
            context(Some(0)),
            CancellationToken::new(),
        );
        let (tx, rx) = mpsc::channel(1);
        tx.send(StreamItem::EndOfStream).await.unwrap();

        let (years, data) = pipeline.extract_details(rx).await.unwrap();
        assert!(years.is_empty());
        assert!(data.is_empty());
        assert!(pipeline.truncated());
    }
}
