//! Streaming extraction: ordered events as pages finish.
//!
//! ## Shape of a run
//!
//! ```text
//!  render thread ──(render_buffer)──▶ producer task ──(event_buffer)──▶ consumer
//!                                      │  JoinSet of ≤ concurrency invocations
//!                                      │  ReorderBuffer (ascending page order)
//!                                      └  StatAggregator + ProgressTracker
//! ```
//!
//! The producer issues page `p` only while `p < next_to_emit + concurrency`,
//! so a slow page holds back at most `concurrency` finished successors.
//! Events go out through a bounded channel; when the consumer stops reading,
//! `send` waits and nothing new is issued. When the consumer goes away
//! entirely the producer aborts in-flight calls, drops the page receiver
//! (which stops the render thread) and reports the run as failed.
//!
//! Every event is handed over the moment it exists. [`write_ndjson`] is the
//! reference consumer: one JSON object per line, flushed per line.

use crate::backend::{resolve_backend, ExtractionBackend};
use crate::config::ExtractionConfig;
use crate::error::{ExtractError, PageError};
use crate::output::{ExtractionEvent, PagePayload};
use crate::pipeline::aggregate::{RunSummary, StatAggregator};
use crate::pipeline::input::Document;
use crate::pipeline::invoke::{invoke_page, InvokeSettings};
use crate::pipeline::render::{
    start_rasterizer, PageImage, PageReceiver, PdfiumRasterizer, Rasterizer,
};
use crate::pipeline::reorder::ReorderBuffer;
use crate::pipeline::schema::PageExtraction;
use crate::progress::{ProgressState, ProgressTracker};
use crate::prompts::resolve_instructions;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

type PageOutcome = Result<PageExtraction, PageError>;

/// A started run: the event receiver, the status channel and the producer.
///
/// Dropping the run (or just its event receiver) cancels it.
pub struct ExtractionRun {
    filename: String,
    total_pages: usize,
    events: mpsc::Receiver<ExtractionEvent>,
    progress: watch::Receiver<ProgressState>,
    task: JoinHandle<Result<RunSummary, ExtractError>>,
}

impl ExtractionRun {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Status channel; always holds the latest snapshot.
    pub fn progress(&self) -> watch::Receiver<ProgressState> {
        self.progress.clone()
    }

    /// Next event, or `None` once the producer has finished.
    pub async fn next_event(&mut self) -> Option<ExtractionEvent> {
        self.events.recv().await
    }

    /// Drain any remaining events and wait for the producer.
    ///
    /// Returns the aggregated run summary, or the error that aborted the run.
    pub async fn finish(mut self) -> Result<RunSummary, ExtractError> {
        while self.events.recv().await.is_some() {}
        self.task
            .await
            .map_err(|e| ExtractError::Internal(format!("Producer task failed: {e}")))?
    }

    /// Split into an event `Stream`, the status channel and the producer
    /// handle.
    pub fn into_parts(
        self,
    ) -> (
        ReceiverStream<ExtractionEvent>,
        watch::Receiver<ProgressState>,
        JoinHandle<Result<RunSummary, ExtractError>>,
    ) {
        (ReceiverStream::new(self.events), self.progress, self.task)
    }
}

/// Validate `document`, open it, and start streaming events.
///
/// Everything that can fail before the `start` event (validation, backend
/// resolution, opening the PDF) is returned as `Err` and no event is ever
/// produced.
pub async fn extract_stream(
    document: Document,
    config: &ExtractionConfig,
) -> Result<ExtractionRun, ExtractError> {
    document.validate(config.max_document_bytes)?;
    let backend = resolve_backend(config)?;

    let filename = document.filename().to_string();
    info!(
        "Starting extraction: {} ({} bytes) via {}",
        filename,
        document.len(),
        backend.name()
    );

    let rasterizer = config
        .rasterizer
        .clone()
        .unwrap_or_else(|| Arc::new(PdfiumRasterizer) as Arc<dyn Rasterizer>);
    let pages = start_rasterizer(
        rasterizer,
        Arc::new(document),
        config.render_options(),
        config.render_buffer,
    )
    .await?;
    let total_pages = pages.total_pages();

    let (tracker, progress) = ProgressTracker::new(config.progress_observer.clone());
    let (tx, events) = mpsc::channel(config.event_buffer.max(1));

    let producer = Producer {
        filename: filename.clone(),
        pages,
        backend,
        instructions: Arc::from(resolve_instructions(config.instructions.as_deref())),
        settings: InvokeSettings::from(config),
        concurrency: config.concurrency.max(1),
        tracker,
        tx,
    };
    let task = tokio::spawn(producer.run());

    Ok(ExtractionRun {
        filename,
        total_pages,
        events,
        progress,
        task,
    })
}

/// Write every event of `run` as NDJSON, flushing after each line.
///
/// On a write error the run is dropped (which cancels it) and
/// [`ExtractError::SinkWriteFailed`] is returned.
pub async fn write_ndjson<W>(mut run: ExtractionRun, writer: &mut W) -> Result<RunSummary, ExtractError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = run.next_event().await {
        let line = event
            .to_ndjson_line()
            .map_err(|e| ExtractError::Internal(format!("event serialisation: {e}")))?;
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(source) = written {
            warn!("Event sink closed: {}", source);
            return Err(ExtractError::SinkWriteFailed { source });
        }
    }
    run.finish().await
}

// ── Producer ─────────────────────────────────────────────────────────────────

struct Producer {
    filename: String,
    pages: PageReceiver,
    backend: Arc<dyn ExtractionBackend>,
    instructions: Arc<str>,
    settings: InvokeSettings,
    concurrency: usize,
    tracker: ProgressTracker,
    tx: mpsc::Sender<ExtractionEvent>,
}

/// Why the producer stopped early.
enum Abort {
    Disconnected,
    Failed(ExtractError),
}

impl Producer {
    async fn run(self) -> Result<RunSummary, ExtractError> {
        let Producer {
            filename,
            mut pages,
            backend,
            instructions,
            settings,
            concurrency,
            tracker,
            tx,
        } = self;
        let total = pages.total_pages();
        let mut aggregator = StatAggregator::new();

        let outcome = pump(
            &filename,
            &mut pages,
            &backend,
            &instructions,
            &settings,
            concurrency,
            &tracker,
            &tx,
            &mut aggregator,
        )
        .await;
        // Stops the render thread at its next push.
        drop(pages);

        let processed = tracker.snapshot().processed_pages;
        match outcome {
            Ok(()) => {
                info!(
                    "Extraction complete: {} pages, {} heads, {} skipped entries",
                    processed,
                    aggregator.heads().len(),
                    aggregator.skipped_entries()
                );
                Ok(aggregator.finish())
            }
            Err(Abort::Disconnected) => {
                let err = ExtractError::ConsumerDisconnected { processed, total };
                warn!("{}", err);
                tracker.fail(err.to_string());
                Err(err)
            }
            Err(Abort::Failed(err)) => {
                warn!("Extraction aborted: {}", err);
                let _ = tx
                    .send(ExtractionEvent::Error {
                        page_number: None,
                        error: err.to_string(),
                    })
                    .await;
                tracker.fail(err.to_string());
                Err(err)
            }
        }
    }
}

/// Drive one run from `start` to `complete`.
#[allow(clippy::too_many_arguments)]
async fn pump(
    filename: &str,
    pages: &mut PageReceiver,
    backend: &Arc<dyn ExtractionBackend>,
    instructions: &Arc<str>,
    settings: &InvokeSettings,
    concurrency: usize,
    tracker: &ProgressTracker,
    tx: &mpsc::Sender<ExtractionEvent>,
    aggregator: &mut StatAggregator,
) -> Result<(), Abort> {
    let total = pages.total_pages();

    send(
        tx,
        ExtractionEvent::Start {
            filename: filename.to_string(),
            total_pages: total,
        },
    )
    .await?;
    tracker.start(filename, total);

    let mut in_flight: JoinSet<(usize, PageOutcome)> = JoinSet::new();
    let mut reorder: ReorderBuffer<PageOutcome> = ReorderBuffer::new(1, concurrency);
    let mut next_to_issue = 1;
    let mut rasterizer_done = false;

    while reorder.next_expected() <= total {
        // Emit everything that is ready, in order.
        while let Some((page_number, outcome)) = reorder.pop_ready() {
            let (event, error) = match outcome {
                Ok(extraction) => {
                    let page = aggregator.aggregate_page(page_number, extraction);
                    (ExtractionEvent::Page(PagePayload::from(&page)), None)
                }
                Err(e) => {
                    let message = e.to_string();
                    (ExtractionEvent::page_error(page_number, message.clone()), Some(message))
                }
            };
            send(tx, event).await?;
            tracker.page_done(page_number, error.as_deref());
        }
        if reorder.next_expected() > total {
            break;
        }

        let can_issue = !rasterizer_done
            && next_to_issue <= total
            && next_to_issue < reorder.next_expected() + concurrency;
        if !can_issue && in_flight.is_empty() {
            return Err(Abort::Failed(ExtractError::PageCountMismatch {
                expected: total,
                produced: next_to_issue - 1,
            }));
        }

        tokio::select! {
            biased;

            _ = tx.closed() => return Err(Abort::Disconnected),

            joined = in_flight.join_next(), if !in_flight.is_empty() => match joined {
                Some(Ok((page_number, outcome))) => {
                    reorder.insert(page_number, outcome);
                }
                Some(Err(e)) => {
                    return Err(Abort::Failed(ExtractError::Internal(format!(
                        "invocation task failed: {e}"
                    ))));
                }
                None => {}
            },

            next = pages.next(), if can_issue => match next {
                Some(Ok(image)) => {
                    if image.page_number != next_to_issue {
                        return Err(Abort::Failed(ExtractError::Internal(format!(
                            "rasterizer produced page {} where {} was expected",
                            image.page_number, next_to_issue
                        ))));
                    }
                    debug!("Issuing page {}/{}", next_to_issue, total);
                    spawn_invocation(&mut in_flight, backend, instructions, settings, image);
                    next_to_issue += 1;
                }
                Some(Err(e)) => return Err(Abort::Failed(e)),
                None => rasterizer_done = true,
            },
        }
    }

    send(
        tx,
        ExtractionEvent::Complete {
            total_processed: total,
        },
    )
    .await?;
    tracker.complete();
    Ok(())
}

fn spawn_invocation(
    in_flight: &mut JoinSet<(usize, PageOutcome)>,
    backend: &Arc<dyn ExtractionBackend>,
    instructions: &Arc<str>,
    settings: &InvokeSettings,
    image: PageImage,
) {
    let backend = Arc::clone(backend);
    let instructions = Arc::clone(instructions);
    let settings = settings.clone();
    let page_number = image.page_number;

    in_flight.spawn(async move {
        let call = invoke_page(backend.as_ref(), &image, &instructions, &settings);
        let outcome = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(PageError::TaskFailed {
                page: page_number,
                detail: "extraction task panicked".to_string(),
            }),
        };
        (page_number, outcome)
    });
}

async fn send(tx: &mpsc::Sender<ExtractionEvent>, event: ExtractionEvent) -> Result<(), Abort> {
    tx.send(event).await.map_err(|_| Abort::Disconnected)
}
