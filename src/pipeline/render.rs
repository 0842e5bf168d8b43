//! PDF rasterisation: document bytes → ordered, lazily rendered page images.
//!
//! ## Why a sink instead of returning a `Vec`?
//!
//! A 100-page scan at 200 DPI is several hundred megabytes of pixels. The
//! rasterizer therefore pushes one encoded page at a time into a bounded
//! channel; when the channel is full `blocking_send` parks the render thread,
//! so at most `render_buffer` pages exist ahead of the invoker. When the
//! receiving side is dropped (run aborted) the next push fails and rendering
//! stops, releasing the pdfium document.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and is not safe to call
//! from async contexts. All rendering happens on a blocking-pool thread.

use crate::error::ExtractError;
use crate::pipeline::encode;
use crate::pipeline::input::Document;
use pdfium_render::prelude::*;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One rendered page, PNG-encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based page number.
    pub page_number: usize,
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("page_number", &self.page_number)
            .field("png_bytes", &self.png.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Rendering knobs taken from [`crate::config::ExtractionConfig`].
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub password: Option<String>,
}

/// Messages from the render thread to the pipeline.
#[derive(Debug)]
pub enum RasterMessage {
    Opened { total_pages: usize },
    Page(PageImage),
    Failed(ExtractError),
}

/// Blocking-side handle the rasterizer pushes into.
pub struct PageSink {
    tx: mpsc::Sender<RasterMessage>,
    opened: bool,
}

impl PageSink {
    fn new(tx: mpsc::Sender<RasterMessage>) -> Self {
        Self { tx, opened: false }
    }

    /// Announce the page count. Must be called once, before any `push`.
    /// Returns `false` when the pipeline has gone away.
    pub fn open(&mut self, total_pages: usize) -> bool {
        self.opened = true;
        self.tx
            .blocking_send(RasterMessage::Opened { total_pages })
            .is_ok()
    }

    /// Hand over the next page, waiting for buffer space.
    /// Returns `false` when the pipeline has gone away; stop rendering then.
    pub fn push(&mut self, page: PageImage) -> bool {
        debug_assert!(self.opened, "PageSink::push before open");
        self.tx.blocking_send(RasterMessage::Page(page)).is_ok()
    }

    fn fail(&mut self, error: ExtractError) {
        let _ = self.tx.blocking_send(RasterMessage::Failed(error));
    }
}

/// Converts document bytes into page images.
///
/// Implementations are blocking and run on the blocking pool. They must call
/// [`PageSink::open`] exactly once, then [`PageSink::push`] each page in
/// ascending order, returning early when `push` returns `false`.
pub trait Rasterizer: Send + Sync + 'static {
    fn rasterize(
        &self,
        document: &Document,
        options: &RenderOptions,
        sink: &mut PageSink,
    ) -> Result<(), ExtractError>;

    /// Page count without rendering anything.
    fn page_count(&self, document: &Document, options: &RenderOptions)
        -> Result<usize, ExtractError>;
}

/// Async side of a started rasterization.
pub struct PageReceiver {
    total_pages: usize,
    received: usize,
    rx: mpsc::Receiver<RasterMessage>,
}

impl PageReceiver {
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Next page in source order; `None` once the rasterizer has finished.
    ///
    /// Ending early (fewer pages than announced) is reported as
    /// [`ExtractError::PageCountMismatch`].
    pub async fn next(&mut self) -> Option<Result<PageImage, ExtractError>> {
        match self.rx.recv().await {
            Some(RasterMessage::Page(page)) => {
                self.received += 1;
                Some(Ok(page))
            }
            Some(RasterMessage::Failed(e)) => Some(Err(e)),
            Some(RasterMessage::Opened { .. }) => Some(Err(ExtractError::Internal(
                "rasterizer announced its page count twice".into(),
            ))),
            None if self.received < self.total_pages => {
                Some(Err(ExtractError::PageCountMismatch {
                    expected: self.total_pages,
                    produced: self.received,
                }))
            }
            None => None,
        }
    }
}

/// Start rasterizing on the blocking pool and wait until the page count is
/// known.
///
/// Errors before the page count (unreadable PDF, missing pdfium) are returned
/// here, so the caller can fail the request before emitting anything.
pub async fn start_rasterizer(
    rasterizer: Arc<dyn Rasterizer>,
    document: Arc<Document>,
    options: RenderOptions,
    buffer: usize,
) -> Result<PageReceiver, ExtractError> {
    let (tx, mut rx) = mpsc::channel(buffer.max(1));
    let filename = document.filename().to_string();

    let handle = tokio::task::spawn_blocking(move || {
        let mut sink = PageSink::new(tx);
        if let Err(e) = rasterizer.rasterize(&document, &options, &mut sink) {
            warn!("Rasterizer failed: {}", e);
            sink.fail(e);
        }
    });

    match rx.recv().await {
        Some(RasterMessage::Opened { total_pages }) => {
            if total_pages == 0 {
                return Err(ExtractError::NoPages { filename });
            }
            Ok(PageReceiver {
                total_pages,
                received: 0,
                rx,
            })
        }
        Some(RasterMessage::Failed(e)) => Err(e),
        Some(RasterMessage::Page(_)) => Err(ExtractError::Internal(
            "rasterizer pushed a page before announcing the page count".into(),
        )),
        None => match handle.await {
            Err(e) => Err(ExtractError::Internal(format!("Render task panicked: {e}"))),
            Ok(()) => Err(ExtractError::Internal(
                "rasterizer finished without opening the document".into(),
            )),
        },
    }
}

// ── pdfium implementation ────────────────────────────────────────────────────

/// [`Rasterizer`] backed by pdfium-render.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        document: &Document,
        options: &RenderOptions,
        sink: &mut PageSink,
    ) -> Result<(), ExtractError> {
        let pdfium = bind_pdfium()?;
        let pdf = load_document(&pdfium, document, options)?;

        let pages = pdf.pages();
        let total_pages = pages.len() as usize;
        if total_pages == 0 {
            return Err(ExtractError::NoPages {
                filename: document.filename().to_string(),
            });
        }
        info!("PDF loaded: {} pages", total_pages);

        if !sink.open(total_pages) {
            return Ok(());
        }

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(options.dpi as f32 / 72.0)
            .set_maximum_width(options.max_rendered_pixels as i32)
            .set_maximum_height(options.max_rendered_pixels as i32);

        for idx in 0..total_pages {
            let page_number = idx + 1;
            let page = pages
                .get(idx as u16)
                .map_err(|e| ExtractError::RasterisationFailed {
                    page: page_number,
                    detail: format!("{:?}", e),
                })?;

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                ExtractError::RasterisationFailed {
                    page: page_number,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            let png = encode::encode_png(&image).map_err(|e| ExtractError::RasterisationFailed {
                page: page_number,
                detail: format!("PNG encoding failed: {e}"),
            })?;
            debug!(
                "Rendered page {} → {}x{} px, {} bytes",
                page_number,
                image.width(),
                image.height(),
                png.len()
            );

            let delivered = sink.push(PageImage {
                page_number,
                png,
                width: image.width(),
                height: image.height(),
            });
            if !delivered {
                info!("Pipeline closed; stopping rasterisation at page {}", page_number);
                return Ok(());
            }
        }

        Ok(())
    }

    fn page_count(
        &self,
        document: &Document,
        options: &RenderOptions,
    ) -> Result<usize, ExtractError> {
        let pdfium = bind_pdfium()?;
        let pdf = load_document(&pdfium, document, options)?;
        Ok(pdf.pages().len() as usize)
    }
}

/// Bind pdfium from `PDFIUM_LIB_PATH` (file or directory), else the system
/// library.
fn bind_pdfium() -> Result<Pdfium, ExtractError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.trim().is_empty() => {
            let path = PathBuf::from(p.trim());
            let library = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            debug!("Binding pdfium from {}", library.display());
            Pdfium::bind_to_library(&library)
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

fn load_document<'a>(
    pdfium: &'a Pdfium,
    document: &'a Document,
    options: &RenderOptions,
) -> Result<PdfDocument<'a>, ExtractError> {
    let password = options.password.as_deref();
    pdfium
        .load_pdf_from_byte_slice(document.bytes(), password)
        .map_err(|e| {
            let err_str = format!("{:?}", e);
            let filename = document.filename().to_string();
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    ExtractError::WrongPassword { filename }
                } else {
                    ExtractError::PasswordRequired { filename }
                }
            } else {
                ExtractError::CorruptPdf {
                    filename,
                    detail: err_str,
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Emits `n` tiny pages; optionally fails after `fail_after` pages.
    #[derive(Default)]
    struct CountingRasterizer {
        pages: usize,
        fail_after: Option<usize>,
        pushed: AtomicUsize,
        returned: AtomicBool,
    }

    impl Rasterizer for CountingRasterizer {
        fn rasterize(
            &self,
            _document: &Document,
            _options: &RenderOptions,
            sink: &mut PageSink,
        ) -> Result<(), ExtractError> {
            if !sink.open(self.pages) {
                return Ok(());
            }
            for n in 1..=self.pages {
                if self.fail_after == Some(n - 1) {
                    return Err(ExtractError::RasterisationFailed {
                        page: n,
                        detail: "boom".into(),
                    });
                }
                let page = PageImage {
                    page_number: n,
                    png: vec![0u8; 4],
                    width: 1,
                    height: 1,
                };
                self.pushed.fetch_add(1, Ordering::SeqCst);
                if !sink.push(page) {
                    self.returned.store(true, Ordering::SeqCst);
                    return Ok(());
                }
            }
            self.returned.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn page_count(&self, _: &Document, _: &RenderOptions) -> Result<usize, ExtractError> {
            Ok(self.pages)
        }
    }

    fn options() -> RenderOptions {
        RenderOptions {
            dpi: 150,
            max_rendered_pixels: 2000,
            password: None,
        }
    }

    fn doc() -> Arc<Document> {
        Arc::new(Document::new("r.pdf", b"%PDF-1.7".to_vec()))
    }

    #[tokio::test]
    async fn pages_arrive_in_order() {
        let r = Arc::new(CountingRasterizer {
            pages: 4,
            fail_after: None,
            ..Default::default()
        });
        let mut rx = start_rasterizer(r, doc(), options(), 1).await.unwrap();
        assert_eq!(rx.total_pages(), 4);

        let mut seen = Vec::new();
        while let Some(page) = rx.next().await {
            seen.push(page.unwrap().page_number);
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failure_mid_document_surfaces_as_error() {
        let r = Arc::new(CountingRasterizer {
            pages: 3,
            fail_after: Some(1),
            ..Default::default()
        });
        let mut rx = start_rasterizer(r, doc(), options(), 1).await.unwrap();
        assert!(rx.next().await.unwrap().is_ok());
        let err = rx.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ExtractError::RasterisationFailed { page: 2, .. }));
    }

    #[tokio::test]
    async fn failure_before_open_is_returned_directly() {
        struct Broken;
        impl Rasterizer for Broken {
            fn rasterize(
                &self,
                document: &Document,
                _: &RenderOptions,
                _: &mut PageSink,
            ) -> Result<(), ExtractError> {
                Err(ExtractError::CorruptPdf {
                    filename: document.filename().to_string(),
                    detail: "bad xref".into(),
                })
            }
            fn page_count(&self, _: &Document, _: &RenderOptions) -> Result<usize, ExtractError> {
                Ok(0)
            }
        }

        let err = start_rasterizer(Arc::new(Broken), doc(), options(), 1)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExtractError::CorruptPdf { .. }));
    }

    #[tokio::test]
    async fn dropping_receiver_stops_rendering() {
        let r = Arc::new(CountingRasterizer {
            pages: 1000,
            fail_after: None,
            ..Default::default()
        });
        let buffer = 2;
        let mut rx = start_rasterizer(r.clone(), doc(), options(), buffer)
            .await
            .unwrap();
        let first = rx.next().await.unwrap().unwrap();
        assert_eq!(first.page_number, 1);

        // Unread pages never exceed the channel capacity plus the one push
        // that is parked on it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(r.pushed.load(Ordering::SeqCst) <= 1 + buffer + 1);

        drop(rx);
        for _ in 0..100 {
            if r.returned.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(r.returned.load(Ordering::SeqCst), "render thread kept running");
        assert!(r.pushed.load(Ordering::SeqCst) <= 1 + buffer + 1);
    }

    #[test]
    fn page_image_debug_omits_bytes() {
        let img = PageImage {
            page_number: 2,
            png: vec![1, 2, 3],
            width: 10,
            height: 20,
        };
        let s = format!("{:?}", img);
        assert!(s.contains("png_bytes: 3"));
    }
}
