//! Pipeline stages for crime-report extraction.
//!
//! Each submodule implements one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ invoke ──▶ reorder ──▶ aggregate
//! (bytes)   (pdfium)   (backend   (page       (heads, buckets,
//!                       + schema)  order)      percentages)
//! ```
//!
//! 1. [`input`]     — build and validate the [`input::Document`] from bytes,
//!    a path or a URL
//! 2. [`render`]    — rasterise pages on the blocking pool into a bounded
//!    channel
//! 3. [`encode`]    — PNG and base64 helpers shared by the rasterizer and
//!    the backends
//! 4. [`invoke`]    — one capability call per page with timeout and retry;
//!    the only stage with network I/O
//! 5. [`schema`]    — coerce the raw response into typed rows
//! 6. [`reorder`]   — restore ascending page order after concurrent calls
//! 7. [`aggregate`] — normalize rows into the run's statistics model

pub mod aggregate;
pub mod encode;
pub mod input;
pub mod invoke;
pub mod render;
pub mod reorder;
pub mod schema;
