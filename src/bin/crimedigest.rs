//! CLI binary for crimedigest-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, streams NDJSON events (or one JSON report) and keeps a
//! progress bar on stderr.

use anyhow::{Context, Result};
use clap::Parser;
use crimedigest_extract::pipeline::input::resolve_input;
use crimedigest_extract::{
    extract_from_input, extract_stream, extract_to_file, inspect, write_ndjson,
    ExtractionConfig, ExtractionResponse, ProgressObserver, ProgressState,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress bar bound to the run's ProgressObserver ─────────────────────────

/// Terminal progress observer. Pages arrive strictly in order, so the bar
/// position is simply the processed count of the latest snapshot.
struct CliProgress {
    bar: ProgressBar,
    started: Instant,
}

impl CliProgress {
    /// Spinner only until the document is open and the page count is known.
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening report…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Instant::now(),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed(&self) -> String {
        dim(&format!("{:.1}s", self.started.elapsed().as_secs_f64()))
    }
}

impl ProgressObserver for CliProgress {
    fn on_run_start(&self, filename: &str, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting {filename} ({total_pages} pages)…"))
        ));
    }

    fn on_page_emitted(&self, page_number: usize, state: &ProgressState, error: Option<&str>) {
        match error {
            None => self.bar.println(format!(
                "  {} Page {:>3}/{:<3}  {:>6}%  {}",
                green("✓"),
                page_number,
                state.total_pages,
                state.percent,
                self.elapsed(),
            )),
            Some(error) => {
                let msg: String = if error.chars().count() > 80 {
                    let head: String = error.chars().take(79).collect();
                    format!("{head}\u{2026}")
                } else {
                    error.to_string()
                };
                self.bar.println(format!(
                    "  {} Page {:>3}/{:<3}  {}  {}",
                    red("✗"),
                    page_number,
                    state.total_pages,
                    red(&msg),
                    self.elapsed(),
                ));
            }
        }
        self.bar.set_position(state.processed_pages as u64);
    }

    fn on_run_complete(&self, state: &ProgressState) {
        self.bar.finish_and_clear();
        let ok = state.processed_pages - state.failed_pages;
        if state.failed_pages == 0 {
            eprintln!(
                "{} {} pages extracted  {}",
                green("✔"),
                bold(&ok.to_string()),
                self.elapsed()
            );
        } else {
            eprintln!(
                "{} {}/{} pages extracted  ({} failed)  {}",
                if ok == 0 { red("✘") } else { cyan("⚠") },
                bold(&ok.to_string()),
                state.total_pages,
                red(&state.failed_pages.to_string()),
                self.elapsed(),
            );
        }
    }

    fn on_run_failed(&self, state: &ProgressState) {
        self.bar.abandon();
        eprintln!(
            "{} run failed after {}/{} pages: {}",
            red("✘"),
            state.processed_pages,
            state.total_pages,
            state.error_message.as_deref().unwrap_or("unknown error"),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Stream NDJSON events to stdout
  crimedigest september.pdf

  # Stream into a file (one event per line, flushed per page)
  crimedigest september.pdf -o september.ndjson

  # One aggregated JSON object instead of a stream
  crimedigest --json september.pdf -o september.json

  # Direct Gemini REST backend
  crimedigest --provider gemini-rest --model gemini-2.5-flash september.pdf

  # Any edgequake-llm provider
  crimedigest --provider openai --model gpt-4.1-mini september.pdf

  # Download and extract
  crimedigest https://example.org/reports/crime-review-sept.pdf

  # Page count only (no API key needed)
  crimedigest --inspect-only september.pdf

OUTPUT (NDJSON):
  {"type":"start","filename":"september.pdf","total_pages":5}
  {"type":"page","page_number":1,"crime_statistics":[...],"conviction_stats":{...}}
  {"type":"error","page_number":3,"error":"..."}
  {"type":"complete","total_processed":5}

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (gemini-rest backend)
  GEMINI_BASE_URL         Override the Gemini REST endpoint
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Provider for auto-detection (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Model for auto-detection
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  CRIMEDIGEST_*           Fallback for every flag, e.g. CRIMEDIGEST_DPI=150
  RUST_LOG                Log filter (logs go to stderr)

A .env file in the working directory is loaded on startup.
"#;

/// Extract crime statistics from scanned police report PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "crimedigest",
    version,
    about = "Extract crime statistics from scanned police report PDFs",
    long_about = "Extract per-crime-head statistics (registered, detected, pending by age, \
convictions) from scanned crime-review PDFs using a vision model. Pages are streamed as \
NDJSON events in page order as soon as they are ready.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write output to this file instead of stdout.
    #[arg(short, long, env = "CRIMEDIGEST_OUTPUT")]
    output: Option<PathBuf>,

    /// Emit one aggregated JSON object instead of the NDJSON stream.
    #[arg(long, env = "CRIMEDIGEST_JSON")]
    json: bool,

    /// Backend: gemini-rest, or an edgequake-llm provider (openai, anthropic, gemini, ollama).
    #[arg(
        long,
        env = "CRIMEDIGEST_PROVIDER",
        long_help = "Extraction backend. Auto-detected if not set: EDGEQUAKE_LLM_PROVIDER, \
          then GEMINI_API_KEY (gemini-rest), then any provider key edgequake-llm finds."
    )]
    provider: Option<String>,

    /// Model ID passed to the backend.
    #[arg(long, env = "CRIMEDIGEST_MODEL")]
    model: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "CRIMEDIGEST_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Pages in flight against the backend at once.
    #[arg(short, long, env = "CRIMEDIGEST_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per page after the first failed attempt.
    #[arg(long, env = "CRIMEDIGEST_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Base retry backoff in milliseconds (doubles per retry).
    #[arg(long, env = "CRIMEDIGEST_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Per-attempt backend timeout in seconds.
    #[arg(long, env = "CRIMEDIGEST_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "CRIMEDIGEST_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Largest accepted document, in MiB.
    #[arg(long, env = "CRIMEDIGEST_MAX_DOCUMENT_MB", default_value_t = 16)]
    max_document_mb: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "CRIMEDIGEST_PASSWORD")]
    password: Option<String>,

    /// Path to a text file replacing the built-in extraction instructions.
    #[arg(long, env = "CRIMEDIGEST_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Max output tokens per page.
    #[arg(long, env = "CRIMEDIGEST_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "CRIMEDIGEST_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Print file name, size and page count only.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "CRIMEDIGEST_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CRIMEDIGEST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CRIMEDIGEST_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; flags and the real environment still apply.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar carries per-page feedback, so library logs drop to errors
    // while it is on screen.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = build_config(&cli, None).await?;
        let info = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialise document info")?
            );
        } else {
            println!("File:   {}", info.filename);
            println!("Size:   {} bytes", info.size_bytes);
            println!("Pages:  {}", info.page_count);
        }
        return Ok(());
    }

    let progress = show_progress.then(CliProgress::new);
    let config = build_config(&cli, progress.map(|p| p as Arc<dyn ProgressObserver>)).await?;

    if cli.json {
        run_json(&cli, &config).await
    } else {
        run_stream(&cli, &config).await
    }
}

/// Aggregated mode: one `{"success":..}` object.
async fn run_json(cli: &Cli, config: &ExtractionConfig) -> Result<()> {
    if let Some(ref output_path) = cli.output {
        let report = extract_to_file(&cli.input, output_path, config)
            .await
            .context("Extraction failed")?;
        if !cli.quiet {
            eprintln!(
                "{}  {}/{} pages  →  {}",
                if report.failed_pages == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                report.total_processed - report.failed_pages,
                report.total_pages,
                bold(&output_path.display().to_string()),
            );
        }
        return Ok(());
    }

    let result = extract_from_input(&cli.input, config).await;
    let failure = result.as_ref().err().map(|e| e.to_string());
    let response = ExtractionResponse::from(result);
    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("Failed to serialise response")?
    );
    match failure {
        Some(message) => anyhow::bail!("Extraction failed: {message}"),
        None => Ok(()),
    }
}

/// Streaming mode: NDJSON events to stdout or a file, flushed per line.
async fn run_stream(cli: &Cli, config: &ExtractionConfig) -> Result<()> {
    let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match cli.output {
        Some(ref output_path) => Box::new(
            tokio::fs::File::create(output_path)
                .await
                .with_context(|| format!("Failed to create {}", output_path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    // Whole-request failures still leave one terminal object on the sink.
    let started = match resolve_input(&cli.input, config.download_timeout_secs).await {
        Ok(document) => extract_stream(document, config).await,
        Err(e) => Err(e),
    };
    let run = match started {
        Ok(run) => run,
        Err(e) => {
            let line = ExtractionResponse::failure(&e)
                .to_ndjson_line()
                .context("Failed to serialise response")?;
            sink.write_all(line.as_bytes()).await.ok();
            sink.shutdown().await.ok();
            return Err(e).context("Extraction failed");
        }
    };

    let summary = write_ndjson(run, &mut sink).await;
    sink.shutdown().await.ok();
    let summary = summary.context("Extraction failed")?;

    if !cli.quiet && cli.no_progress {
        eprintln!(
            "Extracted {} crime heads, {} skipped entries",
            summary.heads.len(),
            summary.skipped_entries
        );
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(
    cli: &Cli,
    progress: Option<Arc<dyn ProgressObserver>>,
) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .max_document_bytes(cli.max_document_mb.saturating_mul(1024 * 1024))
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(ref path) = cli.prompt_file {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.instructions(text);
    }
    if let Some(observer) = progress {
        builder = builder.progress_observer(observer);
    }

    builder.build().context("Invalid configuration")
}
