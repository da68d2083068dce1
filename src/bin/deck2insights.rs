//! CLI binary for edgequake-insights.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`, runs
//! the batch, writes one JSON report per deck and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_insights::{
    inspect, plan_chunks, write_artifact, BatchOrchestrator, BatchProgress, BatchProgressCallback,
    BatchStatus, PipelineConfig, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one percent bar for the whole batch plus a log line per
/// finished deck.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Analysing {total_documents} deck(s)…"))
        ));
    }

    fn on_document_start(&self, label: &str, queue_index: usize, total_documents: usize) {
        self.bar
            .set_prefix(format!("{}/{}", queue_index + 1, total_documents));
        self.bar.set_message(label.to_string());
    }

    fn on_progress(&self, progress: &BatchProgress) {
        if let Some(p) = progress.progress {
            self.bar.set_position(u64::from(p));
        }
        if let Some(event) = &progress.current_event {
            let label = progress.current_label.as_deref().unwrap_or("");
            self.bar.set_message(format!("{label}  {}", dim(&event.message)));
        }
    }

    fn on_document_complete(&self, label: &str, warning: Option<&str>) {
        match warning {
            None => self.bar.println(format!("  {} {}", green("✓"), label)),
            Some(w) => {
                self.bar.println(format!("  {} {}", yellow("⚠"), label));
                for line in w.lines() {
                    self.bar.println(format!("      {}", dim(line)));
                }
            }
        }
    }

    fn on_document_error(&self, label: &str, error: &str) {
        let first = error.lines().next().unwrap_or(error);
        self.bar
            .println(format!("  {} {}  {}", red("✗"), label, red(first)));
    }

    fn on_batch_complete(&self, _progress: &BatchProgress) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse one deck, report written to ./insights/acme-q3.json
  deck2insights acme-q3.pdf

  # A batch, mixing files and URLs
  deck2insights q1.pdf q2.pdf https://ir.example.com/investor-day.pdf -o reports/

  # Preview the chunk plan without calling any model
  deck2insights --plan-only big-deck.pdf

  # Use a specific model
  deck2insights --provider anthropic --model claude-sonnet-4-20250514 deck.pdf

OUTPUT:
  One JSON file per deck: company metadata, the selected slides with
  rationale and page image, failed page ranges and run statistics.
  Decks with partial coverage are still written; the warning says which
  pages were missed.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
"#;

/// Extract insight slides from investor presentations using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "deck2insights",
    version,
    about = "Extract insight slides from investor presentations using Vision LLMs",
    long_about = "Run investor presentations (local files or URLs) through a Vision Language \
Model and keep the slides that reveal something: guidance changes, unit economics, margin \
bridges, capital allocation. Decks are processed one at a time in page-range chunks that \
survive rate limits, transient failures and oversized payloads.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF paths or HTTP/HTTPS URLs, processed in the given order.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Directory for the per-deck JSON reports.
    #[arg(short, long, env = "DECK2INSIGHTS_OUTPUT_DIR", default_value = "insights")]
    output_dir: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// PDF user password for encrypted decks.
    #[arg(long, env = "DECK2INSIGHTS_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "DECK2INSIGHTS_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per chunk.
    #[arg(long, env = "DECK2INSIGHTS_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DECK2INSIGHTS_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Attempts per page range, including the first.
    #[arg(long, env = "DECK2INSIGHTS_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..=5))]
    max_attempts: u32,

    /// Chunk payload ceiling in MiB of encoded image data.
    #[arg(long, env = "DECK2INSIGHTS_MAX_PAYLOAD_MB", default_value_t = 20)]
    max_payload_mb: usize,

    /// Per-inference-call timeout in seconds.
    #[arg(long, env = "DECK2INSIGHTS_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DECK2INSIGHTS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print page count and chunk plan only; no model calls.
    #[arg(long)]
    plan_only: bool,

    /// Print every report as JSON on stdout as well.
    #[arg(long, env = "DECK2INSIGHTS_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DECK2INSIGHTS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DECK2INSIGHTS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DECK2INSIGHTS_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose brings everything back.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.plan_only;
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Plan-only mode ───────────────────────────────────────────────────
    if cli.plan_only {
        for source in &cli.inputs {
            let info = inspect(source, &config)
                .await
                .with_context(|| format!("Failed to inspect {source}"))?;
            let plan = plan_chunks(info.page_count, info.byte_size, &config.chunk_sizing);
            let ranges: Vec<String> = plan.iter().map(ToString::to_string).collect();
            println!("File:          {}", source);
            if let Some(ref t) = info.title {
                println!("Title:         {}", t);
            }
            println!("Pages:         {}", info.page_count);
            println!("Bytes/page:    {}", info.bytes_per_page());
            println!("Chunks:        {} ({})", plan.len(), ranges.join(", "));
            println!();
        }
        return Ok(());
    }

    // ── Run the batch ────────────────────────────────────────────────────
    let mut batch = BatchOrchestrator::from_config(&config).context("Setup failed")?;
    for source in &cli.inputs {
        batch.add(source.clone());
    }
    batch.prepare().await;
    let summary = batch.run().await;

    // ── Write reports ────────────────────────────────────────────────────
    let mut used_names = HashSet::new();
    let mut written = 0usize;
    for item in batch.items() {
        match (&item.status, &item.result) {
            (BatchStatus::Complete, Some(report)) => {
                let path = report_path(&cli.output_dir, &item.name, &item.id.to_string(), &mut used_names);
                write_artifact(&path, report)
                    .await
                    .with_context(|| format!("Failed to write report for {}", item.name))?;
                written += 1;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(report).context("Failed to serialise report")?
                    );
                }
                if !cli.quiet {
                    eprintln!(
                        "   {}  {} slide(s)  {}  →  {}",
                        item.name,
                        report.stats.slides_selected,
                        dim(&format!(
                            "{} in / {} out tokens, {}ms",
                            report.stats.input_tokens,
                            report.stats.output_tokens,
                            report.stats.total_duration_ms
                        )),
                        bold(&path.display().to_string()),
                    );
                }
            }
            (BatchStatus::Error, _) if !show_progress && !cli.quiet => {
                eprintln!(
                    "{} {}: {}",
                    red("✗"),
                    item.name,
                    item.error.as_deref().unwrap_or("unknown error")
                );
            }
            _ => {}
        }
    }

    if !cli.quiet {
        let failed_setup = batch.count(BatchStatus::Error).saturating_sub(summary.failed);
        eprintln!(
            "{} {} completed, {} failed{}  ({} report(s) in {})",
            if summary.failed == 0 && failed_setup == 0 {
                green("✔")
            } else {
                yellow("⚠")
            },
            bold(&summary.completed.to_string()),
            summary.failed + failed_setup,
            if failed_setup > 0 {
                format!(" ({failed_setup} could not be opened)")
            } else {
                String::new()
            },
            written,
            cli.output_dir.display(),
        );
    }

    if written == 0 {
        anyhow::bail!("No deck produced a report");
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_chunk_attempts(cli.max_attempts)
        .max_payload_bytes(cli.max_payload_mb.max(1) * 1024 * 1024)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `<output_dir>/<stem>.json`, prefixed with the item id when two decks share a stem.
fn report_path(output_dir: &Path, name: &str, id: &str, used: &mut HashSet<String>) -> PathBuf {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| id.to_string());
    let file = if used.insert(stem.clone()) {
        format!("{stem}.json")
    } else {
        format!("{id}-{stem}.json")
    };
    output_dir.join(file)
}
