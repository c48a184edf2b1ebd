use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use codebox_core::{CodeboxConfig, CodeboxError, OutputFormat, OutputMode, ProfileName, SearchMode};
use codebox_index::{
    render_search, BuildOptions, BuildReport, OutputOptions, Project, ProjectStats, SearchRequest,
};
use codebox_scan::Language;

const CONFIG_FILE: &str = ".codebox.toml";

#[derive(Parser)]
#[command(
    name = "codebox",
    version,
    about = "Structural code search for local source trees",
    long_about = "Codebox splits source files along their syntax tree into functions, methods,\n\
                   classes and module blocks, embeds them, and answers queries with vector,\n\
                   keyword or hybrid (reciprocal rank fusion) search.\n\n\
                   Examples:\n  \
                     codebox index                      Index the current directory\n  \
                     codebox search 'retry backoff'     Hybrid search\n  \
                     codebox search parse --mode keyword --language rust\n  \
                     codebox watch                      Keep the index in sync with edits\n  \
                     codebox stats --format json        Index statistics as JSON"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: <path>/.codebox.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable listing (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Log progress to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Create a default .codebox.toml configuration file
    #[command(long_about = "Create a default .codebox.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .codebox.toml already exists.")]
    Init,
    /// Build a fresh index generation
    #[command(long_about = "Build a fresh index generation.\n\n\
        Every file is re-read, re-chunked and re-embedded. The previous generation\n\
        stays searchable until the new one is complete.\n\n\
        Examples:\n  codebox index\n  codebox index --profile large --language rust --language go")]
    Index {
        /// Project root (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,
        /// Chunking profile: auto, medium or large
        #[arg(long, default_value = "auto")]
        profile: ProfileName,
        /// Only index these languages
        #[arg(long)]
        language: Vec<String>,
    },
    /// Rebuild only files that changed since the last index
    Sync {
        /// Project root (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },
    /// Search the index
    #[command(long_about = "Search the index.\n\n\
        Hybrid mode fuses vector and keyword rankings with reciprocal rank fusion.\n\
        Keyword mode works without an embedding provider.\n\n\
        Examples:\n  codebox search 'load config from disk'\n  \
        codebox search tokenize --mode keyword --limit 5\n  \
        codebox search 'http retry' --output-mode verbose --context 3")]
    Search {
        /// Query text
        query: String,
        /// Project root (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,
        /// Ranking: vector, keyword or hybrid
        #[arg(long, default_value = "hybrid")]
        mode: SearchMode,
        /// Maximum results (default: search.default_limit)
        #[arg(long)]
        limit: Option<usize>,
        /// Only return chunks of this language
        #[arg(long)]
        language: Option<String>,
        /// Detail per result: compact, standard or verbose
        #[arg(long, default_value = "standard")]
        output_mode: OutputMode,
        /// Show whole chunk content in verbose mode
        #[arg(long)]
        full_content: bool,
        /// Preview characters (default: output.preview_length)
        #[arg(long)]
        preview_length: Option<usize>,
        /// Lines of surrounding source to include
        #[arg(long, default_value = "0")]
        context: usize,
        /// Rank with this profile's embedding dimension
        #[arg(long)]
        profile: Option<ProfileName>,
    },
    /// Show index statistics
    Stats {
        /// Project root (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },
    /// Watch the project and sync the index on every change
    Watch {
        /// Project root (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

const DEFAULT_CONFIG: &str = r#"# Codebox Configuration

[embedding]
# provider = "voyage"          # voyage, openai or none
# model = "voyage-code-3"
# dimensions = 1024
# batch_size = 64
# max_in_flight = 4
# timeout_secs = 30

[index]
# data_dir = ".codebox"
# max_file_size = 1048576
# workers = 0
# failure_threshold = 0.5
# include_text = false
# ignore_patterns = ["node_modules", "target", ".git"]

[profiles]
# auto_large_files = 2000
# auto_large_bytes = 67108864

[search]
# rrf_k = 60
# default_limit = 10
# candidate_window = 200
# timeout_secs = 30

[output]
# preview_length = 200
# max_content_length = 5000
# hard_max_content_length = 100000

[sync]
# debounce_ms = 2000
# max_batch = 10
"#;

fn load_config(explicit: Option<&Path>, root: &Path) -> Result<CodeboxConfig> {
    match explicit {
        Some(path) => CodeboxConfig::from_file(path).map_err(report),
        None => {
            let default_path = root.join(CONFIG_FILE);
            if default_path.exists() {
                tracing::debug!(path = %default_path.display(), "loading configuration");
                CodeboxConfig::from_file(&default_path).map_err(report)
            } else {
                Ok(CodeboxConfig::default())
            }
        }
    }
}

/// Name the failing component and whether retrying can help.
fn report(err: CodeboxError) -> miette::Report {
    let retry = if err.is_retryable() { "retryable" } else { "not retryable" };
    let component = err.component();
    miette::Report::new(err).wrap_err(format!("{component} failed ({retry})"))
}

fn check_languages(languages: &[String]) -> Result<()> {
    for name in languages {
        if Language::from_name(name).is_none() {
            miette::bail!("unknown language: {name}");
        }
    }
    Ok(())
}

fn open_project(cli_config: Option<&Path>, path: &Path) -> Result<Project> {
    let config = load_config(cli_config, path)?;
    Project::from_config(path, config).map_err(report)
}

fn print_report(report: &BuildReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            println!("## Generation {}\n", report.generation_id);
            println!("| Metric | Value |");
            println!("|--------|-------|");
            println!("| Profile | {} |", report.profile);
            println!("| Dimension | {} |", report.dimension);
            println!("| Files | {} |", report.files_indexed);
            println!("| Rebuilt | {} |", report.files_rebuilt);
            println!("| Reused | {} |", report.files_reused);
            println!("| Removed | {} |", report.files_removed);
            println!("| Failed | {} |", report.files_failed);
            println!("| Degraded | {} |", report.files_degraded);
            println!("| Chunks | {} |", report.chunks);
            println!("| Embedded | {} |", report.embedded_chunks);
            println!("| Time | {} ms |", report.elapsed_ms);
        }
        OutputFormat::Text => {
            let kind = if report.incremental { "Synced" } else { "Indexed" };
            println!(
                "{kind} {} files into {} chunks (generation {}, profile {}, {} ms)",
                report.files_indexed,
                report.chunks,
                report.generation_id,
                report.profile,
                report.elapsed_ms,
            );
            println!(
                "  rebuilt {}, reused {}, removed {}, failed {}, degraded {}",
                report.files_rebuilt,
                report.files_reused,
                report.files_removed,
                report.files_failed,
                report.files_degraded,
            );
            if report.dimension == 0 {
                println!("  embeddings disabled; keyword search only");
            } else {
                println!(
                    "  {} of {} chunks embedded at dimension {}",
                    report.embedded_chunks, report.chunks, report.dimension
                );
            }
        }
    }
    Ok(())
}

fn print_stats(stats: &ProjectStats, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(stats).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            println!("## Index statistics\n");
            println!("| Metric | Value |");
            println!("|--------|-------|");
            println!("| Generation | {} |", stats.generation_id);
            println!("| Schema | {} |", stats.schema_version);
            println!("| Files | {} |", stats.total_files);
            println!("| Chunks | {} |", stats.total_chunks);
            println!("| Embedded | {} |", stats.embedded_chunks);
            println!("| Profile | {} |", stats.profile.name);
            println!("| Dimension | {} |", stats.dimension);
            println!("| Model | {} |", stats.model.as_deref().unwrap_or("none"));
            println!("| Size | {} bytes |", stats.index_size_bytes);
            println!("\n### Languages\n");
            for (language, count) in &stats.languages {
                println!("- {language}: {count}");
            }
            println!("\n### Kinds\n");
            for (kind, count) in &stats.kinds {
                println!("- {kind}: {count}");
            }
        }
        OutputFormat::Text => {
            println!("Index: {}", stats.root.display());
            println!("  Generation:  {} (schema {})", stats.generation_id, stats.schema_version);
            println!("  Files:       {}", stats.total_files);
            println!("  Chunks:      {}", stats.total_chunks);
            println!("  Embedded:    {}", stats.embedded_chunks);
            println!("  Degraded:    {}", stats.degraded_files);
            println!("  Profile:     {}", stats.profile.name);
            println!("  Dimension:   {}", stats.dimension);
            println!("  Model:       {}", stats.model.as_deref().unwrap_or("none"));
            println!("  Size:        {:.1} KiB", stats.index_size_bytes as f64 / 1024.0);
            if !stats.languages.is_empty() {
                let parts: Vec<String> = stats
                    .languages
                    .iter()
                    .map(|(l, n)| format!("{l} {n}"))
                    .collect();
                println!("  Languages:   {}", parts.join(", "));
            }
            if !stats.kinds.is_empty() {
                let parts: Vec<String> =
                    stats.kinds.iter().map(|(k, n)| format!("{k} {n}")).collect();
                println!("  Kinds:       {}", parts.join(", "));
            }
        }
    }
    if stats.model_mismatch {
        eprintln!(
            "warning: index was built with {} but {} is configured; run `codebox index` to use vector search",
            stats.model.as_deref().unwrap_or("none"),
            stats.configured_model.as_deref().unwrap_or("no embedder"),
        );
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Init => {
            let path = Path::new(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{CONFIG_FILE} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE} with default configuration");
        }
        Command::Index {
            ref path,
            profile,
            ref language,
        } => {
            check_languages(language)?;
            let project = open_project(config_path, path)?;
            let options = BuildOptions {
                profile,
                languages: (!language.is_empty()).then(|| language.clone()),
                ..BuildOptions::default()
            };
            cancel_on_ctrl_c(options.cancel.clone());
            let built = project.build(options).await.map_err(report)?;
            print_report(&built, cli.format)?;
        }
        Command::Sync { ref path } => {
            let project = open_project(config_path, path)?;
            let options = BuildOptions::default();
            cancel_on_ctrl_c(options.cancel.clone());
            let synced = project.incremental_sync(options).await.map_err(report)?;
            print_report(&synced, cli.format)?;
        }
        Command::Search {
            ref query,
            ref path,
            mode,
            limit,
            ref language,
            output_mode,
            full_content,
            preview_length,
            context,
            profile,
        } => {
            if let Some(language) = language {
                check_languages(std::slice::from_ref(language))?;
            }
            let project = open_project(config_path, path)?;
            let mut output = OutputOptions::from_config(&project.config().output);
            output.mode = output_mode;
            output.full_content = full_content;
            output.context = context;
            if let Some(preview_length) = preview_length {
                output.preview_length = preview_length;
            }
            let mut request = SearchRequest::new(query.as_str())
                .with_mode(mode)
                .with_output(output);
            if let Some(limit) = limit {
                request = request.with_limit(limit);
            }
            if let Some(language) = language {
                request = request.with_language(language.as_str());
            }
            request.profile = profile;
            let response = project.search(request).await.map_err(report)?;
            print!("{}", render_search(&response, cli.format).map_err(report)?);
        }
        Command::Stats { ref path } => {
            let project = open_project(config_path, path)?;
            print_stats(&project.stats().map_err(report)?, cli.format)?;
        }
        Command::Watch { ref path } => {
            let project = Arc::new(open_project(config_path, path)?);
            if project.current().is_none() {
                let built = project.build(BuildOptions::default()).await.map_err(report)?;
                print_report(&built, cli.format)?;
            }
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let handle = project.watch(cancel).map_err(report)?;
            eprintln!("Watching {} (Ctrl-C to stop)", project.root().display());
            handle.join().await.map_err(report)?;
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "codebox", &mut std::io::stdout());
        }
    }

    Ok(())
}
