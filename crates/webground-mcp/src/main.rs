use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use webground_core::stream::{GeneratorChunk, StreamParser};
use webground_core::SearchMode;
use webground_local::config::ResearchConfig;
use webground_local::progress::{ChannelSink, ProgressEmitter, VecSink};
use webground_local::session::{Providers, ResearchSession};
use webground_local::FsCache;

mod envelope;
#[cfg(feature = "stdio")]
mod mcp;

#[derive(Parser, Debug)]
#[command(name = "webground")]
#[command(about = "Web research grounding pipeline (CLI + MCP stdio server)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as an MCP stdio server.
    #[cfg(feature = "stdio")]
    McpStdio(CacheArgs),
    /// Run one research query: progress and sources blocks, then the context.
    Research(ResearchCmd),
    /// Parse a raw generator transcript from stdin into clean text + final state (json).
    ParseStream(ParseStreamCmd),
    /// Diagnose configuration (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug, Clone)]
struct CacheArgs {
    /// Directory for the on-disk result cache (default: per-user cache dir).
    #[arg(long, env = "WEBGROUND_CACHE_DIR")]
    cache_dir: Option<PathBuf>,
    /// Disable result caching for this process.
    #[arg(long, default_value_t = false)]
    no_cache: bool,
}

#[derive(clap::Args, Debug)]
struct ResearchCmd {
    /// Research question.
    query: String,
    /// Search mode: deep|quick
    #[arg(long, env = "WEBGROUND_MODE", default_value = "deep")]
    mode: String,
    /// Output format: text|json
    #[arg(long = "output", alias = "format", default_value = "text")]
    output: String,
    /// Override the organic result target (1..=100).
    #[arg(long)]
    target_results: Option<usize>,
    /// Override the scrape concurrency cap (1..=64).
    #[arg(long)]
    concurrency: Option<usize>,
    #[command(flatten)]
    cache: CacheArgs,
}

#[derive(clap::Args, Debug)]
struct ParseStreamCmd {
    /// Feed stdin to the parser in chunks of this many characters.
    #[arg(long, default_value_t = 16)]
    chunk_size: usize,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
    #[command(flatten)]
    cache: CacheArgs,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("webground")
}

impl CacheArgs {
    fn dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }
}

fn open_session(config: ResearchConfig, cache: &CacheArgs) -> Result<ResearchSession> {
    let mut config = config;
    if cache.no_cache {
        config.cache_enabled = false;
    }
    let client = webground_local::http_client()?;
    let store: Arc<dyn webground_core::cache::ResultCache> = Arc::new(FsCache::new(cache.dir()));
    Ok(ResearchSession::open(
        config,
        Providers::from_env(client),
        Some(store),
    ))
}

/// `WEBGROUND_ENV_FILE`: `KEY=VALUE` lines applied only where the process env is unset.
fn load_env_file() {
    let Ok(p) = std::env::var("WEBGROUND_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim().trim_matches('"');
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v);
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("WEBGROUND_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    // stdout carries protocol/JSON output; logs go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn cache_dir_writable(dir: &std::path::Path) -> bool {
    (|| -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let probe = dir.join(format!("webground-doctor-{}.probe", std::process::id()));
        std::fs::write(&probe, b"ok")?;
        let _ = std::fs::remove_file(&probe);
        Ok(())
    })()
    .is_ok()
}

fn print_research_error(
    args: &ResearchCmd,
    requested: SearchMode,
    code: envelope::ErrorCode,
    message: &str,
    hint: &str,
    t0: std::time::Instant,
) -> Result<()> {
    let mut payload = serde_json::json!({
        "ok": false,
        "request": { "query": args.query, "mode": requested.as_str() },
        "error": envelope::error_obj(code, message, hint),
    });
    envelope::add_envelope_fields(&mut payload, "web_research", t0.elapsed().as_millis());
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn run_research(args: ResearchCmd) -> Result<()> {
    let t0 = std::time::Instant::now();
    let requested: SearchMode = args.mode.parse()?;
    let mut config = ResearchConfig::from_env();
    if let Some(n) = args.target_results {
        config.target_results = n.clamp(1, 100);
    }
    if let Some(n) = args.concurrency {
        config.scrape_concurrency = n.clamp(1, 64);
    }
    if args.query.trim().is_empty() {
        if args.output == "json" {
            return print_research_error(
                &args,
                requested,
                envelope::ErrorCode::InvalidParams,
                "query must be non-empty",
                "Pass a free-text question as the first argument.",
                t0,
            );
        }
        anyhow::bail!("query must be non-empty");
    }
    let session = match open_session(config, &args.cache) {
        Ok(s) => s,
        Err(e) if args.output == "json" => {
            return print_research_error(
                &args,
                requested,
                envelope::ErrorCode::UnexpectedError,
                &e.to_string(),
                "The HTTP client could not be built; check TLS and proxy settings.",
                t0,
            );
        }
        Err(e) => return Err(e),
    };
    tracing::debug!(
        mode = requested.as_str(),
        cache = session.config().cache_enabled,
        "research session opened"
    );

    if args.output == "json" {
        let emitter = ProgressEmitter::new(Arc::new(VecSink::new()));
        let outcome = session.run_research(&args.query, requested, &emitter).await;
        let payload = envelope::research_payload(
            &outcome,
            requested,
            &session.providers().report(),
            &emitter.emitted(),
            t0.elapsed().as_millis(),
        );
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let printer = tokio::spawn(async move {
            let mut out = std::io::stdout();
            while let Some(block) = rx.recv().await {
                let _ = writeln!(out, "{block}");
                let _ = out.flush();
            }
        });
        let emitter = ProgressEmitter::new(Arc::new(ChannelSink::new(tx)));
        let outcome = session.run_research(&args.query, requested, &emitter).await;
        drop(emitter);
        printer.await?;
        println!();
        println!("{}", outcome.context_text);
    }
    tracing::info!(elapsed_ms = t0.elapsed().as_millis() as u64, "research finished");
    session.close();
    Ok(())
}

fn run_parse_stream(args: ParseStreamCmd) -> Result<()> {
    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw)?;

    let chunk_size = args.chunk_size.max(1);
    let mut parser = StreamParser::new();
    let mut events = 0usize;
    let chars: Vec<char> = raw.chars().collect();
    for piece in chars.chunks(chunk_size) {
        let s: String = piece.iter().collect();
        let (ev, _) = parser.handle(GeneratorChunk::Token(s));
        events += ev.len();
    }
    let (ev, done) = parser.handle(GeneratorChunk::Done);
    events += ev.len();
    let turn = done.ok_or_else(|| anyhow::anyhow!("parser did not complete the turn"))?;

    let tool_calls = turn
        .tool_calls
        .iter()
        .map(|c| -> Result<serde_json::Value> { Ok(serde_json::from_str(&c.encode()?)?) })
        .collect::<Result<Vec<_>>>()?;

    let payload = serde_json::json!({
        "schema_version": envelope::SCHEMA_VERSION,
        "kind": "parse_stream",
        "ok": true,
        "chunk_size": chunk_size,
        "events": events,
        "text": turn.text,
        "progress": turn.progress,
        "sources": turn.sources,
        "images": turn.images,
        "tool_calls": tool_calls,
        "discarded": turn.discarded,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_doctor(args: DoctorCmd) -> Result<()> {
    let t0 = std::time::Instant::now();
    let client = webground_local::http_client()?;
    let report = Providers::from_env(client).report();
    let config = ResearchConfig::from_env();
    let cache_dir = args.cache.dir();
    let cache_ok = cache_dir_writable(&cache_dir);

    let checks = vec![
        serde_json::json!({
            "name": "cache_dir_writable",
            "ok": cache_ok,
            "message": if cache_ok { "cache dir is writable" } else { "cache dir is not writable" },
            "hint": if cache_ok { "" } else { "Set WEBGROUND_CACHE_DIR to a writable directory." },
        }),
        serde_json::json!({
            "name": "deep_search_configured",
            "ok": report.deep_search,
            "message": if report.deep_search { "deep search provider configured" } else { "no deep search provider" },
            "hint": if report.deep_search { "" } else { "Set WEBGROUND_SERPER_API_KEY (or SERPER_API_KEY)." },
        }),
    ];
    let ok = checks.iter().all(|c| c["ok"].as_bool().unwrap_or(false));

    let mut payload = serde_json::json!({
        "ok": ok,
        "name": "webground",
        "version": env!("CARGO_PKG_VERSION"),
        "platform": {
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        },
        "features": {
            "stdio": cfg!(feature = "stdio"),
        },
        "configured": report,
        "cache": {
            "dir": cache_dir,
            "enabled": config.cache_enabled && !args.cache.no_cache,
        },
        "checks": checks,
    });
    envelope::add_envelope_fields(&mut payload, "doctor", t0.elapsed().as_millis());

    if args.output == "text" {
        for c in payload["checks"].as_array().into_iter().flatten() {
            let mark = if c["ok"].as_bool().unwrap_or(false) { "ok  " } else { "FAIL" };
            println!("{mark} {}", c["message"].as_str().unwrap_or(""));
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    }
    Ok(())
}

fn run_version(args: VersionCmd) -> Result<()> {
    if args.output == "text" {
        println!("webground {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let payload = serde_json::json!({
        "schema_version": envelope::SCHEMA_VERSION,
        "kind": "version",
        "ok": true,
        "name": "webground",
        "version": env!("CARGO_PKG_VERSION"),
        "features": { "stdio": cfg!(feature = "stdio") },
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        #[cfg(feature = "stdio")]
        Commands::McpStdio(cache) => {
            let session = open_session(ResearchConfig::from_env(), &cache)?;
            tracing::info!(report = ?session.providers().report(), "mcp stdio server starting");
            mcp::serve_stdio(session)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        Commands::Research(args) => run_research(args).await?,
        Commands::ParseStream(args) => run_parse_stream(args)?,
        Commands::Doctor(args) => run_doctor(args)?,
        Commands::Version(args) => run_version(args)?,
    }
    Ok(())
}
