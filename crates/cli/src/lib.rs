use anyhow::{Context as AnyhowContext, Result};
use cache::{CacheBackendKind, CacheConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use http_api::AppState;
use schemaless_cache::MEMCACHED_ENV;
use schemaless_engine::{
    CancelToken, EngineConfig, FsSchemaStore, OpenAiChatModel, OpenAiConfig, TranslateOptions,
    Translator,
};
use schemaless_mapping::{fingerprint, normalize_document, reverse_translate, ArrayPolicy};
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod cache;
pub mod http_api;
pub mod server_security;

use server_security::{AuthToken, AUTH_TOKEN_ENV};

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    print_stdout(&text)
}

#[derive(Parser)]
#[command(name = "schemaless")]
#[command(about = "Translate arbitrary JSON/YAML documents into named standards", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    /// Cache backend for learned mappings and model responses
    #[arg(long, global = true, value_enum, default_value = "memory")]
    cache_backend: CacheBackendKind,

    /// Directory of the file cache backend
    #[arg(long, global = true, default_value = ".schemaless/cache")]
    cache_dir: PathBuf,

    /// Memcached server of the memcached backend (or SCHEMALESS_MEMCACHED)
    #[arg(long, global = true)]
    memcached_addr: Option<String>,

    /// Root of standards/, translation_output/ and friends
    /// (default: $FILE_LOCATION/schemaless, else the working directory)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(flatten)]
    engine: EngineArgs,
}

/// Overrides on top of the SCHEMALESS_* environment.
#[derive(Args, Clone, Debug, Default)]
struct EngineArgs {
    /// Maximum number of list items translated per request
    #[arg(long, global = true)]
    fanout_cap: Option<usize>,

    /// List items translated concurrently
    #[arg(long, global = true)]
    fanout_concurrency: Option<usize>,

    /// Largest input skeleton (characters) sent to the model
    #[arg(long, global = true)]
    max_input_chars: Option<usize>,

    /// Ignore keys ending in a digit when fingerprinting
    #[arg(long, global = true)]
    skip_numbered_keys: bool,

    /// Treatment of scalar array elements in the skeleton
    #[arg(long, global = true, value_enum)]
    array_policy: Option<ArrayPolicyArg>,

    /// Let concurrent requests for one shape generate mappings independently
    #[arg(long, global = true)]
    no_single_flight: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve translations over HTTP (POST /translate/<standard>)
    Serve(ServeArgs),

    /// Translate one document and print the result
    Translate(TranslateArgs),

    /// Print the structural fingerprint of a document
    Fingerprint(FingerprintArgs),

    /// Derive a mapping from an input/output example pair
    Reverse(ReverseArgs),

    /// Learn and store the mapping for an input shape from an example pair
    Learn(LearnArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Bind address, e.g. 127.0.0.1:5001
    #[arg(long, default_value = "127.0.0.1:5001")]
    bind: String,

    /// Allow binding to non-loopback addresses (requires an auth token)
    #[arg(long)]
    public: bool,

    /// Bearer token required on every request (or SCHEMALESS_AUTH_TOKEN)
    #[arg(long)]
    auth_token: Option<String>,
}

#[derive(Args)]
struct TranslateArgs {
    /// Target standard, e.g. `ticket` or `ticket.json`
    standard: String,

    /// Input document; stdin when omitted or `-`
    #[arg(long)]
    input: Option<PathBuf>,

    /// Namespace for learned mappings
    #[arg(long, default_value = "")]
    prefix: String,

    /// Print mapping source and shape token alongside the document
    #[arg(long)]
    with_meta: bool,

    #[arg(long)]
    pretty: bool,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum ArrayPolicyArg {
    #[default]
    Collapse,
    TypeDefaults,
}

impl From<ArrayPolicyArg> for ArrayPolicy {
    fn from(value: ArrayPolicyArg) -> Self {
        match value {
            ArrayPolicyArg::Collapse => ArrayPolicy::Collapse,
            ArrayPolicyArg::TypeDefaults => ArrayPolicy::TypeDefaults,
        }
    }
}

#[derive(Args)]
struct FingerprintArgs {
    /// Input document; stdin when omitted or `-`
    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct ReverseArgs {
    /// Example input document
    #[arg(long)]
    source: PathBuf,

    /// The same data in the standard's shape
    #[arg(long)]
    target: PathBuf,

    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct LearnArgs {
    /// Standard the target document is written in
    standard: String,

    #[arg(long)]
    source: PathBuf,

    #[arg(long)]
    target: PathBuf,

    #[arg(long, default_value = "")]
    prefix: String,

    #[arg(long)]
    pretty: bool,
}

/// Settings shared by every subcommand that needs a translator.
struct Runtime {
    cache: CacheConfig,
    store_dir: Option<PathBuf>,
    engine: EngineConfig,
}

impl Runtime {
    async fn translator(&self) -> Result<Translator> {
        let store = self
            .store_dir
            .clone()
            .map_or_else(FsSchemaStore::from_env, FsSchemaStore::new);
        store
            .ensure_dirs()
            .await
            .with_context(|| format!("Cannot prepare storage at {}", store.root().display()))?;

        let model_config = OpenAiConfig::from_env();
        if model_config.api_key.is_none() {
            log::warn!("OPENAI_API_KEY is not set; only cached and stored mappings can be used");
        }
        let model = OpenAiChatModel::new(model_config)?;

        Ok(Translator::new(
            self.cache.build()?,
            Arc::new(store),
            Arc::new(model),
            self.engine.clone(),
        ))
    }
}

fn engine_config(args: &EngineArgs) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(cap) = args.fanout_cap {
        config.fanout_cap = cap;
    }
    if let Some(concurrency) = args.fanout_concurrency {
        config.fanout_concurrency = concurrency;
    }
    if let Some(limit) = args.max_input_chars {
        config.max_input_chars = limit;
    }
    if let Some(policy) = args.array_policy {
        config.array_policy = policy.into();
    }
    if args.skip_numbered_keys {
        config.skip_numbered_keys = true;
    }
    if args.no_single_flight {
        config.single_flight = false;
    }
    config.clamped()
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let runtime = Runtime {
        cache: CacheConfig {
            dir: cli.cache_dir.clone(),
            backend: cli.cache_backend,
            memcached_addr: cli
                .memcached_addr
                .clone()
                .or_else(|| std::env::var(MEMCACHED_ENV).ok()),
            ..CacheConfig::with_defaults()
        },
        store_dir: cli.store_dir.clone(),
        engine: engine_config(&cli.engine),
    };

    match cli.command {
        Commands::Serve(args) => serve_http(args, runtime).await?,
        Commands::Translate(args) => run_translate(args, runtime).await?,
        Commands::Fingerprint(args) => run_fingerprint(args, &runtime.engine)?,
        Commands::Reverse(args) => run_reverse(args)?,
        Commands::Learn(args) => run_learn(args, runtime).await?,
    }

    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) if path != Path::new("-") => {
            std::fs::read(path).with_context(|| format!("Cannot read {}", path.display()))
        }
        _ => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("Cannot read stdin")?;
            Ok(buf)
        }
    }
}

fn read_document(path: &Path) -> Result<Value> {
    let raw = read_input(Some(path))?;
    normalize_document(&raw).with_context(|| format!("Cannot parse {}", path.display()))
}

async fn run_translate(args: TranslateArgs, runtime: Runtime) -> Result<()> {
    let body = read_input(args.input.as_deref())?;
    let translator = runtime.translator().await?;
    let options = TranslateOptions::with_prefix(args.prefix);

    let cancel = CancelToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted; cancelling translation");
                cancel.cancel();
            }
        })
    };
    let outcome = translator
        .translate(&args.standard, &body, &options, &cancel)
        .await;
    interrupt.abort();
    let outcome = outcome.with_context(|| format!("Translation into '{}' failed", args.standard))?;

    if args.with_meta {
        print_json(
            &serde_json::json!({
                "document": outcome.document,
                "source": outcome.source,
                "token": outcome.token,
            }),
            args.pretty,
        )
    } else {
        print_json(&outcome.document, args.pretty)
    }
}

fn run_fingerprint(args: FingerprintArgs, engine: &EngineConfig) -> Result<()> {
    let raw = read_input(args.input.as_deref())?;
    let doc = normalize_document(&raw).context("Cannot parse input")?;
    let fp = fingerprint(&doc, &engine.fingerprint_options()).context("Cannot fingerprint input")?;
    print_json(&fp, args.pretty)
}

fn run_reverse(args: ReverseArgs) -> Result<()> {
    let source = read_document(&args.source)?;
    let target = read_document(&args.target)?;
    let mapping = reverse_translate(&source, &target).context("Cannot derive mapping")?;
    print_json(&mapping, args.pretty)
}

async fn run_learn(args: LearnArgs, runtime: Runtime) -> Result<()> {
    let source = read_document(&args.source)?;
    let target = read_document(&args.target)?;
    let translator = runtime.translator().await?;
    let mapping = translator
        .learn_from_example(
            &args.standard,
            &source,
            &target,
            &TranslateOptions::with_prefix(args.prefix),
        )
        .await
        .with_context(|| format!("Cannot learn a mapping for '{}'", args.standard))?;
    print_json(&mapping, args.pretty)
}

async fn serve_http(args: ServeArgs, runtime: Runtime) -> Result<()> {
    let addr = server_security::resolve_guarded_bind_addr(&args.bind, args.public).await?;
    let auth_token_raw = args
        .auth_token
        .clone()
        .or_else(|| std::env::var(AUTH_TOKEN_ENV).ok());
    let auth_token = AuthToken::parse(auth_token_raw.as_deref())?;
    if args.public && auth_token.is_none() {
        anyhow::bail!(
            "--public requires an auth token: set --auth-token or export {AUTH_TOKEN_ENV}"
        );
    }

    let state = Arc::new(AppState {
        translator: runtime.translator().await?,
        auth_token,
    });
    let app = http_api::router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Cannot bind {addr}"))?;
    let base_url = format!("http://{}", listener.local_addr()?);

    print_stdout(&format!("Serving translations: {base_url}/translate/<standard>"))?;
    print_stdout(&format!("Health endpoint: {base_url}/health"))?;
    if state.auth_token.is_some() {
        print_stdout(&format!(
            "Auth enabled: add header 'Authorization: Bearer ${AUTH_TOKEN_ENV}'"
        ))?;
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutting down");
        })
        .await?;
    Ok(())
}
