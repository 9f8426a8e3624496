use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skillforge_core::config::EngineConfig;
use skillforge_core::event::EventBus;
use skillforge_core::types::TriggerSource;
use skillforge_engine::{
    load_manifests, CompositionManifest, CompositionOptions, ExecuteSkillOptions, SkillComposer,
    SkillExecutor,
};
use skillforge_skills::SkillRegistry;
use skillforge_store::SqliteRecordStore;

#[derive(Parser)]
#[command(name = "skillforge", version, about = "Run and compose skills with retries and timeouts")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "skillforge.toml", env = "SKILLFORGE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered skills
    Skills,
    /// Execute one skill and print its result
    Run {
        /// Skill id
        skill: String,
        /// JSON input ("-" reads stdin)
        #[arg(long, short)]
        input: Option<String>,
        /// Per-attempt timeout override
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Retry budget override
        #[arg(long)]
        retries: Option<u32>,
        /// Do not write an execution record
        #[arg(long)]
        no_log: bool,
        /// Print engine events to stderr as JSON lines
        #[arg(long)]
        watch: bool,
    },
    /// Execute a composition manifest (path, or id from compositions_dir)
    Compose {
        manifest: String,
        /// JSON input ("-" reads stdin)
        #[arg(long, short)]
        input: Option<String>,
        /// Do not write execution records
        #[arg(long)]
        no_log: bool,
        /// Print engine events to stderr as JSON lines
        #[arg(long)]
        watch: bool,
    },
    /// Show recent execution records
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("skillforge=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "skillforge", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    let registry = Arc::new(SkillRegistry::with_builtins());

    match cli.command {
        Commands::Skills => {
            for def in registry.definitions() {
                println!(
                    "  {:<18} {:<10} v{:<8} {}",
                    def.id,
                    def.category.to_string(),
                    def.version,
                    def.description
                );
            }
        }
        Commands::Run {
            skill,
            input,
            timeout_ms,
            retries,
            no_log,
            watch,
        } => {
            let input = parse_input(input.as_deref())?;
            let engine = Engine::build(&config, registry, no_log, watch)?;

            let mut request = ExecuteSkillOptions::new(skill, input)
                .triggered_by(cli_user(), TriggerSource::Manual);
            request.config.timeout_ms = timeout_ms;
            request.config.retries = retries;

            let result = engine.executor.execute_skill(request).await;
            engine.finish().await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Compose {
            manifest,
            input,
            no_log,
            watch,
        } => {
            let input = parse_input(input.as_deref())?;
            let composition = resolve_composition(&config, &manifest)?;
            let engine = Engine::build(&config, registry, no_log, watch)?;
            let composer = SkillComposer::new(engine.executor.clone());

            let mut options = CompositionOptions::default().triggered_by(cli_user());
            options.skip_logging = no_log;
            let result = composer.run_composition(&composition, input, options).await;
            drop(composer);
            engine.finish().await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::History { limit } => {
            let path = config.store_path();
            if !path.exists() {
                println!("No executions recorded yet.");
                return Ok(());
            }
            let store = SqliteRecordStore::open(&path)?;
            let records = store.list_recent(limit)?;
            if records.is_empty() {
                println!("No executions recorded yet.");
            }
            for r in records {
                println!(
                    "  {}  {:<18} {:<9} {:>6}ms  {}",
                    r.started_at.format("%Y-%m-%d %H:%M:%S"),
                    r.skill_id,
                    r.status.as_str(),
                    r.execution_time_ms.unwrap_or(0),
                    r.error_code.as_deref().unwrap_or(""),
                );
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        // Handled before config loading
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Executor plus the optional event printer attached to it.
struct Engine {
    executor: Arc<SkillExecutor>,
    printer: Option<tokio::task::JoinHandle<()>>,
}

impl Engine {
    fn build(
        config: &EngineConfig,
        registry: Arc<SkillRegistry>,
        no_log: bool,
        watch: bool,
    ) -> anyhow::Result<Self> {
        let mut executor = SkillExecutor::from_config(registry, config);

        if config.store.enabled && !no_log {
            let path = config.store_path();
            let store = SqliteRecordStore::open(&path)
                .with_context(|| format!("opening record store at {}", path.display()))?;
            executor = executor.with_store(Arc::new(store));
        }

        let mut printer = None;
        if watch {
            let bus = Arc::new(EventBus::default());
            let mut rx = bus.subscribe();
            printer = Some(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            if let Ok(line) = serde_json::to_string(&event) {
                                eprintln!("{}", line);
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Event printer lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
            executor = executor.with_events(bus);
        }

        Ok(Self {
            executor: Arc::new(executor),
            printer,
        })
    }

    /// Drop the executor so the event channel closes, then drain the printer.
    async fn finish(self) {
        drop(self.executor);
        if let Some(handle) = self.printer {
            handle.await.ok();
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    if path.exists() {
        return Ok(EngineConfig::load(path)?);
    }
    if let Some(home) = dirs_home().map(|h| h.join(".skillforge").join("config.toml")) {
        if home.exists() {
            info!(path = %home.display(), "Loading config from home directory");
            return Ok(EngineConfig::load(&home)?);
        }
    }
    Ok(EngineConfig::default())
}

/// A manifest path, or a composition id found in `compositions_dir`.
fn resolve_composition(
    config: &EngineConfig,
    manifest: &str,
) -> anyhow::Result<skillforge_engine::SkillComposition> {
    let path = Path::new(manifest);
    if path.is_file() {
        return Ok(CompositionManifest::from_file(path)?.into_composition()?);
    }
    let Some(dir) = config.compositions_path() else {
        anyhow::bail!("no manifest at '{}' and no compositions_dir configured", manifest);
    };
    load_manifests(&dir)
        .into_iter()
        .find(|c| c.id == manifest)
        .ok_or_else(|| {
            warn!(dir = %dir.display(), id = %manifest, "Composition not found");
            anyhow::anyhow!("Composition not found: {}", manifest)
        })
}

fn parse_input(raw: Option<&str>) -> anyhow::Result<serde_json::Value> {
    let text = match raw {
        None => return Ok(serde_json::json!({})),
        Some("-") => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
        Some(s) => s.to_string(),
    };
    serde_json::from_str(&text).context("input is not valid JSON")
}

fn cli_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "cli".to_string())
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
