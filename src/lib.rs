pub mod announce;
pub mod audio;
pub mod cli;
pub mod config;
pub mod departure;
pub mod script;
pub mod settings;
pub mod store;
pub mod tts;

use announce::{AnnounceError, AnnounceOutcome, Orchestrator, TriggerKind};
use anyhow::Context;
use audio::cache::LocalCache;
use audio::chain::CacheChain;
use audio::key::derive_key;
use audio::queue::{ClipOutcome, PlaybackQueue};
use audio::remote::{MemoryRemoteCache, RestRemoteCache};
use audio::renderer::CommandSink;
use audio::tier::{CacheScope, CacheTier};
use cli::{CacheCommand, Cli, Commands};
use config::Config;
use departure::StatusChange;
use serde::Deserialize;
use settings::OperatorSettings;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::{JsonStore, StructuredStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use tts::SynthesisClient;

pub fn run(cli: Cli) -> anyhow::Result<()> {
    setup_tracing(cli.verbose);

    match cli.command {
        Commands::Config(args) => config_cmd(args),
        command => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("start async runtime")?;
            runtime.block_on(dispatch(command, cli.store))
        }
    }
}

fn setup_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(command: Commands, store_override: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load().context("load config")?;
    config.validate().context("invalid config")?;

    match command {
        Commands::Announce(args) => announce(args, &config, store_override).await,
        Commands::Watch(args) => watch(args, &config, store_override).await,
        Commands::TestTts(args) => test_tts(args, &config, store_override).await,
        Commands::Cache(args) => cache_cmd(args.command, &config).await,
        Commands::Backends(args) => backends(args, &config),
        Commands::Config(args) => config_cmd(args),
    }
}

/// The long-lived pieces an announcement needs, built from config.
struct Components {
    store: Arc<dyn StructuredStore>,
    cache: CacheChain,
    synthesis: Arc<SynthesisClient>,
    queue: PlaybackQueue,
}

impl Components {
    async fn build(config: &Config, store_override: Option<PathBuf>) -> anyhow::Result<Self> {
        let store_path = store_override.unwrap_or_else(|| config.default_store_path());
        let (cache, _) = build_cache(config).await?;
        let synthesis = SynthesisClient::from_config(&config.synthesis).context("configure synthesis")?;

        let (program, args) = config.playback.player_command();
        let sink = CommandSink::new(program, args, config.playback.volume);

        Ok(Self {
            store: Arc::new(JsonStore::new(store_path)),
            cache,
            synthesis: Arc::new(synthesis),
            queue: PlaybackQueue::new(Arc::new(sink)),
        })
    }

    fn orchestrator(&self, config: &Config) -> Orchestrator {
        Orchestrator::new(
            self.store.clone(),
            self.cache.clone(),
            self.synthesis.clone(),
            self.queue.clone(),
            config.pacing(),
        )
    }
}

async fn build_cache(config: &Config) -> anyhow::Result<(CacheChain, PathBuf)> {
    let dir = config.default_cache_dir()?;
    let (max_bytes, max_entries) = config.cache_limits();
    let local = LocalCache::open(dir.clone(), max_bytes, max_entries)
        .await
        .with_context(|| format!("open cache at {}", dir.display()))?;

    let remote: Arc<dyn CacheTier> = match &config.remote_cache.url {
        Some(url) => Arc::new(
            RestRemoteCache::new(
                url,
                &config.remote_cache.table,
                config.remote_cache.api_key(),
                Duration::from_secs(config.remote_cache.timeout_seconds),
            )
            .context("configure remote cache")?,
        ),
        None => {
            tracing::debug!("no remote cache configured; sharing audio in process only");
            Arc::new(MemoryRemoteCache::new())
        }
    };

    let chain = CacheChain::new(Arc::new(local), remote, config.local_ttl(), config.remote_ttl());
    Ok((chain, dir))
}

async fn announce(args: cli::AnnounceArgs, config: &Config, store_override: Option<PathBuf>) -> anyhow::Result<()> {
    let components = Components::build(config, store_override).await?;
    let orchestrator = components.orchestrator(config);

    let departure = components
        .store
        .departure(&args.departure)
        .await
        .context("load departure")?;
    let mut settings = components
        .store
        .operator_settings(&departure.operator_id)
        .await
        .context("load operator settings")?;
    if let Some(repeat) = args.repeat {
        settings.repeat_count = repeat;
    }

    let outcome = tokio::select! {
        outcome = orchestrator.announce(&departure, &settings, TriggerKind::Manual) => outcome,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.cancel_all();
            AnnounceOutcome::Cancelled
        }
    };

    match outcome {
        AnnounceOutcome::Completed => {
            println!("Announced {} to {}", departure.id, departure.destination);
            Ok(())
        }
        AnnounceOutcome::Cancelled => {
            println!("Announcement cancelled");
            Ok(())
        }
        AnnounceOutcome::Skipped(reason) => {
            println!("Announcement skipped: {reason:?}");
            Ok(())
        }
        AnnounceOutcome::Failed(err) => {
            eprintln!("{}", announce::FAILURE_MESSAGE);
            Err(anyhow::Error::new(err).context(format!("announce {}", departure.id)))
        }
    }
}

/// One line of `watch` input.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WatchMessage {
    Cancel { cancel: String },
    SettingsChanged { settings_changed: String },
    Status(StatusChange),
}

async fn watch(args: cli::WatchArgs, config: &Config, store_override: Option<PathBuf>) -> anyhow::Result<()> {
    let components = Components::build(config, store_override).await?;
    let orchestrator = Arc::new(components.orchestrator(config));
    let sweeper = components.cache.spawn_sweeper(config.sweep_interval());
    let kind = if args.manual {
        TriggerKind::Manual
    } else {
        TriggerKind::Automatic
    };

    tracing::info!("watching stdin for departure status changes");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut running: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                orchestrator.cancel_all();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<WatchMessage>(line) {
            Ok(WatchMessage::Status(change)) => {
                if !change.is_boarding_transition() {
                    tracing::debug!(departure = %change.departure_id, status = ?change.status, "not a boarding transition");
                    continue;
                }
                let departure_id = change.departure_id.clone();
                running.retain(|handle| !handle.is_finished());
                running.push(orchestrator.spawn_trigger(change.departure_id, kind, report(departure_id)));
            }
            Ok(WatchMessage::Cancel { cancel }) => {
                if !orchestrator.cancel(&cancel) {
                    tracing::debug!(departure = %cancel, "nothing to cancel");
                }
            }
            Ok(WatchMessage::SettingsChanged { settings_changed }) => {
                orchestrator.settings_changed(&settings_changed).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed input line");
            }
        }
    }

    for handle in running {
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "announcement task ended abnormally");
        }
    }
    sweeper.shutdown().await;
    Ok(())
}

fn report(departure_id: String) -> impl FnOnce(Result<AnnounceOutcome, AnnounceError>) + Send + 'static {
    move |result: Result<AnnounceOutcome, AnnounceError>| match result {
        Ok(outcome) => {
            if let Some(message) = outcome.user_message() {
                eprintln!("{departure_id}: {message}");
            } else {
                tracing::debug!(departure = %departure_id, ?outcome, "trigger handled");
            }
        }
        Err(err) => {
            tracing::warn!(departure = %departure_id, error = %err, "could not start announcement");
        }
    }
}

async fn test_tts(args: cli::TestTtsArgs, config: &Config, store_override: Option<PathBuf>) -> anyhow::Result<()> {
    let components = Components::build(config, store_override).await?;
    let settings = match &args.operator {
        Some(operator_id) => components
            .store
            .operator_settings(operator_id)
            .await
            .context("load operator settings")?,
        None => OperatorSettings::new("test", "Test"),
    };

    let language = args.language;
    let text = args
        .text
        .unwrap_or_else(|| "Attention please, this is a test announcement".to_string());
    let voice = settings.voice(language);
    let key = derive_key(&text, language, &settings.operator_id, Some(&voice.cache_tag()));
    let scope = CacheScope::new(settings.operator_id.clone(), language);

    let audio = match components.cache.lookup(&key, &scope).await {
        Some((audio, hit)) => {
            tracing::info!(tier = ?hit, "using cached audio");
            audio
        }
        None => {
            let audio = components
                .synthesis
                .synthesize(&text, language, &voice)
                .await
                .context("tts synthesis")?;
            components.cache.store(&key, &audio, &scope).await;
            audio
        }
    };

    if let Some(path) = args.output {
        tokio::fs::write(&path, &audio).await.context("write output")?;
    }

    if !args.no_play {
        match components.queue.enqueue(audio).finished().await {
            ClipOutcome::Finished => {}
            outcome => anyhow::bail!("playback did not finish: {outcome:?}"),
        }
    }

    Ok(())
}

async fn cache_cmd(command: CacheCommand, config: &Config) -> anyhow::Result<()> {
    match command {
        CacheCommand::Path => {
            println!("{}", config.default_cache_dir()?.display());
        }
        CacheCommand::Clear { operator } => {
            let (cache, _) = build_cache(config).await?;
            let removed = cache.clear_for_operator(&operator).await;
            println!("Removed {removed} cached clip(s) for {operator}");
        }
        CacheCommand::Sweep => {
            let (cache, dir) = build_cache(config).await?;
            let removed = cache.purge_expired().await;
            println!("Removed {removed} expired clip(s) from {}", dir.display());
        }
    }
    Ok(())
}

fn backends(args: cli::BackendsArgs, config: &Config) -> anyhow::Result<()> {
    let client = SynthesisClient::from_config(&config.synthesis).context("configure synthesis")?;
    let info = client.backends();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Synthesis backends (in fallback order):");
    for (backend, configured) in info.iter().zip(&config.synthesis.backends) {
        let key = if configured.api_key().is_some() {
            "key set"
        } else {
            "no key"
        };
        println!("{}. {} ({})", backend.position, backend.name, key);
    }
    println!("Timeout: {}s per attempt", config.synthesis.timeout_seconds);

    Ok(())
}

fn config_cmd(args: cli::ConfigArgs) -> anyhow::Result<()> {
    if args.init {
        let path = Config::init_default()?;
        println!("Initialized config at {}", path.display());
        return Ok(());
    }

    if args.show {
        let config = Config::load()?;
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if args.validate {
        let config = Config::load()?;
        config.validate()?;
        println!("Config OK");
        return Ok(());
    }

    let path = Config::default_path()?;
    println!("{}", path.display());
    Ok(())
}
