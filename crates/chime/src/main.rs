//! # chime
//!
//! Chime relay binary: loads settings, wires the generation, speech and
//! storage clients together, and serves the WebSocket relay.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chime_core::HistoryStore;
use chime_llm::{CompletionClient, CompletionConfig};
use chime_server::{ChimeServer, Collaborators, ServerConfig};
use chime_settings::ChimeSettings;
use chime_speech::{SpeechClient, SpeechConfig};
use chime_store::{Database, SqliteHistoryStore};
use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Chime voice-chat relay server.
#[derive(Parser, Debug)]
#[command(name = "chime", about = "Chime voice-chat relay server")]
struct Cli {
    /// Settings file (defaults to `~/.chime/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Fold CLI flags over loaded settings.
    fn apply(&self, settings: &mut ChimeSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.storage.db_path = path.to_string_lossy().into_owned();
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Relative database paths live under `home`.
fn resolve_db_path(home: &Path, configured: &str) -> PathBuf {
    let path = PathBuf::from(configured);
    if path.is_absolute() {
        path
    } else {
        home.join(path)
    }
}

fn server_config(settings: &ChimeSettings) -> ServerConfig {
    let s = &settings.server;
    ServerConfig {
        host: s.host.clone(),
        port: s.port,
        max_connections: s.max_connections,
        outbound_queue_capacity: s.outbound_queue_capacity,
        read_idle_timeout_ms: s.read_idle_timeout_ms,
        write_timeout_ms: s.write_timeout_ms,
        ping_interval_ms: s.ping_interval_ms,
        send_timeout_ms: s.send_timeout_ms,
        max_message_size: s.max_message_size,
        welcome_message: settings.welcome_message.clone(),
    }
}

fn completion_config(settings: &ChimeSettings) -> CompletionConfig {
    let g = &settings.generation;
    CompletionConfig {
        app_id: g.app_id.clone(),
        api_key: g.api_key.clone(),
        api_url: g.api_url.clone(),
        timeout: Duration::from_millis(g.timeout_ms),
    }
}

fn speech_config(settings: &ChimeSettings) -> SpeechConfig {
    let s = &settings.synthesis;
    SpeechConfig {
        api_key: s.api_key.clone(),
        api_url: s.api_url.clone(),
        voice: s.voice.clone(),
        format: s.format.clone(),
        sample_rate: s.sample_rate,
        volume: s.volume,
        speech_rate: s.speech_rate,
        pitch_rate: s.pitch_rate,
        timeout: Duration::from_millis(s.timeout_ms),
    }
}

/// Periodically prune old history and end idle conversations.
fn spawn_maintenance(
    store: SqliteHistoryStore,
    settings: &ChimeSettings,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let retention_days = settings.storage.retention_days;
    let idle_after = Duration::from_secs(settings.storage.session_timeout_secs);
    let every = Duration::from_secs(settings.storage.maintenance_interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match store.prune_history_older_than(retention_days).await {
                Ok(0) => {}
                Ok(pruned) => tracing::info!(pruned, retention_days, "pruned old history"),
                Err(e) => tracing::warn!(error = %e, "history pruning failed"),
            }
            match store.end_idle_sessions(idle_after).await {
                Ok(0) => {}
                Ok(ended) => tracing::info!(ended, "ended idle conversations"),
                Err(e) => tracing::warn!(error = %e, "ending idle conversations failed"),
            }
        }
    })
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(chime_settings::settings_path);
    let mut settings = chime_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    chime_core::logging::init_subscriber(&settings.logging.level, settings.logging.format);
    settings.validate().context("Invalid settings")?;

    let metrics = chime_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let db_path = resolve_db_path(&chime_settings::chime_home(), &settings.storage.db_path);
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let store = SqliteHistoryStore::new(db);

    let generator = CompletionClient::new(completion_config(&settings))
        .context("Failed to build generation client")?;
    let synthesizer =
        SpeechClient::new(speech_config(&settings)).context("Failed to build speech client")?;

    let server = ChimeServer::new(
        server_config(&settings),
        Collaborators {
            generator: Arc::new(generator),
            synthesizer: Arc::new(synthesizer),
            store: Arc::new(store.clone()),
        },
    )
    .with_metrics(metrics);

    let (addr, serve_handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        %addr,
        db = %db_path.display(),
        "chime relay ready on ws://{addr}/ws"
    );

    let maintenance = spawn_maintenance(store, &settings, server.shutdown().token());

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    let drain = Duration::from_millis(settings.server.shutdown_timeout_ms);
    let outcome = server
        .shutdown()
        .graceful_shutdown(vec![serve_handle, maintenance], Some(drain))
        .await;

    tracing::info!(finished = outcome.finished, aborted = outcome.aborted, "Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_has_no_required_flags() {
        let cli = Cli::parse_from(["chime"]);
        assert!(cli.config.is_none());
        assert!(cli.port.is_none());
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "chime",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--db-path",
            "/var/lib/chime.db",
            "--log-level",
            "debug",
        ]);
        let mut settings = ChimeSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.storage.db_path, "/var/lib/chime.db");
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn absent_flags_keep_settings() {
        let mut settings = ChimeSettings::default();
        settings.server.port = 7000;
        Cli::parse_from(["chime"]).apply(&mut settings);
        assert_eq!(settings.server.port, 7000);
    }

    #[test]
    fn relative_db_path_resolves_under_home() {
        let home = Path::new("/home/u/.chime");
        assert_eq!(
            resolve_db_path(home, "chime.db"),
            PathBuf::from("/home/u/.chime/chime.db")
        );
        assert_eq!(
            resolve_db_path(home, "/data/x.db"),
            PathBuf::from("/data/x.db")
        );
    }

    #[test]
    fn server_config_mirrors_settings() {
        let mut settings = ChimeSettings::default();
        settings.server.max_connections = 3;
        settings.welcome_message = "hi".into();
        let cfg = server_config(&settings);
        assert_eq!(cfg.max_connections, 3);
        assert_eq!(cfg.outbound_queue_capacity, 256);
        assert_eq!(cfg.read_idle_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.welcome_message, "hi");
    }

    #[test]
    fn client_configs_carry_timeouts() {
        let mut settings = ChimeSettings::default();
        settings.generation.timeout_ms = 1_500;
        settings.synthesis.timeout_ms = 2_500;
        assert_eq!(completion_config(&settings).timeout, Duration::from_millis(1_500));
        assert_eq!(speech_config(&settings).timeout, Duration::from_millis(2_500));
    }

    #[tokio::test]
    async fn maintenance_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("chime.db")).unwrap();
        let token = CancellationToken::new();
        let handle = spawn_maintenance(
            SqliteHistoryStore::new(db),
            &ChimeSettings::default(),
            token.clone(),
        );

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("maintenance did not stop")
            .expect("join error");
    }
}
