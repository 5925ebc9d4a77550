use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fdir_config::{from_toml_section, Config, ConfigError, ConfigManager};
use fdir_logging::{init_logging, LogConfig};
use fdir_meta_service::{MetaServerConfig, ServerContext};
use fdir_utils::{BackgroundRunner, Clock, SystemClock};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};

/// fdir metadata server
#[derive(Parser, Debug)]
#[command(name = "fdir-meta-server", version, about)]
struct Args {
    /// Path to configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    server: MetaServerConfig,
    log: LogConfig,
}

impl Config for AppConfig {
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError> {
        from_toml_section(value)
    }

    fn hot_update(&mut self, other: &Self) {
        self.server.hot_update(&other.server);
    }

    fn render(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()
    }
}

const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        print!("{}", AppConfig::default().render());
        return Ok(());
    }

    let manager = match &args.config {
        Some(path) => ConfigManager::<AppConfig>::load(path)?,
        None => ConfigManager::new(AppConfig::default()),
    };
    let config = manager.snapshot();
    let _log_guard = init_logging(&config.log)?;
    tracing::info!(config = ?args.config, "starting fdir metadata server");

    let ctx = Arc::new(ServerContext::with_system_clock(&config.server));

    let mut runner = BackgroundRunner::new();
    let reclaim_ctx = Arc::clone(&ctx);
    runner.spawn_periodic(
        "reclaim",
        Duration::from_secs(config.server.reclaim_interval_secs.max(1)),
        move || {
            let ctx = Arc::clone(&reclaim_ctx);
            async move {
                let report = ctx.reclaim(SystemClock.now_secs());
                if report.expired_lists > 0 {
                    tracing::debug!(expired = report.expired_lists, "list sessions expired");
                }
            }
        },
    );
    let stats_ctx = Arc::clone(&ctx);
    runner.spawn_periodic("stats", STATS_INTERVAL, move || {
        let ctx = Arc::clone(&stats_ctx);
        async move {
            let stats = ctx.stats();
            tracing::info!(
                namespaces = stats.namespaces,
                entries = stats.index.entries,
                lock_tasks = stats.index.lock_tasks,
                name_bytes = stats.names.used_bytes,
                reclaim_pending = stats.reclaim.pending,
                list_sessions = stats.list_sessions,
                "server stats"
            );
        }
    });
    tracing::info!(tasks = runner.num_tasks(), "metadata server ready");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received CTRL+C");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM");
                break;
            }
            _ = sighup.recv() => match manager.reload() {
                Ok(()) => ctx.update_config(&manager.get().server),
                Err(e) => tracing::warn!(error = %e, "config reload failed, keeping current"),
            },
        }
    }

    runner.shutdown().await;
    let freed = ctx.drain_reclaim();
    tracing::info!(freed, "metadata server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_round_trips() {
        let rendered = AppConfig::default().render();
        let value: toml::Value = rendered.parse().unwrap();
        assert_eq!(AppConfig::from_toml(&value).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_sections_default_independently() {
        let value: toml::Value = "[server]\nmax_entries_per_dir = 10\n".parse().unwrap();
        let config = AppConfig::from_toml(&value).unwrap();
        assert_eq!(config.server.max_entries_per_dir, 10);
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn test_reload_only_touches_hot_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server]\nmax_entries_per_dir = 10\ndelay_free_seconds = 5\n").unwrap();
        let manager = ConfigManager::<AppConfig>::load(file.path()).unwrap();
        assert_eq!(manager.get().server.delay_free_seconds, 5);

        let mut file = std::fs::File::create(file.path()).unwrap();
        write!(file, "[server]\nmax_entries_per_dir = 20\ndelay_free_seconds = 50\n").unwrap();
        manager.reload().unwrap();
        assert_eq!(manager.get().server.max_entries_per_dir, 20);
        assert_eq!(manager.get().server.delay_free_seconds, 5);
    }

    #[test]
    fn test_invalid_server_section_rejected() {
        let value: toml::Value = "[server]\ninode_hashtable_capacity = 0\n".parse().unwrap();
        let config = AppConfig::from_toml(&value).unwrap();
        assert!(config.validate().is_err());
    }
}
