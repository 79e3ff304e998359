use crate::command::{self, server};
use crate::configuration::Configuration;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

pub struct ConfigWatcher {
    _handle: tokio::task::JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn new(config_path: &str, server: Arc<server::Command>) -> Result<Self, command::Error> {
        info!("Setting up config watcher for: {config_path}");

        let config_file_path = std::fs::canonicalize(PathBuf::from(config_path))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = watch_config_loop(config_file_path, server).await {
                error!("Config watcher failed: {e}");
            }
        });

        Ok(Self { _handle: handle })
    }
}

async fn watch_config_loop(
    config_path: PathBuf,
    server: Arc<server::Command>,
) -> Result<(), command::Error> {
    let (tx, mut rx) = mpsc::channel::<Event>(100);

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            let _ = tx.blocking_send(event);
        }
    })?;

    watcher.watch(&config_path, RecursiveMode::NonRecursive)?;

    loop {
        match rx.recv().await {
            Some(event)
                if matches!(
                    event.kind,
                    EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
                ) && event.paths.iter().any(|p| p == &config_path) =>
            {
                info!("Configuration file changed, reloading");
                reload_config(&server, &config_path);
            }
            None => {
                error!("Config watcher channel closed");
                return Ok(());
            }
            _ => {}
        }
    }
}

fn reload_config(server: &server::Command, config_path: &Path) {
    let config = match Configuration::load(Some(config_path)) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to reload configuration: {e}");
            return;
        }
    };

    if let Err(e) = server.notify_config_change(&config) {
        error!("Failed to notify server of configuration change: {e}");
    } else {
        info!(
            "Configuration reloaded (mode: {}, fallback upstream: {})",
            config.proxy.mode,
            config.proxy.target_upstream.as_deref().unwrap_or("none")
        );
    }
}
