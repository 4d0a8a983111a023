use std::process::ExitCode;

use sealwatcher::config::WatcherConfig;
use sealwatcher::{EngineClient, WatcherOptions};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize the logger
    env_logger::init();

    let config = match WatcherConfig::try_init() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Unable to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let watcher =
        match sealwatcher::connect(config.socket.as_deref(), WatcherOptions::from(&config)).await {
            Ok(watcher) => watcher,
            Err(e) => {
                log::error!("Unable to connect to Podman: {e}");
                return ExitCode::FAILURE;
            }
        };

    let ctx = CancellationToken::new();
    log::info!(
        "Watching {} engine {} version {}",
        watcher.engine_type(),
        watcher.id(),
        watcher.version(&ctx).await
    );

    match watcher.list(&ctx).await {
        Ok(containers) => {
            for container in containers {
                log::info!(
                    "Container {} ({}) pid {}{}",
                    container.name,
                    container.id,
                    container.pid,
                    container
                        .project
                        .as_deref()
                        .map(|project| format!(" in project {project}"))
                        .unwrap_or_default()
                );
            }
        }
        Err(e) => {
            log::error!("Unable to list containers: {e}");
            return ExitCode::FAILURE;
        }
    }

    tokio::spawn({
        let ctx = ctx.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Unable to listen for ctrl-c: {e}");
            }
            log::info!("Shutting down");
            ctx.cancel();
        }
    });

    let (mut events, mut errors) = watcher.lifecycle_events(&ctx);
    while let Some(event) = events.recv().await {
        log::info!(
            "Container {} {} (project: {})",
            event.id,
            event.kind,
            event.project.as_deref().unwrap_or("-")
        );
    }
    let code = match errors.recv().await {
        Some(e) if e.is_cancelled() => ExitCode::SUCCESS,
        Some(e) => {
            log::error!("Lifecycle event stream failed: {e}");
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    };
    watcher.close();
    code
}
