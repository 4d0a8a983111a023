//! Podman engine client presenting libpod's REST API as a stream of
//! canonical container lifecycle events.
//!
//! ```no_run
//! # async fn run() -> sealwatcher::Result<()> {
//! use sealwatcher::{EngineClient, WatcherOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let watcher = sealwatcher::connect(None, WatcherOptions::default()).await?;
//! let ctx = CancellationToken::new();
//! for container in watcher.list(&ctx).await? {
//!     println!("{} ({})", container.name, container.pid);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod podman;
pub mod wye;

pub use engine::{
    Container, ContainerEvent, ContainerEventKind, EngineClient, RucksackPacker, Trialer,
};
pub use error::{Error, ErrorClass, Result};
pub use podman::libpod::LibpodClient;
pub use podman::{PodmanWatcher, WatcherOptions};

/// Connects to the Podman service at `uri`, or wherever Podman's own client
/// would look when `uri` is `None`.
pub async fn connect(
    uri: Option<&str>,
    options: WatcherOptions,
) -> Result<PodmanWatcher<LibpodClient>> {
    let uri = match uri {
        Some(uri) => uri.to_string(),
        None => podman::libpod::default_service_uri(),
    };
    log::info!("Connecting to Podman service at {uri}");
    let client = LibpodClient::connect(&uri).await?;
    Ok(PodmanWatcher::new(client, options))
}
