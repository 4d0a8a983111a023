//! Engine-neutral view of containers and their lifecycle.
//!
//! Any container engine client hands out [`Container`] records and
//! [`ContainerEvent`]s through the [`EngineClient`] trait; a generic watcher
//! builds its portfolio of alive containers from nothing else.

pub mod container;
pub mod event;

pub use container::{Container, Rucksack, RucksackPacker};
pub use event::{ContainerEvent, ContainerEventKind};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Label used by composer-style tools to group containers into projects.
pub const COMPOSER_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Presence-only label marking a privileged container; its value is
/// irrelevant and must not be relied upon.
pub const PRIVILEGED_LABEL: &str = "github.com/thediveo/whalewatcher/moby/privileged";

#[async_trait]
pub trait EngineClient: Send + Sync {
    /// More or less unique engine identifier; the format is engine-specific.
    fn id(&self) -> String;
    fn engine_type(&self) -> &'static str;
    /// The API endpoint this client talks to.
    fn api(&self) -> String;
    /// PID of the engine process, when known.
    fn pid(&self) -> Option<u32>;
    async fn version(&self, ctx: &CancellationToken) -> String;
    /// All containers that currently have a process attached.
    async fn list(&self, ctx: &CancellationToken) -> Result<Vec<Container>>;
    async fn inspect(&self, ctx: &CancellationToken, name_or_id: &str) -> Result<Container>;
    /// Starts a watch session. The event receiver yields lifecycle events
    /// until the session ends; the error receiver then yields at most one
    /// terminal error before closing.
    fn lifecycle_events(
        &self,
        ctx: &CancellationToken,
    ) -> (mpsc::Receiver<ContainerEvent>, mpsc::Receiver<Error>);
    /// Releases engine client resources. Safe to call more than once.
    fn close(&self);
}

/// Engine clients that can check whether their engine is reachable.
#[async_trait]
pub trait Trialer {
    async fn probe(&self, ctx: &CancellationToken) -> Result<()>;
}
