//! The slice of the libpod REST API the watcher depends on, plus the raw
//! payload types it returns.
//!
//! Field names follow libpod's JSON; anything we don't need is ignored.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A connection to a Podman service.
///
/// Every call takes the token that should cancel it. Implementations are
/// allowed to be sloppy about honoring it, and [`PodmanApi::events`] in
/// particular is only required to honor its `stop` signal.
#[async_trait]
pub trait PodmanApi: Send + Sync + 'static {
    /// The service URI, such as `unix:///run/podman/podman.sock`.
    fn uri(&self) -> String;

    /// Token bound to the lifetime of the connection itself.
    fn connection_token(&self) -> &CancellationToken;

    async fn ping(&self, ctx: &CancellationToken) -> Result<()>;

    /// All containers, including those that are not running.
    async fn list_containers(&self, ctx: &CancellationToken) -> Result<Vec<ListContainer>>;

    async fn inspect_container(
        &self,
        ctx: &CancellationToken,
        name_or_id: &str,
    ) -> Result<InspectContainerData>;

    async fn inspect_pod(&self, ctx: &CancellationToken, name_or_id: &str)
    -> Result<InspectPodData>;

    async fn version(&self, ctx: &CancellationToken) -> Result<VersionReport>;

    /// Subscribes to the engine's event stream and forwards matching events
    /// into `events`. Blocks until the stream ends, fails, or `stop` gets
    /// closed; a closed `stop` ends the subscription with `Ok(())`.
    async fn events(
        &self,
        ctx: &CancellationToken,
        events: mpsc::Sender<Event>,
        stop: oneshot::Receiver<()>,
        options: &EventsOptions,
    ) -> Result<()>;

    /// Drops all pooled keep-alive connections, together with the I/O tasks
    /// driving them.
    fn close_idle_connections(&self);
}

/// Listing entry; only the ID matters, as every listed container gets
/// inspected anyway.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListContainer {
    #[serde(rename = "Id")]
    pub id: String,
}

/// Container inspection details, handed as-is to rucksack packers; fields
/// beyond those the watcher itself reads are there for them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectContainerData {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: Option<InspectContainerState>,
    #[serde(default)]
    pub config: Option<InspectContainerConfig>,
    #[serde(default)]
    pub host_config: Option<InspectContainerHostConfig>,
    /// ID of the pod the container belongs to, empty if none.
    #[serde(default)]
    pub pod: String,
    #[serde(default)]
    pub is_infra: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectContainerState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub pid: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectContainerConfig {
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectContainerHostConfig {
    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectPodData {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionReport {
    #[serde(default)]
    pub version: String,
}

/// A single entry of libpod's event stream. Subscriptions filter on the
/// event type server-side, so only the action and actor are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Event {
    #[serde(rename = "Action", default)]
    pub action: String,
    #[serde(rename = "Actor", default)]
    pub actor: EventActor,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventActor {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Attributes", default)]
    pub attributes: HashMap<String, String>,
}

impl Event {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.actor.attributes.get(key).map(String::as_str)
    }
}

/// Server-side filters for an event subscription, as `key -> [values]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventsOptions {
    pub filters: HashMap<String, Vec<String>>,
}

impl EventsOptions {
    pub fn filter(mut self, key: &str, values: &[&str]) -> Self {
        self.filters.insert(
            key.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self
    }
}
