//! Podman engine client.
//!
//! [`PodmanWatcher`] wraps a [`PodmanApi`] connection and presents it as an
//! [`EngineClient`]: alive containers only, pod membership turned into
//! labels, and Podman's event stream mapped onto the four lifecycle events.

pub mod api;
pub mod cache;
pub mod events;
pub mod libpod;

#[cfg(test)]
pub(crate) mod fake;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::{
    COMPOSER_PROJECT_LABEL, Container, ContainerEvent, EngineClient, PRIVILEGED_LABEL,
    RucksackPacker, Trialer,
};
use crate::error::{Error, Result};
use crate::wye;
use api::{InspectContainerData, PodmanApi};
use cache::{TtlCache, VersionCache};
use events::WatchSession;

/// Engine type identifier of Podman engine clients.
pub const TYPE: &str = "podman.io";

/// Prefix of the labels we synthesize for Podman-specific container details.
pub const PODMAN_ANNOTATION: &str = "io.github.thediveo/podman/";

/// Name of the pod a container belongs to.
pub const POD_LABEL_NAME: &str = "io.github.thediveo/podman/podname";
/// ID of the pod a container belongs to.
pub const POD_ID_LABEL_NAME: &str = "io.github.thediveo/podman/podid";
/// Marks a pod's infra container; only its presence counts.
pub const INFRA_LABEL_NAME: &str = "io.github.thediveo/podman/infra";

pub const DEFAULT_POD_CACHE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_LIST_CONCURRENCY: usize = 1;
pub const DEFAULT_EVENT_BUFFER: usize = 1;
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

pub type PodmanPacker = Arc<dyn RucksackPacker<InspectContainerData>>;

#[derive(Clone)]
pub struct WatcherOptions {
    pub pid: Option<u32>,
    pub packer: Option<PodmanPacker>,
    pub pod_cache_ttl: Duration,
    /// Number of inspections a listing keeps in flight.
    pub list_concurrency: usize,
    pub event_buffer: usize,
    /// How long a stopped event subscription may take to wind down before
    /// it gets aborted.
    pub drain_grace: Duration,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            pid: None,
            packer: None,
            pod_cache_ttl: DEFAULT_POD_CACHE_TTL,
            list_concurrency: DEFAULT_LIST_CONCURRENCY,
            event_buffer: DEFAULT_EVENT_BUFFER,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

impl std::fmt::Debug for WatcherOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherOptions")
            .field("pid", &self.pid)
            .field("packer", &self.packer.is_some())
            .field("pod_cache_ttl", &self.pod_cache_ttl)
            .field("list_concurrency", &self.list_concurrency)
            .field("event_buffer", &self.event_buffer)
            .field("drain_grace", &self.drain_grace)
            .finish()
    }
}

impl WatcherOptions {
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_packer<P>(mut self, packer: P) -> Self
    where
        P: RucksackPacker<InspectContainerData> + 'static,
    {
        self.packer = Some(Arc::new(packer));
        self
    }

    pub fn with_pod_cache_ttl(mut self, ttl: Duration) -> Self {
        self.pod_cache_ttl = ttl;
        self
    }

    pub fn with_list_concurrency(mut self, concurrency: usize) -> Self {
        self.list_concurrency = concurrency.max(1);
        self
    }

    pub fn with_event_buffer(mut self, buffer: usize) -> Self {
        self.event_buffer = buffer.max(1);
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}

pub struct PodmanWatcher<C: PodmanApi> {
    api: Arc<C>,
    options: WatcherOptions,
    pod_cache: TtlCache<String, String>,
    version: VersionCache,
    closed: AtomicBool,
}

impl<C: PodmanApi> PodmanWatcher<C> {
    /// Must be called from within a Tokio runtime, as it starts the pod
    /// cache sweeper.
    pub fn new(api: C, options: WatcherOptions) -> Self {
        Self::with_shared(Arc::new(api), options)
    }

    pub fn with_shared(api: Arc<C>, options: WatcherOptions) -> Self {
        let pod_cache = TtlCache::new(options.pod_cache_ttl);
        pod_cache.start();
        Self {
            api,
            options,
            pod_cache,
            version: VersionCache::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.api
    }

    pub fn options(&self) -> &WatcherOptions {
        &self.options
    }

    async fn fetch_version(&self, ctx: &CancellationToken) -> Result<String> {
        let mixed = wye::mixin(self.api.connection_token(), ctx);
        let report = self.api.version(mixed.token()).await?;
        Ok(report.version)
    }

    /// Name of the pod with the given ID, or an empty name if the lookup
    /// fails. Failed lookups are not cached, so the next inspection of a
    /// pod member tries again.
    async fn pod_name(&self, ctx: &CancellationToken, pod_id: &str) -> String {
        let key = pod_id.to_string();
        if let Some(name) = self.pod_cache.get(&key) {
            return name;
        }
        match self.api.inspect_pod(ctx, pod_id).await {
            Ok(pod) => {
                self.pod_cache.set(key, pod.name.clone());
                pod.name
            }
            Err(e) => {
                log::debug!("Unable to look up name of pod {pod_id}: {e}");
                String::new()
            }
        }
    }

    fn synthesize(&self, details: &InspectContainerData, pod_name: Option<String>) -> Container {
        let mut labels = details
            .config
            .as_ref()
            .and_then(|config| config.labels.clone())
            .unwrap_or_default();
        let project = labels.get(COMPOSER_PROJECT_LABEL).cloned();
        if details.host_config.as_ref().is_some_and(|h| h.privileged) {
            labels.insert(PRIVILEGED_LABEL.to_string(), String::new());
        }
        if let Some(pod_name) = pod_name {
            labels.insert(POD_ID_LABEL_NAME.to_string(), details.pod.clone());
            labels.insert(POD_LABEL_NAME.to_string(), pod_name);
        }
        if details.is_infra {
            labels.insert(INFRA_LABEL_NAME.to_string(), String::new());
        }
        let (pid, paused) = details
            .state
            .as_ref()
            .map(|state| (state.pid, state.paused))
            .unwrap_or_default();
        Container {
            id: details.id.clone(),
            name: details.name.clone(),
            labels,
            pid,
            project,
            paused,
            rucksack: None,
        }
    }
}

#[async_trait]
impl<C: PodmanApi> EngineClient for PodmanWatcher<C> {
    /// Podman has no engine ID of its own, so the API endpoint stands in.
    fn id(&self) -> String {
        self.api()
    }

    fn engine_type(&self) -> &'static str {
        TYPE
    }

    fn api(&self) -> String {
        self.api.uri()
    }

    fn pid(&self) -> Option<u32> {
        self.options.pid
    }

    async fn version(&self, ctx: &CancellationToken) -> String {
        self.version
            .get_or_fetch(|| self.fetch_version(ctx))
            .await
    }

    async fn list(&self, ctx: &CancellationToken) -> Result<Vec<Container>> {
        let listed = {
            let mixed = wye::mixin(self.api.connection_token(), ctx);
            self.api.list_containers(mixed.token()).await?
        };
        log::debug!("Inspecting {} listed containers", listed.len());

        let alive: Vec<Container> = futures::stream::iter(listed)
            .map(|candidate| async move {
                match self.inspect(ctx, &candidate.id).await {
                    Ok(container) => Ok(Some(container)),
                    Err(e) if e.is_skippable_when_listing() => {
                        log::debug!("Skipping container {}: {e}", candidate.id);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .buffer_unordered(self.options.list_concurrency.max(1))
            .try_filter_map(|container| async move { Ok(container) })
            .try_collect()
            .await?;
        Ok(alive)
    }

    async fn inspect(&self, ctx: &CancellationToken, name_or_id: &str) -> Result<Container> {
        let mixed = wye::mixin(self.api.connection_token(), ctx);
        let details = self.api.inspect_container(mixed.token(), name_or_id).await?;
        if details.state.as_ref().is_none_or(|state| state.pid == 0) {
            return Err(Error::processless(name_or_id, "Podman"));
        }
        let pod_name = if details.pod.is_empty() {
            None
        } else {
            Some(self.pod_name(mixed.token(), &details.pod).await)
        };
        let mut container = self.synthesize(&details, pod_name);
        if let Some(packer) = self.options.packer.as_ref() {
            packer.pack(&mut container, &details);
        }
        Ok(container)
    }

    fn lifecycle_events(
        &self,
        ctx: &CancellationToken,
    ) -> (mpsc::Receiver<ContainerEvent>, mpsc::Receiver<Error>) {
        WatchSession::new(Arc::clone(&self.api), ctx.clone(), self.options.drain_grace)
            .spawn(self.options.event_buffer)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("Closing Podman watcher for {}", self.api.uri());
        self.pod_cache.stop();
        self.api.close_idle_connections();
    }
}

#[async_trait]
impl<C: PodmanApi> Trialer for PodmanWatcher<C> {
    /// Fetches the engine version anew, updating the cached version.
    async fn probe(&self, ctx: &CancellationToken) -> Result<()> {
        self.version.refresh(|| self.fetch_version(ctx)).await
    }
}

impl<C: PodmanApi> Drop for PodmanWatcher<C> {
    fn drop(&mut self) {
        self.close();
    }
}
