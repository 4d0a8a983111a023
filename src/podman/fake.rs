//! In-memory stand-in for a Podman service, counting the calls that the
//! watcher is supposed to economize on.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorModel, NO_SUCH_CONTAINER, NO_SUCH_POD, Result};
use crate::podman::api::{
    Event, EventActor, EventsOptions, InspectContainerConfig, InspectContainerData,
    InspectContainerHostConfig, InspectContainerState, InspectPodData, ListContainer,
    PodmanApi, VersionReport,
};

pub const FAKE_URI: &str = "unix:///run/fake/podman.sock";

pub fn raw_event(action: &str, id: &str, attributes: HashMap<String, String>) -> Event {
    Event {
        action: action.to_string(),
        actor: EventActor {
            id: id.to_string(),
            attributes,
        },
    }
}

/// Builds inspection data for a container with a process.
pub fn running(id: &str, name: &str, pid: i32) -> InspectContainerData {
    InspectContainerData {
        id: id.to_string(),
        name: name.to_string(),
        state: Some(InspectContainerState {
            status: "running".to_string(),
            running: true,
            paused: false,
            pid,
        }),
        config: Some(InspectContainerConfig { labels: None }),
        host_config: Some(InspectContainerHostConfig { privileged: false }),
        ..Default::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionBehavior {
    /// Forwards fed events until stopped or the stream is ended.
    #[default]
    Compliant,
    /// Like a torn down connection: fails as soon as its context is done.
    FailOnCancel,
    FailImmediately,
    /// Ignores both its stop signal and its context.
    Stubborn,
}

struct Subscribed<'a>(&'a AtomicUsize);

impl Drop for Subscribed<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FakePodman {
    token: CancellationToken,
    containers: Vec<InspectContainerData>,
    vanishing: Vec<String>,
    failing_inspections: HashMap<String, u16>,
    pods: HashMap<String, String>,
    pods_fail: bool,
    version: Option<String>,
    subscription: SubscriptionBehavior,

    feed_tx: mpsc::Sender<Event>,
    feed_rx: tokio::sync::Mutex<mpsc::Receiver<Event>>,
    end: Notify,
    subscribed: Notify,
    events_options: Mutex<Option<EventsOptions>>,

    active: AtomicUsize,
    pod_lookups: AtomicUsize,
    version_fetches: AtomicUsize,
    idle_closes: AtomicUsize,
}

impl FakePodman {
    pub fn new() -> Self {
        let (feed_tx, feed_rx) = mpsc::channel(64);
        Self {
            token: CancellationToken::new(),
            containers: Vec::new(),
            vanishing: Vec::new(),
            failing_inspections: HashMap::new(),
            pods: HashMap::new(),
            pods_fail: false,
            version: Some("4.3.1".to_string()),
            subscription: SubscriptionBehavior::default(),
            feed_tx,
            feed_rx: tokio::sync::Mutex::new(feed_rx),
            end: Notify::new(),
            subscribed: Notify::new(),
            events_options: Mutex::new(None),
            active: AtomicUsize::new(0),
            pod_lookups: AtomicUsize::new(0),
            version_fetches: AtomicUsize::new(0),
            idle_closes: AtomicUsize::new(0),
        }
    }

    pub fn with_container(mut self, container: InspectContainerData) -> Self {
        self.containers.push(container);
        self
    }

    /// Listed, but gone by the time it gets inspected.
    pub fn with_vanishing_container(mut self, id: &str) -> Self {
        self.vanishing.push(id.to_string());
        self
    }

    /// Listed, but its inspection fails with the given status.
    pub fn with_failing_container(mut self, id: &str, status: u16) -> Self {
        self.failing_inspections.insert(id.to_string(), status);
        self
    }

    pub fn with_pod(mut self, id: &str, name: &str) -> Self {
        self.pods.insert(id.to_string(), name.to_string());
        self
    }

    pub fn with_failing_pods(mut self) -> Self {
        self.pods_fail = true;
        self
    }

    pub fn with_failing_version(mut self) -> Self {
        self.version = None;
        self
    }

    pub fn with_subscription(mut self, behavior: SubscriptionBehavior) -> Self {
        self.subscription = behavior;
        self
    }

    pub fn feed(&self) -> mpsc::Sender<Event> {
        self.feed_tx.clone()
    }

    /// Ends the current event stream as if the engine closed it.
    pub fn end_stream(&self) {
        self.end.notify_one();
    }

    pub async fn wait_subscribed(&self) {
        self.subscribed.notified().await;
    }

    pub fn last_events_options(&self) -> Option<EventsOptions> {
        self.events_options
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn pod_lookups(&self) -> usize {
        self.pod_lookups.load(Ordering::SeqCst)
    }

    pub fn version_fetches(&self) -> usize {
        self.version_fetches.load(Ordering::SeqCst)
    }

    pub fn idle_closes(&self) -> usize {
        self.idle_closes.load(Ordering::SeqCst)
    }
}

fn api_error(status: u16, cause: &str) -> Error {
    Error::Api(ErrorModel::new(status, cause, cause))
}

#[async_trait]
impl PodmanApi for FakePodman {
    fn uri(&self) -> String {
        FAKE_URI.to_string()
    }

    fn connection_token(&self) -> &CancellationToken {
        &self.token
    }

    async fn ping(&self, _ctx: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn list_containers(&self, _ctx: &CancellationToken) -> Result<Vec<ListContainer>> {
        let ids = self
            .containers
            .iter()
            .map(|c| c.id.clone())
            .chain(self.vanishing.iter().cloned())
            .chain(self.failing_inspections.keys().cloned());
        Ok(ids
            .map(|id| ListContainer { id })
            .collect())
    }

    async fn inspect_container(
        &self,
        ctx: &CancellationToken,
        name_or_id: &str,
    ) -> Result<InspectContainerData> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(status) = self.failing_inspections.get(name_or_id) {
            return Err(api_error(*status, "internal libpod error"));
        }
        self.containers
            .iter()
            .find(|c| c.id == name_or_id || c.name == name_or_id)
            .cloned()
            .ok_or_else(|| api_error(404, NO_SUCH_CONTAINER))
    }

    async fn inspect_pod(
        &self,
        _ctx: &CancellationToken,
        name_or_id: &str,
    ) -> Result<InspectPodData> {
        self.pod_lookups.fetch_add(1, Ordering::SeqCst);
        if self.pods_fail {
            return Err(api_error(500, "pod lookup failed"));
        }
        self.pods
            .get(name_or_id)
            .map(|name| InspectPodData {
                id: name_or_id.to_string(),
                name: name.clone(),
            })
            .ok_or_else(|| api_error(404, NO_SUCH_POD))
    }

    async fn version(&self, _ctx: &CancellationToken) -> Result<VersionReport> {
        self.version_fetches.fetch_add(1, Ordering::SeqCst);
        match &self.version {
            Some(version) => Ok(VersionReport {
                version: version.clone(),
            }),
            None => Err(api_error(500, "version unavailable")),
        }
    }

    async fn events(
        &self,
        ctx: &CancellationToken,
        events: mpsc::Sender<Event>,
        mut stop: oneshot::Receiver<()>,
        options: &EventsOptions,
    ) -> Result<()> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let _subscribed = Subscribed(&self.active);
        *self
            .events_options
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(options.clone());
        let mut feed = self.feed_rx.lock().await;
        self.subscribed.notify_one();

        match self.subscription {
            SubscriptionBehavior::FailImmediately => {
                return Err(api_error(500, "event stream broke"));
            }
            SubscriptionBehavior::Stubborn => {
                std::future::pending::<()>().await;
            }
            _ => {}
        }
        let fail_on_cancel = self.subscription == SubscriptionBehavior::FailOnCancel;
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled(), if fail_on_cancel => {
                    return Err(Error::Io(std::io::Error::from(
                        std::io::ErrorKind::ConnectionReset,
                    )));
                }
                _ = &mut stop => return Ok(()),
                _ = self.end.notified() => return Ok(()),
                Some(event) = feed.recv() => {
                    if events.send(event).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn close_idle_connections(&self) {
        self.idle_closes.fetch_add(1, Ordering::SeqCst);
    }
}
