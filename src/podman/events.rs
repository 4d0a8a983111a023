//! Turns Podman's raw event stream into container lifecycle events.
//!
//! Podman's event subscription blocks for as long as it runs and reports
//! failure only when it returns, so it gets its own task. That task is told
//! to stop by closing a private stop signal, as clients have been known to
//! ignore cancellation of the context they were given. The session itself
//! races the caller's cancellation against the subscription ending and the
//! next raw event, with cancellation always winning.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::{COMPOSER_PROJECT_LABEL, ContainerEvent, ContainerEventKind};
use crate::error::{Error, Result};
use crate::podman::api::{Event, EventsOptions, PodmanApi};
use crate::wye;

/// Raw event actions we care about. Podman's docs don't list "died", but it
/// is what the engine actually reports when a container's process ends.
pub const LIFECYCLE_ACTIONS: [&str; 4] = ["start", "died", "pause", "unpause"];

const RAW_EVENT_BUFFER: usize = 16;

/// Maps a raw event onto the lifecycle taxonomy; anything else is dropped.
///
/// The project label comes from the event's own attributes, which Podman
/// leaves out on "died" events.
pub fn classify(event: &Event) -> Option<ContainerEvent> {
    let kind = match event.action.as_str() {
        "start" => ContainerEventKind::Started,
        "died" => ContainerEventKind::Exited,
        "pause" => ContainerEventKind::Paused,
        "unpause" => ContainerEventKind::Unpaused,
        _ => return None,
    };
    Some(ContainerEvent::new(
        kind,
        &event.actor.id,
        event.attribute(COMPOSER_PROJECT_LABEL),
    ))
}

pub fn lifecycle_filters() -> EventsOptions {
    EventsOptions::default()
        .filter("type", &["container"])
        .filter("event", &LIFECYCLE_ACTIONS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Subscribing,
    Streaming,
    Draining,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Subscribing => "subscribing",
            SessionState::Streaming => "streaming",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why the streaming loop ended.
enum Ending {
    Cancelled,
    Subscription(std::result::Result<Result<()>, tokio::task::JoinError>),
    ConsumerGone,
}

/// One lifecycle event watch, from subscribing until everything it owns has
/// been released.
pub struct WatchSession<C: PodmanApi> {
    api: Arc<C>,
    ctx: CancellationToken,
    drain_grace: Duration,
    state: SessionState,
}

impl<C: PodmanApi> WatchSession<C> {
    pub fn new(api: Arc<C>, ctx: CancellationToken, drain_grace: Duration) -> Self {
        Self {
            api,
            ctx,
            drain_grace,
            state: SessionState::Subscribing,
        }
    }

    /// Spawns the session and hands out its event and error receivers.
    pub fn spawn(
        self,
        event_buffer: usize,
    ) -> (mpsc::Receiver<ContainerEvent>, mpsc::Receiver<Error>) {
        let (events_tx, events_rx) = mpsc::channel(event_buffer.max(1));
        let (errors_tx, errors_rx) = mpsc::channel(1);
        tokio::spawn(self.run(events_tx, errors_tx));
        (events_rx, errors_rx)
    }

    fn enter(&mut self, state: SessionState) {
        log::debug!("Lifecycle event session: {} -> {}", self.state, state);
        self.state = state;
    }

    async fn run(mut self, events: mpsc::Sender<ContainerEvent>, errors: mpsc::Sender<Error>) {
        let mixed = wye::mixin(self.api.connection_token(), &self.ctx);

        let (raw_tx, mut raw_rx) = mpsc::channel(RAW_EVENT_BUFFER);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let mut subscription: JoinHandle<Result<()>> = tokio::spawn({
            let api = Arc::clone(&self.api);
            let derived = mixed.token().clone();
            async move {
                api.events(&derived, raw_tx, stop_rx, &lifecycle_filters())
                    .await
            }
        });
        self.enter(SessionState::Streaming);

        let ending = loop {
            tokio::select! {
                biased;
                _ = self.ctx.cancelled() => break Ending::Cancelled,
                finished = &mut subscription => break Ending::Subscription(finished),
                Some(raw) = raw_rx.recv() => {
                    let Some(event) = classify(&raw) else {
                        log::trace!("Ignoring {} event for {}", raw.action, raw.actor.id);
                        continue;
                    };
                    log::debug!("Container {} {}", event.id, event.kind);
                    tokio::select! {
                        biased;
                        _ = self.ctx.cancelled() => break Ending::Cancelled,
                        sent = events.send(event) => {
                            if sent.is_err() {
                                break Ending::ConsumerGone;
                            }
                        }
                    }
                }
            }
        };
        self.enter(SessionState::Draining);

        drop(stop_tx);
        drop(raw_rx);
        let outcome = match ending {
            Ending::Subscription(finished) => finished,
            Ending::Cancelled | Ending::ConsumerGone => self.drain(subscription).await,
        };

        let mut terminal = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(e) if e.is_cancelled() => None,
            Err(e) => Some(Error::Task(e)),
        };
        if self.ctx.is_cancelled() {
            // the subscription's own error is most likely just fallout from
            // tearing down its connection
            if let Some(e) = terminal.as_ref().filter(|e| !e.is_cancelled()) {
                log::debug!("Superseding event stream error by cancellation: {e}");
            }
            terminal = Some(Error::Cancelled);
        } else if let Some(e) = terminal.as_ref() {
            log::warn!("Lifecycle event stream failed: {e}");
        }

        self.api.close_idle_connections();
        mixed.release();
        self.enter(SessionState::Closed);

        drop(events);
        if let Some(e) = terminal {
            let _ = errors.send(e).await;
        }
    }

    /// Waits for a stopped subscription to wind down, aborting it once the
    /// grace period has passed.
    async fn drain(
        &self,
        mut subscription: JoinHandle<Result<()>>,
    ) -> std::result::Result<Result<()>, tokio::task::JoinError> {
        match tokio::time::timeout(self.drain_grace, &mut subscription).await {
            Ok(finished) => finished,
            Err(_) => {
                log::warn!(
                    "Event subscription ignored its stop signal for {:?}, aborting it",
                    self.drain_grace
                );
                subscription.abort();
                subscription.await
            }
        }
    }
}
