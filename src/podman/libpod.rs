//! Minimal libpod REST client.
//!
//! Talks HTTP/1.1 to a Podman service over a Unix domain socket (or plain
//! TCP). Finished requests park their keep-alive connection in a small idle
//! pool; each pooled connection is driven by its own background task, which
//! only goes away once [`PodmanApi::close_idle_connections`] drops it. Event
//! subscriptions always use a dedicated connection.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, ErrorModel, Result};
use crate::podman::api::{
    Event, EventsOptions, InspectContainerData, InspectPodData, ListContainer, PodmanApi,
    VersionReport,
};

/// System-wide Podman service socket.
pub const DEFAULT_SERVICE_URI: &str = "unix:///run/podman/podman.sock";

const API_PREFIX: &str = "/v4.0.0/libpod";

/// The Host header is meaningless on a Unix socket; Podman's own client
/// sends "d".
const HOST: &str = "d";

const MAX_IDLE_CONNECTIONS: usize = 4;

/// Longest event line we buffer while waiting for its newline.
const MAX_EVENT_LINE: usize = 256 * 1024;

type Sender = SendRequest<Empty<Bytes>>;

/// Picks the Podman service URI the same way Podman's client does when none
/// was given: `CONTAINER_HOST`, then the rootless user socket, then the
/// system socket.
pub fn default_service_uri() -> String {
    if let Ok(host) = std::env::var("CONTAINER_HOST") {
        if !host.is_empty() {
            return host;
        }
    }
    if !nix::unistd::geteuid().is_root() {
        if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
            if !dir.is_empty() {
                return format!("unix://{dir}/podman/podman.sock");
            }
        }
    }
    DEFAULT_SERVICE_URI.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl Endpoint {
    fn parse(uri: &str) -> Result<Self> {
        let invalid = || Error::InvalidUri(uri.to_string());
        let url = Url::parse(uri).map_err(|_| invalid())?;
        match url.scheme() {
            "unix" if !url.path().is_empty() => Ok(Endpoint::Unix(PathBuf::from(url.path()))),
            "tcp" => {
                let host = url.host_str().ok_or_else(invalid)?;
                let port = url.port().ok_or_else(invalid)?;
                Ok(Endpoint::Tcp(format!("{host}:{port}")))
            }
            _ => Err(invalid()),
        }
    }
}

pub struct LibpodClient {
    uri: String,
    endpoint: Endpoint,
    token: CancellationToken,
    idle: Mutex<Vec<Sender>>,
}

impl LibpodClient {
    /// Connects to the Podman service at `uri` and pings it.
    pub async fn connect(uri: &str) -> Result<Self> {
        Self::connect_with_token(uri, CancellationToken::new()).await
    }

    /// Like [`LibpodClient::connect`], with the connection's lifetime bound
    /// to `token`: once it is cancelled, so are all operations.
    pub async fn connect_with_token(uri: &str, token: CancellationToken) -> Result<Self> {
        let endpoint = Endpoint::parse(uri)?;
        let client = Self {
            uri: uri.to_string(),
            endpoint,
            token,
            idle: Mutex::new(Vec::new()),
        };
        let token = client.token.clone();
        client.ping(&token).await?;
        log::debug!("Connected to Podman service at {uri}");
        Ok(client)
    }

    /// Number of keep-alive connections currently parked in the pool.
    pub fn idle_connections(&self) -> usize {
        self.pool().len()
    }

    fn pool(&self) -> MutexGuard<'_, Vec<Sender>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn dial(&self) -> Result<Sender> {
        match &self.endpoint {
            Endpoint::Unix(path) => handshake(UnixStream::connect(path).await?).await,
            Endpoint::Tcp(addr) => handshake(TcpStream::connect(addr.as_str()).await?).await,
        }
    }

    /// Hands out a pooled connection if there is one, else a fresh one;
    /// the flag tells whether the connection was pooled.
    async fn checkout(&self) -> Result<(Sender, bool)> {
        loop {
            let parked = self.pool().pop();
            match parked {
                Some(sender) if !sender.is_closed() => return Ok((sender, true)),
                Some(_) => continue,
                None => return Ok((self.dial().await?, false)),
            }
        }
    }

    fn checkin(&self, sender: Sender) {
        if sender.is_closed() {
            return;
        }
        let mut pool = self.pool();
        if pool.len() < MAX_IDLE_CONNECTIONS {
            pool.push(sender);
        }
    }

    async fn get(&self, ctx: &CancellationToken, path: &str) -> Result<Bytes> {
        let request = async {
            let (mut sender, pooled) = self.checkout().await?;
            let response = match send(&mut sender, path).await {
                // Podman may have idled out the pooled connection just as
                // we picked it; all our requests are GETs, so try once more.
                Err(Error::Http(e)) if pooled => {
                    log::debug!("Pooled libpod connection failed ({e}), redialing");
                    sender = self.dial().await?;
                    send(&mut sender, path).await?
                }
                response => response?,
            };
            let status = response.status();
            let body = response.into_body().collect().await?.to_bytes();
            self.checkin(sender);
            check_status(status, body)
        };
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(Error::Cancelled),
            result = request => result,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, ctx: &CancellationToken, path: &str) -> Result<T> {
        let body = self.get(ctx, path).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

async fn handshake<S>(stream: S) -> Result<Sender>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            log::debug!("libpod connection ended with error: {e}");
        }
    });
    Ok(sender)
}

/// Sends a GET request, failing before any response arrives if the
/// connection is unusable.
async fn send(sender: &mut Sender, path: &str) -> Result<Response<Incoming>> {
    let request = build_request(path)?;
    sender.ready().await?;
    Ok(sender.send_request(request).await?)
}

fn build_request(path: &str) -> Result<Request<Empty<Bytes>>> {
    Ok(Request::get(format!("{API_PREFIX}{path}"))
        .header(header::HOST, HOST)
        .body(Empty::new())?)
}

fn check_status(status: StatusCode, body: Bytes) -> Result<Bytes> {
    if status.is_success() {
        return Ok(body);
    }
    let mut model = serde_json::from_slice::<ErrorModel>(&body).unwrap_or_else(|_| {
        ErrorModel::new(status.as_u16(), "", String::from_utf8_lossy(&body).trim())
    });
    if model.response_code == 0 {
        model.response_code = status.as_u16();
    }
    Err(Error::Api(model))
}

#[async_trait]
impl PodmanApi for LibpodClient {
    fn uri(&self) -> String {
        self.uri.clone()
    }

    fn connection_token(&self) -> &CancellationToken {
        &self.token
    }

    async fn ping(&self, ctx: &CancellationToken) -> Result<()> {
        self.get(ctx, "/_ping").await.map(|_| ())
    }

    async fn list_containers(&self, ctx: &CancellationToken) -> Result<Vec<ListContainer>> {
        self.get_json(ctx, "/containers/json?all=true").await
    }

    async fn inspect_container(
        &self,
        ctx: &CancellationToken,
        name_or_id: &str,
    ) -> Result<InspectContainerData> {
        let path = format!("/containers/{}/json", urlencoding::encode(name_or_id));
        self.get_json(ctx, &path).await
    }

    async fn inspect_pod(
        &self,
        ctx: &CancellationToken,
        name_or_id: &str,
    ) -> Result<InspectPodData> {
        let path = format!("/pods/{}/json", urlencoding::encode(name_or_id));
        self.get_json(ctx, &path).await
    }

    async fn version(&self, ctx: &CancellationToken) -> Result<VersionReport> {
        self.get_json(ctx, "/version").await
    }

    async fn events(
        &self,
        ctx: &CancellationToken,
        events: mpsc::Sender<Event>,
        mut stop: oneshot::Receiver<()>,
        options: &EventsOptions,
    ) -> Result<()> {
        let filters = serde_json::to_string(&options.filters)?;
        let path = format!("/events?stream=true&filters={}", urlencoding::encode(&filters));

        let mut sender = tokio::select! {
            biased;
            _ = &mut stop => return Ok(()),
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            sender = self.dial() => sender?,
        };
        let response = tokio::select! {
            biased;
            _ = &mut stop => return Ok(()),
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            response = send(&mut sender, &path) => response?,
        };
        let status = response.status();
        if !status.is_success() {
            let body = response.into_body().collect().await?.to_bytes();
            return check_status(status, body).map(|_| ());
        }

        let mut body = response.into_body();
        let mut pending = BytesMut::new();
        loop {
            let frame = tokio::select! {
                biased;
                _ = &mut stop => return Ok(()),
                _ = ctx.cancelled() => return Err(Error::Cancelled),
                frame = body.frame() => frame,
            };
            let data = match frame {
                None => {
                    log::debug!("Podman closed the event stream");
                    return Ok(());
                }
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => data,
                    Err(_) => continue,
                },
            };
            pending.extend_from_slice(&data);
            while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                let line = pending.split_to(newline + 1);
                let line = line.trim_ascii();
                if line.is_empty() {
                    continue;
                }
                let event: Event = serde_json::from_slice(line)?;
                tokio::select! {
                    biased;
                    _ = &mut stop => return Ok(()),
                    sent = events.send(event) => {
                        if sent.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
            if pending.len() > MAX_EVENT_LINE {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("event line exceeds {MAX_EVENT_LINE} bytes"),
                )));
            }
        }
    }

    fn close_idle_connections(&self) {
        let dropped = std::mem::take(&mut *self.pool());
        if !dropped.is_empty() {
            log::debug!("Closing {} idle libpod connection(s)", dropped.len());
        }
    }
}
