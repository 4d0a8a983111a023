//! Mixes a caller's cancellation context into a connection's own context.
//!
//! Engine connections carry a long-lived token bound to the connection's
//! lifetime, while callers pass a short-lived token per operation. A
//! [`Mixin`] is cancelled as soon as either of them is, or when the mixin
//! itself gets released.
//!
//! Some engine clients ignore cancellation once a request is in flight, so a
//! mixin alone never guarantees that an operation stops.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct Mixin {
    token: CancellationToken,
    relay: Option<JoinHandle<()>>,
}

/// Derives a token that is done when either `connection` or `ctx` is done.
///
/// Must be called from within a Tokio runtime whenever `ctx` is still live,
/// as a small relay task forwards its cancellation.
pub fn mixin(connection: &CancellationToken, ctx: &CancellationToken) -> Mixin {
    let token = connection.child_token();
    if ctx.is_cancelled() {
        token.cancel();
        return Mixin { token, relay: None };
    }
    let relay = tokio::spawn({
        let ctx = ctx.clone();
        let token = token.clone();
        async move {
            tokio::select! {
                _ = ctx.cancelled() => token.cancel(),
                _ = token.cancelled() => {}
            }
        }
    });
    Mixin {
        token,
        relay: Some(relay),
    }
}

impl Mixin {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels the derived token and ends the relay; neither of the mixed-in
    /// tokens is affected. Dropping a mixin does the same.
    pub fn release(self) {}
}

impl Drop for Mixin {
    fn drop(&mut self) {
        // also wakes the relay, which then finishes on its own
        self.token.cancel();
        self.relay.take();
    }
}
