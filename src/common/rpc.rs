use std::fmt::{Debug, Formatter};
use tokio::sync::{mpsc, oneshot};

use crate::common::error::PoolError;

/// Can be used to respond to a request sent to the scheduler loop.
#[must_use = "response token should be used to respond to a request"]
pub struct ResponseToken<T> {
    sender: oneshot::Sender<T>,
}

impl<T> Debug for ResponseToken<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Response token")
    }
}

impl<T> ResponseToken<T> {
    pub fn respond(self, response: T) {
        if self.sender.send(response).is_err() {
            log::warn!("Could not send a scheduler response, the caller hung up");
        }
    }
}

pub type RpcSender<T> = mpsc::UnboundedSender<T>;
pub type RpcReceiver<T> = mpsc::UnboundedReceiver<T>;

pub fn make_rpc_queue<T>() -> (RpcSender<T>, RpcReceiver<T>) {
    mpsc::unbounded_channel()
}

/// Send a request message to the loop and wait for its response.
/// Fails with [`PoolError::SchedulerStopped`] when the loop has already exited.
pub async fn rpc<M, T>(
    sender: &RpcSender<M>,
    make_request: impl FnOnce(ResponseToken<T>) -> M,
) -> crate::Result<T> {
    let (tx, rx) = oneshot::channel();
    sender
        .send(make_request(ResponseToken { sender: tx }))
        .map_err(|_| PoolError::SchedulerStopped)?;
    rx.await.map_err(|_| PoolError::SchedulerStopped)
}
