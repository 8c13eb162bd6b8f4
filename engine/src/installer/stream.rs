//! Install event stream handed to callers
//!
//! The stream reads from the bounded channel fed by the install worker.
//! Cancelling it, or dropping it, stops the worker.

use futures::Stream;
use sdk::types::InstallEvent;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Ordered install events for one package, ending with a terminal event
/// or silent closure
#[derive(Debug)]
pub struct InstallStream {
    inner: ReceiverStream<InstallEvent>,
    token: CancellationToken,
}

impl InstallStream {
    pub(crate) fn new(rx: mpsc::Receiver<InstallEvent>, token: CancellationToken) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            token,
        }
    }

    /// Stop the install; a terminal `cancelled` event follows if buffer space allows
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Stream for InstallStream {
    type Item = InstallEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for InstallStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
