use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Creates a linked pair: a server task awaits the signal, the component
/// owner keeps the handle. Dropping the handle resolves the signal and the
/// server drains and exits.
pub(crate) fn shutdown_pair() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = oneshot::channel();

    (ShutdownHandle { _tx: tx }, ShutdownSignal { rx })
}

/// Owner half. Exists only to be dropped.
pub struct ShutdownHandle {
    _tx: oneshot::Sender<()>,
}

pub(crate) struct ShutdownSignal {
    rx: oneshot::Receiver<()>,
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let rx = Pin::new(&mut self.rx);

        match rx.poll(cx) {
            Poll::Pending => Poll::Pending,
            // Sent value and dropped sender both mean stop.
            Poll::Ready(_) => Poll::Ready(()),
        }
    }
}
