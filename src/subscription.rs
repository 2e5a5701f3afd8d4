use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures_util::Stream;
use tokio::{
    sync::{mpsc, watch},
    task::AbortHandle,
};

/// A live feed of complete values. Dropping it (or calling [`Subscription::cancel`])
/// stops whatever is producing them.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    producer: Option<AbortHandle>,
}

impl<T: Send + 'static> Subscription<T> {
    pub fn spawn<F, Fut>(producer: F) -> Subscription<T>
    where
        F: FnOnce(mpsc::UnboundedSender<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let producer = tokio::spawn(producer(tx)).abort_handle();
        Subscription { rx, producer: Some(producer) }
    }

    /// Delivers the current value, then one value per change.
    pub fn from_watch(mut watch: watch::Receiver<T>) -> Subscription<T>
    where
        T: Clone + Sync,
    {
        Subscription::spawn(|tx| async move {
            loop {
                let value = watch.borrow_and_update().clone();
                if tx.send(value).is_err() {
                    break;
                }
                if watch.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// A subscription fed by hand. The sender sees `is_closed()` once the
    /// subscription is dropped.
    pub fn channel() -> (mpsc::UnboundedSender<T>, Subscription<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Subscription { rx, producer: None })
    }
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn cancel(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
