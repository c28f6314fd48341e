//! Non-blocking relay from the multiplexer to a caller-facing channel.
//!
//! The caller may read only one of the two streams of a turn, or none. An
//! [`Outbox`] keeps taking fragments from the multiplexer whatever the
//! caller does, queues what the caller has not picked up yet and delivers
//! it as buffer space frees up. Once the turn is cancelled, or the caller
//! drops its receiver, queued and new events are discarded.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

pub(crate) struct Outbox<'a, T> {
    tx: &'a mpsc::Sender<T>,
    cancel: &'a CancellationToken,
    pending: VecDeque<T>,
    closed: bool,
}

impl<'a, T> Outbox<'a, T> {
    pub(crate) fn new(tx: &'a mpsc::Sender<T>, cancel: &'a CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            pending: VecDeque::new(),
            closed: false,
        }
    }

    fn discarding(&self) -> bool {
        self.closed || self.cancel.is_cancelled()
    }

    /// Queue an event for the caller.
    pub(crate) fn push(&mut self, value: T) {
        if !self.discarding() {
            self.pending.push_back(value);
        }
    }

    /// Receive the next inner item, delivering queued events while waiting.
    ///
    /// The inner channel is never left unread because of a slow caller.
    pub(crate) async fn recv_from<U>(&mut self, rx: &mut mpsc::Receiver<U>) -> Option<U> {
        let (tx, cancel) = (self.tx, self.cancel);
        loop {
            if self.pending.is_empty() || self.discarding() {
                self.pending.clear();
                return rx.recv().await;
            }
            tokio::select! {
                biased;
                next = rx.recv() => return next,
                permit = tx.reserve() => self.deliver(permit),
                _ = cancel.cancelled() => self.pending.clear(),
            }
        }
    }

    /// Deliver everything still queued. Returns early on cancellation or
    /// when the caller is gone.
    pub(crate) async fn flush(&mut self) {
        let (tx, cancel) = (self.tx, self.cancel);
        while !self.pending.is_empty() && !self.closed {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => self.pending.clear(),
                permit = tx.reserve() => self.deliver(permit),
            }
        }
    }

    fn deliver(&mut self, permit: Result<mpsc::Permit<'a, T>, mpsc::error::SendError<()>>) {
        match permit {
            Ok(permit) => {
                if let Some(value) = self.pending.pop_front() {
                    permit.send(value);
                }
            }
            Err(_) => {
                self.closed = true;
                self.pending.clear();
            }
        }
    }
}

/// Send one event, waiting for space unless the turn is cancelled.
///
/// An event that fits in the buffer is delivered even after cancellation.
pub(crate) async fn send_or_cancel<T>(tx: &mpsc::Sender<T>, cancel: &CancellationToken, value: T) {
    match tx.try_send(value) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(value)) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tx.send(value) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn inner_channel_is_drained_while_caller_lags() {
        let (outer_tx, mut outer_rx) = mpsc::channel::<u32>(2);
        let (inner_tx, mut inner_rx) = mpsc::channel::<u32>(2);
        let cancel = CancellationToken::new();

        let producer = tokio::spawn(async move {
            for i in 0..100 {
                inner_tx.send(i).await.unwrap();
            }
        });

        let mut outbox = Outbox::new(&outer_tx, &cancel);
        let mut seen = 0;
        while let Some(v) = outbox.recv_from(&mut inner_rx).await {
            outbox.push(v);
            seen += 1;
        }
        producer.await.unwrap();
        assert_eq!(seen, 100);

        // The caller catches up afterwards and gets everything in order.
        let reader = tokio::spawn(async move {
            let mut got = Vec::new();
            while let Some(v) = outer_rx.recv().await {
                got.push(v);
            }
            got
        });
        outbox.flush().await;
        drop(outbox);
        drop(outer_tx);
        assert_eq!(reader.await.unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn flush_returns_on_cancel() {
        let (outer_tx, _outer_rx) = mpsc::channel::<u32>(1);
        let cancel = CancellationToken::new();
        let mut outbox = Outbox::new(&outer_tx, &cancel);
        for i in 0..5 {
            outbox.push(i);
        }

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        tokio::time::timeout(Duration::from_secs(2), outbox.flush())
            .await
            .expect("flush ignored cancellation");
    }

    #[tokio::test]
    async fn dropped_caller_discards_events() {
        let (outer_tx, outer_rx) = mpsc::channel::<u32>(1);
        drop(outer_rx);
        let cancel = CancellationToken::new();
        let mut outbox = Outbox::new(&outer_tx, &cancel);
        outbox.push(1);
        outbox.push(2);
        outbox.flush().await;
        outbox.push(3);
        assert!(outbox.pending.is_empty());
    }

    #[tokio::test]
    async fn send_or_cancel_delivers_when_there_is_room() {
        let (tx, mut rx) = mpsc::channel::<u32>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        send_or_cancel(&tx, &cancel, 7).await;
        assert_eq!(rx.recv().await, Some(7));

        // full and cancelled: gives up instead of waiting
        send_or_cancel(&tx, &cancel, 8).await;
        send_or_cancel(&tx, &cancel, 9).await;
        assert_eq!(rx.recv().await, Some(8));
    }
}
