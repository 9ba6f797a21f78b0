//! Per-client outbound queue and the writer task that drains it.
//!
//! The hub never touches a socket. It pushes finished lines into a client's
//! queue and the writer turns each one into a `\n`-terminated write. Closing
//! the queue (dropping every [`OutboundSender`]) is how the hub tells a writer
//! to finish.

use std::io;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tracing::debug;

/// Why a line could not be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The bounded queue has no free slot; the client is not keeping up.
    Full,
    /// The writer has already stopped.
    Closed,
}

/// Producer side of a client's outbound queue.
#[derive(Debug, Clone)]
pub enum OutboundSender {
    Unbounded(mpsc::UnboundedSender<String>),
    Bounded(mpsc::Sender<String>),
}

impl OutboundSender {
    /// Queues `line` without waiting.
    pub fn deliver(&self, line: String) -> Result<(), DeliveryError> {
        match self {
            OutboundSender::Unbounded(tx) => tx.send(line).map_err(|_| DeliveryError::Closed),
            OutboundSender::Bounded(tx) => tx.try_send(line).map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            }),
        }
    }
}

/// Consumer side of a client's outbound queue, owned by its writer task.
#[derive(Debug)]
pub enum OutboundReceiver {
    Unbounded(mpsc::UnboundedReceiver<String>),
    Bounded(mpsc::Receiver<String>),
}

impl OutboundReceiver {
    /// Waits for the next line. Returns `None` once every sender is gone and
    /// the queue is empty.
    pub async fn recv(&mut self) -> Option<String> {
        match self {
            OutboundReceiver::Unbounded(rx) => rx.recv().await,
            OutboundReceiver::Bounded(rx) => rx.recv().await,
        }
    }
}

/// Creates a client queue. `None` means unbounded.
pub fn channel(capacity: Option<usize>) -> (OutboundSender, OutboundReceiver) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (OutboundSender::Bounded(tx), OutboundReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (OutboundSender::Unbounded(tx), OutboundReceiver::Unbounded(rx))
        }
    }
}

/// Writes one framed line and flushes so peers see it immediately.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Drains `queue` into `writer` until the queue closes or a write fails.
///
/// A failed write ends the task without retrying; the session notices the
/// writer is gone (or the read side fails) and leaves on its own.
pub async fn run_writer<W>(mut queue: OutboundReceiver, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = queue.recv().await {
        if let Err(error) = write_line(&mut writer, &line).await {
            debug!(?error, "failed to deliver line to client");
            return;
        }
    }

    if let Err(error) = writer.shutdown().await {
        debug!(?error, "failed to shut down client writer");
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;

    #[tokio::test]
    async fn writer_frames_lines_in_order_and_closes() {
        let (tx, rx) = channel(None);
        let (server, client) = tokio::io::duplex(1024);
        let writer = tokio::spawn(run_writer(rx, server));

        tx.deliver("first".into()).expect("queue open");
        tx.deliver("second".into()).expect("queue open");
        drop(tx);
        writer.await.expect("writer task");

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn bounded_queue_reports_full() {
        let (tx, _rx) = channel(Some(1));
        assert_eq!(tx.deliver("one".into()), Ok(()));
        assert_eq!(tx.deliver("two".into()), Err(DeliveryError::Full));
    }

    #[tokio::test]
    async fn delivery_after_writer_exit_reports_closed() {
        let (tx, rx) = channel(None);
        drop(rx);
        assert_eq!(tx.deliver("late".into()), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn writer_stops_when_peer_is_gone() {
        let (tx, rx) = channel(None);
        let (server, client) = tokio::io::duplex(64);
        drop(client);

        tx.deliver("nobody is listening".into()).expect("queue open");
        run_writer(rx, server).await;

        assert_eq!(tx.deliver("after".into()), Err(DeliveryError::Closed));
    }
}
