//! One connection from the name prompt to departure.
//!
//! A session is generic over any bidirectional byte stream, so the TCP accept
//! loop and the tests (which use in-memory duplex pipes) drive the same code.

use std::{io, time::Duration};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    select,
    time::{Instant, sleep, timeout},
};
use tracing::{debug, info};

use crate::{
    hub::{Client, Hub},
    outbound::{self, write_line},
};

pub const NAME_PROMPT: &str = "Please enter your name: ";
pub const EMPTY_NAME_REPLY: &str = "Name cannot be empty";

/// How long a departing session waits for its writer to flush queued lines
/// before tearing the connection down anyway.
pub const WRITER_DRAIN_GRACE: Duration = Duration::from_secs(5);

pub fn greeting(name: &str) -> String {
    format!("You are {name}")
}

pub fn chat_line(name: &str, text: &str) -> String {
    format!("{name}: {text}")
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    /// `None` gives every client an unbounded outbound queue.
    pub outbound_capacity: Option<usize>,
}

/// Why an active session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// No inbound line arrived within the idle timeout.
    IdleTimeout,
    /// The peer closed its side of the stream.
    Disconnected,
    /// Reading from the stream failed.
    ReadError,
    /// The writer stopped: a socket write failed or the hub dropped the client.
    WriterClosed,
}

/// How a connection finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The stream ended or failed before a name arrived.
    Abandoned,
    /// The name was empty; the connection was refused.
    Rejected,
    /// The client registered and later left.
    Left(Departure),
}

/// Newline-framed reader that tolerates bytes which are not UTF-8.
///
/// Invalid sequences become U+FFFD instead of failing the read. Partial
/// lines stay in `buf` across calls, so `next_line` can sit in a `select!`.
struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        let mut end = self.buf.len();
        while end > 0 && matches!(self.buf[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.clear();
        Ok(Some(line))
    }
}

/// Runs one connection to completion. Never fails: every transport problem
/// becomes an outcome.
///
/// On departure the session only asks the hub to drop the client; the hub's
/// `User <name> has left` is the single departure notice others see.
pub async fn run_session<S>(stream: S, hub: Hub, config: SessionConfig) -> SessionOutcome
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = LineReader::new(BufReader::new(reader));

    let name = match register(&mut lines, &mut writer).await {
        Ok(name) => name,
        Err(outcome) => {
            let _ = writer.shutdown().await;
            return outcome;
        }
    };

    let id = hub.next_id();
    let (outbound, queue) = outbound::channel(config.outbound_capacity);
    let mut writer_task = tokio::spawn(outbound::run_writer(queue, writer));

    let _ = outbound.deliver(greeting(&name));
    hub.enter(Client {
        id,
        name: name.clone(),
        outbound,
    });

    let idle = sleep(config.idle_timeout);
    tokio::pin!(idle);

    let departure = loop {
        select! {
            line = lines.next_line() => match line {
                Ok(Some(text)) => {
                    idle.as_mut().reset(Instant::now() + config.idle_timeout);
                    hub.broadcast(chat_line(&name, &text));
                }
                Ok(None) => break Departure::Disconnected,
                Err(error) => {
                    debug!(client_id = id, ?error, "read failed");
                    break Departure::ReadError;
                }
            },
            () = &mut idle => break Departure::IdleTimeout,
            _ = &mut writer_task => break Departure::WriterClosed,
        }
    };

    match departure {
        Departure::IdleTimeout => info!(client_id = id, %name, "evicting idle client"),
        other => debug!(client_id = id, %name, ?other, "client departing"),
    }

    hub.leave(id);
    // A peer that stopped reading can wedge the writer in `write_all`; the
    // connection must still close.
    if departure != Departure::WriterClosed
        && timeout(WRITER_DRAIN_GRACE, &mut writer_task).await.is_err()
    {
        debug!(client_id = id, "writer did not drain in time; closing connection");
        writer_task.abort();
    }

    SessionOutcome::Left(departure)
}

async fn register<R, W>(lines: &mut LineReader<R>, writer: &mut W) -> Result<String, SessionOutcome>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let prompt = async {
        writer.write_all(NAME_PROMPT.as_bytes()).await?;
        writer.flush().await
    };
    if let Err(error) = prompt.await {
        debug!(?error, "failed to send name prompt");
        return Err(SessionOutcome::Abandoned);
    }

    let name = match lines.next_line().await {
        Ok(Some(line)) => line.trim().to_string(),
        Ok(None) => {
            debug!("connection closed before registration");
            return Err(SessionOutcome::Abandoned);
        }
        Err(error) => {
            debug!(?error, "read failed before registration");
            return Err(SessionOutcome::Abandoned);
        }
    };

    if name.is_empty() {
        let _ = write_line(writer, EMPTY_NAME_REPLY).await;
        return Err(SessionOutcome::Rejected);
    }

    Ok(name)
}
