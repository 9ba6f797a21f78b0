use std::io::BufRead;

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    select,
    sync::mpsc,
};
use tracing::{info, warn};

use crate::{cli::ConnectArgs, outbound::write_line};

/// Relays the terminal to the server until the server closes the connection
/// or ctrl-c is pressed. Server output is copied verbatim since
/// the name prompt is not newline-terminated.
pub async fn run(args: ConnectArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let (mut reader, mut writer) = stream.into_split();
    let mut stdout = io::stdout();
    let mut input = spawn_stdin_reader();

    let forward = async {
        while let Some(line) = input.recv().await {
            write_line(&mut writer, &line).await?;
        }
        writer.shutdown().await
    };

    select! {
        received = relay(&mut reader, &mut stdout) => {
            received.context("failed to read from server")?;
        }
        sent = forward => {
            // Stdin is done; show whatever the server still sends until it hangs up.
            sent.context("failed to send to server")?;
            relay(&mut reader, &mut stdout)
                .await
                .context("failed to read from server")?;
        }
        ctrl_c = tokio::signal::ctrl_c() => {
            if let Err(error) = ctrl_c {
                warn!(?error, "ctrl-c handler failed");
            }
        }
    }

    Ok(())
}

/// Copies bytes as they arrive, flushing each chunk so a prompt without a
/// trailing newline still shows up.
async fn relay<R, W>(reader: &mut R, writer: &mut W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
    }
}

/// Reads stdin on a plain thread. A pending read on tokio's stdin would keep
/// the runtime from shutting down after the server hangs up.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
