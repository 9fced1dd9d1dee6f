// stdio bridge between a panel host and the relay

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::events::{PanelCommand, PanelMessage};
use crate::relay::{relay, ChatBackend, DisplayEvent};

/// Serve one panel session until its input ends.
///
/// Prompts are relayed one at a time in arrival order; up to `queue` more
/// wait behind the one streaming. Reading, relaying and writing share a
/// single task. Returns once input is closed, every queued prompt has
/// finished and all output is flushed.
pub async fn run<R, W, B>(reader: R, writer: W, backend: &B, queue: usize) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    B: ChatBackend + ?Sized,
{
    let (prompt_tx, mut prompt_rx) = mpsc::channel::<String>(queue.max(1));
    let (display_tx, display_rx) = mpsc::unbounded_channel::<DisplayEvent>();

    let serve = async move {
        let sink = display_tx;
        while let Some(prompt) = prompt_rx.recv().await {
            let span = tracing::info_span!("relay", request_id = %Uuid::new_v4());
            async {
                tracing::info!(chars = prompt.len(), "prompt received");
                let outcome = relay(&prompt, backend, &sink).await;
                tracing::info!(?outcome, "request finished");
            }
            .instrument(span)
            .await;
        }
    };

    let (read_result, (), write_result) = tokio::join!(
        read_commands(reader, prompt_tx),
        serve,
        write_messages(writer, display_rx)
    );
    read_result?;
    write_result
}

async fn read_commands<R>(mut reader: R, prompts: mpsc::Sender<String>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .context("Failed to read panel input")?;
        if n == 0 {
            break;
        }
        let line = buf.trim_ascii();
        if line.is_empty() {
            continue;
        }
        // Bytes, not str: a line with invalid UTF-8 is just another malformed message
        match PanelCommand::parse(line) {
            Ok(PanelCommand::Chat { text }) => {
                if prompts.send(text).await.is_err() {
                    break;
                }
            }
            Ok(PanelCommand::Unknown) => {
                tracing::warn!(line = %String::from_utf8_lossy(line), "ignoring unknown panel command");
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed panel message");
            }
        }
    }
    tracing::debug!("panel input closed");
    Ok(())
}

async fn write_messages<W>(mut writer: W, mut events: mpsc::UnboundedReceiver<DisplayEvent>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events.recv().await {
        let mut line = PanelMessage::from(event)
            .encode()
            .context("Failed to encode panel message")?;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .context("Failed to write to panel")?;
        writer.flush().await.context("Failed to flush panel output")?;
    }
    Ok(())
}
