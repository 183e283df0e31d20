// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSONL event output and command input for a run.
//!
//! Events drain from [`ais_engine::Engine::subscribe`] and are written one
//! JSON object per line, redacted per `--trace-redact` before they leave the
//! process. Commands are the mirror image: a [`StreamParser`] turns
//! arbitrary stdin byte chunks into [`CommandEnvelope`]s sent down a channel
//! the caller drains into `Engine::handle_command`.

use std::io::Write as _;
use std::path::Path;

use ais_engine::EventSubscription;
use ais_protocol::{CommandEnvelope, JsonlCodec, RedactionMode, StreamParser};
use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;

/// Where a JSONL stream is written: a file, or stdout when the path is `-`.
enum Sink {
    File(std::fs::File),
    Stdout(std::io::Stdout),
}

impl Sink {
    fn open(path: &str) -> Result<Self> {
        if path == "-" {
            return Ok(Self::Stdout(std::io::stdout()));
        }
        let file = std::fs::File::create(path).with_context(|| format!("open '{path}' for writing"))?;
        Ok(Self::File(file))
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        match self {
            Self::File(f) => f.write_all(line.as_bytes())?,
            Self::Stdout(out) => out.lock().write_all(line.as_bytes())?,
        }
        Ok(())
    }
}

/// Drain `subscription` to completion (it ends when the engine's event bus
/// is dropped at the end of a run), redacting each event's `data` per
/// `redact_mode` and writing one JSONL line per event to `path`.
pub async fn drain_events(mut subscription: EventSubscription, path: &str, redact_mode: RedactionMode) -> Result<()> {
    let mut sink = Sink::open(path)?;
    while let Some(mut envelope) = subscription.recv().await {
        ais_protocol::redact::redact(&mut envelope.event.data, redact_mode, &[]);
        let line = JsonlCodec::encode(&envelope).context("encode event envelope")?;
        sink.write_line(&line)?;
    }
    Ok(())
}

/// Read newline-delimited [`CommandEnvelope`]s from stdin until EOF, sending
/// each decoded envelope down `commands`. A line that fails to parse is
/// reported on stderr and skipped rather than aborting the run. Returns once
/// stdin closes; the receiving end sees that as the sender dropping.
pub async fn read_commands_from_stdin(commands: UnboundedSender<CommandEnvelope>) -> Result<()> {
    let mut stdin = tokio::io::stdin();
    let mut parser: StreamParser<CommandEnvelope> = StreamParser::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stdin.read(&mut chunk).await.context("read stdin command stream")?;
        if n == 0 {
            break;
        }
        for result in parser.push(&chunk[..n]) {
            dispatch(result, &commands);
        }
    }
    for result in parser.finish() {
        dispatch(result, &commands);
    }
    Ok(())
}

fn dispatch(result: Result<CommandEnvelope, ais_protocol::ProtocolError>, commands: &UnboundedSender<CommandEnvelope>) {
    match result {
        Ok(envelope) => {
            let _ = commands.send(envelope);
        }
        Err(error) => eprintln!("discarding malformed command line: {error}"),
    }
}

/// `--checkpoint`/`--resume` take a plain path argument; this just
/// centralizes the `&str` -> `PathBuf` conversion.
#[must_use]
pub fn checkpoint_path(raw: &str) -> std::path::PathBuf {
    Path::new(raw).to_path_buf()
}
