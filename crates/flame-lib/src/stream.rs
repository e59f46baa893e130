//! Line-oriented streaming of a live byte source to an event handler
//!
//! The reader and the handler run as separate tokio tasks joined by a
//! bounded channel, so a slow handler throttles reads instead of letting
//! lines pile up in memory. Completion is reported through a oneshot
//! channel the handler owns.

use async_trait::async_trait;
use std::borrow::Cow;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default channel capacity; one in flight keeps reads in lockstep with the handler
pub const DEFAULT_EVENT_CAPACITY: usize = 1;

const LINE_DELIMITER: u8 = b'\n';

/// One line of output, delimiter included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub raw: Vec<u8>,
}

impl LogEvent {
    pub fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }
}

/// Consumer of a stream of log events
#[async_trait]
pub trait EventHandler: Send + 'static {
    /// Drain `events` until done, then report through `done` exactly once
    async fn handle(
        self,
        events: mpsc::Receiver<LogEvent>,
        done: oneshot::Sender<bool>,
        cancel: CancellationToken,
    );
}

/// Resolves once the handler reports completion
#[derive(Debug)]
pub struct CompletionSignal {
    rx: oneshot::Receiver<bool>,
}

impl CompletionSignal {
    /// The handler's verdict; `false` if it went away without reporting
    pub async fn wait(self) -> bool {
        self.rx.await.unwrap_or(false)
    }
}

/// Spawn the reader and handler tasks for one stream
///
/// The reader runs under a child of `cancel` that is cancelled as soon as
/// the handler returns, so the source is released on every exit path.
pub fn spawn_pipeline<R, H>(
    source: R,
    handler: H,
    cancel: CancellationToken,
    capacity: usize,
) -> CompletionSignal
where
    R: AsyncBufRead + Unpin + Send + 'static,
    H: EventHandler,
{
    let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
    let (done_tx, done_rx) = oneshot::channel();
    let scope = cancel.child_token();

    let reader_scope = scope.clone();
    tokio::spawn(async move {
        let _release_reader = scope.drop_guard();
        handler.handle(events_rx, done_tx, cancel).await;
    });
    tokio::spawn(read_lines(source, events_tx, reader_scope));

    CompletionSignal { rx: done_rx }
}

/// Forward lines from `source` until it closes, errors, or `cancel` fires
async fn read_lines<R>(mut source: R, events: mpsc::Sender<LogEvent>, cancel: CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    let mut forwarded = 0u64;

    loop {
        let mut buf = Vec::new();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = source.read_until(LINE_DELIMITER, &mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Log stream read failed");
                break;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = events.send(LogEvent::new(buf)) => {
                if sent.is_err() {
                    // Handler stopped listening
                    break;
                }
            }
        }

        forwarded += 1;
    }

    debug!(lines = forwarded, "Log stream reader finished");
    // `source` is dropped here on every exit path, closing the stream
}
