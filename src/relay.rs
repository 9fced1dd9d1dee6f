// Relay between a streaming chat backend and a display sink

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;

use crate::api::{ApiError, FailureKind};

pub const ERROR_PREFIX: &str = "Error: ";

/// One incremental piece of model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatChunk {
    pub delta: String,
}

impl ChatChunk {
    pub fn new(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
        }
    }
}

pub type ChunkStream = BoxStream<'static, Result<ChatChunk, ApiError>>;

/// Anything that can turn a prompt into a lazy stream of chunks.
///
/// The stream is forward-only and is not restarted. Connection failures show
/// up as the first item rather than as a separate call.
pub trait ChatBackend {
    fn stream_chat(&self, prompt: &str) -> ChunkStream;
}

/// The only message the relay ever hands to the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    /// Full text accumulated so far, replaces whatever is displayed
    Update(String),
    /// Terminal failure for the request, already prefixed with [`ERROR_PREFIX`]
    Error(String),
}

impl DisplayEvent {
    pub fn failure(err: &ApiError) -> Self {
        let detail = err.to_string();
        let detail = if detail.trim().is_empty() {
            "An unknown error occurred".to_string()
        } else {
            detail
        };
        Self::Error(format!("{ERROR_PREFIX}{detail}"))
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Update(text) | Self::Error(text) => text,
        }
    }
}

/// Fire-and-forget receiver of display events. Must keep the order it is given.
#[cfg_attr(test, mockall::automock)]
pub trait DisplaySink {
    fn send(&self, event: DisplayEvent);
}

impl DisplaySink for mpsc::UnboundedSender<DisplayEvent> {
    fn send(&self, event: DisplayEvent) {
        // A closed receiver means the panel is gone; nothing is left to show it.
        if mpsc::UnboundedSender::send(self, event).is_err() {
            tracing::debug!("display closed, dropping event");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed { updates: usize },
    Failed { updates: usize, kind: FailureKind },
}

/// Stream one prompt through `backend`, pushing every accumulated snapshot to `sink`.
///
/// Each chunk produces exactly one [`DisplayEvent::Update`] carrying the whole
/// text so far. The first failure produces one [`DisplayEvent::Error`] and ends
/// the request; nothing is sent after it. An empty stream sends nothing.
pub async fn relay<B, S>(prompt: &str, backend: &B, sink: &S) -> RelayOutcome
where
    B: ChatBackend + ?Sized,
    S: DisplaySink + ?Sized,
{
    let mut accumulated = String::new();
    let mut updates = 0;
    let mut chunks = backend.stream_chat(prompt);

    while let Some(item) = chunks.next().await {
        match item {
            Ok(chunk) => {
                accumulated.push_str(&chunk.delta);
                updates += 1;
                tracing::trace!(updates, chars = accumulated.len(), "chunk relayed");
                sink.send(DisplayEvent::Update(accumulated.clone()));
            }
            Err(err) => {
                tracing::error!(kind = ?err.kind(), error = %err, "chat stream failed");
                sink.send(DisplayEvent::failure(&err));
                return RelayOutcome::Failed {
                    updates,
                    kind: err.kind(),
                };
            }
        }
    }

    RelayOutcome::Completed { updates }
}


#[cfg(test)]
mod tests {
    use super::testing::{chunks, RecordingSink, ScriptedBackend};
    use super::*;

    fn update(text: &str) -> DisplayEvent {
        DisplayEvent::Update(text.to_string())
    }

    #[tokio::test]
    async fn test_updates_carry_accumulated_text() {
        let backend = ScriptedBackend::new(|_| chunks(&["Hi", " there"]));
        let sink = RecordingSink::default();

        let outcome = relay("hello", &backend, &sink).await;

        assert_eq!(outcome, RelayOutcome::Completed { updates: 2 });
        assert_eq!(sink.events(), vec![update("Hi"), update("Hi there")]);
    }

    #[tokio::test]
    async fn test_one_update_per_chunk_including_empty_deltas() {
        let deltas = ["a", "", "b", "c", ""];
        let backend = ScriptedBackend::new(|_| chunks(&deltas));
        let sink = RecordingSink::default();

        relay("p", &backend, &sink).await;

        let events = sink.events();
        assert_eq!(events.len(), deltas.len());
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event, &update(&deltas[..=i].concat()));
        }
    }

    #[tokio::test]
    async fn test_empty_stream_sends_nothing() {
        let backend = ScriptedBackend::new(|_| Vec::new());
        let sink = RecordingSink::default();

        let outcome = relay("", &backend, &sink).await;

        assert_eq!(outcome, RelayOutcome::Completed { updates: 0 });
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_immediate_failure_sends_single_error() {
        let backend = ScriptedBackend::new(|_| {
            vec![Err(ApiError::Server("model runner crashed".to_string()))]
        });
        let sink = RecordingSink::default();

        let outcome = relay("hello", &backend, &sink).await;

        assert_eq!(
            outcome,
            RelayOutcome::Failed {
                updates: 0,
                kind: FailureKind::Model
            }
        );
        assert_eq!(
            sink.events(),
            vec![DisplayEvent::Error("Error: model runner crashed".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failure_after_chunks_is_terminal() {
        let backend = ScriptedBackend::new(|_| {
            let mut script = chunks(&["one", " two"]);
            script.push(Err(ApiError::Server("stream reset".to_string())));
            script.extend(chunks(&[" three"]));
            script
        });
        let sink = RecordingSink::default();

        let outcome = relay("count", &backend, &sink).await;

        assert!(matches!(outcome, RelayOutcome::Failed { updates: 2, .. }));
        assert_eq!(
            sink.events(),
            vec![
                update("one"),
                update("one two"),
                DisplayEvent::Error("Error: stream reset".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_blank_error_message_still_describes_failure() {
        let backend = ScriptedBackend::new(|_| vec![Err(ApiError::Server(String::new()))]);
        let sink = RecordingSink::default();

        relay("x", &backend, &sink).await;

        let mut events = sink.events();
        assert_eq!(events.len(), 1);
        let text = events.remove(0).into_text();
        assert!(text.starts_with(ERROR_PREFIX));
        assert!(!text[ERROR_PREFIX.len()..].trim().is_empty());
    }

    #[tokio::test]
    async fn test_mock_sink_sees_updates_then_one_error() {
        let mut seq = mockall::Sequence::new();
        let mut sink = MockDisplaySink::new();
        sink.expect_send()
            .withf(|e| *e == DisplayEvent::Update("partial".to_string()))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        sink.expect_send()
            .withf(|e| matches!(e, DisplayEvent::Error(t) if t.starts_with(ERROR_PREFIX)))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let backend = ScriptedBackend::new(|_| {
            let mut script = chunks(&["partial"]);
            script.push(Err(ApiError::ModelNotFound(
                "model \"nope\" not found".to_string(),
            )));
            script
        });

        relay("hi", &backend, &sink).await;
    }

    #[tokio::test]
    async fn test_concurrent_relays_keep_separate_accumulators() {
        let left = ScriptedBackend::new(|_| chunks(&["a", "b", "c"]));
        let right = ScriptedBackend::new(|_| chunks(&["x", "y", "z"]));
        let left_sink = RecordingSink::default();
        let right_sink = RecordingSink::default();

        let (l, r) = tokio::join!(
            relay("left", &left, &left_sink),
            relay("right", &right, &right_sink)
        );

        assert_eq!(l, RelayOutcome::Completed { updates: 3 });
        assert_eq!(r, RelayOutcome::Completed { updates: 3 });
        assert_eq!(
            left_sink.events(),
            vec![update("a"), update("ab"), update("abc")]
        );
        assert_eq!(
            right_sink.events(),
            vec![update("x"), update("xy"), update("xyz")]
        );
    }

    #[tokio::test]
    async fn test_prompt_reaches_backend() {
        let backend = ScriptedBackend::new(|prompt| chunks(&["echo: ", prompt]));
        let sink = RecordingSink::default();

        relay("ping", &backend, &sink).await;

        assert_eq!(sink.events().last(), Some(&update("echo: ping")));
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = ScriptedBackend::new(|_| chunks(&["1", "2"]));

        relay("n", &backend, &tx).await;
        drop(tx);

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert_eq!(received, vec![update("1"), update("12")]);
    }

    #[test]
    fn test_channel_sink_ignores_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        DisplaySink::send(&tx, update("late"));
    }
}
