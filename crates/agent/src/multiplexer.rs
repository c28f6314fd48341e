//! Streaming multiplexer.
//!
//! Splits one ordered channel of [`StreamChunk`]s into two independent
//! channels: content fragments and tool-call fragments. Tool-call arguments
//! arrive in pieces keyed by stream index, possibly interleaved across
//! several calls, and are stitched back together here.
//!
//! Once the read loop is over the completed calls are handed to a
//! [`ToolCallHandler`], one at a time and in ascending index order. That is
//! where tools actually run. Both output channels close when the
//! multiplexer task ends, whichever way it ends.

use async_trait::async_trait;
use roundclaw_core::{ChunkReceiver, FinishReason, LlmError, ToolCall, ToolCallDelta};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Buffer size of each output channel.
pub const CHANNEL_CAPACITY: usize = 256;

/// Visible text and reasoning, forwarded as soon as a chunk carries it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentFragment {
    pub content: String,
    pub reasoning: String,
}

/// A piece of one tool call.
///
/// The first fragment for an index carries whatever id, name and argument
/// text the chunk had; later ones carry only the added argument text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub first: bool,
}

/// Receives each completed tool call.
#[async_trait]
pub trait ToolCallHandler: Send + Sync {
    async fn on_tool_call(&self, call: ToolCall);
}

/// How the multiplexer task ended.
#[derive(Debug, Clone)]
pub enum StreamOutcome {
    /// The stream ended normally, with the finish reason if one was seen.
    Completed(Option<FinishReason>),
    /// The backend reported an error mid-stream. No handler was invoked.
    Failed(LlmError),
    /// Cancelled by the caller. Calls not yet handed over are dropped.
    Cancelled,
}

/// The consumer side of one multiplexed stream.
pub struct StreamPack {
    pub content: mpsc::Receiver<ContentFragment>,
    pub tool_calls: mpsc::Receiver<ToolCallFragment>,
    pub task: JoinHandle<StreamOutcome>,
}

#[derive(Debug, Default)]
struct Accumulator {
    id: String,
    name: String,
    arguments: String,
}

impl Accumulator {
    fn into_call(self) -> ToolCall {
        ToolCall::new(self.id, self.name, self.arguments)
    }
}

/// Start demultiplexing `chunks` on a new task.
pub fn multiplex(
    chunks: ChunkReceiver,
    cancel: CancellationToken,
    handler: Arc<dyn ToolCallHandler>,
) -> StreamPack {
    let (content_tx, content_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (tool_tx, tool_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let task = tokio::spawn(run(chunks, cancel, handler, content_tx, tool_tx));

    StreamPack {
        content: content_rx,
        tool_calls: tool_rx,
        task,
    }
}

async fn run(
    mut chunks: ChunkReceiver,
    cancel: CancellationToken,
    handler: Arc<dyn ToolCallHandler>,
    content_tx: mpsc::Sender<ContentFragment>,
    tool_tx: mpsc::Sender<ToolCallFragment>,
) -> StreamOutcome {
    let mut calls: BTreeMap<u32, Accumulator> = BTreeMap::new();
    let mut finish = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(pending_calls = calls.len(), "Stream cancelled");
                return StreamOutcome::Cancelled;
            }
            next = chunks.recv() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                warn!(error = %e, "Stream failed");
                return StreamOutcome::Failed(e);
            }
            None => break,
        };

        let content = chunk.content.unwrap_or_default();
        let reasoning = chunk.reasoning.unwrap_or_default();
        if !content.is_empty() || !reasoning.is_empty() {
            let fragment = ContentFragment { content, reasoning };
            if !send(&content_tx, fragment, &cancel).await {
                return StreamOutcome::Cancelled;
            }
        }

        for delta in chunk.tool_calls {
            let fragment = accumulate(&mut calls, delta);
            if !send(&tool_tx, fragment, &cancel).await {
                return StreamOutcome::Cancelled;
            }
        }

        if let Some(reason) = chunk.finish_reason {
            finish = Some(reason);
            if reason.is_stop() || reason.is_tool_calls() {
                break;
            }
        }
    }

    for (index, acc) in calls {
        if cancel.is_cancelled() {
            debug!(index, "Stream cancelled before tool call was handed over");
            return StreamOutcome::Cancelled;
        }
        handler.on_tool_call(acc.into_call()).await;
    }

    StreamOutcome::Completed(finish)
}

fn accumulate(calls: &mut BTreeMap<u32, Accumulator>, delta: ToolCallDelta) -> ToolCallFragment {
    let first = !calls.contains_key(&delta.index);
    let acc = calls.entry(delta.index).or_default();

    // Some backends repeat id/name on later fragments; the first sighting wins.
    if acc.id.is_empty()
        && let Some(id) = delta.id
    {
        acc.id = id;
    }
    if acc.name.is_empty()
        && let Some(name) = delta.name
    {
        acc.name = name;
    }
    acc.arguments.push_str(&delta.arguments);

    ToolCallFragment {
        index: delta.index,
        id: acc.id.clone(),
        name: acc.name.clone(),
        arguments: delta.arguments,
        first,
    }
}

/// Forward one fragment. A dropped receiver is not an error: the stream is
/// still read to the end so tool calls get handled. Returns `false` only
/// when cancelled while waiting for buffer space.
async fn send<T>(tx: &mpsc::Sender<T>, value: T, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tx.send(value) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundclaw_core::StreamChunk;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<ToolCall>>,
    }

    #[async_trait]
    impl ToolCallHandler for Recorder {
        async fn on_tool_call(&self, call: ToolCall) {
            self.calls.lock().await.push(call);
        }
    }

    fn delta(index: u32, id: Option<&str>, name: Option<&str>, args: &str) -> StreamChunk {
        StreamChunk::tool_call(ToolCallDelta {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: args.to_string(),
        })
    }

    async fn scripted(chunks: Vec<Result<StreamChunk, LlmError>>) -> ChunkReceiver {
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.send(chunk).await.unwrap();
        }
        rx
    }

    async fn drain<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(v) = rx.recv().await {
            out.push(v);
        }
        out
    }

    #[tokio::test]
    async fn content_fragments_concatenate_exactly() {
        let rx = scripted(vec![
            Ok(StreamChunk::content("He")),
            Ok(StreamChunk::content("llo")),
            Ok(StreamChunk::content(" world")),
            Ok(StreamChunk::finish(FinishReason::Stop)),
        ])
        .await;
        let recorder = Arc::new(Recorder::default());
        let pack = multiplex(rx, CancellationToken::new(), recorder.clone());

        let (content, tools, outcome) = tokio::join!(drain(pack.content), drain(pack.tool_calls), pack.task);
        let text: String = content.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(text, "Hello world");
        assert_eq!(content.len(), 3);
        assert!(tools.is_empty());
        assert!(matches!(outcome.unwrap(), StreamOutcome::Completed(Some(FinishReason::Stop))));
        assert!(recorder.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn arguments_are_stitched_and_handled_once() {
        let rx = scripted(vec![
            Ok(delta(0, Some("call_1"), Some("calc"), "{\"a\":1")),
            Ok(delta(0, None, None, "}")),
            Ok(StreamChunk::finish(FinishReason::ToolCalls)),
        ])
        .await;
        let recorder = Arc::new(Recorder::default());
        let pack = multiplex(rx, CancellationToken::new(), recorder.clone());

        let (_, fragments, outcome) = tokio::join!(drain(pack.content), drain(pack.tool_calls), pack.task);
        assert!(matches!(outcome.unwrap(), StreamOutcome::Completed(Some(FinishReason::ToolCalls))));

        let calls = recorder.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ToolCall::new("call_1", "calc", "{\"a\":1}"));

        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].first);
        assert!(!fragments[1].first);
        assert_eq!(fragments[1].arguments, "}");
        assert_eq!(fragments[1].name, "calc");
    }

    #[tokio::test]
    async fn interleaved_calls_are_handled_in_index_order() {
        let rx = scripted(vec![
            Ok(delta(1, Some("b"), Some("second"), "{\"x\":")),
            Ok(delta(0, Some("a"), Some("first"), "{")),
            Ok(delta(1, None, None, "2}")),
            Ok(delta(0, None, None, "}")),
            Ok(StreamChunk::finish(FinishReason::ToolCalls)),
        ])
        .await;
        let recorder = Arc::new(Recorder::default());
        let pack = multiplex(rx, CancellationToken::new(), recorder.clone());
        let _ = tokio::join!(drain(pack.content), drain(pack.tool_calls), pack.task);

        let calls = recorder.calls.lock().await;
        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(calls[0].arguments, "{}");
        assert_eq!(calls[1].arguments, "{\"x\":2}");
    }

    #[tokio::test]
    async fn reading_stops_at_tool_calls_finish() {
        let rx = scripted(vec![
            Ok(delta(0, Some("a"), Some("calc"), "{}")),
            Ok(StreamChunk::finish(FinishReason::ToolCalls)),
            Ok(StreamChunk::content("ignored")),
        ])
        .await;
        let pack = multiplex(rx, CancellationToken::new(), Arc::new(Recorder::default()));
        let (content, _, _) = tokio::join!(drain(pack.content), drain(pack.tool_calls), pack.task);
        assert!(content.is_empty());
    }

    #[tokio::test]
    async fn reasoning_is_forwarded() {
        let rx = scripted(vec![
            Ok(StreamChunk::reasoning("hmm")),
            Ok(StreamChunk::content("ok")),
        ])
        .await;
        let pack = multiplex(rx, CancellationToken::new(), Arc::new(Recorder::default()));
        let (content, _, outcome) = tokio::join!(drain(pack.content), drain(pack.tool_calls), pack.task);
        assert_eq!(content[0].reasoning, "hmm");
        assert_eq!(content[1].content, "ok");
        // closed without a finish reason
        assert!(matches!(outcome.unwrap(), StreamOutcome::Completed(None)));
    }

    #[tokio::test]
    async fn error_chunk_fails_without_handling_calls() {
        let rx = scripted(vec![
            Ok(delta(0, Some("a"), Some("calc"), "{")),
            Err(LlmError::StreamInterrupted("reset".into())),
        ])
        .await;
        let recorder = Arc::new(Recorder::default());
        let pack = multiplex(rx, CancellationToken::new(), recorder.clone());
        let (_, _, outcome) = tokio::join!(drain(pack.content), drain(pack.tool_calls), pack.task);

        assert!(matches!(outcome.unwrap(), StreamOutcome::Failed(LlmError::StreamInterrupted(_))));
        assert!(recorder.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn cancellation_closes_both_channels_promptly() {
        // The sender stays alive, so only cancellation can end the read loop.
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(delta(0, Some("a"), Some("calc"), "{"))).await.unwrap();

        let cancel = CancellationToken::new();
        let recorder = Arc::new(Recorder::default());
        let pack = multiplex(rx, cancel.clone(), recorder.clone());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();

        let (_, _, outcome) = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            async { tokio::join!(drain(pack.content), drain(pack.tool_calls), pack.task) },
        )
        .await
        .unwrap();
        assert!(matches!(outcome.unwrap(), StreamOutcome::Cancelled));
        assert!(recorder.calls.lock().await.is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn dropped_consumer_does_not_stall_tool_handling() {
        let rx = scripted(vec![
            Ok(StreamChunk::content("text nobody reads")),
            Ok(delta(0, Some("a"), Some("calc"), "{}")),
            Ok(StreamChunk::finish(FinishReason::ToolCalls)),
        ])
        .await;
        let recorder = Arc::new(Recorder::default());
        let pack = multiplex(rx, CancellationToken::new(), recorder.clone());
        drop(pack.content);
        drop(pack.tool_calls);

        assert!(matches!(pack.task.await.unwrap(), StreamOutcome::Completed(_)));
        assert_eq!(recorder.calls.lock().await.len(), 1);
    }
}
