//! Conversation session control.
//!
//! One turn at a time: `submit` appends the user message, opens the stream
//! with the accumulated history, drives the patch assembler over the
//! incoming batches, re-resolves citations for display after every batch,
//! and appends to history only when the stream ends cleanly. A busy flag
//! guards against overlapping turns; batches are consumed strictly
//! sequentially, so no two batches ever race on the shared snapshot.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chat::citations::{RenderToken, resolve_citations};
use crate::chat::dedup::dedupe_sources;
use crate::chat::error::TurnError;
use crate::chat::markup::to_safe_html;
use crate::chat::message::{ChatTurn, Message, MessageRole, Source};
use crate::chat::patch::AnswerAssembler;
use crate::core::constants::TURN_FAILURE_TEXT;
use crate::remote::client::{TurnRequest, TurnTransport};

/// Turn lifecycle. A new turn can only start from `Idle`, `Completed`, or
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
}

/// A display refresh pushed to the presenter after every applied batch and
/// once more on completion.
#[derive(Debug)]
pub struct TurnUpdate<'a> {
    pub message: &'a Message,
    /// Resolved citation tokens over the message's sanitized markup.
    pub tokens: &'a [RenderToken],
    /// Deduplicated sources for the side panel, in canonical order.
    pub sources: &'a [Source],
    pub done: bool,
}

/// Owns the transcript, the history, and the state of the in-flight turn.
///
/// The session is single-threaded by construction: `submit` borrows it
/// mutably for the whole turn, and suspension happens only while awaiting
/// the next batch.
pub struct ChatSession<T: TurnTransport> {
    transport: T,
    conversation_id: String,
    model: String,
    source_step: String,
    state: TurnState,
    busy: bool,
    turn_seq: u64,
    cancel: CancellationToken,
    messages: Vec<Message>,
    history: Vec<ChatTurn>,
    last_run_id: Option<String>,
}

impl<T: TurnTransport> ChatSession<T> {
    pub fn new(transport: T, model: impl Into<String>, source_step: impl Into<String>) -> Self {
        Self {
            transport,
            conversation_id: Uuid::new_v4().to_string(),
            model: model.into(),
            source_step: source_step.into(),
            state: TurnState::default(),
            busy: false,
            turn_seq: 0,
            cancel: CancellationToken::new(),
            messages: Vec::new(),
            history: Vec::new(),
            last_run_id: None,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Run id of the most recent assistant answer, for feedback and trace.
    pub fn last_run_id(&self) -> Option<&str> {
        self.last_run_id.as_deref()
    }

    /// Deduplicated sources of the most recent assistant answer.
    pub fn last_sources(&self) -> Vec<Source> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .and_then(|m| m.sources.as_deref())
            .map(|sources| dedupe_sources(sources).filtered)
            .unwrap_or_default()
    }

    /// Token that abandons the session's in-flight turn when cancelled.
    /// Late-arriving batches are then discarded without mutating any state.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one turn. Rejected as a no-op (returning the unchanged state) if
    /// `text` is empty, a turn is already in flight, or the session was
    /// cancelled. `present` is called after every applied batch.
    ///
    /// On failure the turn is marked `Failed`, a generic failure message is
    /// appended, no history entry is written, and the error is returned for
    /// the caller to surface as a transient notice.
    pub async fn submit<F>(&mut self, text: &str, mut present: F) -> Result<TurnState, TurnError>
    where
        F: FnMut(TurnUpdate<'_>),
    {
        let text = text.trim();
        if text.is_empty() || self.busy || self.cancel.is_cancelled() {
            return Ok(self.state);
        }

        self.busy = true;
        self.turn_seq += 1;
        let turn = self.turn_seq;
        self.state = TurnState::Sending;

        // Optimistic append: the user message shows before the stream opens.
        self.messages.push(Message::user(text));

        let request = TurnRequest {
            question: text.to_string(),
            chat_history: self.history.clone(),
            model: self.model.clone(),
            conversation_id: self.conversation_id.clone(),
            include_names: vec![self.source_step.clone()],
        };

        let outcome = self.run_turn(turn, request, &mut present).await;
        self.busy = false;

        match outcome {
            Ok(Some(final_text)) => {
                self.state = TurnState::Completed;
                self.history.push(ChatTurn {
                    human: text.to_string(),
                    ai: final_text,
                });
                Ok(self.state)
            }
            Ok(None) => {
                // Abandoned mid-stream: keep whatever already rendered, no
                // history entry, no failure message.
                tracing::debug!(turn, "Turn abandoned before completion");
                self.state = TurnState::Idle;
                Ok(self.state)
            }
            Err(e) => {
                tracing::error!(error = %e, turn, "Turn failed");
                self.state = TurnState::Failed;
                self.messages.push(Message::assistant(TURN_FAILURE_TEXT));
                Err(e)
            }
        }
    }

    /// Drive the stream to completion. Returns the final accumulated answer
    /// text, or `None` if the turn was abandoned.
    async fn run_turn<F>(
        &mut self,
        turn: u64,
        request: TurnRequest,
        present: &mut F,
    ) -> Result<Option<String>, TurnError>
    where
        F: FnMut(TurnUpdate<'_>),
    {
        let mut stream = self.transport.open_stream(request).await?;
        self.state = TurnState::Streaming;

        let mut assembler = AnswerAssembler::new(&self.source_step);
        let mut message_index: Option<usize> = None;

        while let Some(batch) = stream.next().await {
            if self.cancel.is_cancelled() || self.turn_seq != turn {
                return Ok(None);
            }
            let ops = batch?;
            assembler.apply_batch(&ops)?;

            let dedup = dedupe_sources(assembler.sources());
            let content = to_safe_html(assembler.text());
            let tokens = resolve_citations(&content, &dedup);

            let index = *message_index.get_or_insert_with(|| {
                self.messages.push(Message::assistant(""));
                self.messages.len() - 1
            });
            let message = &mut self.messages[index];
            message.content = content;
            message.run_id = assembler.run_id().map(str::to_string);
            message.sources = Some(assembler.sources().to_vec());
            self.last_run_id.clone_from(&message.run_id);

            present(TurnUpdate {
                message: &self.messages[index],
                tokens: &tokens,
                sources: &dedup.filtered,
                done: false,
            });
        }

        if let Some(index) = message_index {
            let dedup = dedupe_sources(assembler.sources());
            let tokens = resolve_citations(&self.messages[index].content, &dedup);
            present(TurnUpdate {
                message: &self.messages[index],
                tokens: &tokens,
                sources: &dedup.filtered,
                done: true,
            });
        }

        Ok(Some(assembler.text().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::chat::patch::PatchOp;
    use crate::remote::client::PatchStream;
    use crate::remote::error::TransportError;

    const STEP: &str = "FindDocs";

    fn ops(value: serde_json::Value) -> Vec<PatchOp> {
        serde_json::from_value(value).unwrap()
    }

    /// Transport that replays one scripted batch sequence per open_stream.
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Vec<Result<Vec<PatchOp>, TransportError>>>>,
        cancel_after_first: Option<CancellationToken>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Vec<Result<Vec<PatchOp>, TransportError>>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                cancel_after_first: None,
            }
        }
    }

    #[async_trait]
    impl TurnTransport for ScriptedTransport {
        async fn open_stream(&self, _request: TurnRequest) -> Result<PatchStream, TransportError> {
            let batches = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("no script left for open_stream");
            let cancel = self.cancel_after_first.clone();
            let stream = futures::stream::iter(batches.into_iter().enumerate().map(
                move |(i, batch)| {
                    // Simulates the user abandoning the turn while later
                    // batches are still in flight.
                    if i >= 1 && let Some(token) = &cancel {
                        token.cancel();
                    }
                    batch
                },
            ));
            Ok(stream.boxed())
        }
    }

    fn answer_script() -> Vec<Result<Vec<PatchOp>, TransportError>> {
        vec![
            Ok(ops(json!([
                { "op": "replace", "path": "", "value": {} },
                { "op": "add", "path": "/id", "value": "run-1" },
                { "op": "add", "path": "/streamed_output", "value": [] }
            ]))),
            Ok(ops(json!([
                { "op": "add", "path": "/streamed_output/-", "value": "Install the SDK [0]" }
            ]))),
            Ok(ops(json!([
                {
                    "op": "add",
                    "path": "/logs/FindDocs/final_output",
                    "value": {
                        "output": [
                            { "metadata": { "source": "https://docs/a", "crumbs": "Docs | A" } },
                            { "metadata": { "source": "https://docs/a", "crumbs": "Docs | A" } }
                        ]
                    }
                }
            ]))),
            Ok(ops(json!([
                { "op": "add", "path": "/streamed_output/-", "value": "." }
            ]))),
        ]
    }

    fn session_with(
        scripts: Vec<Vec<Result<Vec<PatchOp>, TransportError>>>,
    ) -> ChatSession<ScriptedTransport> {
        ChatSession::new(ScriptedTransport::new(scripts), "test_model", STEP)
    }

    #[tokio::test]
    async fn test_empty_submit_is_a_no_op() {
        let mut session = session_with(vec![]);
        let state = session.submit("   ", |_| {}).await.unwrap();

        assert_eq!(state, TurnState::Idle);
        assert!(session.messages().is_empty());
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_completed_turn_updates_message_and_history() {
        let mut session = session_with(vec![answer_script()]);
        let updates = Arc::new(Mutex::new(0usize));
        let seen = updates.clone();

        let state = session
            .submit("how do I install?", move |update| {
                *seen.lock().unwrap() += 1;
                assert_eq!(update.message.role, MessageRole::Assistant);
            })
            .await
            .unwrap();

        assert_eq!(state, TurnState::Completed);
        // One update per batch plus the final one.
        assert_eq!(*updates.lock().unwrap(), 5);

        assert_eq!(session.messages().len(), 2);
        let user = &session.messages()[0];
        assert_eq!(user.role, MessageRole::User);
        assert_eq!(user.content, "how do I install?");

        let answer = &session.messages()[1];
        assert_eq!(answer.run_id.as_deref(), Some("run-1"));
        assert!(answer.content.contains("Install the SDK"));
        // Raw source list stays pre-dedup on the message.
        assert_eq!(answer.sources.as_ref().unwrap().len(), 2);

        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].human, "how do I install?");
        assert_eq!(session.history()[0].ai, "Install the SDK [0].");

        assert_eq!(session.last_run_id(), Some("run-1"));
        assert_eq!(session.last_sources().len(), 1);
    }

    #[tokio::test]
    async fn test_citations_resolved_for_display() {
        let mut session = session_with(vec![answer_script()]);
        let final_tokens = Arc::new(Mutex::new(Vec::new()));
        let sink = final_tokens.clone();

        session
            .submit("question", move |update| {
                if update.done {
                    *sink.lock().unwrap() = update.tokens.to_vec();
                }
            })
            .await
            .unwrap();

        let tokens = final_tokens.lock().unwrap();
        assert!(tokens.iter().any(|t| matches!(
            t,
            RenderToken::Citation { source, number: 1 } if source.url == "https://docs/a"
        )));
    }

    #[tokio::test]
    async fn test_malformed_patch_fails_turn_and_keeps_snapshot() {
        let mut script = answer_script();
        script.truncate(2);
        script.push(Ok(ops(json!([
            { "op": "replace", "path": "/does/not/exist", "value": 1 }
        ]))));

        let mut session = session_with(vec![script]);
        let result = session.submit("question", |_| {}).await;

        assert!(matches!(result, Err(TurnError::MalformedPatch(_))));
        assert_eq!(session.state(), TurnState::Failed);

        // Last good render is still on the assistant message, and a generic
        // failure message follows it.
        assert_eq!(session.messages().len(), 3);
        assert!(session.messages()[1].content.contains("Install the SDK"));
        assert_eq!(session.messages()[2].content, TURN_FAILURE_TEXT);

        // Failed turns are excluded from future context.
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_fails_turn() {
        let script = vec![
            Ok(ops(json!([
                { "op": "add", "path": "/streamed_output", "value": ["partial"] }
            ]))),
            Err(TransportError::Stream("connection reset".to_string())),
        ];

        let mut session = session_with(vec![script]);
        let result = session.submit("question", |_| {}).await;

        assert!(matches!(result, Err(TurnError::Transport(_))));
        assert_eq!(session.state(), TurnState::Failed);
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_failed_turn_recovers_on_next_submit() {
        let failing = vec![Err(TransportError::Stream("boom".to_string()))];
        let mut session = session_with(vec![failing, answer_script()]);

        assert!(session.submit("first", |_| {}).await.is_err());
        assert_eq!(session.state(), TurnState::Failed);

        let state = session.submit("second", |_| {}).await.unwrap();
        assert_eq!(state, TurnState::Completed);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].human, "second");
    }

    #[tokio::test]
    async fn test_cancelled_session_rejects_submit() {
        let mut session = session_with(vec![answer_script()]);
        session.cancel_token().cancel();

        let state = session.submit("question", |_| {}).await.unwrap();
        assert_eq!(state, TurnState::Idle);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_late_batches_discarded_after_abandonment() {
        let mut transport = ScriptedTransport::new(vec![answer_script()]);
        let token = CancellationToken::new();
        transport.cancel_after_first = Some(token.clone());

        let mut session = ChatSession::new(transport, "test_model", STEP);
        // The session must observe the same token the transport trips.
        session.cancel = token;

        let state = session.submit("question", |_| {}).await.unwrap();

        assert_eq!(state, TurnState::Idle);
        // First batch landed, everything after the cancellation did not.
        assert_eq!(session.messages().len(), 2);
        assert!(!session.messages()[1].content.contains("Install"));
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_history_replayed_on_subsequent_turns() {
        let mut session = session_with(vec![answer_script(), answer_script()]);

        session.submit("first", |_| {}).await.unwrap();
        session.submit("second", |_| {}).await.unwrap();

        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[0].human, "first");
        assert_eq!(session.history()[1].human, "second");
    }
}
