//! Streaming chat session controller
//!
//! Owns the message log for the active conversation view, drives one
//! cancellable streaming turn at a time, and folds the event stream into
//! [`StreamState`] through a transport-independent reducer. User-visible
//! surfaces (errors, status, streamed text) are delivered as [`Notice`]
//! values over an unbounded channel; the host decides presentation.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::api::{
    ApiError, ChatBackend, ChatRequest, Department, EventByteStream, GenerationOptions,
};
use crate::conversation::{Citation, ConversationSummary, Message, ThoughtStep, ToolRun};
use crate::protocol::{parse_line, LineFramer, StreamEvent};

/// Suffix appended to a partial answer committed after a user stop.
pub const STOPPED_MARKER: &str = " [Generation stopped]";

const THINKING_STATUS: &str = "Thinking...";

/// Ephemeral state of the in-flight turn. Reset at the start of every
/// `send`, folded into an assistant [`Message`] at the end of the turn.
#[derive(Debug, Default)]
pub struct StreamState {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub thoughts: Vec<ThoughtStep>,
    pub tool_trace: Vec<ToolRun>,
    pub retrieval: Option<Value>,
    pub audit: Option<Value>,
    pub quality: Option<Value>,
    pub agent_status: String,
    pub streaming: bool,
}

impl StreamState {
    fn begin() -> Self {
        Self {
            streaming: true,
            ..Self::default()
        }
    }

    /// Apply one normalized event, in arrival order. Pure state folding:
    /// conversation-id binding and user notification stay with the
    /// controller.
    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Metadata {
                citations,
                retrieval,
                ..
            } => {
                self.citations = citations;
                self.retrieval = retrieval;
            }
            StreamEvent::Thought { content } => {
                self.agent_status = THINKING_STATUS.into();
                self.thoughts.push(ThoughtStep::Thought { content });
            }
            StreamEvent::ToolCall { tool, input } => {
                self.agent_status = format!("Executing {tool}...");
                self.thoughts.push(ThoughtStep::ToolCall { tool, input });
            }
            StreamEvent::ToolResult { result } => {
                self.thoughts.push(ThoughtStep::ToolResult { result });
            }
            StreamEvent::Tool(run) => {
                self.tool_trace.push(run);
            }
            StreamEvent::Answer { text } => {
                self.answer.push_str(&text);
            }
            StreamEvent::Audit { report } => {
                self.audit = report;
            }
            StreamEvent::Done { quality } => {
                self.quality = quality;
                self.agent_status.clear();
                self.streaming = false;
            }
        }
    }
}

/// User-visible surfaces emitted by the controller.
#[derive(Debug)]
pub enum Notice {
    /// Incremental answer text, for token-by-token rendering.
    AnswerDelta(String),
    /// Current agent activity indicator; empty string clears it.
    AgentStatus(String),
    /// Soft error carried inside an otherwise well-formed event; the
    /// stream continues.
    StreamError(String),
    /// The backend rejected the bearer token.
    SessionExpired,
    /// Transport or request failure; the turn was aborted.
    Error(String),
    /// Result of a background conversation-list refresh.
    ConversationsRefreshed(Vec<ConversationSummary>),
}

/// How a `send` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Empty input or a turn already in flight; nothing changed.
    Ignored,
    /// Terminal event or end-of-input; assistant message committed.
    Completed,
    /// User cancellation; partial answer committed with the stop marker.
    Stopped,
    /// Auth or transport failure; no assistant message committed.
    Failed,
}

/// Cancels the turn currently in flight, from outside the task that is
/// awaiting `send`. Cheap to clone; idempotent; a no-op while idle.
#[derive(Clone)]
pub struct StopHandle {
    slot: Arc<Mutex<Option<CancellationToken>>>,
}

impl StopHandle {
    pub fn stop(&self) {
        if let Some(token) = self.slot.lock().unwrap().as_ref() {
            token.cancel();
        }
    }
}

/// Session controller for one active conversation view.
///
/// Constructed per view, torn down on navigation away. All operations run
/// on one logical task; `busy` is the sole mutual exclusion and is checked
/// at the start of `send`.
pub struct SessionController {
    backend: Arc<dyn ChatBackend>,
    notices: UnboundedSender<Notice>,

    pub persona: String,
    pub model: String,
    pub options: GenerationOptions,
    pub department: Department,
    pub project_context: String,
    pub grade: bool,
    /// Selects the tool-augmented reasoning endpoint for the next turn.
    pub reasoning: bool,

    active_id: Option<i64>,
    messages: Vec<Message>,
    conversations: Vec<ConversationSummary>,

    stream: StreamState,
    busy: bool,
    cancel: Arc<Mutex<Option<CancellationToken>>>,
}

impl SessionController {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        persona: impl Into<String>,
        model: impl Into<String>,
    ) -> (Self, UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Self {
            backend,
            notices: tx,
            persona: persona.into(),
            model: model.into(),
            options: GenerationOptions {
                temperature: Some(0.7),
                num_ctx: Some(4096),
            },
            department: Department::default(),
            project_context: String::new(),
            grade: false,
            reasoning: false,
            active_id: None,
            messages: Vec::new(),
            conversations: Vec::new(),
            stream: StreamState::default(),
            busy: false,
            cancel: Arc::new(Mutex::new(None)),
        };
        (controller, rx)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn active_conversation(&self) -> Option<i64> {
        self.active_id
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn stream_state(&self) -> &StreamState {
        &self.stream
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.streaming
    }

    /// Handle for cancelling an in-flight turn from another task, e.g. a
    /// Ctrl-C handler while `send` is being awaited.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            slot: Arc::clone(&self.cancel),
        }
    }

    /// Cancel the in-flight turn, if any. Idempotent.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Drive one streaming chat turn.
    ///
    /// Appends the user message before any network activity completes; the
    /// user's turn is never retracted, even if the assistant turn fails.
    pub async fn send(&mut self, input: &str) -> TurnOutcome {
        let text = input.trim();
        if text.is_empty() || self.busy {
            return TurnOutcome::Ignored;
        }

        self.messages.push(Message::user(text));
        self.stream = StreamState::begin();
        self.busy = true;

        let request = ChatRequest {
            persona: self.persona.clone(),
            model: self.model.clone(),
            options: self.options.clone(),
            message: text.to_string(),
            conversation_id: self.active_id,
            grade: self.grade,
            project_context: self.project_context.clone(),
            department: self.department.clone(),
        };

        // Fresh token per turn, owned for exactly as long as `busy` holds.
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap() = Some(token.clone());

        let outcome = match self.backend.chat_stream(&request, self.reasoning).await {
            Ok(stream) => self.consume(stream, &token).await,
            Err(ApiError::Unauthorized) => {
                self.notify(Notice::SessionExpired);
                TurnOutcome::Failed
            }
            Err(err) => {
                self.notify(Notice::Error(format!("chat request failed: {err}")));
                TurnOutcome::Failed
            }
        };

        self.stream.streaming = false;
        self.stream.agent_status.clear();
        self.busy = false;
        self.cancel.lock().unwrap().take();

        outcome
    }

    async fn consume(
        &mut self,
        mut stream: EventByteStream,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut framer = LineFramer::new();

        loop {
            let chunk = tokio::select! {
                biased;
                // Once the abort is recognized no further events are
                // applied; dropping the stream tears down the transfer.
                _ = cancel.cancelled() => {
                    self.commit_turn(true);
                    return TurnOutcome::Stopped;
                }
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for line in framer.push(&bytes) {
                        self.process_line(&line);
                    }
                }
                Some(Err(err)) => {
                    self.notify(Notice::Error(format!("stream failed: {err}")));
                    return TurnOutcome::Failed;
                }
                None => break,
            }
        }

        // The final record may arrive without a terminating newline.
        if let Some(line) = framer.finish() {
            self.process_line(&line);
        }

        self.commit_turn(false);
        TurnOutcome::Completed
    }

    fn process_line(&mut self, line: &str) {
        let Some(record) = parse_line(line) else {
            return;
        };
        if let Some(error) = record.error {
            self.notify(Notice::StreamError(error));
        }
        if let Some(event) = record.event {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: StreamEvent) {
        match &event {
            StreamEvent::Metadata {
                conversation_id: Some(id),
                ..
            } if self.active_id.is_none() => {
                // The backend assigned an id to a brand-new conversation;
                // adopt it without touching in-progress state.
                self.active_id = Some(*id);
                self.spawn_list_refresh();
            }
            StreamEvent::Answer { text } if !text.is_empty() => {
                self.notify(Notice::AnswerDelta(text.clone()));
            }
            StreamEvent::Thought { .. } => {
                self.notify(Notice::AgentStatus(THINKING_STATUS.into()));
            }
            StreamEvent::ToolCall { tool, .. } => {
                self.notify(Notice::AgentStatus(format!("Executing {tool}...")));
            }
            StreamEvent::Done { .. } => {
                self.notify(Notice::AgentStatus(String::new()));
            }
            _ => {}
        }

        self.stream.apply(event);
    }

    /// Fold the accumulated turn into an assistant log entry.
    fn commit_turn(&mut self, stopped: bool) {
        let thoughts = std::mem::take(&mut self.stream.thoughts);
        let mut answer = std::mem::take(&mut self.stream.answer);
        if stopped {
            answer.push_str(STOPPED_MARKER);
        }
        self.messages.push(Message::assistant(answer, thoughts));
    }

    /// Fire-and-forget refresh triggered by the first `metadata` event.
    /// Races freely with the still-streaming turn; communicates by notice
    /// only, and a failure is non-fatal.
    fn spawn_list_refresh(&self) {
        let backend = Arc::clone(&self.backend);
        let notices = self.notices.clone();
        tokio::spawn(async move {
            match backend.list_conversations().await {
                Ok(list) => {
                    let _ = notices.send(Notice::ConversationsRefreshed(list));
                }
                Err(err) => tracing::debug!(%err, "background conversation refresh failed"),
            }
        });
    }

    /// Synchronous refresh of the sidebar list.
    pub async fn refresh_conversations(&mut self) {
        match self.backend.list_conversations().await {
            Ok(list) => self.conversations = list,
            Err(ApiError::Unauthorized) => self.notify(Notice::SessionExpired),
            Err(err) => tracing::debug!(%err, "conversation list refresh failed"),
        }
    }

    /// Apply a list delivered through [`Notice::ConversationsRefreshed`].
    pub fn set_conversations(&mut self, list: Vec<ConversationSummary>) {
        self.conversations = list;
    }

    /// Replace the local log with a stored conversation. Silent no-op if
    /// the fetch fails.
    pub async fn load_conversation(&mut self, id: i64) {
        match self.backend.get_conversation(id).await {
            Ok(record) => {
                self.active_id = Some(record.id);
                if let Some(mode) = record.mode {
                    self.persona = mode;
                }
                if let Some(model) = record.model {
                    self.model = model;
                }
                self.messages = record.messages;
                self.stream = StreamState::default();
            }
            Err(err) => tracing::debug!(%err, id, "load conversation failed"),
        }
    }

    /// Start over locally; the backend is not contacted until the next
    /// `send` creates a conversation.
    pub fn new_conversation(&mut self) {
        self.active_id = None;
        self.messages.clear();
        self.stream = StreamState::default();
    }

    pub async fn delete_conversation(&mut self, id: i64) {
        match self.backend.delete_conversation(id).await {
            Ok(()) => {
                if self.active_id == Some(id) {
                    self.active_id = None;
                    self.messages.clear();
                }
                self.refresh_conversations().await;
            }
            Err(err) => self.notify(Notice::Error(format!("delete failed: {err}"))),
        }
    }

    fn notify(&self, notice: Notice) {
        // The host may have dropped its receiver; notices are best-effort.
        let _ = self.notices.send(notice);
    }
}
