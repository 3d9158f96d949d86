//! Binds the transport client, content parser and display pacer into a single
//! message-shaped view, and correlates tool calls with their results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{CloseReason, StreamClient, TransportEvent};
use crate::config::ClientConfig;
use crate::credentials::CredentialProvider;
use crate::errors::{ClientError, TransportError};
use crate::event::{EventPayload, StreamEvent, ToolCall, ToolResult};
use crate::pacer::{DisplayPacer, PacerConfig, Reveal};
use crate::parser::ContentParser;
use crate::request::{Channel, ChatRequest};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Idle,
    Streaming,
    Complete,
    Failed,
    /// Stopped by the caller. Not a failure.
    Cancelled,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// A tool invocation and, once correlated, its outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    /// Gateway-supplied id, or a generated one when the call had none.
    pub id: String,
    pub name: String,
    pub status: ToolStatus,
    pub input: Value,
    pub output: Value,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ToolExecution {
    fn started(call: ToolCall) -> Self {
        Self {
            id: call.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: call.name.unwrap_or_default(),
            status: ToolStatus::Executing,
            input: call.input,
            output: Value::Null,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn finish(&mut self, result: ToolResult) {
        self.status = if result.error.is_some() {
            ToolStatus::Failed
        } else {
            ToolStatus::Completed
        };
        self.output = result.result;
        self.error = result.error;
        self.completed_at = Some(Utc::now());
    }
}

/// The externally visible message. Never mutated in place: every update
/// publishes a new `Arc`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamingMessage {
    pub id: uuid::Uuid,
    pub role: MessageRole,
    pub content: String,
    pub is_streaming: bool,
    pub status: MessageStatus,
    pub phase: Option<String>,
    pub tools: Vec<ToolExecution>,
    pub error: Option<String>,
}

impl StreamingMessage {
    fn idle(role: MessageRole) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            role,
            content: String::new(),
            is_streaming: false,
            status: MessageStatus::Idle,
            phase: None,
            tools: Vec::new(),
            error: None,
        }
    }
}

/// Hooks invoked by the orchestrator. All methods default to no-ops.
pub trait StreamObserver: Send {
    /// Any change to the message snapshot.
    fn on_update(&mut self, _message: &Arc<StreamingMessage>) {}
    /// A tool execution was created or transitioned.
    fn on_tool_update(&mut self, _tool: &ToolExecution) {}
    /// Paced text became visible. `displayed` is everything shown so far.
    fn on_display(&mut self, _chunk: &str, _displayed: &str) {}
    fn on_complete(&mut self, _message: &Arc<StreamingMessage>) {}
    fn on_error(&mut self, _message: &Arc<StreamingMessage>, _error: &str) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl StreamObserver for NoopObserver {}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub role: MessageRole,
    /// Feed tokens through the content parser.
    pub structured: bool,
    /// `None` shows text as soon as it arrives.
    pub pacing: Option<PacerConfig>,
    /// Model used when a request does not name one.
    pub model_override: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            role: MessageRole::Assistant,
            structured: true,
            pacing: Some(PacerConfig::default()),
            model_override: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn structured(mut self, structured: bool) -> Self {
        self.structured = structured;
        self
    }

    pub fn pacing(mut self, pacing: Option<PacerConfig>) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn model_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }
}

/// Drives one in-flight message at a time: `Idle -> Streaming -> terminal`.
pub struct StreamOrchestrator {
    client_config: ClientConfig,
    credentials: Arc<dyn CredentialProvider>,
    config: OrchestratorConfig,
    observer: Box<dyn StreamObserver>,
    message: Arc<StreamingMessage>,
    parser: ContentParser,
    pacer: Option<DisplayPacer>,
    client: Option<StreamClient>,
}

impl StreamOrchestrator {
    pub fn new(
        client_config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        config: OrchestratorConfig,
        observer: Box<dyn StreamObserver>,
    ) -> Result<Self, ClientError> {
        client_config.validate()?;
        let pacer = config.pacing.clone().map(DisplayPacer::new).transpose()?;
        Ok(Self {
            client_config,
            credentials,
            message: Arc::new(StreamingMessage::idle(config.role)),
            config,
            observer,
            parser: ContentParser::new(),
            pacer,
            client: None,
        })
    }

    /// Opens a stream for `request` and starts a new message.
    ///
    /// Fails with [`ClientError::Busy`] while a message is still streaming;
    /// concurrent messages need their own orchestrator.
    pub fn send(&mut self, mut request: ChatRequest) -> Result<(), ClientError> {
        if self.message.status == MessageStatus::Streaming {
            return Err(ClientError::Busy);
        }
        if request.model.is_none() {
            request.model = self.config.model_override.clone();
        }
        let mut client = StreamClient::new(
            self.client_config.clone(),
            self.credentials.clone(),
            Channel::Send(request),
        )?;
        client.connect()?;
        self.begin();
        info!(message_id = %self.message.id, "message streaming");
        self.client = Some(client);
        Ok(())
    }

    /// Starts a fresh message without opening a connection, for callers that
    /// feed events through [`handle_event`](Self::handle_event) themselves.
    ///
    /// Any attached stream is closed first, a message still streaming is
    /// cancelled, and text not yet revealed is flushed to the observer.
    pub fn begin(&mut self) {
        self.stop();
        self.parser.reset();
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.reset();
        }
        let mut message = StreamingMessage::idle(self.config.role);
        message.status = MessageStatus::Streaming;
        message.is_streaming = true;
        self.message = Arc::new(message);
        self.observer.on_update(&self.message);
    }

    /// Runs until the stream has closed and all text has been revealed.
    pub async fn run(&mut self) -> Arc<StreamingMessage> {
        while self.step().await {}
        self.message()
    }

    /// Handles one transport event or one pacing tick. Returns `false` when
    /// there is nothing left to wait for.
    pub async fn step(&mut self) -> bool {
        let listening = self.client.is_some();
        let typing = self.pacer.as_ref().is_some_and(DisplayPacer::is_typing);
        if !listening && !typing {
            return false;
        }
        tokio::select! {
            event = next_transport(&mut self.client), if listening => match event {
                Some(event) => self.handle_transport(event),
                None => self.client = None,
            },
            reveal = next_reveal(&mut self.pacer), if typing => {
                if let Some(reveal) = reveal {
                    self.publish_reveal(reveal);
                }
            }
        }
        true
    }

    /// Applies a transport-level event.
    pub fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Event(event) => self.handle_event(event),
            TransportEvent::Failed(err) => {
                warn!(message_id = %self.message.id, error = %err, "transport failed");
                self.fail(describe_failure(&err));
            }
            TransportEvent::Closed(reason) => {
                self.client = None;
                match reason {
                    CloseReason::EndOfStream => {
                        self.fail("The response ended before it was complete.".to_string())
                    }
                    CloseReason::Cancelled => self.cancel(),
                    CloseReason::Done | CloseReason::Failed => {}
                }
            }
        }
    }

    /// Applies one stream event. Ignored once the message is terminal.
    pub fn handle_event(&mut self, event: StreamEvent) {
        if self.message.status != MessageStatus::Streaming {
            debug!(message_id = %self.message.id, kind = %event.kind(), status = ?self.message.status, "ignoring event");
            return;
        }
        match event.payload {
            EventPayload::PhaseStart { phase } => {
                debug!(message_id = %self.message.id, %phase, "phase start");
                self.update(|m| m.phase = Some(phase));
            }
            EventPayload::Token { content } => self.append_token(content),
            EventPayload::ToolCall(call) => {
                let tool = ToolExecution::started(call);
                debug!(message_id = %self.message.id, tool_id = %tool.id, tool = %tool.name, "tool call");
                self.observer.on_tool_update(&tool);
                self.update(|m| m.tools.push(tool));
            }
            EventPayload::ToolResult(result) => self.apply_tool_result(result),
            EventPayload::Done { .. } => self.complete(),
            EventPayload::Error { message } => self.fail(message),
        }
    }

    /// Caller-initiated stop: aborts the connection, shows everything
    /// received so far and freezes the message as cancelled.
    pub fn stop(&mut self) {
        self.release_client();
        self.cancel();
        self.skip_display();
    }

    /// Reveals all pending text immediately.
    pub fn skip_display(&mut self) {
        if let Some(reveal) = self.pacer.as_mut().and_then(DisplayPacer::skip) {
            self.publish_reveal(reveal);
        }
    }

    /// Current snapshot.
    pub fn message(&self) -> Arc<StreamingMessage> {
        self.message.clone()
    }

    pub fn status(&self) -> MessageStatus {
        self.message.status
    }

    /// Text revealed so far.
    pub fn displayed(&self) -> &str {
        match &self.pacer {
            Some(pacer) => pacer.displayed(),
            None => &self.message.content,
        }
    }

    pub fn parser(&self) -> &ContentParser {
        &self.parser
    }

    fn append_token(&mut self, content: String) {
        if content.is_empty() {
            return;
        }
        if self.config.structured {
            self.parser.add_token(&content);
        }
        match self.pacer.as_mut() {
            Some(pacer) => pacer.add_tokens(&content),
            None => {
                let displayed = format!("{}{}", self.message.content, content);
                self.observer.on_display(&content, &displayed);
            }
        }
        self.update(|m| m.content.push_str(&content));
    }

    fn apply_tool_result(&mut self, result: ToolResult) {
        let Some(index) = correlate(&self.message.tools, &result) else {
            warn!(message_id = %self.message.id, id = ?result.id, tool = ?result.name, "tool result without matching call");
            return;
        };
        let mut tool = self.message.tools[index].clone();
        tool.finish(result);
        debug!(message_id = %self.message.id, tool_id = %tool.id, status = ?tool.status, "tool result");
        self.observer.on_tool_update(&tool);
        self.update(|m| m.tools[index] = tool);
    }

    fn release_client(&mut self) {
        if let Some(client) = self.client.take() {
            client.close();
        }
    }

    fn complete(&mut self) {
        self.release_client();
        self.parser.finish();
        self.update(|m| {
            m.status = MessageStatus::Complete;
            m.is_streaming = false;
        });
        info!(message_id = %self.message.id, len = self.message.content.len(), tools = self.message.tools.len(), "message complete");
        self.observer.on_complete(&self.message);
    }

    fn fail(&mut self, error: String) {
        if self.message.status.is_terminal() {
            return;
        }
        self.release_client();
        self.parser.finish();
        self.update(|m| {
            m.status = MessageStatus::Failed;
            m.is_streaming = false;
            m.error = Some(error.clone());
        });
        warn!(message_id = %self.message.id, %error, "message failed");
        self.observer.on_error(&self.message, &error);
        self.skip_display();
    }

    fn cancel(&mut self) {
        if self.message.status != MessageStatus::Streaming {
            return;
        }
        self.parser.finish();
        self.update(|m| {
            m.status = MessageStatus::Cancelled;
            m.is_streaming = false;
        });
        info!(message_id = %self.message.id, "message cancelled");
    }

    fn update(&mut self, apply: impl FnOnce(&mut StreamingMessage)) {
        let mut next = StreamingMessage::clone(&self.message);
        apply(&mut next);
        self.message = Arc::new(next);
        self.observer.on_update(&self.message);
    }

    fn publish_reveal(&mut self, reveal: Reveal) {
        let displayed = self.displayed().to_string();
        self.observer.on_display(&reveal.chunk, &displayed);
    }
}

async fn next_transport(client: &mut Option<StreamClient>) -> Option<TransportEvent> {
    client.as_mut()?.next_event().await
}

async fn next_reveal(pacer: &mut Option<DisplayPacer>) -> Option<Reveal> {
    pacer.as_mut()?.tick().await
}

/// Finds the execution a result belongs to.
///
/// An id match wins; a matched call that already finished swallows the
/// result. Without an id match, the oldest still-executing call with the same
/// name is used. That fallback is a heuristic: with several concurrent calls
/// of one tool it can pair a result with the wrong call.
fn correlate(tools: &[ToolExecution], result: &ToolResult) -> Option<usize> {
    if let Some(id) = result.id.as_deref()
        && let Some(index) = tools.iter().position(|t| t.id == id)
    {
        return (tools[index].status == ToolStatus::Executing).then_some(index);
    }
    let name = result.name.as_deref().filter(|n| !n.is_empty())?;
    tools
        .iter()
        .position(|t| t.status == ToolStatus::Executing && t.name == name)
}

fn describe_failure(err: &TransportError) -> String {
    match err.status_code() {
        Some(401 | 403) => "You are not authorized to use the assistant.".to_string(),
        Some(429) => "The assistant is busy right now. Please try again.".to_string(),
        _ => "Connection to the assistant was lost. Please try again.".to_string(),
    }
}
