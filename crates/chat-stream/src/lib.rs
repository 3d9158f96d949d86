//! Streaming chat client: reads a server-sent event stream from a chat
//! gateway, detects fenced code blocks as tokens arrive, and paces display
//! of the text independently of network arrival.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chat_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let mut orchestrator = StreamOrchestrator::new(
//!     ClientConfig::from_env()?,
//!     Arc::new(StaticCredentials::bearer("token")),
//!     OrchestratorConfig::default(),
//!     Box::new(NoopObserver),
//! )?;
//!
//! orchestrator.send(ChatRequest::new("Show me a Rust hello world"))?;
//! let message = orchestrator.run().await;
//! println!("{:?}: {}", message.status, message.content);
//! for block in orchestrator.parser().code_blocks() {
//!     println!("[{}]\n{}", block.language, block.code);
//! }
//! # Ok(())
//! # }
//! ```

/// Transport client, close handle, and transport-level events.
pub mod client;
/// Client configuration and reconnect policy.
pub mod config;
/// Credential lookup used when opening a stream.
pub mod credentials;
/// Incremental server-sent event frame decoder.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Normalized stream events.
pub mod event;
/// Tracing subscriber setup.
pub mod observability;
/// Message orchestration and tool correlation.
pub mod orchestrator;
/// Display pacing.
pub mod pacer;
/// Incremental code-fence parser.
pub mod parser;
/// Common imports for typical usage.
pub mod prelude;
/// Outbound request body and channel selection.
pub mod request;

pub use client::{CloseHandle, CloseReason, StreamClient, TransportEvent};
pub use config::{ClientConfig, ReconnectPolicy};
pub use credentials::{CredentialProvider, StaticCredentials};
pub use decoder::{Frame, FrameDecoder};
pub use errors::{ClientError, TransportError};
pub use event::{EventPayload, StreamEvent, StreamEventKind, ToolCall, ToolResult};
pub use observability::init_observability;
pub use orchestrator::{
    MessageRole, MessageStatus, NoopObserver, OrchestratorConfig, StreamObserver,
    StreamOrchestrator, StreamingMessage, ToolExecution, ToolStatus,
};
pub use pacer::{DisplayPacer, PacerConfig, Reveal};
pub use parser::{CodeBlock, ContentParser, FenceAbort, ParserState, Segment, StreamBuffer};
pub use request::{AttachmentRef, ChatRequest, Channel};
