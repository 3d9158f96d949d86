//! Common imports for typical usage.
pub use crate::{
    ChatRequest, ClientConfig, ClientError, CloseHandle, CodeBlock, ContentParser,
    CredentialProvider, MessageStatus, NoopObserver, OrchestratorConfig, PacerConfig,
    StaticCredentials, StreamClient, StreamEvent, StreamObserver, StreamOrchestrator,
    StreamingMessage, TransportEvent,
};
