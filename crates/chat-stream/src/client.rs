//! Transport client: one logical stream over either a `GET` push channel or a
//! streamed `POST` response, normalized into [`TransportEvent`]s.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::credentials::CredentialProvider;
use crate::decoder::{Frame, FrameDecoder};
use crate::errors::{ClientError, TransportError};
use crate::event::{StreamEvent, StreamEventKind, event_from_frame};
use crate::request::Channel;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Why a connection ended. Delivered exactly once per connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// A `done` frame arrived and the connection was closed automatically.
    Done,
    /// The server ended the body without sending `done`.
    EndOfStream,
    /// The caller closed the client (or dropped it).
    Cancelled,
    /// A `Failed` event was delivered just before this.
    Failed,
}

/// Items yielded by [`StreamClient::next_event`].
///
/// Sequence per connection: any number of `Event`s, at most one `Failed`,
/// then exactly one `Closed`. Cancellation never produces `Failed`.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Event(StreamEvent),
    Failed(TransportError),
    Closed(CloseReason),
}

/// Handle used to close a client from elsewhere.
#[derive(Clone)]
pub struct CloseHandle {
    tx: watch::Sender<bool>,
}

impl CloseHandle {
    /// Aborts the in-flight request. Safe to call any number of times,
    /// before or after the stream has finished.
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Owns a single logical stream connection.
pub struct StreamClient {
    http: reqwest::Client,
    config: ClientConfig,
    credentials: Arc<dyn CredentialProvider>,
    channel: Channel,
    close: CloseHandle,
    close_rx: Option<watch::Receiver<bool>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
}

impl StreamClient {
    /// Creates a client. Nothing is sent until [`connect`](Self::connect).
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        channel: Channel,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let channel = match channel {
            Channel::Send(mut request) => {
                request.validate()?;
                if request.contact_id.is_none() {
                    request.contact_id = credentials.contact_id();
                }
                Channel::Send(request)
            }
            Channel::Listen => Channel::Listen,
        };

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;

        let (close_tx, close_rx) = watch::channel(false);
        Ok(Self {
            http,
            config,
            credentials,
            channel,
            close: CloseHandle { tx: close_tx },
            close_rx: Some(close_rx),
            events: None,
        })
    }

    /// Opens the stream. Calling it again on a connected client does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        if self.close.is_closed() && self.events.is_none() {
            return Err(ClientError::AlreadyClosed);
        }
        let Some(close_rx) = self.close_rx.take() else {
            return Ok(());
        };

        let has_body = self.channel.has_body();
        let policy = self.config.reconnect_policy(has_body);
        let (tx, rx) = mpsc::channel(self.config.event_buffer_capacity);
        let task = ConnectionTask {
            http: self.http.clone(),
            url: self.config.url.clone(),
            channel: self.channel.clone(),
            credentials: self.credentials.clone(),
            policy,
            decoder: FrameDecoder::new(),
        };
        info!(url = %task.url, has_body, "opening stream");
        tokio::spawn(connection_task(task, tx, close_rx));
        self.events = Some(rx);
        Ok(())
    }

    /// Waits for the next transport event. Returns `None` once the connection
    /// has delivered `Closed`, or if it was never opened.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.as_mut()?.recv().await
    }

    /// See [`CloseHandle::close`].
    pub fn close(&self) {
        self.close.close();
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.events.is_some()
    }
}

async fn connection_task(
    mut task: ConnectionTask,
    tx: mpsc::Sender<TransportEvent>,
    mut close_rx: watch::Receiver<bool>,
) {
    // Dropping the `run` future drops the response body, which aborts the
    // request.
    let reason = tokio::select! {
        biased;
        _ = closed(&mut close_rx) => CloseReason::Cancelled,
        reason = task.run(&tx) => reason,
    };
    info!(url = %task.url, ?reason, "stream closed");
    let _ = tx.send(TransportEvent::Closed(reason)).await;
}

/// Resolves once the client is closed or dropped.
async fn closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

enum AttemptEnd {
    Done,
    EndOfStream,
    ReceiverGone,
}

struct ConnectionTask {
    http: reqwest::Client,
    url: String,
    channel: Channel,
    credentials: Arc<dyn CredentialProvider>,
    policy: ReconnectPolicy,
    decoder: FrameDecoder,
}

impl ConnectionTask {
    async fn run(&mut self, tx: &mpsc::Sender<TransportEvent>) -> CloseReason {
        let mut reconnects = 0_u32;
        loop {
            match self.attempt(tx, reconnects).await {
                Ok(AttemptEnd::Done) => return CloseReason::Done,
                Ok(AttemptEnd::EndOfStream) => return CloseReason::EndOfStream,
                Ok(AttemptEnd::ReceiverGone) => return CloseReason::Cancelled,
                Err(err) if self.policy.allows(reconnects) => {
                    reconnects += 1;
                    let delay = self.retry_delay();
                    warn!(url = %self.url, attempt = reconnects, delay_ms = delay.as_millis() as u64, error = %err, "stream failed, reconnecting");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let err = if reconnects > 0 {
                        TransportError::Exhausted {
                            attempts: reconnects + 1,
                            last: Box::new(err),
                        }
                    } else {
                        err
                    };
                    warn!(url = %self.url, error = %err, "stream failed");
                    let _ = tx.send(TransportEvent::Failed(err)).await;
                    return CloseReason::Failed;
                }
            }
        }
    }

    /// A server `retry:` hint only applies to body-less channels.
    fn retry_delay(&self) -> Duration {
        self.decoder
            .retry()
            .filter(|_| !self.channel.has_body())
            .unwrap_or(self.policy.delay)
    }

    async fn attempt(
        &mut self,
        tx: &mpsc::Sender<TransportEvent>,
        reconnects: u32,
    ) -> Result<AttemptEnd, TransportError> {
        let request = self.build_request().await;
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::connect(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        info!(url = %self.url, attempt = reconnects, status = status.as_u16(), "stream connected");

        self.decoder.reset();
        let mut body: ByteStream = Box::pin(response.bytes_stream());
        loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    for frame in self.decoder.push_chunk(&chunk) {
                        if let Some(end) = self.dispatch(frame, tx).await {
                            return Ok(end);
                        }
                    }
                }
                Some(Err(e)) => return Err(TransportError::read(e.to_string())),
                None => {
                    if let Some(frame) = self.decoder.finish()
                        && let Some(end) = self.dispatch(frame, tx).await
                    {
                        return Ok(end);
                    }
                    return Ok(AttemptEnd::EndOfStream);
                }
            }
        }
    }

    async fn dispatch(
        &self,
        frame: Frame,
        tx: &mpsc::Sender<TransportEvent>,
    ) -> Option<AttemptEnd> {
        let event = event_from_frame(frame.event.as_deref(), &frame.data);
        let kind = event.kind();
        debug!(url = %self.url, %kind, "stream event");
        if tx.send(TransportEvent::Event(event)).await.is_err() {
            return Some(AttemptEnd::ReceiverGone);
        }
        (kind == StreamEventKind::Done).then_some(AttemptEnd::Done)
    }

    async fn build_request(&self) -> reqwest::RequestBuilder {
        let mut request = match &self.channel {
            Channel::Listen => self.http.get(&self.url),
            Channel::Send(body) => self.http.post(&self.url).json(body),
        };
        request = request
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = self.credentials.bearer_token().await {
            request = request.bearer_auth(token);
        }
        if let Some(id) = self.decoder.last_event_id() {
            request = request.header("Last-Event-ID", id);
        }
        request
    }
}
