//! Line-oriented frame decoder for `text/event-stream` bodies.

use std::time::Duration;

/// One fully received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Value of the `event:` line, if any.
    pub event: Option<String>,
    /// All `data:` lines joined by `\n`.
    pub data: String,
    /// Value of the `id:` line, if any.
    pub id: Option<String>,
    /// Value of a well-formed `retry:` line, if any.
    pub retry: Option<Duration>,
}

#[derive(Default)]
struct FrameBuilder {
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
    retry: Option<Duration>,
}

impl FrameBuilder {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data_lines.is_empty()
    }

    fn take(&mut self) -> Option<Frame> {
        let builder = std::mem::take(self);
        if builder.is_empty() {
            return None;
        }
        Some(Frame {
            event: builder.event,
            data: builder.data_lines.join("\n"),
            id: builder.id,
            retry: builder.retry,
        })
    }
}

/// Reassembles frames from body chunks of arbitrary size.
///
/// Bytes after the last newline are kept and prefixed to the next chunk. The
/// scan position is remembered so no byte is examined twice.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    scanned: usize,
    current: FrameBuilder,
    last_event_id: Option<String>,
    retry: Option<Duration>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every frame it completed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut line_start = 0;
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            // Line bytes are copied out before decoding so a multi-byte
            // character split across chunks is only decoded once whole.
            let line = String::from_utf8_lossy(&self.buf[line_start..end]).into_owned();
            self.scanned = end + 1;
            line_start = self.scanned;
            if let Some(frame) = self.process_line(line.trim_end_matches('\r')) {
                frames.push(frame);
            }
        }
        self.scanned = self.buf.len();
        self.buf.drain(..line_start);
        self.scanned -= line_start;
        frames
    }

    /// Flushes whatever is left at end-of-stream.
    ///
    /// A final frame that was never terminated by a blank line is still
    /// delivered if it carries an event or data line.
    pub fn finish(&mut self) -> Option<Frame> {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            self.scanned = 0;
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(frame) = self.process_line(line.trim_end_matches('\r')) {
                return Some(frame);
            }
        }
        self.current.take()
    }

    /// The most recent `id:` seen, used as `Last-Event-ID` on reconnect.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// The most recent well-formed `retry:` value, including one sent in a
    /// frame that carried nothing else.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    /// Drops any partial frame, keeping the last event id and retry.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.scanned = 0;
        self.current = FrameBuilder::default();
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.current.take();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.current.event = Some(value.to_string()),
            "data" => self.current.data_lines.push(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.current.id = Some(value.to_string());
                    self.last_event_id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.trim().parse::<u64>() {
                    let retry = Duration::from_millis(ms);
                    self.current.retry = Some(retry);
                    self.retry = Some(retry);
                }
            }
            other => tracing::trace!(field = other, "ignoring unknown frame field"),
        }
        None
    }
}
