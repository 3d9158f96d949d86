//! Incremental classifier for an append-only text stream.
//!
//! Characters are consumed exactly once. Parser state survives across
//! [`ContentParser::add_token`] calls, so a fence may be split at any point
//! between tokens.

use serde::{Deserialize, Serialize};

const FENCE_LEN: u8 = 3;
const BACKTICK: char = '`';

/// Parser state. Backtick runs that have not yet reached (or been ruled out
/// as) a fence are counted in the state itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParserState {
    #[default]
    Text,
    FenceOpening {
        ticks: u8,
    },
    InCodeBlock,
    FenceClosing {
        ticks: u8,
    },
}

/// A fenced code block. Immutable once `is_complete` is set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
    pub is_complete: bool,
}

/// Ordered view of the classified stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    Text(String),
    /// Index into [`StreamBuffer::code_blocks`].
    Code(usize),
}

/// What happens to backticks of a run that turned out not to be a fence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FenceAbort {
    /// Emit them as literal text.
    #[default]
    Replay,
    /// Drop them from the text segments (they stay in `content`).
    Discard,
}

/// Accumulated parser state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBuffer {
    /// Raw fragments in arrival order.
    pub tokens: Vec<String>,
    /// Concatenation of `tokens`.
    pub content: String,
    /// Completed blocks, oldest first.
    pub code_blocks: Vec<CodeBlock>,
    pub state: ParserState,
}

#[derive(Debug, Default)]
pub struct ContentParser {
    buffer: StreamBuffer,
    current: Option<CodeBlock>,
    in_language: bool,
    segments: Vec<Segment>,
    fence_abort: FenceAbort,
}

impl ContentParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fence_abort(fence_abort: FenceAbort) -> Self {
        Self {
            fence_abort,
            ..Self::default()
        }
    }

    /// Appends a fragment and classifies its characters.
    pub fn add_token(&mut self, token: &str) {
        if token.is_empty() {
            return;
        }
        self.buffer.tokens.push(token.to_string());
        self.buffer.content.push_str(token);
        for ch in token.chars() {
            self.feed(ch);
        }
    }

    /// Flushes backticks still held in a partial run at end-of-stream.
    ///
    /// An open code block stays incomplete and remains available through
    /// [`current_block`](Self::current_block).
    pub fn finish(&mut self) {
        match self.buffer.state {
            ParserState::FenceOpening { ticks } => {
                self.abort_opening(ticks);
                self.buffer.state = ParserState::Text;
            }
            ParserState::FenceClosing { ticks } => {
                self.flush_ticks_into_block(ticks);
                self.buffer.state = ParserState::InCodeBlock;
            }
            ParserState::Text | ParserState::InCodeBlock => {}
        }
    }

    pub fn reset(&mut self) {
        let fence_abort = self.fence_abort;
        *self = Self::with_fence_abort(fence_abort);
    }

    pub fn content(&self) -> &str {
        &self.buffer.content
    }

    pub fn tokens(&self) -> &[String] {
        &self.buffer.tokens
    }

    pub fn code_blocks(&self) -> &[CodeBlock] {
        &self.buffer.code_blocks
    }

    /// The block currently being filled, if a fence is open.
    pub fn current_block(&self) -> Option<&CodeBlock> {
        self.current.as_ref()
    }

    pub fn state(&self) -> ParserState {
        self.buffer.state
    }

    /// Text and completed code in stream order. An open block is not listed;
    /// it logically follows the last segment.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn buffer(&self) -> &StreamBuffer {
        &self.buffer
    }

    fn feed(&mut self, ch: char) {
        match self.buffer.state {
            ParserState::Text => self.on_text(ch),
            ParserState::FenceOpening { ticks } => self.on_fence_opening(ticks, ch),
            ParserState::InCodeBlock => self.on_code(ch),
            ParserState::FenceClosing { ticks } => self.on_fence_closing(ticks, ch),
        }
    }

    fn on_text(&mut self, ch: char) {
        if ch == BACKTICK {
            self.buffer.state = ParserState::FenceOpening { ticks: 1 };
        } else {
            self.push_text(ch);
        }
    }

    fn on_fence_opening(&mut self, ticks: u8, ch: char) {
        if ch == BACKTICK {
            let ticks = ticks + 1;
            if ticks == FENCE_LEN {
                self.current = Some(CodeBlock::default());
                self.in_language = true;
                self.buffer.state = ParserState::InCodeBlock;
            } else {
                self.buffer.state = ParserState::FenceOpening { ticks };
            }
            return;
        }
        self.abort_opening(ticks);
        self.push_text(ch);
        self.buffer.state = ParserState::Text;
    }

    fn on_code(&mut self, ch: char) {
        if ch == BACKTICK {
            self.buffer.state = ParserState::FenceClosing { ticks: 1 };
        } else {
            self.push_block_char(ch);
        }
    }

    fn on_fence_closing(&mut self, ticks: u8, ch: char) {
        if ch == BACKTICK {
            let ticks = ticks + 1;
            if ticks == FENCE_LEN {
                self.complete_block();
                self.buffer.state = ParserState::Text;
            } else {
                self.buffer.state = ParserState::FenceClosing { ticks };
            }
            return;
        }
        self.flush_ticks_into_block(ticks);
        self.push_block_char(ch);
        self.buffer.state = ParserState::InCodeBlock;
    }

    fn abort_opening(&mut self, ticks: u8) {
        if self.fence_abort == FenceAbort::Replay {
            for _ in 0..ticks {
                self.push_text(BACKTICK);
            }
        }
    }

    fn flush_ticks_into_block(&mut self, ticks: u8) {
        for _ in 0..ticks {
            self.push_block_char(BACKTICK);
        }
    }

    fn push_text(&mut self, ch: char) {
        match self.segments.last_mut() {
            Some(Segment::Text(text)) => text.push(ch),
            _ => self.segments.push(Segment::Text(ch.to_string())),
        }
    }

    /// The first newline after the opening fence ends the language tag.
    fn push_block_char(&mut self, ch: char) {
        let Some(block) = self.current.as_mut() else {
            return;
        };
        if !self.in_language {
            block.code.push(ch);
        } else if ch == '\n' {
            self.in_language = false;
            let trimmed = block.language.trim();
            if trimmed.len() != block.language.len() {
                block.language = trimmed.to_string();
            }
        } else {
            block.language.push(ch);
        }
    }

    fn complete_block(&mut self) {
        let Some(mut block) = self.current.take() else {
            return;
        };
        if self.in_language {
            block.language = block.language.trim().to_string();
            self.in_language = false;
        }
        block.is_complete = true;
        tracing::trace!(language = %block.language, len = block.code.len(), "code block complete");
        self.buffer.code_blocks.push(block);
        self.segments
            .push(Segment::Code(self.buffer.code_blocks.len() - 1));
    }
}
