// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming markdown accumulation (§4.2). Buffers agent-message text
//! chunks under the `seq` of their first chunk and flushes rendered HTML
//! at semantic boundaries, never mid-structure.
//!
//! The mid-structure scanner here is hand-rolled rather than built on a
//! full markdown parser: `SafeFlush` only needs "am I inside an
//! unterminated construct right now", not an AST, so a small incremental
//! scan over the buffer's tail is enough and avoids re-parsing the whole
//! accumulated text on every chunk.

use std::time::Duration;

/// Injected pure function converting accumulated markdown text to HTML
/// (§1 "Markdown→HTML conversion... a pure function the buffer calls").
pub type RenderFn = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Default renderer, used when no renderer is supplied. A real deployment
/// may inject a different one (e.g. to add syntax highlighting); the core
/// only needs *some* concrete implementation to be testable end to end.
pub fn default_render(markdown: &str) -> String {
    let parser = pulldown_cmark::Parser::new(markdown);
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

/// Result of a flush: the `seq` of the first chunk since the last flush,
/// and the rendered HTML of everything accumulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedMessage {
    pub seq: u64,
    pub html: String,
}

pub struct MarkdownBuffer {
    render: RenderFn,
    text: String,
    pending_seq: Option<u64>,
    flush_timeout: Duration,
}

impl MarkdownBuffer {
    pub fn new(flush_timeout: Duration) -> Self {
        Self::with_renderer(flush_timeout, Box::new(default_render))
    }

    pub fn with_renderer(flush_timeout: Duration, render: RenderFn) -> Self {
        Self { render, text: String::new(), pending_seq: None, flush_timeout }
    }

    pub fn flush_timeout(&self) -> Duration {
        self.flush_timeout
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The `seq` fixed by the first `Write` since the last flush, if any
    /// chunk has been written. Lets a caller decide whether the next chunk
    /// is the start of a new message (needs a fresh `seq`) or a
    /// continuation (reuses this one).
    pub fn pending_seq(&self) -> Option<u64> {
        self.pending_seq
    }

    /// Record one chunk. The first `Write` since the last flush fixes
    /// `pending_seq`; later chunks reuse it (§4.2 "Sequence-preservation
    /// rule").
    pub fn write(&mut self, seq: u64, chunk: &str) {
        if self.pending_seq.is_none() {
            self.pending_seq = Some(seq);
        }
        self.text.push_str(chunk);
    }

    /// Force-flush regardless of structural position. Used by forced
    /// triggers (`tool_call`, `agent_thought`, prompt completion).
    pub fn flush(&mut self) -> Option<FlushedMessage> {
        if self.text.is_empty() {
            return None;
        }
        let seq = self.pending_seq.take()?;
        let html = (self.render)(&self.text);
        self.text.clear();
        Some(FlushedMessage { seq, html })
    }

    /// Flush only when not mid-structure AND at a semantic boundary (§4.2
    /// flush policy: "a blank line, the end of a paragraph, ... or buffer
    /// reaching a soft cap"). Called after every `Write`; most chunks
    /// arrive mid-sentence and legitimately decline to flush here, waiting
    /// for a boundary, the inactivity timer, or a forced trigger.
    pub fn safe_flush(&mut self) -> Option<FlushedMessage> {
        if self.text.is_empty() || is_mid_structure(&self.text) || !at_boundary(&self.text) {
            return None;
        }
        self.flush()
    }

    /// Flush on the inactivity-timeout trigger (§4.2, §5 "one timer
    /// driving MarkdownBuffer SafeFlush on inactivity"). Still declines
    /// while mid-structure — going quiet mid-table doesn't make a
    /// half-closed table any less broken on the wire — but unlike
    /// `safe_flush` doesn't additionally require a blank line/paragraph
    /// end/soft cap, since "the agent has gone quiet" is itself the
    /// boundary condition here.
    pub fn safe_flush_on_timeout(&mut self) -> Option<FlushedMessage> {
        if self.text.is_empty() || is_mid_structure(&self.text) {
            return None;
        }
        self.flush()
    }

    pub fn close(&mut self) -> Option<FlushedMessage> {
        self.flush()
    }
}

/// Soft cap on accumulated un-flushed text (§4.2 "buffer reaching an
/// implementation-defined soft cap"). Generous enough that ordinary prose
/// flushes at paragraph boundaries well before hitting it; exists only to
/// bound memory and wire-frame size for a pathologically long single
/// paragraph.
const SOFT_CAP_BYTES: usize = 4096;

/// True once `text` has reached a point `safe_flush` (as opposed to the
/// inactivity/forced paths) is allowed to flush at: the end of a line
/// (which covers both a blank line and an ordinary paragraph/block
/// ending, since the agent's chunk boundaries rarely split a line) or the
/// soft cap. A chunk still mid-sentence with no trailing newline — the
/// common case for prose fragments — declines here and waits for the
/// inactivity timer or the next forced trigger.
fn at_boundary(text: &str) -> bool {
    text.ends_with('\n') || text.len() >= SOFT_CAP_BYTES
}

/// True if `text` currently ends inside an unterminated fence, table row,
/// list continuation, or emphasis run.
fn is_mid_structure(text: &str) -> bool {
    mid_fence(text) || mid_table_row(text) || mid_list(text) || mid_emphasis(text)
}

fn mid_fence(text: &str) -> bool {
    let mut open = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            open = !open;
        }
    }
    open
}

fn mid_table_row(text: &str) -> bool {
    match text.lines().last() {
        Some(last) => last.contains('|') && !text.ends_with('\n'),
        None => false,
    }
}

fn mid_list(text: &str) -> bool {
    let last_line = text.lines().last().unwrap_or("");
    let looks_like_item = {
        let t = last_line.trim_start();
        t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ")
            || t.chars().next().is_some_and(|c| c.is_ascii_digit())
    };
    looks_like_item && !text.ends_with("\n\n")
}

fn mid_emphasis(text: &str) -> bool {
    let last_line = text.lines().last().unwrap_or("");
    let stars = last_line.matches('*').count();
    let underscores = last_line.matches('_').count();
    stars % 2 == 1 || underscores % 2 == 1
}

#[cfg(test)]
#[path = "markdown_buffer_tests.rs"]
mod tests;
