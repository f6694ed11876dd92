//! Server-Sent Events formatting, layered on [`crate::streaming::Stream`]
//! (§4.6).

use crate::error::Result;
use crate::streaming::Stream;

/// One SSE event. `id` and `event` are optional per the `text/event-stream`
/// format; `data` is split on `\n` so multi-line payloads get one `data:`
/// line each, per the spec.
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
    pub retry_ms: Option<u64>,
}

impl SseEvent {
    pub fn new(data: impl Into<String>) -> SseEvent {
        SseEvent {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_event(mut self, name: impl Into<String>) -> SseEvent {
        self.event = Some(name.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> SseEvent {
        self.id = Some(id.into());
        self
    }

    fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 32);
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        if let Some(retry) = self.retry_ms {
            out.push_str("retry: ");
            out.push_str(&retry.to_string());
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// A thin wrapper over [`Stream`] that sends the `text/event-stream`
/// headers and formats subsequent writes as SSE events.
pub struct SseStream {
    inner: Stream,
}

impl SseStream {
    /// Sends the `text/event-stream` response head. Must be called before
    /// any `send()`.
    pub fn open(inner: Stream) -> Result<SseStream> {
        inner.headers(
            200,
            "text/event-stream",
            &[("Cache-Control", "no-cache"), ("X-Accel-Buffering", "no")],
        )?;
        Ok(SseStream { inner })
    }

    pub fn send(&self, event: &SseEvent) -> Result<()> {
        self.inner.write(event.encode().as_bytes())
    }

    /// Sends a standalone `retry: <ms>\n\n` directive, overriding the
    /// client's reconnection delay independently of any event.
    pub fn retry(&self, ms: u64) -> Result<()> {
        self.inner.write(format!("retry: {ms}\n\n").as_bytes())
    }

    /// Sends a bare comment line (`: <text>\n\n`), ignored by clients but
    /// useful as a generic keep-alive or debugging breadcrumb.
    pub fn comment(&self, text: &str) -> Result<()> {
        self.inner.write(format!(": {text}\n\n").as_bytes())
    }

    /// Sends a bare keep-alive comment line (`: keep-alive\n\n`), ignored
    /// by clients but useful to defeat idle intermediary timeouts.
    pub fn keep_alive_comment(&self) -> Result<()> {
        self.comment("keep-alive")
    }

    pub fn close(&self) -> Result<()> {
        self.inner.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_minimal_event() {
        let ev = SseEvent::new("hello");
        assert_eq!(ev.encode(), "data: hello\n\n");
    }

    #[test]
    fn encodes_multiline_data_as_separate_lines() {
        let ev = SseEvent::new("line1\nline2").with_event("update").with_id("42");
        let encoded = ev.encode();
        assert_eq!(
            encoded,
            "id: 42\nevent: update\ndata: line1\ndata: line2\n\n"
        );
    }
}
