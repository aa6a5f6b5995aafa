//! SSE (Server-Sent Events) framing for streamed completions.
//!
//! Converts a channel of [`StreamEvent`]s into the outward SSE stream. Each
//! event becomes one `data: <json>\n\n` frame in arrival order; a handler
//! level done frame is chained after the sequence regardless of what the
//! adapter emitted. Clients treat the first Done/Error as authoritative and
//! ignore a duplicate trailing done.

use axum::response::sse::Event;
use futures::stream::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::info;

use crate::upstream::client::StreamEvent;

/// Outward frame shape. Matches the browser client's protocol:
/// `{"content": t, "done": false}`, `{"done": true}`,
/// `{"error": m, "done": true}`.
#[derive(Debug, Serialize)]
pub struct StreamFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub done: bool,
}

impl StreamFrame {
    fn done() -> Self {
        Self {
            content: None,
            error: None,
            done: true,
        }
    }
}

impl From<StreamEvent> for StreamFrame {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Content { text } => Self {
                content: Some(text),
                error: None,
                done: false,
            },
            StreamEvent::Done => Self::done(),
            StreamEvent::Error { message } => Self {
                content: None,
                error: Some(message),
                done: true,
            },
        }
    }
}

fn frame_to_sse(frame: &StreamFrame) -> Event {
    let data = serde_json::to_string(frame).unwrap_or_default();
    Event::default().data(data)
}

/// Convert a stream event receiver into an SSE stream, appending the final
/// done frame. Frames are counted as they are sent; the total is logged at
/// the terminal event.
pub fn events_to_sse_stream(
    rx: mpsc::Receiver<StreamEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    let mut frames = 0usize;
    ReceiverStream::new(rx)
        .map(move |event| {
            frames += 1;
            let frame = StreamFrame::from(event);
            if frame.done {
                info!(frames, "Stream finished");
            }
            Ok(frame_to_sse(&frame))
        })
        .chain(tokio_stream::once(Ok(frame_to_sse(&StreamFrame::done()))))
}
