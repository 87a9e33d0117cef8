//! Server-Sent Events framing.
//!
//! ```text
//! id: <optional id>\n
//! data: <json>\n
//! \n
//! ```
//!
//! Events without an id carry no `id:` line at all. Heartbeats are the
//! comment frame [`HEARTBEAT`]. Every frame is built as one contiguous buffer,
//! so a heartbeat can never land between the lines of another event.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::envelope::{self, Envelope};
use crate::errors::ErrorBody;

/// Heartbeat comment frame.
pub const HEARTBEAT: &[u8] = b": heartbeat\n\n";

/// `Content-Type` of an SSE response.
pub const CONTENT_TYPE: &str = "text/event-stream";

/// Request header carrying the client's resumption hint.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Heartbeat frame as shared bytes.
pub fn heartbeat() -> Bytes {
    Bytes::from_static(HEARTBEAT)
}

/// Frame a single event around already-encoded `data`.
///
/// Carriage returns and newlines in `id` are dropped because they would
/// terminate the field early. An id that is empty after that counts as no id:
/// an empty `id:` line would reset the client's last event id. `data` must not
/// contain raw newlines; compact `serde_json` output never does.
pub fn frame(id: Option<&str>, data: &[u8]) -> Bytes {
    let id = id.filter(|i| i.chars().any(|c| c != '\r' && c != '\n'));
    let id_len = id.map_or(0, |i| i.len() + 5);
    let mut buf = BytesMut::with_capacity(id_len + data.len() + 8);
    if let Some(id) = id {
        buf.put_slice(b"id: ");
        for chunk in id.split(['\r', '\n']) {
            buf.put_slice(chunk.as_bytes());
        }
        buf.put_u8(b'\n');
    }
    buf.put_slice(b"data: ");
    buf.put_slice(data);
    buf.put_slice(b"\n\n");
    buf.freeze()
}

/// Encode a `{"result": value}` event.
pub fn result_frame<T: Serialize + ?Sized>(id: Option<&str>, value: &T) -> Result<Bytes, serde_json::Error> {
    let data = Envelope::Result(value).to_vec()?;
    Ok(frame(id, &data))
}

/// Encode a `{"result": ...}` event around a pre-serialized JSON snapshot.
pub fn raw_result_frame(id: Option<&str>, json: &[u8]) -> Bytes {
    frame(id, &envelope::raw_result(json))
}

/// Encode a terminal `{"error": body}` event.
pub fn error_frame(body: &ErrorBody) -> Bytes {
    frame(None, &envelope::error_bytes(body))
}
