//! # Stream Decoder
//!
//! Turns the raw chunks of an agent response into text fragments.
//!
//! Two wire formats are accepted without negotiation:
//! - event-stream frames, one `data: {json}` per line, payload taken from
//!   `content` or the agent's response field
//! - bare text, passed through verbatim
//!
//! Incomplete lines and partial UTF-8 sequences are held across chunk
//! boundaries, so the fragments produced never depend on where the
//! transport happened to split the body.

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// One decoded piece of an agent reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Text to append to the in-progress message
    Text(String),
    /// The backend reported a failure inside the stream
    Error(String),
}

/// Outcome of inspecting one complete line
enum Frame {
    Text(String),
    Error(String),
    Done,
}

/// Stateful decoder for a single response body
#[derive(Debug)]
pub struct StreamDecoder {
    response_field: String,
    /// Bytes of the current line not yet emitted
    buffer: Vec<u8>,
    /// The current line is already known to be raw text
    raw_line: bool,
    /// Blank lines waiting for the next line to decide the format
    pending_blank: String,
    /// At least one event frame has been decoded
    seen_event: bool,
}

impl StreamDecoder {
    /// Decoder for an agent whose fallback payload key is `response_field`
    pub fn new(response_field: impl Into<String>) -> Self {
        Self {
            response_field: response_field.into(),
            buffer: Vec::new(),
            raw_line: false,
            pending_blank: String::new(),
            seen_event: false,
        }
    }

    /// Whether any event-stream frame has been seen so far
    pub fn is_event_stream(&self) -> bool {
        self.seen_event
    }

    /// Feed one chunk, returning the fragments it completes
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Fragment> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.complete_line(&line, &mut out);
        }

        self.drain_partial(&mut out);
        out
    }

    /// Signal end of stream and flush whatever is buffered
    pub fn finish(&mut self) -> Vec<Fragment> {
        let mut out = Vec::new();
        let rest = std::mem::take(&mut self.buffer);

        if self.raw_line {
            self.raw_line = false;
            push_text(&mut out, String::from_utf8_lossy(&rest).into_owned());
        } else if !rest.is_empty() {
            self.complete_line(&rest, &mut out);
        }

        if !self.seen_event && !self.pending_blank.is_empty() {
            let blank = std::mem::take(&mut self.pending_blank);
            push_text(&mut out, blank);
        }
        self.pending_blank.clear();
        out
    }

    /// Handle a full line (with its terminator, unless it ended the stream)
    fn complete_line(&mut self, bytes: &[u8], out: &mut Vec<Fragment>) {
        let text = String::from_utf8_lossy(bytes).into_owned();

        if self.raw_line {
            self.raw_line = false;
            push_text(out, text);
            return;
        }

        let content = text.trim_end_matches(['\n', '\r']);

        if content.trim().is_empty() {
            if !self.seen_event {
                self.pending_blank.push_str(&text);
            }
            return;
        }

        match self.parse_frame(content) {
            Some(frame) => {
                self.seen_event = true;
                self.pending_blank.clear();
                match frame {
                    Frame::Text(payload) => push_text(out, payload),
                    Frame::Error(message) => out.push(Fragment::Error(message)),
                    Frame::Done => {}
                }
            }
            None => {
                if content.starts_with(DATA_PREFIX) {
                    tracing::debug!(line = %content, "Unparseable event frame, passing through as text");
                }
                self.flush_blank(out);
                push_text(out, text);
            }
        }
    }

    /// Emit the undecided tail of the buffer once it can no longer be a frame
    fn drain_partial(&mut self, out: &mut Vec<Fragment>) {
        if self.buffer.is_empty() {
            return;
        }

        if !self.raw_line {
            let decodable = match std::str::from_utf8(&self.buffer) {
                Ok(s) => s,
                Err(e) => std::str::from_utf8(&self.buffer[..e.valid_up_to()]).unwrap_or(""),
            };
            if could_be_frame_or_blank(decodable) {
                return;
            }
            self.raw_line = true;
            self.flush_blank(out);
        }

        let text = take_decodable(&mut self.buffer);
        push_text(out, text);
    }

    fn flush_blank(&mut self, out: &mut Vec<Fragment>) {
        if !self.pending_blank.is_empty() {
            let blank = std::mem::take(&mut self.pending_blank);
            push_text(out, blank);
        }
    }

    fn parse_frame(&self, line: &str) -> Option<Frame> {
        let payload = line.strip_prefix(DATA_PREFIX)?.trim();
        if payload == DONE_MARKER {
            return Some(Frame::Done);
        }

        let value: serde_json::Value = serde_json::from_str(payload).ok()?;
        let object = value.as_object()?;

        let text_of = |key: &str| {
            object
                .get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        if let Some(text) = text_of("content").or_else(|| text_of(&self.response_field)) {
            return Some(Frame::Text(text));
        }
        if let Some(error) = object.get("error").filter(|v| !v.is_null()) {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Some(Frame::Error(message));
        }
        Some(Frame::Text(String::new()))
    }
}

fn push_text(out: &mut Vec<Fragment>, text: String) {
    if text.is_empty() {
        return;
    }
    if let Some(Fragment::Text(last)) = out.last_mut() {
        last.push_str(&text);
    } else {
        out.push(Fragment::Text(text));
    }
}

/// A partial line that is whitespace, a prefix of `data: `, or starts with it
fn could_be_frame_or_blank(partial: &str) -> bool {
    partial.trim().is_empty() || DATA_PREFIX.starts_with(partial) || partial.starts_with(DATA_PREFIX)
}

/// Remove and decode every complete UTF-8 sequence at the front of `buffer`.
///
/// An incomplete sequence at the end stays buffered; invalid bytes become
/// U+FFFD.
fn take_decodable(buffer: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut consumed = 0;

    loop {
        match std::str::from_utf8(&buffer[consumed..]) {
            Ok(s) => {
                text.push_str(s);
                consumed = buffer.len();
                break;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if let Ok(s) = std::str::from_utf8(&buffer[consumed..consumed + valid]) {
                    text.push_str(s);
                }
                consumed += valid;
                match e.error_len() {
                    Some(n) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        consumed += n;
                    }
                    None => break,
                }
            }
        }
    }

    buffer.drain(..consumed);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(field: &str, chunks: &[&[u8]]) -> Vec<Fragment> {
        let mut decoder = StreamDecoder::new(field);
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(decoder.decode(chunk));
        }
        out.extend(decoder.finish());
        out
    }

    fn text_of(fragments: &[Fragment]) -> String {
        fragments
            .iter()
            .filter_map(|f| match f {
                Fragment::Text(t) => Some(t.as_str()),
                Fragment::Error(_) => None,
            })
            .collect()
    }

    /// Split `body` at every pair of byte positions and check the decoded text
    fn assert_split_invariant(field: &str, body: &str, expected: &str) {
        let bytes = body.as_bytes();
        assert_eq!(text_of(&decode_all(field, &[bytes])), expected);

        for i in 0..=bytes.len() {
            for j in i..=bytes.len() {
                let chunks = [&bytes[..i], &bytes[i..j], &bytes[j..]];
                assert_eq!(
                    text_of(&decode_all(field, &chunks)),
                    expected,
                    "split at {} / {}",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn test_event_frames_content_field() {
        let body = "data: {\"content\":\"你好\"}\n\ndata: {\"content\":\"，世界\"}\n\n";
        let fragments = decode_all("requirement", &[body.as_bytes()]);
        assert_eq!(fragments, vec![Fragment::Text("你好，世界".to_string())]);
    }

    #[test]
    fn test_event_frames_response_field_fallback() {
        let body = "data: {\"architecture\":\"分层\"}\n\ndata: {\"other\":1}\n\n";
        assert_eq!(text_of(&decode_all("architecture", &[body.as_bytes()])), "分层");
    }

    #[test]
    fn test_frame_split_inside_json() {
        let fragments = decode_all(
            "code",
            &[b"data: {\"con", b"tent\":\"x\"}\n", b"\n"],
        );
        assert_eq!(fragments, vec![Fragment::Text("x".to_string())]);
    }

    #[test]
    fn test_event_stream_independent_of_boundaries() {
        let body = "data: {\"content\":\"需求\"}\n\ndata: {\"content\":\"分析 ok\"}\r\n\r\ndata: [DONE]\n\n";
        assert_split_invariant("requirement", body, "需求分析 ok");
    }

    #[test]
    fn test_raw_text_round_trip_with_multibyte() {
        let body = "模块名称：用户管理\n\n1. 接口设计: GET /users\n  缩进行\n末尾没有换行";
        assert_split_invariant("requirement", body, body);
    }

    #[test]
    fn test_raw_text_with_leading_and_trailing_blank_lines() {
        let body = "\n\n正文\n\n\n";
        assert_split_invariant("code", body, body);
    }

    #[test]
    fn test_raw_text_streams_before_newline() {
        let mut decoder = StreamDecoder::new("code");
        let fragments = decoder.decode("def main():".as_bytes());
        assert_eq!(fragments, vec![Fragment::Text("def main():".to_string())]);
    }

    #[test]
    fn test_multibyte_split_is_held() {
        let bytes = "测".as_bytes();
        let mut decoder = StreamDecoder::new("code");
        assert!(decoder.decode(&[b'x', bytes[0]]).iter().all(|f| f == &Fragment::Text("x".into())));
        assert!(decoder.decode(&bytes[1..2]).is_empty());
        assert_eq!(
            decoder.decode(&bytes[2..]),
            vec![Fragment::Text("测".to_string())]
        );
    }

    #[test]
    fn test_unparseable_frame_passes_through() {
        let body = "data: not json\n";
        let fragments = decode_all("code", &[body.as_bytes()]);
        assert_eq!(fragments, vec![Fragment::Text(body.to_string())]);
    }

    #[test]
    fn test_error_frame() {
        let body = "data: {\"content\":\"部分\"}\n\ndata: {\"error\":\"rate limited\"}\n\n";
        let fragments = decode_all("requirement", &[body.as_bytes()]);
        assert_eq!(
            fragments,
            vec![
                Fragment::Text("部分".to_string()),
                Fragment::Error("rate limited".to_string())
            ]
        );
    }

    #[test]
    fn test_trailing_frame_without_newline() {
        let fragments = decode_all("code", &[b"data: {\"content\":\"tail\"}"]);
        assert_eq!(fragments, vec![Fragment::Text("tail".to_string())]);
    }

    #[test]
    fn test_partial_data_prefix_is_held() {
        let mut decoder = StreamDecoder::new("code");
        assert!(decoder.decode(b"dat").is_empty());
        assert!(decoder.decode(b"a: {\"content\":\"y\"").is_empty());
        assert_eq!(decoder.decode(b"}\n"), vec![Fragment::Text("y".to_string())]);
        assert!(decoder.is_event_stream());
    }

    #[test]
    fn test_done_marker_yields_nothing() {
        assert!(decode_all("code", &[b"data: [DONE]\n\n"]).is_empty());
    }

    #[test]
    fn test_empty_stream() {
        assert!(decode_all("code", &[]).is_empty());
    }
}
