// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::Write;

use anyhow::{anyhow, Context};
use logosdap_protocol::ProtocolMessage;

use super::consts;

/// The centralized encoding function that should be used for all
/// outbound DAP traffic. Frames are `Content-Length: N\r\n\r\n`
/// followed by exactly N bytes of UTF-8 JSON.
pub fn encode_to<W>(msg: &ProtocolMessage, w: &mut W) -> anyhow::Result<()>
where
    W: Write,
{
    let body = serde_json::to_vec(msg).context("serializing message body")?;
    write!(w, "Content-Length: {}\r\n\r\n", body.len()).context("writing frame header")?;
    w.write_all(&body).context("writing frame body")?;
    w.flush().context("flushing frame")?;
    Ok(())
}

/// Encode a message into a fresh buffer. Mostly useful for tests and
/// for transports that post-process the bytes before writing.
pub fn encode(msg: &ProtocolMessage) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(consts::BUF_SIZE);
    encode_to(msg, &mut buf)?;
    Ok(buf)
}

/// A stateful decoder for the inbound byte stream.
///
/// Reads arrive in arbitrary chunks: a single read may hold half a
/// header, or three complete frames and the start of a fourth. The
/// decoder accumulates bytes via [`feed`](Self::feed) and hands back
/// complete messages one at a time via
/// [`next_message`](Self::next_message).
///
/// Any decode error is unrecoverable. Once the header block or the
/// body fails to parse there is no way to find the start of the next
/// frame, so the transport must treat an error as fatal and close.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder { buf: Vec::with_capacity(consts::BUF_SIZE) }
    }

    /// Append freshly read bytes to the accumulation buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete message, if the buffer holds one.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Call in a loop
    /// after each feed since one read may complete several frames.
    pub fn next_message(&mut self) -> anyhow::Result<Option<ProtocolMessage>> {
        let Some(header_end) = find_header_end(&self.buf) else {
            if self.buf.len() > consts::MAX_HEADER_BYTES {
                return Err(anyhow!(
                    "no header terminator within {} bytes",
                    consts::MAX_HEADER_BYTES
                ));
            }
            return Ok(None);
        };

        let header = std::str::from_utf8(&self.buf[..header_end])
            .context("frame header is not utf-8")?;
        let body_len = parse_content_length(header)?;
        if body_len > consts::MAX_FRAME_BYTES {
            return Err(anyhow!(
                "frame of size {} exceeds size limit of {} bytes",
                body_len,
                consts::MAX_FRAME_BYTES
            ));
        }

        let body_start = header_end + 4;
        if self.buf.len() < body_start + body_len {
            return Ok(None);
        }

        let msg = serde_json::from_slice(&self.buf[body_start..body_start + body_len])
            .context("parsing frame body")?;
        self.buf.drain(..body_start + body_len);
        Ok(Some(msg))
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Pull `Content-Length` out of a header block. Header names are
/// case-insensitive and unknown headers are skipped.
fn parse_content_length(header: &str) -> anyhow::Result<usize> {
    for line in header.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            return Err(anyhow!("malformed header line: '{line}'"));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            return value
                .trim()
                .parse::<usize>()
                .with_context(|| format!("bad Content-Length value: '{}'", value.trim()));
        }
    }
    Err(anyhow!("missing Content-Length header"))
}

#[cfg(test)]
mod test {
    use logosdap_protocol::{Event, Payload, Request};

    use super::*;

    fn event(seq: i64, name: &str) -> ProtocolMessage {
        ProtocolMessage {
            seq,
            payload: Payload::Event(Event { event: String::from(name), body: None }),
        }
    }

    #[test]
    fn round_trip() {
        let cases = vec![
            event(1, "initialized"),
            ProtocolMessage {
                seq: 2,
                payload: Payload::Request(Request {
                    command: String::from("evaluate"),
                    arguments: Some(serde_json::json!({"expression": "x + 1"})),
                }),
            },
        ];

        for msg in cases {
            let bytes = encode(&msg).expect("encode to succeed");
            let mut decoder = FrameDecoder::new();
            decoder.feed(&bytes);
            let decoded =
                decoder.next_message().expect("decode to succeed").expect("a full frame");
            assert_eq!(msg, decoded);
            assert!(decoder.next_message().expect("decode to succeed").is_none());
        }
    }

    #[test]
    fn encode_of_decode_is_identity() {
        // a frame in the exact shape we emit round-trips byte for byte
        let bytes = encode(&event(7, "stopped")).expect("encode to succeed");
        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);
        let msg = decoder.next_message().expect("decode to succeed").expect("a full frame");
        assert_eq!(bytes, encode(&msg).expect("encode to succeed"));
    }

    #[test]
    fn multiple_frames_per_feed() {
        let mut bytes = encode(&event(1, "initialized")).expect("encode to succeed");
        bytes.extend(encode(&event(2, "stopped")).expect("encode to succeed"));
        bytes.extend(encode(&event(3, "continued")).expect("encode to succeed"));

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);
        for want_seq in 1..=3 {
            let msg = decoder.next_message().expect("decode to succeed").expect("a full frame");
            assert_eq!(msg.seq, want_seq);
        }
        assert!(decoder.next_message().expect("decode to succeed").is_none());
    }

    #[test]
    fn partial_reads() {
        let bytes = encode(&event(9, "terminated")).expect("encode to succeed");

        // byte at a time is the worst possible fragmentation
        let mut decoder = FrameDecoder::new();
        for (i, b) in bytes.iter().enumerate() {
            decoder.feed(std::slice::from_ref(b));
            let msg = decoder.next_message().expect("decode to succeed");
            if i < bytes.len() - 1 {
                assert!(msg.is_none(), "frame completed early at byte {i}");
            } else {
                assert_eq!(msg.expect("a full frame").seq, 9);
            }
        }
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let body = r#"{"seq":1,"type":"event","event":"initialized"}"#;
        let mut decoder = FrameDecoder::new();
        decoder.feed(
            format!("content-LENGTH: {}\r\nUser-Agent: test\r\n\r\n{}", body.len(), body)
                .as_bytes(),
        );
        let msg = decoder.next_message().expect("decode to succeed").expect("a full frame");
        assert_eq!(msg.seq, 1);
    }

    #[test]
    fn decode_errors() {
        let cases: Vec<(&str, &str)> = vec![
            ("Content-Length: nope\r\n\r\n{}", "bad Content-Length"),
            ("Content-Length: -3\r\n\r\n{}", "bad Content-Length"),
            ("X-Whatever: 12\r\n\r\n{}", "missing Content-Length"),
            ("garbage without colon\r\n\r\n{}", "malformed header line"),
            ("Content-Length: 9\r\n\r\nnot json!", "parsing frame body"),
        ];

        for (input, err_substr) in cases {
            let mut decoder = FrameDecoder::new();
            decoder.feed(input.as_bytes());
            let err = decoder.next_message().expect_err("decode to fail");
            let errstr = format!("{err:?}");
            assert!(
                errstr.contains(err_substr),
                "expected '{err_substr}' in '{errstr}' for input '{input}'"
            );
        }
    }

    #[test]
    fn oversize_header_is_an_error() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&vec![b'x'; consts::MAX_HEADER_BYTES + 1]);
        let err = decoder.next_message().expect_err("decode to fail");
        assert!(format!("{err:?}").contains("no header terminator"));
    }

    #[test]
    fn oversize_body_is_an_error() {
        let mut decoder = FrameDecoder::new();
        decoder
            .feed(format!("Content-Length: {}\r\n\r\n", consts::MAX_FRAME_BYTES + 1).as_bytes());
        let err = decoder.next_message().expect_err("decode to fail");
        assert!(format!("{err:?}").contains("exceeds size limit"));
    }
}
