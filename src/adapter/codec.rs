//! `Content-Length` framing codec for debug adapter streams.
//!
//! Each message is a header block terminated by `\r\n\r\n` followed by a
//! UTF-8 JSON body of exactly `Content-Length` bytes:
//!
//! ```text
//! Content-Length: 58\r\n
//! \r\n
//! {"seq":1,"type":"request","command":"initialize", ...}
//! ```
//!
//! Use [`DapCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound).

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Maximum body size accepted by the codec: 16 MiB.
///
/// Variable dumps of large containers can be sizeable; anything beyond
/// this is treated as a corrupt stream.
pub const MAX_FRAME_BYTES: usize = 16 * 1_048_576;

/// Maximum header block size before the codec gives up looking for `\r\n\r\n`.
const MAX_HEADER_BYTES: usize = 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Framing codec for bidirectional adapter streams.
///
/// # Decoder
///
/// Buffers until a complete header block and body are available. A missing
/// or unparsable `Content-Length`, an oversized header or an oversized body
/// returns [`AppError::Protocol`]. Unknown headers are ignored.
///
/// # Encoder
///
/// Writes `Content-Length: <n>\r\n\r\n<body>`.
#[derive(Debug, Default)]
pub struct DapCodec {
    /// Body length of a frame whose header has been consumed.
    body_len: Option<usize>,
}

impl DapCodec {
    /// Create a codec with no partially decoded frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for DapCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let len = match self.body_len {
            Some(len) => len,
            None => {
                let Some(end) = find_terminator(src) else {
                    if src.len() > MAX_HEADER_BYTES {
                        return Err(AppError::Protocol(format!(
                            "header block exceeded {MAX_HEADER_BYTES} bytes"
                        )));
                    }
                    return Ok(None);
                };
                let len = parse_content_length(&src[..end])?;
                if len > MAX_FRAME_BYTES {
                    return Err(AppError::Protocol(format!(
                        "frame too large: {len} bytes exceeds {MAX_FRAME_BYTES}"
                    )));
                }
                src.advance(end + HEADER_TERMINATOR.len());
                self.body_len = Some(len);
                len
            }
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        self.body_len = None;
        let body = src.split_to(len);
        String::from_utf8(body.to_vec())
            .map(Some)
            .map_err(|e| AppError::Protocol(format!("frame body is not utf-8: {e}")))
    }
}

impl Encoder<String> for DapCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        let header = format!("Content-Length: {}\r\n\r\n", item.len());
        dst.reserve(header.len() + item.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}

fn find_terminator(src: &[u8]) -> Option<usize> {
    src.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

fn parse_content_length(header: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(header)
        .map_err(|e| AppError::Protocol(format!("header is not utf-8: {e}")))?;

    for line in text.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse::<usize>().map_err(|e| {
                    AppError::Protocol(format!("invalid Content-Length {value:?}: {e}"))
                });
            }
        }
    }

    Err(AppError::Protocol("missing Content-Length header".into()))
}
