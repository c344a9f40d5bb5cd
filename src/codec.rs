//! Inbound line framing.
//!
//! Splits the byte stream on `\n` and caps each line at `max_length` bytes.
//! Unlike `LinesCodec`, neither invalid UTF-8 nor an over-long line is a
//! stream error: both come back as frames and reading carries on with the
//! next line.

use bytes::{Buf, BytesMut};
use std::io;
use tokio_util::codec::Decoder;

/// One inbound line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// Line was not valid UTF-8
    Malformed,
    /// Line exceeded the length limit and was discarded up to its newline
    TooLong,
}

#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Where to resume scanning for `\n` in the buffer
    next_index: usize,
    /// Dropping the rest of an over-long line
    discarding: bool,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

fn to_frame(line: &[u8]) -> Frame {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    match std::str::from_utf8(line) {
        Ok(text) => Frame::Line(text.to_string()),
        Err(_) => Frame::Malformed,
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        loop {
            let read_to = buf.len().min(self.max_length.saturating_add(1));
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| offset + self.next_index);

            match (self.discarding, newline) {
                (true, Some(index)) => {
                    buf.advance(index + 1);
                    self.discarding = false;
                    self.next_index = 0;
                    return Ok(Some(Frame::TooLong));
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(index)) => {
                    let line = buf.split_to(index + 1);
                    self.next_index = 0;
                    return Ok(Some(to_frame(&line[..index])));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        // Unterminated last line
        if self.discarding || buf.is_empty() {
            buf.clear();
            return Ok(None);
        }
        let line = buf.split_to(buf.len());
        self.next_index = 0;
        Ok(Some(to_frame(&line)))
    }
}
