//! Command Line Codec
//!
//! Newline-delimited text on top of `LinesCodec`. Over-long and non-UTF-8
//! lines come out as `Err` items instead of decoder errors, so `Framed`
//! keeps reading the connection after them.

use bytes::BytesMut;
use std::io;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use super::command::ProtocolError;

/// Longest accepted command line in bytes
pub const MAX_LINE_LENGTH: usize = 4096;

#[derive(Debug, Clone)]
pub struct CommandCodec {
    lines: LinesCodec,
}

impl CommandCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }

    fn lift(
        &self,
        decoded: Result<Option<String>, LinesCodecError>,
    ) -> io::Result<Option<Result<String, ProtocolError>>> {
        match decoded {
            Ok(line) => Ok(line.map(Ok)),
            // LinesCodec skips the rest of the line on its own
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Err(
                ProtocolError::LineTooLong(self.lines.max_length()),
            ))),
            // The offending line is already consumed
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Err(ProtocolError::InvalidUtf8)))
            }
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CommandCodec {
    type Item = Result<String, ProtocolError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let decoded = self.lines.decode(src);
        self.lift(decoded)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let decoded = self.lines.decode_eof(src);
        self.lift(decoded)
    }
}

impl Encoder<String> for CommandCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.lines.encode(line, dst).map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            other => io::Error::other(other),
        })
    }
}
