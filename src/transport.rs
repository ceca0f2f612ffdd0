//! Framed byte transport.
//!
//! Every message travels as
//!
//! ```text
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of UTF-8 JSON>
//! ```
//!
//! Other headers (e.g. `Content-Type`) are accepted and ignored. Header names
//! are matched case-insensitively.

use crate::constants::{
    CONTENT_LENGTH_HEADER, DEFAULT_MAX_MESSAGE_SIZE, HEADER_TERMINATOR, MAX_HEADER_LINE_LENGTH,
    READ_BUFFER_CAPACITY,
};
use crate::error::ChannelError;
use crate::protocol::Message;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Type-erased input stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Type-erased output stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Reads framed messages from a byte stream.
pub struct MessageReader<R> {
    reader: BufReader<R>,
    line: String,
    max_message_size: usize,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wrap `reader`, rejecting payloads larger than `max_message_size`.
    pub fn new(reader: R, max_message_size: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_CAPACITY, reader),
            line: String::new(),
            max_message_size,
        }
    }

    /// Read the payload of the next frame.
    ///
    /// Returns [`ChannelError::Closed`] when the stream ends cleanly between
    /// frames. An end of stream inside a frame is an I/O error.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut content_length = None;
        let mut first_line = true;

        loop {
            self.line.clear();
            let read = (&mut self.reader)
                .take(MAX_HEADER_LINE_LENGTH as u64 + 1)
                .read_line(&mut self.line)
                .await?;
            if read > MAX_HEADER_LINE_LENGTH {
                return Err(ChannelError::InvalidHeader(format!(
                    "header line longer than {MAX_HEADER_LINE_LENGTH} bytes"
                )));
            }
            if read == 0 {
                if first_line {
                    return Err(ChannelError::Closed);
                }
                return Err(unexpected_eof("stream ended inside a frame header"));
            }
            first_line = false;

            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ChannelError::InvalidHeader(line.to_string()))?;
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH_HEADER) {
                let value = value.trim();
                let length = value.parse::<usize>().map_err(|_| {
                    ChannelError::InvalidHeader(format!("bad Content-Length value {value:?}"))
                })?;
                content_length = Some(length);
            }
        }

        let size = content_length.ok_or(ChannelError::MissingContentLength)?;
        if size > self.max_message_size {
            return Err(ChannelError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        let mut payload = vec![0; size];
        self.reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => unexpected_eof("stream ended inside a frame body"),
                _ => ChannelError::Io(e),
            })?;
        Ok(payload)
    }

    /// Read and parse the next message.
    ///
    /// A payload that is not a valid message yields a recoverable
    /// [`ChannelError::Parse`]; the stream stays positioned on the next frame.
    pub async fn read_message(&mut self) -> Result<Message, ChannelError> {
        let payload = self.read_frame().await?;
        Ok(Message::deserialize(&payload)?)
    }
}

fn unexpected_eof(msg: &str) -> ChannelError {
    ChannelError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, msg.to_string()))
}

/// Writes framed messages to a byte stream.
pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    /// Wrap `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one frame around `payload` and flush.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        let header = format!(
            "{CONTENT_LENGTH_HEADER}: {}{HEADER_TERMINATOR}",
            payload.len()
        );
        let mut frame = Vec::with_capacity(header.len() + payload.len());
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(payload);

        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Encode and write `message`, returning the payload size.
    pub async fn write_message(&mut self, message: &Message) -> Result<usize, ChannelError> {
        let payload = message.serialize().map_err(ChannelError::Encode)?;
        self.write_frame(&payload).await?;
        Ok(payload.len())
    }

    /// Recover the wrapped stream.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// A bidirectional message channel: one input stream and one output stream.
pub struct Channel {
    reader: MessageReader<BoxedReader>,
    writer: MessageWriter<BoxedWriter>,
}

impl Channel {
    /// Build a channel over arbitrary streams.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: MessageReader::new(Box::new(reader), DEFAULT_MAX_MESSAGE_SIZE),
            writer: MessageWriter::new(Box::new(writer)),
        }
    }

    /// Build a channel over the process's standard input and output.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Change the largest accepted frame payload.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.reader.max_message_size = max_message_size;
        self
    }

    /// Split into the read and write halves.
    pub fn into_parts(self) -> (MessageReader<BoxedReader>, MessageWriter<BoxedWriter>) {
        (self.reader, self.writer)
    }
}
