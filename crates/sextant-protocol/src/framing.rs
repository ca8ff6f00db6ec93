//! Content-Length framing over an async byte stream.
//!
//! Every message on the wire is a header block followed by a JSON body:
//!
//! ```text
//! Content-Length: 42\r\n
//! \r\n
//! {"callId":1,"payload":{"typehint":"VoidResponse"}}
//! ```
//!
//! Headers other than `Content-Length` are accepted and ignored.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, Result};

/// Upper bound on a single frame body. Larger frames are treated as a corrupt header.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const CONTENT_LENGTH: &str = "content-length";

/// Reads framed message bodies from a buffered async reader.
pub struct FrameReader<R> {
    reader: R,
    frames_read: u64,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    /// Wrap a buffered reader.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            frames_read: 0,
        }
    }

    /// Number of complete frames read so far.
    #[must_use]
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Unwrap the underlying reader. Buffered bytes stay in it.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read the next frame body.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] for a missing or unparsable
    /// `Content-Length`, [`Error::Truncated`] if the stream ends inside a frame,
    /// and [`Error::Io`] for transport failures.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(content_length) = self.read_content_length().await? else {
            return Ok(None);
        };

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Truncated
            } else {
                Error::Io(e)
            }
        })?;

        self.frames_read += 1;
        trace!(body_len = content_length, "Read frame");
        Ok(Some(body))
    }

    async fn read_content_length(&mut self) -> Result<Option<usize>> {
        let mut content_length = None;
        let mut saw_header = false;

        loop {
            let mut line = String::new();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                if saw_header {
                    return Err(Error::Truncated);
                }
                return Ok(None);
            }

            // Empty line signals end of headers
            if line == "\r\n" || line == "\n" {
                if saw_header {
                    break;
                }
                // Stray separator between frames
                continue;
            }
            saw_header = true;

            let Some((name, value)) = line.split_once(':') else {
                return Err(Error::InvalidHeader(format!(
                    "malformed header line: {}",
                    line.trim_end()
                )));
            };

            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let value = value.trim();
                let length: usize = value.parse().map_err(|_| {
                    Error::InvalidHeader(format!("invalid Content-Length: {value}"))
                })?;
                if length > MAX_FRAME_LEN {
                    return Err(Error::InvalidHeader(format!(
                        "Content-Length {length} exceeds limit of {MAX_FRAME_LEN}"
                    )));
                }
                content_length = Some(length);
            }
        }

        content_length
            .map(Some)
            .ok_or_else(|| Error::InvalidHeader("missing Content-Length header".to_string()))
    }
}

/// Writes framed message bodies to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writer.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one frame and flush it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the underlying writer fails.
    pub async fn write_frame(&mut self, body: &[u8]) -> Result<()> {
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        trace!(body_len = body.len(), "Writing frame");

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shut down the write half.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Consume the framer, returning the underlying writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}
