//! Length-prefixed framing for the client stream
//!
//! Format: `[u32 little-endian length][payload]`, payload at most
//! [`MAX_MESSAGE_SIZE`] bytes. Reader and writer each keep one buffer for the
//! lifetime of the connection.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::game::constants::net::MAX_MESSAGE_SIZE;

const HEADER_LEN: usize = 4;

/// Errors that can occur during message framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn closed_on_eof(e: io::Error) -> FramingError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FramingError::ConnectionClosed
    } else {
        FramingError::Io(e)
    }
}

/// Reads frames from one inbound stream
pub struct FrameReader<R> {
    stream: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            buf: Vec::with_capacity(1024),
        }
    }

    /// Read the next frame. The slice is valid until the next call.
    pub async fn next_frame(&mut self) -> Result<&[u8], FramingError> {
        let mut header = [0u8; HEADER_LEN];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(closed_on_eof)?;

        let len = u32::from_le_bytes(header) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(FramingError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
        }

        self.buf.resize(len, 0);
        self.stream
            .read_exact(&mut self.buf)
            .await
            .map_err(closed_on_eof)?;
        Ok(&self.buf)
    }
}

/// Writes frames to one outbound stream, header and payload in a single write
pub struct FrameWriter<W> {
    stream: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(stream: W) -> Self {
        Self {
            stream,
            buf: Vec::with_capacity(1024),
        }
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<(), FramingError> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(FramingError::MessageTooLarge(payload.len(), MAX_MESSAGE_SIZE));
        }

        self.buf.clear();
        self.buf
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(payload);
        self.stream.write_all(&self.buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn framed(payloads: &[&[u8]]) -> Vec<u8> {
        let mut writer = FrameWriter::new(Vec::new());
        for payload in payloads {
            writer.send(payload).await.unwrap();
        }
        writer.into_inner()
    }

    #[tokio::test]
    async fn test_header_is_little_endian_length() {
        let bytes = framed(&[b"abc"]).await;
        assert_eq!(bytes, vec![3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_reader_reuses_buffer_across_frames() {
        let bytes = framed(&[
            br#"{"event":"joinGame","data":{"pseudo":"Alice"}}"#,
            b"",
            br#"{"event":"playerReady"}"#,
        ])
        .await;
        let mut reader = FrameReader::new(Cursor::new(bytes));

        assert_eq!(
            reader.next_frame().await.unwrap(),
            br#"{"event":"joinGame","data":{"pseudo":"Alice"}}"#
        );
        assert!(reader.next_frame().await.unwrap().is_empty());
        assert_eq!(reader.next_frame().await.unwrap(), br#"{"event":"playerReady"}"#);
        assert!(matches!(
            reader.next_frame().await,
            Err(FramingError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_payload_not_written() {
        let mut writer = FrameWriter::new(Vec::new());
        let result = writer.send(&vec![0u8; MAX_MESSAGE_SIZE + 1]).await;

        assert!(matches!(result, Err(FramingError::MessageTooLarge(_, _))));
        assert!(writer.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let header = ((MAX_MESSAGE_SIZE + 1) as u32).to_le_bytes().to_vec();
        let mut reader = FrameReader::new(Cursor::new(header));

        assert!(matches!(
            reader.next_frame().await,
            Err(FramingError::MessageTooLarge(_, _))
        ));
    }

    #[tokio::test]
    async fn test_truncated_frames_read_as_closed() {
        let mut reader = FrameReader::new(Cursor::new(vec![0u8; 2]));
        assert!(matches!(
            reader.next_frame().await,
            Err(FramingError::ConnectionClosed)
        ));

        let mut partial = 10u32.to_le_bytes().to_vec();
        partial.extend_from_slice(&[1, 2, 3]);
        let mut reader = FrameReader::new(Cursor::new(partial));
        assert!(matches!(
            reader.next_frame().await,
            Err(FramingError::ConnectionClosed)
        ));
    }
}
