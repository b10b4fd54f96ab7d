use crate::protocol::mysql::constants;
use byteorder::{ByteOrder, LittleEndian};

use pin_project::pin_project;
use std::io;
use std::io::prelude::*;
use std::io::IoSlice;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// [PacketWriter] buffers one logical payload via the blocking [`Write`]
/// impl, then frames and sends it on [`end_packet`](Self::end_packet). A
/// payload longer than 16M−1 is split into full-size chunks; a payload whose
/// length is an exact multiple of the maximum (the empty payload included) is
/// terminated by a zero-length chunk.
#[pin_project]
pub struct PacketWriter<W> {
    buf: Vec<u8>,
    seq: u8,
    write_timeout: Option<Duration>,
    #[pin]
    pub inner_writer: W,
}

impl<W> PacketWriter<W> {
    pub fn new(write: W) -> Self {
        Self {
            buf: Vec::new(),
            seq: 0,
            write_timeout: None,
            inner_writer: write,
        }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    fn increase_seq(&mut self) {
        self.seq = self.seq.wrapping_add(1);
    }

    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }

    /// Bounds every physical write; zero disables the deadline.
    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = if timeout.is_zero() {
            None
        } else {
            Some(timeout)
        };
    }
}

impl<W: AsyncWrite> AsyncWrite for PacketWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(self.project().inner_writer, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        AsyncWrite::poll_flush(self.project().inner_writer, cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        AsyncWrite::poll_shutdown(self.project().inner_writer, cx)
    }
}

impl<W> Write for PacketWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len();
        self.buf.extend_from_slice(buf);
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    async fn write_physical(&mut self, header: [u8; 4], chunk: &[u8]) -> io::Result<()> {
        let write_timeout = self.write_timeout;
        let writer = &mut self.inner_writer;
        let fut = async move {
            let written = writer
                .write_vectored(&[IoSlice::new(&header), IoSlice::new(chunk)])
                .await?;
            // if the vectored write is not fully drained, fall back to write_all
            if written != constants::PACKET_HEADER_LEN + chunk.len() {
                let remaining: Vec<u8> = header
                    .iter()
                    .chain(chunk.iter())
                    .skip(written)
                    .cloned()
                    .collect();
                writer.write_all(&remaining).await?;
            }
            Ok(())
        };
        match write_timeout {
            Some(deadline) => tokio::time::timeout(deadline, fut)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "packet write timed out"))?,
            None => fut.await,
        }
    }

    pub async fn end_packet(&mut self) -> io::Result<()> {
        let mut header = [0; constants::PACKET_HEADER_LEN];
        let raw_packet = self.take_buffer();
        let mut chunks: Vec<&[u8]> = raw_packet.chunks(constants::MAX_PAYLOAD_LEN).collect();
        // a zero-length chunk terminates payloads of exactly k * 16M−1 bytes;
        // the empty payload (k = 0) is itself a single zero-length packet
        if raw_packet.len() % constants::MAX_PAYLOAD_LEN == 0 {
            chunks.push(&[]);
        }
        for chunk in chunks {
            LittleEndian::write_u24(&mut header, chunk.len() as u32);
            header[3] = self.seq();
            self.increase_seq();
            self.write_physical(header, chunk).await?;
        }
        Ok(())
    }

    pub async fn flush_all(&mut self) -> io::Result<()> {
        let write_timeout = self.write_timeout;
        let writer = &mut self.inner_writer;
        match write_timeout {
            Some(deadline) => tokio::time::timeout(deadline, writer.flush())
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "packet flush timed out"))?,
            None => writer.flush().await,
        }
    }
}
