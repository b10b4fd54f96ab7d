use crate::protocol::mysql::packet::{packet, Packet};

use std::io;
use std::io::prelude::*;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

const PACKET_BUFFER_SIZE: usize = 4096;
const PACKET_LARGE_BUFFER_SIZE: usize = 1048576;

/// [PacketReader] buffers a byte stream and deframes it into MySQL
/// [`Packet`]s, tracking the expected sequence number for the stream. A
/// sequence byte that does not match the expected counter is a protocol
/// error: the session is beyond recovery.
pub struct PacketReader<R> {
    bytes: Vec<u8>,
    start: usize,
    remaining: usize,
    seq: u8,
    pub r: R,
}

impl<R> PacketReader<R> {
    pub fn new(r: R) -> Self {
        PacketReader {
            bytes: Vec::new(),
            start: 0,
            remaining: 0,
            seq: 0,
            r,
        }
    }

    pub fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }

    /// Validates the first chunk's sequence byte against the expected counter
    /// and advances the counter past every chunk of the logical packet.
    fn account_seq(&mut self, first_seq: u8, last_seq: u8) -> io::Result<()> {
        if first_seq != self.seq {
            // A later-than-expected sequence usually means the peer pipelined
            // multiple statements; the distinction is informational only.
            let kind = if first_seq > self.seq {
                crate::error::Error::PacketOutOfSyncMultiple
            } else {
                crate::error::Error::PacketOutOfSync
            };
            return Err(io::Error::new(io::ErrorKind::InvalidData, kind.to_string()));
        }
        self.seq = last_seq.wrapping_add(1);
        Ok(())
    }
}

impl<R: Read> PacketReader<R> {
    /// Blocking variant over any `Read`, used by tests against byte cursors.
    pub fn next_read(&mut self) -> io::Result<Option<(u8, Packet)>> {
        self.start = self.bytes.len() - self.remaining;

        loop {
            if self.remaining != 0 {
                let bytes = &self.bytes[self.start..self.start + self.remaining];

                match packet(bytes) {
                    Ok((rest, (first_seq, last_seq, p))) => {
                        let consumed = bytes.len() - rest.len();
                        self.start += consumed;
                        self.remaining = rest.len();
                        self.account_seq(first_seq, last_seq)?;
                        return Ok(Some((last_seq, p)));
                    }
                    Err(nom::Err::Incomplete(_)) | Err(nom::Err::Error(_)) => {}
                    Err(nom::Err::Failure(ctx)) => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("malformed packet: {:?}", ctx.code),
                        ));
                    }
                }
            }

            // we need to read some more
            self.bytes.drain(0..self.start);
            self.start = 0;
            let end = self.bytes.len();
            self.bytes.resize(std::cmp::max(PACKET_BUFFER_SIZE, end * 2), 0);
            let read = {
                let buf = &mut self.bytes[end..];
                self.r.read(buf)?
            };
            self.bytes.truncate(end + read);
            self.remaining = self.bytes.len();

            if read == 0 {
                if self.bytes.is_empty() {
                    return Ok(None);
                } else {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} unhandled bytes", self.bytes.len()),
                    ));
                }
            }
        }
    }
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub async fn next_async(&mut self) -> io::Result<Option<(u8, Packet)>> {
        self.start = self.bytes.len() - self.remaining;

        let mut buffer_size = PACKET_BUFFER_SIZE;
        loop {
            if self.remaining != 0 {
                let bytes = self.bytes[self.start..self.start + self.remaining].to_vec();
                match packet(&bytes) {
                    Ok((rest, (first_seq, last_seq, p))) => {
                        self.remaining = rest.len();
                        if self.remaining > 0 {
                            self.bytes = rest.to_vec();
                        } else {
                            self.bytes.clear();
                        }
                        self.start = 0;
                        self.account_seq(first_seq, last_seq)?;
                        return Ok(Some((last_seq, p)));
                    }
                    Err(nom::Err::Incomplete(_)) | Err(nom::Err::Error(_)) => {}
                    Err(nom::Err::Failure(ctx)) => {
                        self.bytes.truncate(self.remaining);
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("malformed packet: {:?}", ctx.code),
                        ));
                    }
                }
            }

            // we need to read some more
            self.bytes.drain(0..self.start);
            self.start = 0;
            let end = self.remaining;

            if self.bytes.len() - end < buffer_size {
                let new_len = std::cmp::max(buffer_size, end * 2);
                self.bytes.resize(new_len, 0);
            }
            let read = {
                let buf = &mut self.bytes[end..];
                self.r.read(buf).await?
            };
            self.remaining = end + read;
            // use a larger buffer size to reduce bytes resize times.
            buffer_size = PACKET_LARGE_BUFFER_SIZE;
            if read == 0 {
                self.bytes.truncate(self.remaining);
                if self.bytes.is_empty() {
                    return Ok(None);
                } else {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} unhandled bytes", self.bytes.len()),
                    ));
                }
            }
        }
    }
}
