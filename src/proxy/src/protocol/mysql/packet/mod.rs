pub mod packet_reader;
pub mod packet_writer;
pub mod writers;

use crate::protocol::mysql::constants;
use crate::protocol::mysql::constants::HeaderInfo;
use std::ops::Deref;

/// `Packet` is one logical payload of the MySQL wire protocol. A payload
/// larger than 16M−1 travels as several physical chunks and is reassembled
/// into a single `Packet` on read.
/// [MySQL Packet](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet(Vec<u8>);

impl Packet {
    fn extend(&mut self, bytes: &[u8]) {
        self.0.extend(bytes);
    }

    /// See [MySQL EOF_Packet](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_eof_packet.html)
    pub fn is_eof_packet(&self) -> bool {
        let pkt_len = self.0.len();
        !self.0.is_empty() && self.0[0] == (HeaderInfo::EOFHeader as u8) && pkt_len <= 5
    }

    pub fn is_ok_packet(&self) -> bool {
        !self.0.is_empty() && self.0[0] == (HeaderInfo::OKHeader as u8)
    }

    pub fn is_err_packet(&self) -> bool {
        !self.0.is_empty() && self.0[0] == (HeaderInfo::ErrHeader as u8)
    }

    pub fn is_local_in_file_packet(&self) -> bool {
        !self.0.is_empty() && self.0[0] == (HeaderInfo::LocalInFileHeader as u8)
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Packet {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

#[inline]
pub fn one_packet(i: &[u8]) -> nom::IResult<&[u8], (u8, &[u8])> {
    let (i, length) = nom::number::complete::le_u24(i)?;
    let (i, seq) = nom::bytes::complete::take(1u8)(i)?;
    let (i, bytes) = nom::bytes::complete::take(length)(i)?;
    Ok((i, (seq[0], bytes)))
}

/// Parses one logical packet, reassembling 16M−1 continuation chunks.
/// Returns `(first_seq, last_seq, payload)`; chunk sequence numbers that do
/// not increment by one are a hard failure.
pub fn packet(i: &[u8]) -> nom::IResult<&[u8], (u8, u8, Packet)> {
    let (mut i, (first_seq, chunk)) = one_packet(i)?;
    let mut pkt = Packet(Vec::from(chunk));
    let mut last_seq = first_seq;
    let mut chunk_len = chunk.len();
    while chunk_len == constants::MAX_PAYLOAD_LEN {
        let (rest, (seq, chunk)) = one_packet(i)?;
        if seq != last_seq.wrapping_add(1) {
            return Err(nom::Err::Failure(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Verify,
            )));
        }
        pkt.extend(chunk);
        last_seq = seq;
        chunk_len = chunk.len();
        i = rest;
    }
    Ok((i, (first_seq, last_seq, pkt)))
}
