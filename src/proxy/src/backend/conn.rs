use crate::backend::{BackendOptions, Statement};
use crate::error::{Error, Result};
use crate::protocol::mysql::basic::{ok_packet, server_initial_handshake, server_error};
use crate::protocol::mysql::constants::{AuthPluginName, CommandCode, MIN_PROTOCOL_VERSION};
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::Packet;
use crate::server::auth::scramble_password;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use mysql_common::constants::{CapabilityFlags, StatusFlags};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// One authenticated client-role session against the upstream MySQL. Owned
/// by the pool while idle and moved out to exactly one frontend task while a
/// command is in flight.
pub struct BackendConn {
    reader: PacketReader<OwnedReadHalf>,
    writer: PacketWriter<OwnedWriteHalf>,
    capabilities: CapabilityFlags,
    status: StatusFlags,
    affected_rows: u64,
    last_insert_id: u64,
    created_at: Instant,
    opts: Arc<BackendOptions>,
}

impl BackendConn {
    pub async fn connect(opts: Arc<BackendOptions>) -> Result<Self> {
        let stream = TcpStream::connect(&opts.addr).await?;
        let (reader, writer) = stream.into_split();
        let mut writer = PacketWriter::new(writer);
        writer.set_write_timeout(opts.write_timeout);
        let mut conn = Self {
            reader: PacketReader::new(reader),
            writer,
            capabilities: CapabilityFlags::empty(),
            status: StatusFlags::empty(),
            affected_rows: 0,
            last_insert_id: 0,
            created_at: Instant::now(),
            opts,
        };
        conn.handshake().await?;
        Ok(conn)
    }

    pub fn expired(&self, max_lifetime: Duration) -> bool {
        !max_lifetime.is_zero() && self.created_at.elapsed() >= max_lifetime
    }

    pub fn status(&self) -> StatusFlags {
        self.status
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    async fn next_packet(&mut self) -> Result<Packet> {
        match self.reader.next_async().await? {
            Some((_, pkt)) => Ok(pkt),
            None => Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "backend closed the connection",
            ))),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let (seq, greeting) = match self.reader.next_async().await? {
            Some(v) => v,
            None => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "backend closed during handshake",
                )))
            }
        };
        if greeting.is_err_packet() {
            return Err(server_error(&greeting));
        }
        if greeting.is_empty() || greeting[0] < MIN_PROTOCOL_VERSION {
            return Err(Error::UnsupportedProtocol(
                greeting.first().copied().unwrap_or(0),
            ));
        }
        let (_, handshake) =
            server_initial_handshake(&greeting).map_err(|_| Error::MalformedPacket)?;
        if !handshake
            .capabilities
            .contains(CapabilityFlags::CLIENT_PROTOCOL_41)
        {
            return Err(Error::OldProtocol);
        }
        self.status = handshake.status_flags;

        self.writer.set_seq(seq.wrapping_add(1));
        self.write_handshake_response(&handshake.salt, handshake.capabilities)?;
        self.writer.end_packet().await?;
        self.writer.flush_all().await?;
        self.reader.set_seq(self.writer.seq());

        self.read_auth_result().await
    }

    /// [Protocol::HandshakeResponse41](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake_response.html)
    fn write_handshake_response(
        &mut self,
        salt: &[u8],
        server_capabilities: CapabilityFlags,
    ) -> Result<()> {
        let mut client_flags = CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_LONG_PASSWORD
            | CapabilityFlags::CLIENT_TRANSACTIONS
            | (server_capabilities & CapabilityFlags::CLIENT_LONG_FLAG);
        if !self.opts.schema.is_empty() {
            client_flags |= CapabilityFlags::CLIENT_CONNECT_WITH_DB;
        }
        self.capabilities = client_flags;

        let scramble = scramble_password(salt, self.opts.passwd.as_bytes());

        self.writer.write_u32::<LittleEndian>(client_flags.bits())?;
        self.writer.write_u32::<LittleEndian>(0)?; // max packet size
        self.writer.write_u8(self.opts.collation)?;
        self.writer.write_all(&[0u8; 23])?;
        self.writer.write_all(self.opts.user.as_bytes())?;
        self.writer.write_u8(0x00)?;
        self.writer.write_u8(scramble.len() as u8)?;
        self.writer.write_all(&scramble)?;
        if !self.opts.schema.is_empty() {
            self.writer.write_all(self.opts.schema.as_bytes())?;
            self.writer.write_u8(0x00)?;
        }
        self.writer
            .write_all(AuthPluginName::AuthNativePassword.as_ref().as_bytes())?;
        self.writer.write_u8(0x00)?;
        Ok(())
    }

    async fn read_auth_result(&mut self) -> Result<()> {
        let pkt = self.next_packet().await?;
        if pkt.is_ok_packet() {
            return Ok(());
        }
        if pkt.is_err_packet() {
            return Err(server_error(&pkt));
        }
        if !pkt.is_empty() && pkt[0] == 0xfe {
            // auth switch request names the plugin the server insists on
            if pkt.len() > 1 {
                let plugin_end = pkt[1..]
                    .iter()
                    .position(|b| *b == 0x00)
                    .map(|p| p + 1)
                    .unwrap_or(pkt.len());
                let plugin = &pkt[1..plugin_end];
                return Err(
                    if plugin == AuthPluginName::AuthMySQlOldPassword.as_ref().as_bytes() {
                        Error::OldPassword
                    } else if plugin == AuthPluginName::AuthMySQLClearPassword.as_ref().as_bytes() {
                        Error::CleartextPassword
                    } else {
                        Error::UnknownPlugin
                    },
                );
            }
            return Err(Error::OldPassword);
        }
        Err(Error::MalformedPacket)
    }

    async fn send_command(&mut self, cmd: CommandCode, arg: &[u8]) -> Result<()> {
        self.writer.reset_seq();
        self.reader.reset_seq();
        self.writer.write_u8(cmd as u8)?;
        self.writer.write_all(arg)?;
        self.writer.end_packet().await?;
        self.writer.flush_all().await?;
        // the response sequence continues after the request chunks
        self.reader.set_seq(self.writer.seq());
        Ok(())
    }

    /// Sends `[cmd][arg]` and collects the complete response packet set,
    /// terminating EOFs included, so the caller can stream it verbatim.
    pub async fn exec(&mut self, cmd: CommandCode, arg: &[u8]) -> Result<Vec<Packet>> {
        self.send_command(cmd, arg).await?;
        self.read_result_set().await
    }

    async fn read_result_set(&mut self) -> Result<Vec<Packet>> {
        let header = self.next_packet().await?;
        if header.is_ok_packet() {
            let (_, ok) = ok_packet(&header, self.capabilities).map_err(|_| Error::MalformedPacket)?;
            self.affected_rows = ok.affected_rows;
            self.last_insert_id = ok.last_insert_id;
            self.status = ok.status_flags;
            return Ok(vec![header]);
        }
        if header.is_err_packet() {
            // a server-side error is part of the result, not a transport
            // failure; the session remains usable
            return Ok(vec![header]);
        }
        if header.is_local_in_file_packet() {
            return Err(Error::Unsupported("LOCAL INFILE"));
        }

        let (rest, column_count) =
            crate::protocol::mysql::basic::read_length_encoded_number(&header)
                .map_err(|_| Error::MalformedPacket)?;
        if !rest.is_empty() || column_count == 0 {
            return Err(Error::MalformedPacket);
        }

        let mut packets = vec![header];
        self.read_column_definitions(&mut packets, column_count as usize)
            .await?;
        self.read_until_eof(&mut packets).await?;
        Ok(packets)
    }

    async fn read_column_definitions(
        &mut self,
        packets: &mut Vec<Packet>,
        count: usize,
    ) -> Result<()> {
        for read in 0.. {
            let pkt = self.next_packet().await?;
            let is_eof = pkt.is_eof_packet();
            if is_eof && pkt.len() == 5 {
                if let Ok((_, status)) =
                    crate::protocol::mysql::basic::eof_server_status(&pkt)
                {
                    self.status = status;
                }
            }
            packets.push(pkt);
            if is_eof {
                if read == count {
                    return Ok(());
                }
                debug!("column count mismatch: expected {count}, read {read}");
                return Err(Error::MalformedPacket);
            }
        }
        unreachable!()
    }

    async fn read_until_eof(&mut self, packets: &mut Vec<Packet>) -> Result<()> {
        loop {
            let pkt = self.next_packet().await?;
            let is_eof = pkt.is_eof_packet();
            let is_err = pkt.is_err_packet();
            if is_eof && pkt.len() == 5 {
                if let Ok((_, status)) =
                    crate::protocol::mysql::basic::eof_server_status(&pkt)
                {
                    self.status = status;
                }
            }
            packets.push(pkt);
            if is_eof || is_err {
                return Ok(());
            }
        }
    }

    /// `COM_STMT_PREPARE`. Returns the raw response packets plus the parsed
    /// statement; an upstream ERR yields no statement.
    /// [COM_STMT_PREPARE response](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_stmt_prepare.html)
    pub async fn prepare(&mut self, sql: &[u8]) -> Result<(Vec<Packet>, Option<Statement>)> {
        self.send_command(CommandCode::ComStmtPrepare, sql).await?;
        let first = self.next_packet().await?;
        if first.is_err_packet() {
            return Ok((vec![first], None));
        }
        if !first.is_ok_packet() || first.len() < 12 {
            return Err(Error::MalformedPacket);
        }

        let mut cursor = &first[1..];
        let id = cursor.read_u32::<LittleEndian>()?;
        let column_count = cursor.read_u16::<LittleEndian>()?;
        let param_count = cursor.read_u16::<LittleEndian>()?;
        let _filler = cursor.read_u8()?;
        let warnings = cursor.read_u16::<LittleEndian>()?;
        if self.opts.strict && warnings > 0 {
            return Err(Error::Server {
                code: 1105,
                state: "HY000".to_string(),
                message: format!("prepare finished with {warnings} warnings"),
            });
        }

        let mut packets = vec![first];
        if param_count > 0 {
            self.read_until_eof(&mut packets).await?;
        }
        if column_count > 0 {
            self.read_until_eof(&mut packets).await?;
        }
        let statement = Statement {
            id,
            param_count,
            column_count,
        };
        Ok((packets, Some(statement)))
    }

    /// `COM_STMT_CLOSE`: fire and forget, the server sends no reply.
    pub async fn close_stmt(&mut self, stmt_id: u32) -> Result<()> {
        self.writer.reset_seq();
        self.reader.reset_seq();
        self.writer.write_u8(CommandCode::ComStmtClose as u8)?;
        self.writer.write_u32::<LittleEndian>(stmt_id)?;
        self.writer.end_packet().await?;
        self.writer.flush_all().await?;
        Ok(())
    }
}
