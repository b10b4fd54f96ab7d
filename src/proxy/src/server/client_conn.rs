use crate::backend::conn::BackendConn;
use crate::backend::pool::ConnPool;
use crate::backend::Statement;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::protocol::mysql::basic::{client_handshake_response, from_packet, Command};
use crate::protocol::mysql::constants::CommandCode;
use crate::protocol::mysql::error_codes::{access_denied_message, ErrorKind};
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::writers::{
    write_err_packet, write_initial_handshake, write_ok_packet,
};
use crate::protocol::mysql::packet::Packet;
use crate::server::auth::{gen_user_salt, scramble_password};

use mysql_common::constants::{CapabilityFlags, StatusFlags};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// A prepared statement keeps its backend session out of the pool until the
/// statement is closed.
struct HeldStmt {
    stmt: Statement,
    conn: BackendConn,
}

/// One server-role session facing a downstream client: greeting and
/// authentication, then the command dispatch loop. Every command round
/// borrows a pooled backend session, forwards the raw payload, and streams
/// the response packet set back verbatim.
pub struct ClientConn<R, W> {
    conn_id: u32,
    peer_addr: String,
    reader: PacketReader<R>,
    writer: PacketWriter<W>,
    cfg: Arc<ServerConfig>,
    pool: ConnPool,
    salt: [u8; 20],
    client_flags: CapabilityFlags,
    schema: String,
    stmt: Option<HeldStmt>,
}

impl<R, W> ClientConn<R, W>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    pub fn new(
        conn_id: u32,
        peer_addr: String,
        reader: R,
        writer: W,
        cfg: Arc<ServerConfig>,
        pool: ConnPool,
    ) -> Self {
        let mut writer = PacketWriter::new(writer);
        writer.set_write_timeout(cfg.write_timeout());
        Self {
            conn_id,
            peer_addr,
            reader: PacketReader::new(reader),
            writer,
            cfg,
            pool,
            salt: gen_user_salt(),
            client_flags: CapabilityFlags::empty(),
            schema: String::new(),
            stmt: None,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        self.handshake().await?;
        debug!(
            conn_id = self.conn_id,
            flags = ?self.client_flags,
            schema = %self.schema,
            "auth ok"
        );
        let result = self.dispatch_loop().await;
        self.teardown().await;
        result
    }

    async fn handshake(&mut self) -> Result<()> {
        write_initial_handshake(
            &mut self.writer,
            self.conn_id,
            self.salt,
            self.cfg.server_version.as_bytes(),
            self.cfg.collation_id(),
        )
        .await?;
        // the client's response continues the handshake sequence
        self.reader.set_seq(self.writer.seq());

        // the only read with an idle deadline: a client that never speaks is
        // torn down here
        let response = {
            let read = self.reader.next_async();
            let deadline = self.cfg.read_timeout();
            if deadline.is_zero() {
                read.await?
            } else {
                tokio::time::timeout(deadline, read).await.map_err(|_| {
                    Error::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "handshake read timed out",
                    ))
                })??
            }
        };
        let Some((seq, pkt)) = response else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "peer terminated connection",
            )));
        };
        self.writer.set_seq(seq.wrapping_add(1));

        let (_, handshake) =
            client_handshake_response(&pkt).map_err(|_| Error::MalformedPacket)?;
        if !handshake
            .client_flag
            .contains(CapabilityFlags::CLIENT_PROTOCOL_41)
        {
            write_err_packet(
                ErrorKind::ER_HANDSHAKE_ERROR,
                b"client does not support protocol 41",
                &mut self.writer,
            )
            .await?;
            return Err(Error::OldProtocol);
        }

        let expected = scramble_password(&self.salt, self.cfg.passwd.as_bytes());
        let user_ok = handshake.username.as_deref() == Some(self.cfg.user.as_bytes());
        if !user_ok || handshake.auth_response != expected {
            let user = handshake.db_user_string();
            let msg = access_denied_message(
                &user,
                &self.peer_addr,
                !handshake.auth_response.is_empty(),
            );
            write_err_packet(
                ErrorKind::ER_ACCESS_DENIED_ERROR,
                msg.as_bytes(),
                &mut self.writer,
            )
            .await?;
            return Err(Error::AccessDenied(user));
        }

        self.client_flags = handshake.client_flag;
        self.schema = handshake
            .database
            .as_deref()
            .map(|db| String::from_utf8_lossy(db).to_string())
            .unwrap_or_else(|| self.cfg.schema.clone());

        write_ok_packet(&mut self.writer, 0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT).await?;
        self.reader.reset_seq();
        self.writer.reset_seq();
        Ok(())
    }

    async fn dispatch_loop(&mut self) -> Result<()> {
        loop {
            // every command round trip starts over at sequence 0
            self.reader.reset_seq();
            self.writer.reset_seq();
            let Some((seq, pkt)) = self.reader.next_async().await? else {
                debug!(conn_id = self.conn_id, "connection closed by client");
                return Ok(());
            };
            self.writer.set_seq(seq.wrapping_add(1));

            match from_packet(&pkt) {
                Ok((_, Command::Quit)) => return Ok(()),
                Ok((_, Command::Query(_))) => {
                    self.forward_simple(CommandCode::ComQuery, &pkt, true).await?
                }
                Ok((_, Command::ListFields(_))) => {
                    self.forward_simple(CommandCode::ComFieldList, &pkt, false)
                        .await?
                }
                Ok((_, Command::Init(schema))) => {
                    let schema = schema.to_vec();
                    self.handle_use_db(&schema).await?
                }
                Ok((_, Command::Prepare(_))) => self.handle_prepare(&pkt).await?,
                Ok((_, Command::Execute { stmt, .. })) => {
                    self.handle_execute(stmt, &pkt).await?
                }
                Ok((_, Command::Close(stmt))) => self.handle_stmt_close(stmt).await?,
                Ok((_, Command::Reset(_))) | Ok((_, Command::Fetch(_))) => {
                    // acknowledged, not forwarded
                    write_ok_packet(
                        &mut self.writer,
                        0,
                        0,
                        StatusFlags::SERVER_STATUS_AUTOCOMMIT,
                    )
                    .await?
                }
                Ok((_, Command::SendLongData { .. })) => {
                    // the protocol defines no reply for COM_STMT_SEND_LONG_DATA
                }
                Ok((_, Command::Ping)) => {
                    write_ok_packet(
                        &mut self.writer,
                        0,
                        0,
                        StatusFlags::SERVER_STATUS_AUTOCOMMIT,
                    )
                    .await?
                }
                Err(_) => {
                    let cmd = pkt.first().copied().unwrap_or(0);
                    warn!(conn_id = self.conn_id, "unsupported command {cmd:#04x}");
                    let msg = format!("unsupported command {cmd:#04x}");
                    write_err_packet(
                        ErrorKind::ER_UNKNOWN_COM_ERROR,
                        msg.as_bytes(),
                        &mut self.writer,
                    )
                    .await?
                }
            }
        }
    }

    /// Takes a backend session for one command round, reporting pool
    /// exhaustion (or an open statement) to the client without closing the
    /// session.
    async fn acquire_backend(&mut self) -> Result<Option<BackendConn>> {
        if self.stmt.is_some() {
            write_err_packet(
                ErrorKind::ER_UNKNOWN_ERROR,
                Error::StmtBusy.to_string().as_bytes(),
                &mut self.writer,
            )
            .await?;
            return Ok(None);
        }
        match self.pool.get_conn() {
            Some(conn) => Ok(Some(conn)),
            None => {
                warn!(conn_id = self.conn_id, "backend pool drained");
                write_err_packet(
                    ErrorKind::ER_CON_COUNT_ERROR,
                    Error::CannotGetConn.to_string().as_bytes(),
                    &mut self.writer,
                )
                .await?;
                Ok(None)
            }
        }
    }

    /// Selects the session's current schema on the borrowed backend. An ERR
    /// reply is handed back for verbatim streaming in place of the real
    /// command's response.
    async fn init_db_preface(&mut self, conn: &mut BackendConn) -> Result<Option<Vec<Packet>>> {
        if self.schema.is_empty() {
            return Ok(None);
        }
        let packets = conn
            .exec(CommandCode::ComInitDB, self.schema.as_bytes())
            .await?;
        if packets[0].is_err_packet() {
            return Ok(Some(packets));
        }
        Ok(None)
    }

    async fn exec_with_preface(
        &mut self,
        conn: &mut BackendConn,
        cmd: CommandCode,
        pkt: &Packet,
        preface: bool,
    ) -> Result<Vec<Packet>> {
        if preface {
            if let Some(err_packets) = self.init_db_preface(conn).await? {
                return Ok(err_packets);
            }
        }
        conn.exec(cmd, &pkt[1..]).await
    }

    async fn forward_simple(
        &mut self,
        cmd: CommandCode,
        pkt: &Packet,
        preface: bool,
    ) -> Result<()> {
        let Some(mut conn) = self.acquire_backend().await? else {
            return Ok(());
        };
        let exec_rs = self.exec_with_preface(&mut conn, cmd, pkt, preface).await;
        match exec_rs {
            Ok(packets) => {
                self.pool.put_conn(conn);
                self.stream_packets(&packets).await
            }
            Err(e) => {
                self.pool.discard(conn);
                self.report_backend_failure(e).await
            }
        }
    }

    /// `COM_INIT_DB` switches the default schema: forwarded as a plain
    /// `use <db>` query, and the session schema is updated on success.
    async fn handle_use_db(&mut self, schema: &[u8]) -> Result<()> {
        let Some(mut conn) = self.acquire_backend().await? else {
            return Ok(());
        };
        let schema_str = String::from_utf8_lossy(schema).to_string();
        let sql = format!("use {schema_str}");
        match conn.exec(CommandCode::ComQuery, sql.as_bytes()).await {
            Ok(packets) => {
                if packets[0].is_ok_packet() {
                    self.schema = schema_str;
                }
                self.pool.put_conn(conn);
                self.stream_packets(&packets).await
            }
            Err(e) => {
                self.pool.discard(conn);
                self.report_backend_failure(e).await
            }
        }
    }

    async fn handle_prepare(&mut self, pkt: &Packet) -> Result<()> {
        let Some(mut conn) = self.acquire_backend().await? else {
            return Ok(());
        };
        let preface_rs = self.init_db_preface(&mut conn).await;
        match preface_rs {
            Ok(Some(err_packets)) => {
                self.pool.put_conn(conn);
                return self.stream_packets(&err_packets).await;
            }
            Ok(None) => {}
            Err(e) => {
                self.pool.discard(conn);
                return self.report_backend_failure(e).await;
            }
        }
        match conn.prepare(&pkt[1..]).await {
            Ok((packets, Some(stmt))) => {
                debug!(
                    conn_id = self.conn_id,
                    stmt_id = stmt.id,
                    "retaining backend for prepared statement"
                );
                self.stmt = Some(HeldStmt { stmt, conn });
                self.stream_packets(&packets).await
            }
            Ok((packets, None)) => {
                self.pool.put_conn(conn);
                self.stream_packets(&packets).await
            }
            Err(e) => {
                self.pool.discard(conn);
                self.report_backend_failure(e).await
            }
        }
    }

    async fn handle_execute(&mut self, stmt_id: u32, pkt: &Packet) -> Result<()> {
        let Some(mut held) = self.stmt.take() else {
            return self.unknown_stmt_handler(stmt_id, "mysqld_stmt_execute").await;
        };
        if held.stmt.id != stmt_id {
            self.stmt = Some(held);
            return self.unknown_stmt_handler(stmt_id, "mysqld_stmt_execute").await;
        }
        match held.conn.exec(CommandCode::ComStmtExecute, &pkt[1..]).await {
            Ok(packets) => {
                self.stmt = Some(held);
                self.stream_packets(&packets).await
            }
            Err(e) => {
                self.pool.discard(held.conn);
                self.report_backend_failure(e).await
            }
        }
    }

    /// A matching close releases the backend silently (the protocol defines
    /// no reply); anything else is an unknown-handler error.
    async fn handle_stmt_close(&mut self, stmt_id: u32) -> Result<()> {
        let Some(mut held) = self.stmt.take() else {
            return self.unknown_stmt_handler(stmt_id, "mysqld_stmt_close").await;
        };
        if held.stmt.id != stmt_id {
            self.stmt = Some(held);
            return self.unknown_stmt_handler(stmt_id, "mysqld_stmt_close").await;
        }
        match held.conn.close_stmt(stmt_id).await {
            Ok(()) => self.pool.put_conn(held.conn),
            Err(e) => {
                warn!(conn_id = self.conn_id, "closing statement failed: {e}");
                self.pool.discard(held.conn);
            }
        }
        Ok(())
    }

    async fn unknown_stmt_handler(&mut self, stmt_id: u32, context: &str) -> Result<()> {
        let msg = format!("{} to {context}", Error::UnknownStmtHandler(stmt_id));
        write_err_packet(
            ErrorKind::ER_UNKNOWN_STMT_HANDLER,
            msg.as_bytes(),
            &mut self.writer,
        )
        .await?;
        Ok(())
    }

    async fn report_backend_failure(&mut self, e: Error) -> Result<()> {
        warn!(conn_id = self.conn_id, "backend command failed: {e}");
        write_err_packet(
            ErrorKind::ER_UNKNOWN_ERROR,
            e.to_string().as_bytes(),
            &mut self.writer,
        )
        .await?;
        Ok(())
    }

    /// Re-frames every upstream packet on this session's own sequence
    /// counter and flushes the batch once.
    async fn stream_packets(&mut self, packets: &[Packet]) -> Result<()> {
        use std::io::Write;
        for pkt in packets {
            self.writer.write_all(pkt)?;
            self.writer.end_packet().await?;
        }
        self.writer.flush_all().await?;
        Ok(())
    }

    /// Session teardown closes a leftover statement so its backend session
    /// can rejoin the pool.
    async fn teardown(&mut self) {
        if let Some(mut held) = self.stmt.take() {
            match held.conn.close_stmt(held.stmt.id).await {
                Ok(()) => self.pool.put_conn(held.conn),
                Err(_) => self.pool.discard(held.conn),
            }
        }
    }
}
