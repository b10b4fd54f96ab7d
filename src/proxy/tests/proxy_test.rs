//! End-to-end coverage against an in-process upstream that speaks just
//! enough of the MySQL server protocol: handshake, `use`/`select 1` text
//! queries, a two-parameter prepared statement, and verbatim error replies.

use proxy::backend::conn::BackendConn;
use proxy::backend::pool::{ConnPool, PoolConfig};
use proxy::backend::BackendOptions;
use proxy::config::{AdmissionPolicy, ServerConfig};
use proxy::error::Error;
use proxy::protocol::mysql::basic::{
    client_handshake_response, server_error, server_initial_handshake,
};
use proxy::protocol::mysql::constants::{CommandCode, MAX_PAYLOAD_LEN};
use proxy::protocol::mysql::error_codes::ErrorKind;
use proxy::protocol::mysql::packet::packet_reader::PacketReader;
use proxy::protocol::mysql::packet::packet_writer::PacketWriter;
use proxy::protocol::mysql::packet::writers::{
    write_err_packet, write_initial_handshake, write_ok_packet,
};
use proxy::protocol::mysql::packet::Packet;
use proxy::server::auth::{default_salt, scramble_password};
use proxy::server::ProxyServer;

use byteorder::{LittleEndian, WriteBytesExt};
use mysql_common::constants::{CapabilityFlags, StatusFlags};
use mysql_common::io::WriteMysqlExt;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

const EOF_PACKET: &[u8] = &[0xfe, 0x00, 0x00, 0x02, 0x00];

fn column_def(name: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_lenenc_str(b"def").unwrap();
    buf.write_lenenc_str(b"").unwrap();
    buf.write_lenenc_str(b"").unwrap();
    buf.write_lenenc_str(b"").unwrap();
    buf.write_lenenc_str(name.as_bytes()).unwrap();
    buf.write_lenenc_str(b"").unwrap();
    buf.write_lenenc_int(0x0c).unwrap();
    buf.write_u16::<LittleEndian>(33).unwrap();
    buf.write_u32::<LittleEndian>(1024).unwrap();
    buf.write_u8(0x08).unwrap(); // LONGLONG
    buf.write_u16::<LittleEndian>(0).unwrap();
    buf.write_u8(0).unwrap();
    buf.write_all(&[0x00, 0x00]).unwrap();
    buf
}

async fn send_packets(
    writer: &mut PacketWriter<OwnedWriteHalf>,
    packets: &[Vec<u8>],
) -> io::Result<()> {
    for pkt in packets {
        writer.write_all(pkt)?;
        writer.end_packet().await?;
    }
    writer.flush_all().await
}

async fn send_select_one(writer: &mut PacketWriter<OwnedWriteHalf>) -> io::Result<()> {
    let packets = vec![
        vec![0x01],
        column_def("1"),
        EOF_PACKET.to_vec(),
        vec![0x01, b'1'],
        EOF_PACKET.to_vec(),
    ];
    send_packets(writer, &packets).await
}

async fn handle_upstream_conn(stream: TcpStream, passwd: &'static str) -> io::Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = PacketReader::new(reader);
    let mut writer = PacketWriter::new(writer);

    let salt = default_salt();
    write_initial_handshake(&mut writer, 99, salt, b"5.7.29-fake", 33).await?;
    reader.set_seq(writer.seq());
    let Some((seq, pkt)) = reader.next_async().await? else {
        return Ok(());
    };
    let Ok((_, response)) = client_handshake_response(&pkt) else {
        return Ok(());
    };
    writer.set_seq(seq.wrapping_add(1));
    if response.auth_response != scramble_password(&salt, passwd.as_bytes()) {
        write_err_packet(ErrorKind::ER_ACCESS_DENIED_ERROR, b"denied", &mut writer).await?;
        return Ok(());
    }
    write_ok_packet(&mut writer, 0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT).await?;

    let mut next_stmt_id = 0u32;
    loop {
        reader.reset_seq();
        writer.reset_seq();
        let Some((seq, pkt)) = reader.next_async().await? else {
            return Ok(());
        };
        writer.set_seq(seq.wrapping_add(1));
        match pkt[0] {
            1 => return Ok(()), // COM_QUIT
            2 => {
                // COM_INIT_DB
                write_ok_packet(&mut writer, 0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT).await?;
            }
            3 => {
                let sql = &pkt[1..];
                if sql.starts_with(b"use ") {
                    write_ok_packet(&mut writer, 0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT)
                        .await?;
                } else if sql == b"select 1" {
                    send_select_one(&mut writer).await?;
                } else if sql == b"select die" {
                    // column-count packet, then the server vanishes mid-result
                    writer.write_all(&[0x01])?;
                    writer.end_packet().await?;
                    writer.flush_all().await?;
                    return Ok(());
                } else {
                    write_err_packet(ErrorKind::ER_UNKNOWN_ERROR, b"boom", &mut writer).await?;
                }
            }
            22 => {
                // COM_STMT_PREPARE: two parameters, one column
                next_stmt_id += 1;
                let mut prepare_ok = vec![0x00];
                prepare_ok.extend_from_slice(&next_stmt_id.to_le_bytes());
                prepare_ok.extend_from_slice(&1u16.to_le_bytes());
                prepare_ok.extend_from_slice(&2u16.to_le_bytes());
                prepare_ok.push(0x00);
                prepare_ok.extend_from_slice(&0u16.to_le_bytes());
                let packets = vec![
                    prepare_ok,
                    column_def("?"),
                    column_def("?"),
                    EOF_PACKET.to_vec(),
                    column_def("sum"),
                    EOF_PACKET.to_vec(),
                ];
                send_packets(&mut writer, &packets).await?;
            }
            23 => send_select_one(&mut writer).await?, // COM_STMT_EXECUTE
            25 => {}                                   // COM_STMT_CLOSE: no reply
            _ => {
                write_err_packet(ErrorKind::ER_UNKNOWN_COM_ERROR, b"bad command", &mut writer)
                    .await?;
            }
        }
    }
}

async fn spawn_upstream(passwd: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = handle_upstream_conn(stream, passwd).await;
            });
        }
    });
    addr
}

fn backend_options(upstream: SocketAddr, passwd: &str) -> BackendOptions {
    BackendOptions {
        addr: upstream.to_string(),
        user: "root".to_string(),
        passwd: passwd.to_string(),
        schema: "test".to_string(),
        collation: 33,
        strict: false,
        write_timeout: Duration::ZERO,
    }
}

fn proxy_config(upstream: SocketAddr, user: &str, passwd: &str, max_client: usize) -> ServerConfig {
    ServerConfig {
        listen: "127.0.0.1:0".to_string(),
        addr: upstream.to_string(),
        user: user.to_string(),
        passwd: passwd.to_string(),
        schema: "test".to_string(),
        collation: "utf8_general_ci".to_string(),
        server_version: "5.7.0-igo".to_string(),
        max_client,
        admission: AdmissionPolicy::Reject,
        max_conn_num: 4,
        max_idle_conn: 2,
        max_life_time: 0,
        read_timeout: 30,
        write_timeout: 0,
        strict: false,
    }
}

async fn start_proxy(cfg: ServerConfig) -> (SocketAddr, Arc<ProxyServer>, watch::Sender<()>) {
    let server = Arc::new(ProxyServer::new(cfg).unwrap());
    let listener = server.bind().unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(Arc::clone(&server).serve(listener, shutdown_rx));
    (addr, server, shutdown_tx)
}

struct TestClient {
    reader: PacketReader<OwnedReadHalf>,
    writer: PacketWriter<OwnedWriteHalf>,
}

impl TestClient {
    /// Performs the client side of the handshake and returns the auth reply
    /// packet (OK or ERR) alongside the connected client.
    async fn connect(
        addr: SocketAddr,
        user: &str,
        passwd: &str,
        db: Option<&str>,
    ) -> io::Result<(Self, Packet)> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        let mut reader = PacketReader::new(reader);
        let mut writer = PacketWriter::new(writer);

        let Some((seq, greeting)) = reader.next_async().await? else {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "closed before greeting",
            ));
        };
        let (_, handshake) = server_initial_handshake(&greeting).unwrap();
        assert_eq!(handshake.protocol_version, 10);
        assert_eq!(handshake.salt.len(), 20);

        writer.set_seq(seq.wrapping_add(1));
        let mut caps = CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_LONG_PASSWORD;
        if db.is_some() {
            caps |= CapabilityFlags::CLIENT_CONNECT_WITH_DB;
        }
        writer.write_u32::<LittleEndian>(caps.bits())?;
        writer.write_u32::<LittleEndian>(1 << 24)?;
        writer.write_u8(33)?;
        writer.write_all(&[0u8; 23])?;
        writer.write_all(user.as_bytes())?;
        writer.write_u8(0x00)?;
        let scramble = scramble_password(&handshake.salt, passwd.as_bytes());
        writer.write_u8(scramble.len() as u8)?;
        writer.write_all(&scramble)?;
        if let Some(db) = db {
            writer.write_all(db.as_bytes())?;
            writer.write_u8(0x00)?;
        }
        writer.end_packet().await?;
        writer.flush_all().await?;
        reader.set_seq(writer.seq());

        let Some((_, reply)) = reader.next_async().await? else {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "closed during auth",
            ));
        };
        Ok((Self { reader, writer }, reply))
    }

    async fn send_command(&mut self, payload: &[u8]) -> io::Result<()> {
        self.writer.reset_seq();
        self.reader.reset_seq();
        self.writer.write_all(payload)?;
        self.writer.end_packet().await?;
        self.writer.flush_all().await?;
        self.reader.set_seq(self.writer.seq());
        Ok(())
    }

    async fn read_packets(&mut self, n: usize) -> io::Result<Vec<(u8, Packet)>> {
        let mut packets = Vec::with_capacity(n);
        for _ in 0..n {
            let Some(entry) = self.reader.next_async().await? else {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended mid-response",
                ));
            };
            packets.push(entry);
        }
        Ok(packets)
    }
}

async fn wait_for_conn(pool: &ConnPool) -> BackendConn {
    for _ in 0..200 {
        if let Some(conn) = pool.get_conn() {
            return conn;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pool never produced a connection");
}

#[tokio::test]
async fn test_backend_exec_select() {
    let upstream = spawn_upstream("root").await;
    let opts = Arc::new(backend_options(upstream, "root"));
    let mut conn = BackendConn::connect(opts).await.unwrap();

    let packets = conn.exec(CommandCode::ComQuery, b"select 1").await.unwrap();
    assert_eq!(packets.len(), 5);
    assert_eq!(&*packets[0], &[0x01]);
    assert!(packets[2].is_eof_packet());
    assert_eq!(&*packets[3], &[0x01, b'1']);
    assert!(packets[4].is_eof_packet());
    assert!(conn
        .status()
        .contains(StatusFlags::SERVER_STATUS_AUTOCOMMIT));

    let packets = conn
        .exec(CommandCode::ComInitDB, b"test")
        .await
        .unwrap();
    assert!(packets[0].is_ok_packet());
    assert_eq!(conn.affected_rows(), 0);
    assert_eq!(conn.last_insert_id(), 0);
}

#[tokio::test]
async fn test_backend_err_is_part_of_result() {
    let upstream = spawn_upstream("root").await;
    let opts = Arc::new(backend_options(upstream, "root"));
    let mut conn = BackendConn::connect(opts).await.unwrap();

    let packets = conn
        .exec(CommandCode::ComQuery, b"select boom")
        .await
        .unwrap();
    assert_eq!(packets.len(), 1);
    assert!(packets[0].is_err_packet());
    match server_error(&packets[0]) {
        Error::Server { code, message, .. } => {
            assert_eq!(code, 1105);
            assert!(message.contains("boom"));
        }
        other => panic!("unexpected {other:?}"),
    }

    // the session survives a server-side error
    let packets = conn.exec(CommandCode::ComQuery, b"select 1").await.unwrap();
    assert_eq!(packets.len(), 5);
}

#[tokio::test]
async fn test_backend_auth_rejected() {
    let upstream = spawn_upstream("root").await;
    let opts = Arc::new(backend_options(upstream, "wrong"));
    match BackendConn::connect(opts).await {
        Err(Error::Server { code, .. }) => assert_eq!(code, 1045),
        other => panic!("expected auth failure, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_backend_prepare_roundtrip() {
    let upstream = spawn_upstream("root").await;
    let opts = Arc::new(backend_options(upstream, "root"));
    let mut conn = BackendConn::connect(opts).await.unwrap();

    let (packets, stmt) = conn.prepare(b"select ? + ?").await.unwrap();
    let stmt = stmt.unwrap();
    assert_eq!(packets.len(), 6);
    assert_eq!(stmt.param_count, 2);
    assert_eq!(stmt.column_count, 1);
    conn.close_stmt(stmt.id).await.unwrap();

    // no reply to COM_STMT_CLOSE: the session accepts the next command
    let packets = conn.exec(CommandCode::ComQuery, b"select 1").await.unwrap();
    assert_eq!(packets.len(), 5);
}

#[tokio::test]
async fn test_pool_invariants() {
    let upstream = spawn_upstream("root").await;
    let pool = ConnPool::new(
        backend_options(upstream, "root"),
        PoolConfig {
            max_open: 2,
            max_idle: 1,
            max_lifetime: Duration::ZERO,
        },
    );

    let first = wait_for_conn(&pool).await;
    assert!(pool.num_open() <= 2);
    let second = wait_for_conn(&pool).await;
    assert!(pool.num_open() <= 2);
    // both sessions are out: takers fail fast
    assert!(pool.get_conn().is_none());

    pool.put_conn(first);
    let reused = pool.get_conn().expect("idle session must be reusable");
    pool.put_conn(reused);

    pool.put_conn(second);
    assert!(pool.num_idle() <= pool.num_open() as usize);
    assert!(pool.num_open() <= 2);
}

#[tokio::test]
async fn test_pool_discard_decrements() {
    let upstream = spawn_upstream("root").await;
    let pool = ConnPool::new(
        backend_options(upstream, "root"),
        PoolConfig {
            max_open: 1,
            max_idle: 1,
            max_lifetime: Duration::ZERO,
        },
    );
    let conn = wait_for_conn(&pool).await;
    assert_eq!(pool.num_open(), 1);
    pool.discard(conn);
    assert_eq!(pool.num_open(), 0);
    // capacity is restored by the opener
    let refreshed = wait_for_conn(&pool).await;
    pool.put_conn(refreshed);
}

#[tokio::test]
async fn test_pool_never_dispenses_expired_sessions() {
    let upstream = spawn_upstream("root").await;
    let lifetime = Duration::from_millis(50);
    let pool = ConnPool::new(
        backend_options(upstream, "root"),
        PoolConfig {
            max_open: 2,
            max_idle: 1,
            max_lifetime: lifetime,
        },
    );
    let conn = wait_for_conn(&pool).await;
    pool.put_conn(conn);
    tokio::time::sleep(Duration::from_millis(120)).await;

    let fresh = wait_for_conn(&pool).await;
    assert!(!fresh.expired(lifetime));
    assert!(pool.num_open() <= 2);
    pool.put_conn(fresh);
}

#[tokio::test]
async fn test_proxy_select_passthrough() {
    let upstream = spawn_upstream("secret").await;
    let (addr, _server, _shutdown) = start_proxy(proxy_config(upstream, "root", "secret", 8)).await;

    let (mut client, reply) = TestClient::connect(addr, "root", "secret", None).await.unwrap();
    assert!(reply.is_ok_packet());

    client.send_command(b"\x03select 1").await.unwrap();
    let packets = client.read_packets(5).await.unwrap();
    let seqs: Vec<u8> = packets.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    assert_eq!(&*packets[0].1, &[0x01]);
    assert!(packets[2].1.is_eof_packet());
    assert_eq!(&*packets[3].1, &[0x01, b'1']);
    assert!(packets[4].1.is_eof_packet());

    // use-database updates the session default and answers with OK
    client.send_command(b"\x02other").await.unwrap();
    let packets = client.read_packets(1).await.unwrap();
    assert!(packets[0].1.is_ok_packet());
}

#[tokio::test]
async fn test_proxy_access_denied() {
    let upstream = spawn_upstream("secret").await;
    let (addr, _server, _shutdown) =
        start_proxy(proxy_config(upstream, "alice", "secret", 8)).await;

    let (_, reply) = TestClient::connect(addr, "alice", "wrong", None).await.unwrap();
    assert!(reply.is_err_packet());
    match server_error(&reply) {
        Error::Server { code, message, .. } => {
            assert_eq!(code, 1045);
            assert!(message.contains("alice"));
            assert!(message.contains("Yes"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_proxy_upstream_err_passthrough_keeps_session() {
    let upstream = spawn_upstream("secret").await;
    let (addr, server, _shutdown) = start_proxy(proxy_config(upstream, "root", "secret", 8)).await;

    let (mut client, reply) = TestClient::connect(addr, "root", "secret", None).await.unwrap();
    assert!(reply.is_ok_packet());

    client.send_command(b"\x03select boom").await.unwrap();
    let packets = client.read_packets(1).await.unwrap();
    assert!(packets[0].1.is_err_packet());

    // the frontend stays open and the backend went back to the pool
    client.send_command(b"\x03select 1").await.unwrap();
    let packets = client.read_packets(5).await.unwrap();
    assert_eq!(&*packets[3].1, &[0x01, b'1']);
    assert!(server.pool().num_open() <= 4);
}

#[tokio::test]
async fn test_proxy_prepared_statement_lifecycle() {
    let upstream = spawn_upstream("secret").await;
    let (addr, _server, _shutdown) = start_proxy(proxy_config(upstream, "root", "secret", 8)).await;

    let (mut client, reply) = TestClient::connect(addr, "root", "secret", None).await.unwrap();
    assert!(reply.is_ok_packet());

    client.send_command(b"\x16select ? + ?").await.unwrap();
    let packets = client.read_packets(6).await.unwrap();
    let prepare_ok = &packets[0].1;
    assert_eq!(prepare_ok[0], 0x00);
    let stmt_id = u32::from_le_bytes([prepare_ok[1], prepare_ok[2], prepare_ok[3], prepare_ok[4]]);
    assert_eq!(u16::from_le_bytes([prepare_ok[5], prepare_ok[6]]), 1); // columns
    assert_eq!(u16::from_le_bytes([prepare_ok[7], prepare_ok[8]]), 2); // params
    assert!(packets[3].1.is_eof_packet());
    assert!(packets[5].1.is_eof_packet());

    // while the statement is open, new borrows are refused
    client.send_command(b"\x03select 1").await.unwrap();
    let busy = client.read_packets(1).await.unwrap();
    assert!(busy[0].1.is_err_packet());

    // execute runs on the retained backend
    let mut execute = vec![0x17];
    execute.extend_from_slice(&stmt_id.to_le_bytes());
    execute.push(0x00);
    execute.extend_from_slice(&1u32.to_le_bytes());
    client.send_command(&execute).await.unwrap();
    let packets = client.read_packets(5).await.unwrap();
    assert_eq!(&*packets[3].1, &[0x01, b'1']);

    // close releases the backend; no downstream reply
    let mut close = vec![0x19];
    close.extend_from_slice(&stmt_id.to_le_bytes());
    client.send_command(&close).await.unwrap();

    // the session keeps serving queries from the pool
    client.send_command(b"\x03select 1").await.unwrap();
    let packets = client.read_packets(5).await.unwrap();
    assert_eq!(&*packets[3].1, &[0x01, b'1']);

    // closing a handle that no longer exists is an unknown-handler error
    client.send_command(&close).await.unwrap();
    let packets = client.read_packets(1).await.unwrap();
    match server_error(&packets[0].1) {
        Error::Server { code, .. } => assert_eq!(code, 1243),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_proxy_admission_cap() {
    let upstream = spawn_upstream("secret").await;
    let (addr, server, _shutdown) = start_proxy(proxy_config(upstream, "root", "secret", 1)).await;

    let (mut first, reply) = TestClient::connect(addr, "root", "secret", None).await.unwrap();
    assert!(reply.is_ok_packet());
    assert_eq!(server.active_clients(), 1);

    // over the cap: the listener closes the transport without a greeting
    let over_cap = TcpStream::connect(addr).await.unwrap();
    let mut reader = PacketReader::new(over_cap);
    match reader.next_async().await {
        Ok(None) | Err(_) => {}
        Ok(Some(_)) => panic!("connection over the admission cap got a greeting"),
    }

    // once the first session ends, a new client is admitted again
    first.send_command(b"\x01").await.unwrap();
    drop(first);
    let mut admitted = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Ok((_, reply)) = TestClient::connect(addr, "root", "secret", None).await {
            if reply.is_ok_packet() {
                admitted = true;
                break;
            }
        }
    }
    assert!(admitted, "client slot was never released");
}

#[tokio::test]
async fn test_proxy_unknown_command_keeps_session_open() {
    let upstream = spawn_upstream("secret").await;
    let (addr, _server, _shutdown) = start_proxy(proxy_config(upstream, "root", "secret", 8)).await;

    let (mut client, reply) = TestClient::connect(addr, "root", "secret", None).await.unwrap();
    assert!(reply.is_ok_packet());

    // COM_REFRESH is not forwarded
    client.send_command(&[0x07]).await.unwrap();
    let packets = client.read_packets(1).await.unwrap();
    match server_error(&packets[0].1) {
        Error::Server { code, .. } => assert_eq!(code, 1047),
        other => panic!("unexpected {other:?}"),
    }

    client.send_command(b"\x03select 1").await.unwrap();
    let packets = client.read_packets(5).await.unwrap();
    assert_eq!(&*packets[3].1, &[0x01, b'1']);
}

#[tokio::test]
async fn test_proxy_survives_upstream_death_mid_query() {
    let upstream = spawn_upstream("secret").await;
    let (addr, server, _shutdown) = start_proxy(proxy_config(upstream, "root", "secret", 8)).await;

    let (mut client, reply) = TestClient::connect(addr, "root", "secret", None).await.unwrap();
    assert!(reply.is_ok_packet());

    client.send_command(b"\x03select die").await.unwrap();
    let packets = client.read_packets(1).await.unwrap();
    assert!(packets[0].1.is_err_packet());
    assert!(server.pool().num_open() <= 4);

    // the dead backend was discarded; the frontend keeps serving once the
    // opener has replaced it
    let mut served = false;
    for _ in 0..100 {
        client.send_command(b"\x03select 1").await.unwrap();
        let first = client.read_packets(1).await.unwrap();
        if first[0].1.is_err_packet() {
            tokio::time::sleep(Duration::from_millis(10)).await;
            continue;
        }
        let rest = client.read_packets(4).await.unwrap();
        assert_eq!(&*rest[2].1, &[0x01, b'1']);
        served = true;
        break;
    }
    assert!(served, "frontend never recovered after backend death");
}

#[tokio::test]
async fn test_proxy_forwards_fragmented_command() {
    let upstream = spawn_upstream("secret").await;
    let (addr, _server, _shutdown) = start_proxy(proxy_config(upstream, "root", "secret", 8)).await;

    let (mut client, reply) = TestClient::connect(addr, "root", "secret", None).await.unwrap();
    assert!(reply.is_ok_packet());

    // command byte + filler spilling one byte past the max chunk size: the
    // proxy reassembles 2 chunks and re-fragments identically upstream
    let mut payload = vec![0x03];
    payload.extend(std::iter::repeat(b'x').take(MAX_PAYLOAD_LEN));
    client.send_command(&payload).await.unwrap();

    // the fake upstream answers any unknown query with an ERR, proving the
    // oversized statement made it through both hops intact
    let packets = client.read_packets(1).await.unwrap();
    assert!(packets[0].1.is_err_packet());
}
