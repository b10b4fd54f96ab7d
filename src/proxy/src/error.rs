use std::io;

use thiserror::Error;

/// Domain-level proxy error. Codec-level failures stay `std::io::Error` and
/// are wrapped transparently; everything above the packet layer goes through
/// this enum.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed packet")]
    MalformedPacket,
    #[error("commands out of sync. You can't run this command now")]
    PacketOutOfSync,
    #[error("commands out of sync. Did you run multiple statements at once?")]
    PacketOutOfSyncMultiple,
    #[error("unsupported protocol version {0}. Version 10 or higher is required")]
    UnsupportedProtocol(u8),
    #[error("MySQL server does not support required protocol 41+")]
    OldProtocol,
    #[error("this user requires old password authentication")]
    OldPassword,
    #[error("this user requires clear text authentication")]
    CleartextPassword,
    #[error("this authentication plugin is not supported")]
    UnknownPlugin,
    #[error("unknown collation: {0}")]
    UnknownCollation(String),
    #[error("access denied for user '{0}'")]
    AccessDenied(String),
    #[error("can not get backend connection from pool")]
    CannotGetConn,
    #[error("a prepared statement is open; close it before issuing new commands")]
    StmtBusy,
    #[error("unknown prepared statement handler ({0}) given")]
    UnknownStmtHandler(u32),
    #[error("not supported: {0}")]
    Unsupported(&'static str),
    #[error("ERROR {code} ({state}): {message}")]
    Server {
        code: u16,
        state: String,
        message: String,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("configuration parse failed: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
