/// Server error codes the proxy raises on its own behalf. Errors coming from
/// the upstream are forwarded verbatim and never pass through this table.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorKind {
    ER_CON_COUNT_ERROR = 1040,
    ER_HANDSHAKE_ERROR = 1043,
    ER_DBACCESS_DENIED_ERROR = 1044,
    ER_ACCESS_DENIED_ERROR = 1045,
    ER_NO_DB_ERROR = 1046,
    ER_UNKNOWN_COM_ERROR = 1047,
    ER_BAD_DB_ERROR = 1049,
    ER_NET_PACKET_TOO_LARGE = 1153,
    ER_NET_PACKETS_OUT_OF_ORDER = 1156,
    ER_UNKNOWN_ERROR = 1105,
    ER_NOT_SUPPORTED_YET = 1235,
    ER_UNKNOWN_STMT_HANDLER = 1243,
    ER_MALFORMED_PACKET = 1835,
}

impl ErrorKind {
    /// Five-byte SQLSTATE written after the `#` marker of an ERR packet.
    pub fn sqlstate(&self) -> &'static [u8] {
        match self {
            ErrorKind::ER_CON_COUNT_ERROR => b"08004",
            ErrorKind::ER_HANDSHAKE_ERROR => b"08S01",
            ErrorKind::ER_DBACCESS_DENIED_ERROR => b"42000",
            ErrorKind::ER_ACCESS_DENIED_ERROR => b"28000",
            ErrorKind::ER_NO_DB_ERROR => b"3D000",
            ErrorKind::ER_UNKNOWN_COM_ERROR => b"08S01",
            ErrorKind::ER_BAD_DB_ERROR => b"42000",
            ErrorKind::ER_NET_PACKET_TOO_LARGE => b"08S01",
            ErrorKind::ER_NET_PACKETS_OUT_OF_ORDER => b"HY000",
            ErrorKind::ER_UNKNOWN_ERROR => b"HY000",
            ErrorKind::ER_NOT_SUPPORTED_YET => b"42000",
            ErrorKind::ER_UNKNOWN_STMT_HANDLER => b"HY000",
            ErrorKind::ER_MALFORMED_PACKET => b"HY000",
        }
    }
}

/// `Access denied for user 'x'@'host' (using password: YES|NO)`, the exact
/// shape real servers answer a failed login with.
pub fn access_denied_message(user: &str, host: &str, using_password: bool) -> String {
    format!(
        "Access denied for user '{}'@'{}' (using password: {})",
        user,
        host,
        if using_password { "Yes" } else { "No" }
    )
}
