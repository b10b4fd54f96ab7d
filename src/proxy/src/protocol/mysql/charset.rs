use hashbrown::HashMap;
use std::sync::OnceLock;

/// `utf8_general_ci`, the charset byte advertised in the initial handshake
/// when nothing else is configured.
pub const DEFAULT_COLLATION_ID: u8 = 33;

pub const DEFAULT_COLLATION_NAME: &str = "utf8_general_ci";

/// Collation name to charset-byte table, the subset a proxy realistically
/// meets. Unknown names are a configuration error at startup.
pub fn collation_names() -> &'static HashMap<&'static str, u8> {
    static COLLATIONS: OnceLock<HashMap<&'static str, u8>> = OnceLock::new();
    COLLATIONS.get_or_init(|| {
        HashMap::from([
            ("big5_chinese_ci", 1_u8),
            ("latin1_swedish_ci", 8),
            ("ascii_general_ci", 11),
            ("ujis_japanese_ci", 12),
            ("sjis_japanese_ci", 13),
            ("latin1_german2_ci", 31),
            ("utf8_general_ci", 33),
            ("cp1251_general_ci", 51),
            ("utf16_general_ci", 54),
            ("utf32_general_ci", 60),
            ("binary", 63),
            ("gbk_chinese_ci", 28),
            ("gb2312_chinese_ci", 24),
            ("latin1_bin", 47),
            ("utf8_bin", 83),
            ("utf8mb4_general_ci", 45),
            ("utf8mb4_bin", 46),
            ("utf8mb4_unicode_ci", 224),
            ("utf8mb4_0900_ai_ci", 255),
        ])
    })
}

pub fn collation_id(name: &str) -> Option<u8> {
    collation_names().get(name).copied()
}
