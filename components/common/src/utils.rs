use ethers::types::{Bytes, U256};
use ethers::utils::hex;

/// Parses a decimal string, or a hex string when prefixed with `0x`.
pub fn parse_u256(s: &str) -> anyhow::Result<U256> {
    let s = s.trim();
    match s.strip_prefix("0x") {
        Some(digits) => Ok(U256::from_str_radix(digits, 16)?),
        None => Ok(U256::from_dec_str(s)?),
    }
}

/// Decodes hex with or without a `0x` prefix. An empty string is an empty payload.
pub fn parse_hex_bytes(s: &str) -> anyhow::Result<Bytes> {
    let s = s.trim();
    let digits = s.strip_prefix("0x").unwrap_or(s);
    Ok(Bytes::from(hex::decode(digits)?))
}

/// Renders block extra data as hex, followed by any readable text it contains (client banners
/// such as "geth" usually are).
pub fn format_extra_data(extra: &Bytes) -> String {
    let hex = format!("0x{}", hex::encode(extra.as_ref()));

    let words: Vec<String> = extra
        .split(|b| !b.is_ascii_graphic())
        .filter(|run| run.len() >= 2)
        .map(|run| String::from_utf8_lossy(run).into_owned())
        .collect();

    if words.is_empty() {
        hex
    } else {
        format!("{} ({})", hex, words.join(" "))
    }
}
