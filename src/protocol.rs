//! Pfeiffer RS-485 frame codec.
//!
//! Commands and responses are ASCII, CR-terminated lines:
//!
//! - Outgoing query: `<addr:3>00<param:3>02=?<chk:3>\r`
//! - Incoming reply: `<addr:3>10<param:3><len:2><payload><chk:3>\r`
//!
//! The checksum is the sum of the ASCII codes of every character before the
//! checksum field, modulo 256, rendered as three zero-padded decimal digits.
//! Everything in this module is a pure function; all I/O lives in [`crate::bus`].

/// Action code of an outgoing data request.
pub const QUERY_ACTION: &str = "00";

/// Action code echoed by a device answering a data request.
pub const REPLY_ACTION: &str = "10";

/// Sum of ASCII codes mod 256.
pub fn checksum(body: &str) -> u8 {
    (body.bytes().map(u32::from).sum::<u32>() % 256) as u8
}

/// Build a parameter query frame for `address` / `param` (both 0..=999).
///
/// Encoding the same pair twice produces byte-identical frames.
pub fn encode_query(address: u16, param: u16) -> String {
    let body = format!("{address:03}{QUERY_ACTION}{param:03}02=?");
    let chk = checksum(&body);
    format!("{body}{chk:03}\r")
}

/// Extract the payload of a reply line.
///
/// Verifies that the line echoes `address`, `action`, and `param`, then
/// returns the payload between the two-character length field and the
/// trailing three-digit checksum. Returns `None` on any prefix or length
/// mismatch; the caller keeps listening within its read window.
pub fn decode_reply(line: &str, address: u16, action: &str, param: u16) -> Option<String> {
    let line = line.trim_end_matches('\r').trim();
    let prefix = format!("{address:03}{action}{param:03}");
    if !line.is_ascii() || !line.starts_with(&prefix) || line.len() < 13 {
        return None;
    }
    // addr(3) + action(2) + param(3) + len(2) = 10 header chars, 3 checksum chars
    Some(line[10..line.len() - 3].trim().to_string())
}

/// Command-echo noise filter.
///
/// The RS-485 bus echoes outgoing commands back at the listener; a payload
/// containing `?` or shorter than two characters is such an echo, never data.
pub fn is_echo(payload: &str) -> bool {
    payload.contains('?') || payload.len() < 2
}

/// Decoded value of a compact scientific-notation payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scientific {
    /// A measured value.
    Value(f64),
    /// Sentinel `999999`: above the gauge's measuring range.
    OverRange,
    /// Sentinel `000000`: below the gauge's measuring range.
    LowVac,
}

/// Decode the six-digit scientific form: `mmmm` / 1000 * 10^(`ee` - 20).
///
/// Sentinel payloads map to [`Scientific::OverRange`] / [`Scientific::LowVac`].
/// Returns `None` for anything that is not exactly six ASCII digits.
pub fn decode_scientific(payload: &str) -> Option<Scientific> {
    match payload {
        "999999" => return Some(Scientific::OverRange),
        "000000" => return Some(Scientific::LowVac),
        _ => {}
    }
    if payload.len() != 6 || !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mantissa = payload[..4].parse::<f64>().ok()? / 1000.0;
    let exponent = payload[4..].parse::<i32>().ok()? - 20;
    Some(Scientific::Value(mantissa * 10f64.powi(exponent)))
}

/// Decode an all-digits payload as a plain base-10 integer.
///
/// Used for rotation speed, temperature, and power fields. Returns `None`
/// for empty or non-digit payloads.
pub fn decode_integer(payload: &str) -> Option<i64> {
    if payload.is_empty() || !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    payload.parse().ok()
}
