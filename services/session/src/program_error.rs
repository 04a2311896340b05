//! Custom program error extraction
//!
//! A failure reaches us either as a structured transaction error
//! (`{"InstructionError":[0,{"Custom":17}]}`) or as free text
//! (`"custom program error: 0x11"`). Both yield the same integer.

use serde_json::Value;

/// Find a `Custom` code anywhere inside a structured transaction error
pub fn extract_custom_code_from_value(value: &Value) -> Option<u32> {
    match value {
        Value::Object(map) => {
            if let Some(code) = map.get("Custom").and_then(Value::as_u64) {
                return u32::try_from(code).ok();
            }
            map.values().find_map(extract_custom_code_from_value)
        }
        Value::Array(items) => items.iter().find_map(extract_custom_code_from_value),
        Value::String(text) => extract_custom_code_from_message(text),
        _ => None,
    }
}

/// Find a custom code in an error message or a single log line
///
/// Recognized forms:
/// - `custom program error: 0x1773` (hex, as printed by the runtime)
/// - `Custom(6003)` (Debug output of the instruction error)
/// - `"Custom":6003` / `Custom: 6003` (JSON and loose text)
/// - `Error Number: 6003` (Anchor log line)
pub fn extract_custom_code_from_message(message: &str) -> Option<u32> {
    let lower = message.to_ascii_lowercase();

    const MARKERS: [&str; 5] = [
        "custom program error:",
        "custom(",
        "\"custom\":",
        "custom:",
        "error number:",
    ];

    MARKERS.iter().find_map(|marker| {
        lower
            .find(marker)
            .and_then(|index| parse_code(&lower[index + marker.len()..]))
    })
}

/// First custom code mentioned in program logs
pub fn extract_custom_code_from_logs(logs: &[String]) -> Option<u32> {
    logs.iter()
        .find_map(|line| extract_custom_code_from_message(line))
}

/// Parse a leading decimal or `0x`-prefixed hex integer, skipping whitespace
fn parse_code(text: &str) -> Option<u32> {
    let text = text.trim_start();
    if let Some(hex) = text.strip_prefix("0x") {
        let digits: String = hex.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
        return u32::from_str_radix(&digits, 16).ok();
    }
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Heuristic for "the program has already decided this transaction is invalid"
///
/// Used to decide whether a failed delegate send may fall back to a raw send.
pub fn looks_like_program_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    extract_custom_code_from_message(message).is_some()
        || lower.contains("simulation failed")
        || lower.contains("instructionerror")
        || lower.contains("instruction error")
        || lower.contains("program failed")
}
