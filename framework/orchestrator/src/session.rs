use std::time::{SystemTime, UNIX_EPOCH};

/// Name for a detached run session: `scn_<sanitized scenario name>_<millis in base36>`.
///
/// Any character outside `[A-Za-z0-9_-]` in the scenario name is replaced with `_`. The
/// clock is passed in as milliseconds so the name is reproducible in tests.
pub fn detached_session_name(scenario_name: &str, now_ms: u64) -> String {
    let sanitized: String = scenario_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("scn_{sanitized}_{}", to_base36(now_ms))
}

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
