use std::time::Duration;

use nom::character::complete::alpha0;
use nom::sequence::tuple;

use crate::common::manager::common::format_duration;
use crate::common::parser::{consume_all, p_u64};

/// Format a duration as a PBS time string, e.g. 01:05:02
pub fn format_pbs_duration(duration: &Duration) -> String {
    format_duration(duration)
}

/// Format a byte count as a PBS size value.
pub fn format_pbs_memory(bytes: u64) -> String {
    format!("{bytes}b")
}

/// Parses PBS size values (`1024kb`, `3gb`, `512`) into bytes.
/// Word based units (`w`, `kw`, ...) assume 8 byte words.
pub fn parse_pbs_memory(value: &str) -> anyhow::Result<u64> {
    let (amount, unit) = consume_all(tuple((p_u64, alpha0)), value.trim())?;
    let multiplier: u64 = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1 << 10,
        "mb" => 1 << 20,
        "gb" => 1 << 30,
        "tb" => 1 << 40,
        "pb" => 1 << 50,
        "w" => 8,
        "kw" => 8 << 10,
        "mw" => 8 << 20,
        "gw" => 8 << 30,
        unit => anyhow::bail!("Unknown PBS size unit `{unit}` in `{value}`"),
    };
    amount
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("PBS size `{value}` does not fit into 64 bits"))
}
