use std::time::Duration;

use crate::Map;
use crate::common::manager::common::format_duration;
use crate::common::utils::time::parse_hms_time;

/// Format a duration as a SLURM time string, e.g. 01:05:02
pub fn format_slurm_duration(duration: &Duration) -> String {
    format_duration(duration)
}

/// Slurm expects memory in megabytes; requests are rounded up.
pub fn format_slurm_memory(bytes: u64) -> String {
    let megabytes = bytes.div_ceil(1 << 20).max(1);
    format!("{megabytes}M")
}

pub fn parse_slurm_datetime(datetime: &str) -> anyhow::Result<chrono::NaiveDateTime> {
    Ok(chrono::NaiveDateTime::parse_from_str(
        datetime,
        "%Y-%m-%dT%H:%M:%S",
    )?)
}

pub fn parse_slurm_duration(value: &str) -> anyhow::Result<Duration> {
    if let Some(p) = value.find('-') {
        let days: u64 = value[..p].parse()?;
        let time = parse_hms_time(&value[p + 1..])?;
        Ok(time + Duration::from_secs(days * 24 * 3600))
    } else {
        parse_hms_time(value)
    }
}

/// Parse <key>=<value> pairs from the output of `scontrol show job <job-id>`.
pub fn get_scontrol_items(output: &str) -> Map<&str, &str> {
    let mut map = Map::new();
    for line in output.lines() {
        for item in line.trim().split(' ') {
            let iter: Vec<_> = item.splitn(2, '=').collect();
            if iter.len() < 2 {
                continue;
            }
            let (key, value) = (iter[0], iter[1]);
            map.insert(key, value);
        }
    }
    map
}
