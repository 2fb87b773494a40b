//! Mold selection and the refork policy. The mold is a distinguished
//! worker that forks the next generation instead of serving requests;
//! picking a good one is what makes reforking pay for the copy-on-write
//! memory it buys.

use std::fs;

use crate::master::WorkerHandle;

#[derive(Debug, Clone, Copy, Default)]
pub struct MemStats {
    pub private_dirty: u64,
    pub private_clean: u64,
}

impl MemStats {
    pub fn resident_private(&self) -> u64 {
        self.private_dirty + self.private_clean
    }
}

/// Reads `/proc/<pid>/smaps_rollup` on Linux; zeroed elsewhere.
#[cfg(target_os = "linux")]
pub fn memory_stats(pid: i32) -> MemStats {
    let path = format!("/proc/{pid}/smaps_rollup");
    let text = match fs::read_to_string(&path) {
        Ok(t) => t,
        Err(_) => return MemStats::default(),
    };
    let mut stats = MemStats::default();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("Private_Dirty:") {
            stats.private_dirty = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("Private_Clean:") {
            stats.private_clean = parse_kb(rest);
        }
    }
    stats
}

#[cfg(not(target_os = "linux"))]
pub fn memory_stats(_pid: i32) -> MemStats {
    MemStats::default()
}

#[cfg(target_os = "linux")]
fn parse_kb(field: &str) -> u64 {
    field
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse::<u64>()
        .unwrap_or(0)
}

/// Default mold selector: largest resident-private memory wins (most
/// warmed-up, best copy-on-write parent). Off Linux `memory_stats` is
/// always zero, so this degenerates to "oldest worker by tick", as
/// requires — ties broken by the earliest recorded tick.
pub fn default_mold_selector<'a>(candidates: impl Iterator<Item = (usize, &'a WorkerHandle)>) -> Option<usize> {
    candidates
        .max_by(|(_, a), (_, b)| {
            let mem_a = memory_stats(a.pid.as_raw()).resident_private();
            let mem_b = memory_stats(b.pid.as_raw()).resident_private();
            mem_a.cmp(&mem_b).then_with(|| b.tick.cmp(&a.tick))
        })
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resident_private_sums_dirty_and_clean() {
        let stats = MemStats { private_dirty: 10, private_clean: 5 };
        assert_eq!(stats.resident_private(), 15);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn parse_kb_strips_the_unit_suffix() {
        assert_eq!(parse_kb("   1234 kB"), 1234);
    }
}
