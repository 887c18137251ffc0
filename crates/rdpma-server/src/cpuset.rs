//! CPU bitmask parsing and thread pinning for the `-W`/`-K`/`-P` flags
//! (spec §6: "CPU bitmasks for network, KV-worker, and CQ-poll
//! threads"). Worker thread count is the number of bits set in the
//! KV-worker mask (spec §4.8).

use std::str::FromStr;

/// A CPU affinity mask parsed from a hex string (e.g. `"0xf0"` or
/// `"f0"`), one bit per logical CPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuMask {
    bits: u64,
}

impl CpuMask {
    pub fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    /// CPU ids with their bit set, ascending.
    pub fn cpus(&self) -> Vec<usize> {
        (0..64).filter(|cpu| self.bits & (1 << cpu) != 0).collect()
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones() as usize
    }
}

impl FromStr for CpuMask {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim_start_matches("0x").trim_start_matches("0X");
        u64::from_str_radix(trimmed, 16).map(CpuMask::from_bits)
    }
}

/// Pin the calling thread to `core_id` (Linux only); mirrors the
/// `sched_setaffinity`-based helper used elsewhere in this stack's
/// benchmark harness.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core_id: usize) -> Result<(), String> {
    use std::mem;

    unsafe {
        let mut cpu_set: libc::cpu_set_t = mem::zeroed();
        libc::CPU_SET(core_id, &mut cpu_set);
        let result = libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &cpu_set);
        if result == 0 {
            Ok(())
        } else {
            Err(format!("failed to pin thread to core {core_id}"))
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(core_id: usize) -> Result<(), String> {
    tracing::warn!(core_id, "thread affinity not supported on this platform");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_string_with_prefix() {
        let mask: CpuMask = "0xf".parse().unwrap();
        assert_eq!(mask.cpus(), vec![0, 1, 2, 3]);
        assert_eq!(mask.count(), 4);
    }

    #[test]
    fn parses_hex_string_without_prefix() {
        let mask: CpuMask = "3".parse().unwrap();
        assert_eq!(mask.cpus(), vec![0, 1]);
    }

    #[test]
    fn empty_mask_has_no_cpus() {
        let mask = CpuMask::from_bits(0);
        assert!(mask.cpus().is_empty());
        assert_eq!(mask.count(), 0);
    }

    #[test]
    fn pinning_does_not_error_on_a_plausible_core() {
        assert!(pin_current_thread(0).is_ok());
    }
}
