//! Human-readable index diagnostics for the `-h` CLI flag (spec §6),
//! built on `rdpma-index`'s introspection methods (SPEC_FULL.md §3:
//! "the original index exposes introspection methods used by the
//! server's `-h` human-readable stats flag").

use rdpma_index::Index;
use std::fmt::Write as _;

pub fn format_stats(index: &Index) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "directory depth:    {}", index.depth());
    let _ = writeln!(out, "directory capacity: {}", index.capacity());
    let _ = writeln!(out, "utilization:        {:.2}%", index.utilization() * 100.0);
    let _ = writeln!(out, "segment loads:      {:?}", index.segment_loads());
    let _ = writeln!(out, "per-node freqs:     {:?}", index.freqs());
    out
}
