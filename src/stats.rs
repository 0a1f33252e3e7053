//! Collection statistics (SPEC_FULL.md §10 — supplemented feature).
//!
//! The base spec's `collect_garbage(ctx, optional stats)` leaves the stats
//! payload unspecified; `kos_perf.c` in `original_source/` tracks exactly
//! these counters, so they're surfaced here as an optional out-parameter
//! rather than invented from scratch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub pages_before: usize,
    pub pages_after: usize,
    pub objects_evacuated: usize,
}

impl GcStats {
    pub fn new() -> GcStats {
        GcStats::default()
    }

    /// Bytes-equivalent pages freed by this cycle; zero if the cycle grew
    /// the used set (e.g. nothing was collectible).
    pub fn pages_freed(&self) -> usize {
        self.pages_before.saturating_sub(self.pages_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_freed_saturates_at_zero() {
        let s = GcStats {
            pages_before: 2,
            pages_after: 5,
            objects_evacuated: 0,
        };
        assert_eq!(s.pages_freed(), 0);
    }

    #[test]
    fn pages_freed_reports_difference() {
        let s = GcStats {
            pages_before: 10,
            pages_after: 4,
            objects_evacuated: 30,
        };
        assert_eq!(s.pages_freed(), 6);
    }
}
