//! Rolling percentile ranks of spread and volume
//!
//! Each bar is ranked against the trailing window of W bars that ends at
//! (and includes) itself. Rank = count(window values <= v) / W, so the
//! current bar always ranks at least 1/W. A window holding a malformed bar
//! has fewer than W usable values and yields no rank.
//!
//! The window is a ring buffer ([`VecDeque`]) of the last W values; a rank
//! costs one O(W) scan, O(N*W) for a series. W is small (20 by default) so
//! the scan beats maintaining an order-statistics tree.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

use crate::bar::Bar;
use crate::config::validate_window;
use crate::error::Result;

/// Percentile ranks of one bar within its window, both in (0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarPercentiles {
    pub spread_pct: f64,
    pub volume_pct: f64,
}

/// Rank of `value` among `window`, ties counted inclusively.
/// Non-finite entries are skipped; `None` when nothing finite remains.
pub fn percentile_rank<'a>(window: impl IntoIterator<Item = &'a f64>, value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let mut valid = 0usize;
    let mut at_or_below = 0usize;
    for v in window.into_iter().filter(|v| v.is_finite()) {
        valid += 1;
        if *v <= value {
            at_or_below += 1;
        }
    }
    if valid == 0 {
        return None;
    }
    Some(at_or_below as f64 / valid as f64)
}

/// Fixed-capacity trailing window that ranks each value as it is pushed
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<Option<f64>>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Result<Self> {
        validate_window(capacity)?;
        Ok(Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        })
    }

    /// Push the next value (`None` for a rejected bar) and rank it.
    ///
    /// Returns `None` until the window is full, and while any of the W
    /// slots holds a rejected value.
    pub fn push(&mut self, value: Option<f64>) -> Option<f64> {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);

        if self.values.len() < self.capacity {
            return None;
        }
        let current = value?;
        if self.values.iter().any(|v| v.is_none()) {
            return None;
        }
        percentile_rank(self.values.iter().flatten(), current)
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }
}

/// Computes per-bar spread and volume percentile ranks over a series
#[derive(Debug, Clone, Copy)]
pub struct RollingStats {
    window: usize,
}

impl RollingStats {
    pub fn new(window: usize) -> Result<Self> {
        validate_window(window)?;
        Ok(Self { window })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// One entry per bar; `None` for the first W-1 bars and for malformed bars.
    pub fn compute(&self, bars: &[Bar]) -> Vec<Option<BarPercentiles>> {
        let mut spreads = RollingWindow {
            capacity: self.window,
            values: VecDeque::with_capacity(self.window),
        };
        let mut volumes = spreads.clone();

        bars.iter()
            .enumerate()
            .map(|(idx, bar)| {
                let (spread, volume) = match bar.defect() {
                    None => (Some(bar.spread()), Some(bar.volume)),
                    Some(reason) => {
                        warn!("Excluding malformed bar {} ({}) from rolling window: {}", idx, bar.timestamp, reason);
                        (None, None)
                    }
                };
                let spread_pct = spreads.push(spread);
                let volume_pct = volumes.push(volume);
                match (spread_pct, volume_pct) {
                    (Some(spread_pct), Some(volume_pct)) => Some(BarPercentiles {
                        spread_pct,
                        volume_pct,
                    }),
                    _ => None,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::test_util::bars_from;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_warmup_is_undefined() {
        let bars = bars_from(&[(1.0, 2.0, 1.0, 10.0); 5]);
        let pcts = RollingStats::new(3).unwrap().compute(&bars);
        assert_eq!(pcts.len(), 5);
        assert!(pcts[0].is_none());
        assert!(pcts[1].is_none());
        assert!(pcts[2..].iter().all(|p| p.is_some()));
    }

    #[test]
    fn test_ascending_spreads_descending_volumes() {
        let rows: Vec<_> = (1..=5)
            .map(|i| (10.0, 10.5, i as f64, (6 - i) as f64))
            .collect();
        let pcts = RollingStats::new(3).unwrap().compute(&bars_from(&rows));

        for p in pcts[2..].iter().flatten() {
            assert!(approx(p.spread_pct, 1.0));
            assert!(approx(p.volume_pct, 1.0 / 3.0));
        }
    }

    #[test]
    fn test_ties_count_inclusively() {
        let bars = bars_from(&[(1.0, 2.0, 1.0, 10.0); 4]);
        let pcts = RollingStats::new(4).unwrap().compute(&bars);
        let last = pcts[3].unwrap();
        assert!(approx(last.spread_pct, 1.0));
        assert!(approx(last.volume_pct, 1.0));
    }

    #[test]
    fn test_window_of_one_always_ranks_top() {
        let bars = bars_from(&[(1.0, 2.0, 3.0, 10.0), (1.0, 2.0, 1.0, 5.0)]);
        let pcts = RollingStats::new(1).unwrap().compute(&bars);
        for p in pcts.iter().flatten() {
            assert_eq!(p.spread_pct, 1.0);
            assert_eq!(p.volume_pct, 1.0);
        }
        assert!(pcts.iter().all(|p| p.is_some()));
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(RollingStats::new(0).is_err());
        assert!(RollingWindow::new(0).is_err());
    }

    #[test]
    fn test_malformed_bar_excluded_not_zeroed() {
        let rows: Vec<_> = (1..=5).map(|i| (1.0, 2.0, i as f64, 10.0 * i as f64)).collect();
        let mut bars = bars_from(&rows);
        bars[1].volume = f64::NAN;

        let pcts = RollingStats::new(3).unwrap().compute(&bars);
        // every window still covering bar 1 is short of W usable values
        assert!(pcts[1].is_none());
        assert!(pcts[2].is_none());
        assert!(pcts[3].is_none());
        // bar 4 ranks among bars 2..=4 only
        let p = pcts[4].unwrap();
        assert!(approx(p.volume_pct, 1.0));
        assert!(approx(p.spread_pct, 1.0));
    }

    #[test]
    fn test_window_of_mostly_malformed_bars_is_unranked() {
        let mut bars = bars_from(&[(1.0, 2.0, 1.0, 10.0), (1.0, 2.0, 2.0, 20.0), (1.0, 2.0, 3.0, 30.0)]);
        bars[0].volume = f64::NAN;
        bars[1].close = f64::NAN;

        let pcts = RollingStats::new(3).unwrap().compute(&bars);
        assert!(pcts.iter().all(|p| p.is_none()));
    }

    #[test]
    fn test_compute_rank_is_monotonic_in_spread() {
        let spreads = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
        let rows: Vec<_> = spreads.iter().map(|s| (10.0, 10.5, *s, 100.0)).collect();
        let bars = bars_from(&rows);
        let w = spreads.len();

        // rank each bar at the end of a window holding all the others
        let ranks: Vec<f64> = (0..w)
            .map(|i| {
                let mut ordered: Vec<_> = bars.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, b)| *b).collect();
                ordered.push(bars[i]);
                for (k, bar) in ordered.iter_mut().enumerate() {
                    bar.timestamp = crate::bar::test_util::day(k);
                }
                RollingStats::new(w).unwrap().compute(&ordered)[w - 1].unwrap().spread_pct
            })
            .collect();

        for i in 0..w {
            for j in 0..w {
                if spreads[i] <= spreads[j] {
                    assert!(ranks[i] <= ranks[j], "spread {} ranked above {}", spreads[i], spreads[j]);
                }
            }
        }
        assert!(approx(ranks[5], 1.0));
        assert!(approx(ranks[1], 2.0 / 8.0));
    }

    #[test]
    fn test_percentile_rank_monotonic_within_window() {
        let window = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
        for a in window {
            for b in window {
                if a <= b {
                    assert!(percentile_rank(&window, a).unwrap() <= percentile_rank(&window, b).unwrap());
                }
            }
        }
        assert_eq!(percentile_rank(&window, f64::NAN), None);
        assert_eq!(percentile_rank(&[f64::NAN], 1.0), None);
    }

    #[test]
    fn test_ring_buffer_matches_slice_rank() {
        let values = [5.0, 3.0, 8.0, 1.0, 9.0, 2.0, 7.0];
        let mut window = RollingWindow::new(3).unwrap();
        for (i, v) in values.iter().enumerate() {
            let rank = window.push(Some(*v));
            if i >= 2 {
                assert_eq!(rank, percentile_rank(&values[i - 2..=i], *v));
                assert!(window.is_full());
            } else {
                assert_eq!(rank, None);
            }
        }
    }
}
