//! Inter-event duration diagnostics.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

/// Round half away from zero to 2 decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Strictly positive gaps between consecutive timestamps, in seconds,
/// sorted ascending.
pub fn calculate_durations(timestamps: &[NaiveDateTime]) -> Vec<f64> {
    let mut durations: Vec<f64> = timestamps
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64 / 1000.0)
        .filter(|d| *d > 0.0)
        .collect();
    durations.sort_by(|a, b| a.total_cmp(b));
    durations
}

/// Mean of the `n` smallest durations, rounded to 2 decimals. `0` when
/// fewer than `n` durations exist. Expects `durations` sorted ascending.
pub fn average_of_shortest(durations: &[f64], n: usize) -> f64 {
    if n == 0 || durations.len() < n {
        return 0.0;
    }
    round2(durations[..n].iter().sum::<f64>() / n as f64)
}

/// Most frequent duration after rounding to 2 decimals; the smallest value
/// wins ties. `0` for an empty input.
pub fn mode_duration(durations: &[f64]) -> f64 {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for d in durations.iter().filter(|d| d.is_finite()) {
        *counts.entry((d * 100.0).round() as i64).or_default() += 1;
    }

    // BTreeMap iterates ascending, so keeping the first maximum resolves ties
    // towards the smallest duration.
    let mut best: Option<(i64, usize)> = None;
    for (key, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((key, count));
        }
    }
    best.map(|(key, _)| key as f64 / 100.0).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_calculate_durations_drops_zero_gaps_and_sorts() {
        let ts = vec![at(8, 0, 0), at(8, 2, 0), at(8, 2, 0), at(8, 2, 30)];
        assert_eq!(calculate_durations(&ts), vec![30.0, 120.0]);
        assert!(calculate_durations(&[at(8, 0, 0)]).is_empty());
    }

    #[test]
    fn test_average_of_shortest() {
        assert_eq!(average_of_shortest(&[10.0, 20.0], 3), 0.0);
        assert_eq!(average_of_shortest(&[10.0, 20.0, 31.0, 100.0], 3), 20.33);
        assert_eq!(average_of_shortest(&[], 0), 0.0);
    }

    #[test]
    fn test_mode_duration() {
        assert_eq!(mode_duration(&[]), 0.0);
        assert_eq!(mode_duration(&[30.0, 45.0, 45.0, 60.0]), 45.0);
        // Tie between 30 and 60 resolves to the smaller value.
        assert_eq!(mode_duration(&[60.0, 30.0]), 30.0);
        assert_eq!(mode_duration(&[12.344, 12.341, 50.0]), 12.34);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(8.333333), 8.33);
        assert_eq!(round2(16.666666), 16.67);
        assert_eq!(round2(-1.005), -1.0);
    }
}
