/// Divides `sum` by `count`, returning 0.0 when there is nothing to average.
pub fn average(sum: f64, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    sum / count as f64
}

/// Share of `part` in `total` as a percentage. Returns 0.0 for an empty total.
pub fn pct(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_of_nothing_is_zero() {
        assert_eq!(average(42.0, 0), 0.0);
    }

    #[test]
    fn test_pct_normal_values() {
        assert_eq!(pct(50, 100), 50.0);
        assert_eq!(pct(1, 4), 25.0);
        assert_eq!(pct(10, 0), 0.0);
    }
}
