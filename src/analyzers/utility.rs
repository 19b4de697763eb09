/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Computes the population standard deviation given a pre-computed mean.
/// Returns 0.0 for empty input.
pub fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;

    variance.sqrt()
}

/// `sum(value * weight) / sum(weight)` over `(value, weight)` pairs.
/// Returns 0.0 when the total weight is not positive.
pub fn weighted_mean(pairs: impl IntoIterator<Item = (f64, f64)>) -> f64 {
    let (numerator, denominator) = pairs
        .into_iter()
        .fold((0.0, 0.0), |(n, d), (value, weight)| (n + value * weight, d + weight));
    ratio_or(numerator, denominator, 0.0)
}

/// `numerator / denominator`, or `fallback` when the division is undefined
/// or the result is not finite.
pub fn ratio_or(numerator: f64, denominator: f64, fallback: f64) -> f64 {
    if denominator <= 0.0 {
        return fallback;
    }
    let value = numerator / denominator;
    if value.is_finite() { value } else { fallback }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_stddev() {
        assert_eq!(mean(&[]), 0.0);
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&values);
        assert_eq!(m, 5.0);
        assert_eq!(stddev(&values, m), 2.0);
    }

    #[test]
    fn test_weighted_mean() {
        assert_eq!(weighted_mean([(30.0, 1000.0), (60.0, 2000.0)]), 50.0);
        assert_eq!(weighted_mean([(30.0, 0.0)]), 0.0);
        assert_eq!(weighted_mean(std::iter::empty()), 0.0);
    }

    #[test]
    fn test_ratio_or_guards() {
        assert_eq!(ratio_or(1.0, 0.0, 143.0), 143.0);
        assert_eq!(ratio_or(1.0, -2.0, 0.0), 0.0);
        assert_eq!(ratio_or(f64::INFINITY, 1.0, 0.0), 0.0);
        assert_eq!(ratio_or(3.0, 2.0, 0.0), 1.5);
    }
}
