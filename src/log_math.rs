/// Log of zero, used as the additive identity in log space
pub const LOG_ZERO: f64 = f64::NEG_INFINITY;

/// Numerically stable `ln(exp(a) + exp(b))`.
/// # Arguments
/// * `a` - first log value
/// * `b` - second log value
/// # Examples
/// ```rust
/// use mpd_con::log_math::{log_add, LOG_ZERO};
/// let v = log_add(2.0_f64.ln(), 3.0_f64.ln());
/// assert!((v - 5.0_f64.ln()).abs() < 1e-12);
/// assert_eq!(log_add(LOG_ZERO, 1.5), 1.5);
/// ```
pub fn log_add(a: f64, b: f64) -> f64 {
    if a == LOG_ZERO {
        return b;
    }
    if b == LOG_ZERO {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// Log-sum-exp over an iterator of log values, `LOG_ZERO` if it is empty
pub fn log_sum<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    values.into_iter().fold(LOG_ZERO, log_add)
}

/// Converts a probability vector to log space
pub fn to_log(values: &[f64]) -> Vec<f64> {
    values.iter().map(|v| v.ln()).collect()
}

/// Returns true if two log values describe the same probability within a relative tolerance
pub fn log_close(a: f64, b: f64, tolerance: f64) -> bool {
    if a == b {
        // covers matching infinities
        return true;
    }
    (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_add_identity() {
        assert_eq!(log_add(LOG_ZERO, LOG_ZERO), LOG_ZERO);
        assert_eq!(log_add(-3.0, LOG_ZERO), -3.0);
    }

    #[test]
    fn test_log_add_extremes() {
        // large differences must not overflow
        let v = log_add(1000.0, 0.0);
        assert!((v - 1000.0).abs() < 1e-9);
        let v = log_add(-1000.0, -1000.0);
        assert!((v - (-1000.0 + 2.0_f64.ln())).abs() < 1e-9);
    }

    #[test]
    fn test_log_sum() {
        let values = [0.1_f64, 0.2, 0.3, 0.4];
        let total = log_sum(values.iter().map(|v| v.ln()));
        assert!(total.abs() < 1e-12);
        assert_eq!(log_sum(std::iter::empty()), LOG_ZERO);
    }

    #[test]
    fn test_log_close() {
        assert!(log_close(-100.0, -100.0000001, 1e-6));
        assert!(!log_close(-100.0, -101.0, 1e-6));
        assert!(log_close(LOG_ZERO, LOG_ZERO, 1e-6));
    }
}
