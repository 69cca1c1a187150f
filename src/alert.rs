// =============================================================================
// Alert Policy — stateless threshold predicates
// =============================================================================
//
// Thresholds are configuration, not code; these functions only encode the
// comparison semantics.
// =============================================================================

/// Whether a price deviation warrants a high-change alert.
///
/// Strict greater-than on the absolute deviation: a change of exactly the
/// threshold does not alert.
pub fn is_price_alert(change_percent: f64, threshold: f64) -> bool {
    change_percent.abs() > threshold
}

/// Whether an observed trade volume is an outlier against the per-second
/// baseline. A zero or negative baseline (empty window) never flags.
pub fn is_volume_alert(observed: f64, baseline: f64) -> bool {
    baseline > 0.0 && observed > baseline
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_alert_boundary_is_strict() {
        assert!(!is_price_alert(0.4, 0.5));
        assert!(!is_price_alert(0.5, 0.5));
        assert!(is_price_alert(0.6, 0.5));
    }

    #[test]
    fn price_alert_uses_absolute_change() {
        assert!(is_price_alert(-0.6, 0.5));
        assert!(!is_price_alert(-0.4, 0.5));
    }

    #[test]
    fn volume_alert_requires_positive_baseline() {
        assert!(!is_volume_alert(100.0, 0.0));
        assert!(is_volume_alert(100.0, 50.0));
        assert!(!is_volume_alert(40.0, 50.0));
        assert!(!is_volume_alert(50.0, 50.0));
    }
}
