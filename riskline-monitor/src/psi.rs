//! Population stability index

/// PSI between an expected and an actual bin distribution.
///
/// `sum((a - e) * ln(a / e))` over bins, with both proportions floored at
/// `epsilon` so empty bins contribute a finite amount. Slices of different
/// lengths are compared over the shorter one.
pub fn population_stability_index(expected: &[f64], actual: &[f64], epsilon: f64) -> f64 {
    expected
        .iter()
        .zip(actual)
        .map(|(e, a)| {
            let e = e.max(epsilon);
            let a = a.max(epsilon);
            (a - e) * (a / e).ln()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_distributions_have_zero_psi() {
        let p = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(population_stability_index(&p, &p, 1e-4), 0.0);
    }

    #[test]
    fn test_psi_is_positive_and_symmetric_terms() {
        let e = [0.5, 0.5];
        let a = [0.9, 0.1];
        let psi = population_stability_index(&e, &a, 1e-4);
        let expected = (0.9 - 0.5) * (0.9f64 / 0.5).ln() + (0.1 - 0.5) * (0.1f64 / 0.5).ln();
        assert!((psi - expected).abs() < 1e-12);
        assert!(psi > 0.0);
    }

    #[test]
    fn test_empty_bins_stay_finite() {
        let psi = population_stability_index(&[1.0, 0.0], &[0.0, 1.0], 1e-4);
        assert!(psi.is_finite());
        assert!(psi > 10.0);
    }
}
