use proptest::prelude::*;
use tsi_math::RollingMoments;

proptest! {
    #[test]
    fn welford_variance_matches_closed_form(values in prop::collection::vec(-1000.0f64..1000.0, 2..200)) {
        let mut m = RollingMoments::new();
        for &x in &values {
            m.update(x);
        }
        let n = values.len() as f64;
        let mean: f64 = values.iter().sum::<f64>() / n;
        let sample_var: f64 = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let rel_err = if sample_var.abs() > 1e-9 {
            (m.variance() - sample_var).abs() / sample_var.abs()
        } else {
            (m.variance() - sample_var).abs()
        };
        prop_assert!(rel_err < 1e-6);
    }
}
