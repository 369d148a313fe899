//! Multi-field rolling normalizer, ported from `statistics_pack_t<T>`.
//!
//! `WindowedMoments` only tracks a single numeric stream; record types
//! binarized by `tsi-dataset` carry several numeric fields per row, so this
//! wraps one `WindowedMoments` per field behind a getter/setter pair.

use crate::moments::WindowedMoments;

/// A value that can be checked for validity before contributing to a
/// rolling pack's statistics (e.g. a record with all-NaN fields should not
/// skew the normalizer).
pub trait Normalizable {
    fn is_valid(&self) -> bool;
}

/// Read/write access to one numeric field of `T`, expressed as free
/// functions so `RollingPack` can stay generic over arbitrary record
/// layouts without a derive macro.
pub struct FieldAccessor<T> {
    pub getter: Box<dyn Fn(&T) -> f64 + Send + Sync>,
    pub setter: Box<dyn Fn(&mut T, f64) + Send + Sync>,
}

impl<T> FieldAccessor<T> {
    pub fn new(
        getter: impl Fn(&T) -> f64 + Send + Sync + 'static,
        setter: impl Fn(&mut T, f64) + Send + Sync + 'static,
    ) -> Self {
        Self {
            getter: Box::new(getter),
            setter: Box::new(setter),
        }
    }
}

/// Rolling statistics for every numeric field of a record type `T`, kept in
/// lockstep so `normalize` can z-score a whole record in one pass.
pub struct RollingPack<T> {
    stats: Vec<WindowedMoments>,
    accessors: Vec<FieldAccessor<T>>,
}

impl<T: Normalizable + Clone> RollingPack<T> {
    pub fn new(window_size: usize, accessors: Vec<FieldAccessor<T>>) -> Self {
        let stats = (0..accessors.len())
            .map(|_| WindowedMoments::new(window_size))
            .collect();
        Self { stats, accessors }
    }

    pub fn update(&mut self, data_point: &T) {
        if !data_point.is_valid() {
            return;
        }
        for (stat, accessor) in self.stats.iter_mut().zip(self.accessors.iter()) {
            let value = (accessor.getter)(data_point);
            stat.update(value);
        }
    }

    /// Returns a z-scored copy of `data_point`; invalid records pass through
    /// unchanged, matching the reference implementation.
    pub fn normalize(&self, data_point: &T) -> T {
        let mut normalized = data_point.clone();
        if !data_point.is_valid() {
            return normalized;
        }
        for (stat, accessor) in self.stats.iter().zip(self.accessors.iter()) {
            let original = (accessor.getter)(data_point);
            let scaled = stat.normalize(original);
            (accessor.setter)(&mut normalized, scaled);
        }
        normalized
    }

    pub fn ready(&self) -> bool {
        self.stats.iter().all(WindowedMoments::ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Row {
        open: f64,
        close: f64,
    }

    impl Normalizable for Row {
        fn is_valid(&self) -> bool {
            self.open.is_finite() && self.close.is_finite()
        }
    }

    fn row_accessors() -> Vec<FieldAccessor<Row>> {
        vec![
            FieldAccessor::new(|r: &Row| r.open, |r: &mut Row, v| r.open = v),
            FieldAccessor::new(|r: &Row| r.close, |r: &mut Row, v| r.close = v),
        ]
    }

    #[test]
    fn pack_normalizes_each_field_independently() {
        let mut pack = RollingPack::new(2, row_accessors());
        pack.update(&Row { open: 1.0, close: 10.0 });
        pack.update(&Row { open: 3.0, close: 30.0 });
        assert!(pack.ready());
        let normalized = pack.normalize(&Row { open: 2.0, close: 20.0 });
        assert!(normalized.open.abs() < 1e-9);
        assert!(normalized.close.abs() < 1e-9);
    }

    #[test]
    fn invalid_rows_do_not_update_statistics() {
        let mut pack = RollingPack::new(2, row_accessors());
        pack.update(&Row { open: f64::NAN, close: 1.0 });
        assert!(!pack.ready());
    }
}
