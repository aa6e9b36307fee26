//! Overflow/underflow split-merge codec.
//!
//! Narrows a wide integer plane to an 8-bit base plane plus three side
//! channels, the way 8-bit detector frames with overflow tables are stored:
//!
//! * `underflow`: original values at or below the baseline (base byte 0),
//!   stored in the narrowest signed width that holds them;
//! * `overflow1`: offset values in `255..65535` (base byte 255), as u16;
//! * `overflow2`: offset values `>= 65535` or negative (u16 slot 65535),
//!   as i32.
//!
//! Side channels list their values in pixel order.  [`merge`] reverses
//! [`split`] exactly for every `i32` input.

pub mod packing;

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OverflowError {
    #[error("{channel} channel holds {available} values but {needed} are referenced")]
    MissingValues { channel: &'static str, needed: usize, available: usize },
    #[error("side-channel data truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("unsupported underflow width: {0} bytes")]
    UnderflowWidth(usize),
}

// ── Baseline ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baseline {
    /// Estimate from the data (see [`estimate_baseline`]).
    Auto,
    /// Use the given offset; values at or below it become underflows.
    Value(i32),
    /// No underflow handling; the offset is 0 and negatives go to overflow2.
    Disabled,
}

/// Baseline heuristic.
///
/// Non-negative data uses the histogram mode; data with negatives uses the
/// mode of the values within mean ± 3σ.  When the mode sits less than 128
/// above the minimum the baseline is `min + 1`, otherwise `mode + 128`.
pub fn estimate_baseline(data: &[i32]) -> i32 {
    let Some(&min) = data.iter().min() else {
        return 0;
    };
    let mode = if min >= 0 { histogram_mode(data) } else { robust_mode(data) };
    if (mode as i64 - min as i64) < 128 {
        min.saturating_add(1)
    } else {
        mode.saturating_add(128)
    }
}

/// Most frequent value; ties resolve to the smallest value.
fn histogram_mode(data: &[i32]) -> i32 {
    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for &v in data {
        *counts.entry(v).or_insert(0) += 1;
    }
    let mut best = (0i32, 0usize);
    for (value, count) in counts {
        if count > best.1 {
            best = (value, count);
        }
    }
    best.0
}

fn robust_mode(data: &[i32]) -> i32 {
    let n = data.len() as f64;
    let mean = data.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = data.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    let (lo, hi) = (mean - 3.0 * var.sqrt(), mean + 3.0 * var.sqrt());
    let trimmed: Vec<i32> = data
        .iter()
        .copied()
        .filter(|&v| (v as f64) >= lo && (v as f64) <= hi)
        .collect();
    if trimmed.is_empty() {
        histogram_mode(data)
    } else {
        histogram_mode(&trimmed)
    }
}

// ── Planes ───────────────────────────────────────────────────────────────────

/// Underflow values in the narrowest signed width covering them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Underflow {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
}

impl Underflow {
    pub fn from_values(values: Vec<i32>) -> Self {
        let lo = values.iter().copied().min().unwrap_or(0);
        let hi = values.iter().copied().max().unwrap_or(0);
        if lo >= i8::MIN as i32 && hi <= i8::MAX as i32 {
            Underflow::I8(values.into_iter().map(|v| v as i8).collect())
        } else if lo >= i16::MIN as i32 && hi <= i16::MAX as i32 {
            Underflow::I16(values.into_iter().map(|v| v as i16).collect())
        } else {
            Underflow::I32(values)
        }
    }

    /// Element width in bytes.
    pub fn width(&self) -> usize {
        match self {
            Underflow::I8(_)  => 1,
            Underflow::I16(_) => 2,
            Underflow::I32(_) => 4,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Underflow::I8(v)  => v.len(),
            Underflow::I16(v) => v.len(),
            Underflow::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_i32_vec(&self) -> Vec<i32> {
        match self {
            Underflow::I8(v)  => v.iter().map(|&x| x as i32).collect(),
            Underflow::I16(v) => v.iter().map(|&x| x as i32).collect(),
            Underflow::I32(v) => v.clone(),
        }
    }
}

/// Result of [`split`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlanes {
    pub base:      Vec<u8>,
    pub baseline:  i32,
    /// `None` when underflow handling was disabled.
    pub underflow: Option<Underflow>,
    pub overflow1: Vec<u16>,
    pub overflow2: Vec<i32>,
}

impl SplitPlanes {
    pub fn merge(&self) -> Result<Vec<i32>, OverflowError> {
        merge(&self.base, self.baseline, self.underflow.as_ref(), &self.overflow1, &self.overflow2)
    }
}

const BASE_MAX:  i64 = 255;
const WIDE_MAX:  i64 = 65535;

/// Split a wide plane into an 8-bit base plane plus side channels.
pub fn split(data: &[i32], baseline: Baseline) -> SplitPlanes {
    let (baseline, mut underflow) = match baseline {
        Baseline::Auto     => (estimate_baseline(data), Some(Vec::new())),
        Baseline::Value(b) => (b, Some(Vec::new())),
        Baseline::Disabled => (0, None),
    };

    let mut base = Vec::with_capacity(data.len());
    let mut overflow1 = Vec::new();
    let mut overflow2 = Vec::new();

    for &x in data {
        let offset = x as i64 - baseline as i64;
        if let Some(uf) = underflow.as_mut() {
            if offset <= 0 {
                uf.push(x);
                base.push(0);
                continue;
            }
        }
        let mut wide = offset;
        if !(0..WIDE_MAX).contains(&offset) {
            overflow2.push(x.wrapping_sub(baseline));
            wide = WIDE_MAX;
        }
        if wide >= BASE_MAX {
            overflow1.push(wide as u16);
            base.push(BASE_MAX as u8);
        } else {
            base.push(wide as u8);
        }
    }

    SplitPlanes {
        base,
        baseline,
        underflow: underflow.map(Underflow::from_values),
        overflow1,
        overflow2,
    }
}

/// Rebuild the wide plane from a base plane and its side channels.
pub fn merge(
    base:      &[u8],
    baseline:  i32,
    underflow: Option<&Underflow>,
    overflow1: &[u16],
    overflow2: &[i32],
) -> Result<Vec<i32>, OverflowError> {
    let mut out: Vec<i32> = base.iter().map(|&b| b as i32).collect();

    let mut o1 = overflow1.iter();
    let mut used1 = 0;
    for v in out.iter_mut().filter(|v| **v == BASE_MAX as i32) {
        *v = *o1.next().ok_or(OverflowError::MissingValues {
            channel: "overflow1",
            needed: used1 + 1,
            available: overflow1.len(),
        })? as i32;
        used1 += 1;
    }

    let mut is_overflow2 = vec![false; out.len()];
    let mut o2 = overflow2.iter();
    let mut used2 = 0;
    for (v, flag) in out.iter_mut().zip(is_overflow2.iter_mut()) {
        if *v == WIDE_MAX as i32 {
            *v = *o2.next().ok_or(OverflowError::MissingValues {
                channel: "overflow2",
                needed: used2 + 1,
                available: overflow2.len(),
            })?;
            *flag = true;
            used2 += 1;
        }
    }

    let under = underflow.map(Underflow::to_i32_vec).unwrap_or_default();
    let mut uf = under.iter();
    let mut used_uf = 0;
    for (v, overflowed) in out.iter_mut().zip(is_overflow2) {
        if underflow.is_some() && !overflowed && *v == 0 {
            *v = *uf.next().ok_or(OverflowError::MissingValues {
                channel: "underflow",
                needed: used_uf + 1,
                available: under.len(),
            })?;
            used_uf += 1;
        } else {
            *v = v.wrapping_add(baseline);
        }
    }

    if used1 != overflow1.len() || used2 != overflow2.len() || used_uf != under.len() {
        tracing::warn!(
            "side channels hold unused values (overflow1 {}/{}, overflow2 {}/{}, underflow {}/{})",
            used1, overflow1.len(), used2, overflow2.len(), used_uf, under.len()
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_roundtrip(data: &[i32], baseline: Baseline) -> SplitPlanes {
        let planes = split(data, baseline);
        assert_eq!(planes.merge().unwrap(), data, "baseline {baseline:?}");
        planes
    }

    #[test]
    fn all_zero() {
        let data = vec![0; 64];
        for b in [Baseline::Auto, Baseline::Value(0), Baseline::Disabled] {
            assert_roundtrip(&data, b);
        }
    }

    #[test]
    fn all_negative() {
        let data: Vec<i32> = (1..200).map(|v| -v * 3).collect();
        for b in [Baseline::Auto, Baseline::Value(0), Baseline::Disabled] {
            assert_roundtrip(&data, b);
        }
    }

    #[test]
    fn mixed_sign_with_outliers() {
        let mut data: Vec<i32> = (0..500).map(|i| (i % 40) - 10).collect();
        data.extend([70_000, 1_000_000, -90_000, 65_535, 65_534, 255, 254, i32::MAX, i32::MIN]);
        for b in [Baseline::Auto, Baseline::Value(0), Baseline::Disabled, Baseline::Value(-5)] {
            assert_roundtrip(&data, b);
        }
    }

    #[test]
    fn disabled_baseline_routes_negatives_to_overflow2() {
        let planes = assert_roundtrip(&[-1, 0, 5, 300, 70_000], Baseline::Disabled);
        assert_eq!(planes.baseline, 0);
        assert!(planes.underflow.is_none());
        assert_eq!(planes.base, [255, 0, 5, 255, 255]);
        assert_eq!(planes.overflow1, [65535, 300, 65535]);
        assert_eq!(planes.overflow2, [-1, 70_000]);
    }

    #[test]
    fn underflow_width_is_minimal() {
        let small = split(&[-100, 50, 60], Baseline::Value(0));
        assert_eq!(small.underflow.as_ref().unwrap().width(), 1);
        let medium = split(&[-1000, 50], Baseline::Value(0));
        assert_eq!(medium.underflow.as_ref().unwrap().width(), 2);
        let large = split(&[-100_000, 50], Baseline::Value(0));
        assert_eq!(large.underflow.as_ref().unwrap().width(), 4);
    }

    #[test]
    fn baseline_near_minimum_uses_min_plus_one() {
        let data = [10, 10, 10, 12, 50];
        assert_eq!(estimate_baseline(&data), 11);
    }

    #[test]
    fn baseline_far_from_minimum_uses_mode_offset() {
        let mut data = vec![1000; 20];
        data.push(0);
        assert_eq!(estimate_baseline(&data), 1128);
    }

    #[test]
    fn robust_mode_ignores_outliers() {
        let mut data = vec![-5; 10];
        data.extend(vec![300; 30]);
        data.push(-1_000_000);
        // The extreme negative is trimmed, leaving 300 as the mode.
        assert_eq!(robust_mode(&data), 300);
    }

    #[test]
    fn merge_reports_missing_overflow() {
        let err = merge(&[255, 255], 0, None, &[300], &[]).unwrap_err();
        assert_eq!(err, OverflowError::MissingValues { channel: "overflow1", needed: 2, available: 1 });
    }

    proptest! {
        #[test]
        fn arbitrary_planes_roundtrip(data in proptest::collection::vec(any::<i32>(), 0..256)) {
            for b in [Baseline::Auto, Baseline::Value(0), Baseline::Disabled] {
                let planes = split(&data, b);
                prop_assert_eq!(planes.merge().unwrap(), data.clone());
            }
        }

        #[test]
        fn detector_like_planes_roundtrip(
            data in proptest::collection::vec(prop_oneof![8 => 0i32..400, 1 => -50i32..0, 1 => 60_000i32..200_000], 0..512)
        ) {
            let planes = split(&data, Baseline::Auto);
            prop_assert_eq!(planes.merge().unwrap(), data);
        }
    }
}
