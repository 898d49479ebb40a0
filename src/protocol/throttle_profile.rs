//! Throttle profile lookup tables
//!
//! The powerbase maps each hand controller position onto motor output with a
//! 96-entry table per slot. The table is uploaded as six 17-byte blocks: one
//! block index byte followed by 16 output values. Blocks must be written in
//! order 0..5.

use serde::{Deserialize, Serialize};

use crate::types::MAX_MULTIPLIER;
use crate::{PowerbaseError, Result};

/// Curve shape used to generate a throttle profile.
///
/// Every curve maps normalized input in `[0,1]` to normalized output in
/// `[0,1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThrottleCurve {
    /// `f(x) = x`
    #[default]
    Linear,
    /// `f(x) = x^exponent`, exponent finite and > 0.
    Exponential { exponent: f32 },
    /// Input quantized into `steps` equal bands (at least 2).
    Stepped { steps: u8 },
}

impl ThrottleCurve {
    pub fn exponential(exponent: f32) -> Result<Self> {
        let curve = ThrottleCurve::Exponential { exponent };
        curve.validate()?;
        Ok(curve)
    }

    pub fn stepped(steps: u8) -> Result<Self> {
        let curve = ThrottleCurve::Stepped { steps };
        curve.validate()?;
        Ok(curve)
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            ThrottleCurve::Linear => Ok(()),
            ThrottleCurve::Exponential { exponent } => {
                if !exponent.is_finite() {
                    return Err(PowerbaseError::invalid_curve("exponent must be finite"));
                }
                if exponent <= 0.0 {
                    return Err(PowerbaseError::invalid_curve(format!(
                        "exponent must be > 0, got {}",
                        exponent
                    )));
                }
                Ok(())
            }
            ThrottleCurve::Stepped { steps } if steps < 2 => Err(PowerbaseError::invalid_curve(
                format!("stepped curve needs at least 2 steps, got {}", steps),
            )),
            ThrottleCurve::Stepped { .. } => Ok(()),
        }
    }

    /// Evaluate the curve at normalized input `x`.
    pub fn evaluate(&self, x: f32) -> f32 {
        let x = x.clamp(0.0, 1.0);
        match *self {
            ThrottleCurve::Linear => x,
            ThrottleCurve::Exponential { exponent } => x.powf(exponent),
            ThrottleCurve::Stepped { steps } => {
                let steps = f32::from(steps.max(2));
                let band = (x * steps).floor().min(steps - 1.0);
                band / (steps - 1.0)
            }
        }
    }
}

/// A complete 96-entry throttle lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleProfile {
    table: [u8; ThrottleProfile::LEN],
}

impl ThrottleProfile {
    /// Number of table entries.
    pub const LEN: usize = 96;
    /// Number of upload blocks.
    pub const BLOCKS: usize = 6;
    /// Values per upload block.
    pub const BLOCK_LEN: usize = 16;

    /// Generate a profile from a curve.
    pub fn from_curve(curve: &ThrottleCurve) -> Result<Self> {
        curve.validate()?;
        let max = f32::from(MAX_MULTIPLIER);
        let table = std::array::from_fn(|i| {
            let x = i as f32 / (Self::LEN - 1) as f32;
            (curve.evaluate(x) * max).round().clamp(0.0, max) as u8
        });
        Ok(Self { table })
    }

    pub fn values(&self) -> &[u8; Self::LEN] {
        &self.table
    }

    /// Block `index` (0..6) of the upload sequence.
    pub fn block(&self, index: usize) -> Option<ThrottleProfileBlock> {
        if index >= Self::BLOCKS {
            return None;
        }
        let start = index * Self::BLOCK_LEN;
        let mut values = [0u8; Self::BLOCK_LEN];
        values.copy_from_slice(&self.table[start..start + Self::BLOCK_LEN]);
        Some(ThrottleProfileBlock { index: index as u8, values })
    }

    /// All six blocks in upload order.
    pub fn blocks(&self) -> impl Iterator<Item = ThrottleProfileBlock> + '_ {
        (0..Self::BLOCKS).filter_map(|i| self.block(i))
    }
}

impl Default for ThrottleProfile {
    fn default() -> Self {
        let max = f32::from(MAX_MULTIPLIER);
        let table = std::array::from_fn(|i| {
            (i as f32 / (Self::LEN - 1) as f32 * max).round() as u8
        });
        Self { table }
    }
}

/// One 17-byte throttle profile upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleProfileBlock {
    pub index: u8,
    pub values: [u8; ThrottleProfile::BLOCK_LEN],
}

impl ThrottleProfileBlock {
    /// Encoded block length in bytes.
    pub const LEN: usize = 1 + ThrottleProfile::BLOCK_LEN;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0] = self.index;
        bytes[1..].copy_from_slice(&self.values);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn is_non_decreasing(values: &[u8]) -> bool {
        values.windows(2).all(|w| w[0] <= w[1])
    }

    #[test]
    fn linear_profile_spans_full_range() {
        let profile = ThrottleProfile::from_curve(&ThrottleCurve::Linear).unwrap();
        let values = profile.values();
        assert_eq!(values[0], 0);
        assert_eq!(values[95], 63);
        assert!(is_non_decreasing(values));
        assert_eq!(profile, ThrottleProfile::default());
    }

    #[test]
    fn stepped_profile_is_piecewise_constant() {
        let profile = ThrottleProfile::from_curve(&ThrottleCurve::stepped(4).unwrap()).unwrap();
        let mut distinct: Vec<u8> = profile.values().to_vec();
        distinct.dedup();
        assert_eq!(distinct, vec![0, 21, 42, 63]);
    }

    #[test]
    fn invalid_curves_are_rejected() {
        assert!(ThrottleCurve::exponential(0.0).is_err());
        assert!(ThrottleCurve::exponential(-1.0).is_err());
        assert!(ThrottleCurve::exponential(f32::NAN).is_err());
        assert!(ThrottleCurve::stepped(1).is_err());
        assert!(
            ThrottleProfile::from_curve(&ThrottleCurve::Exponential { exponent: f32::INFINITY })
                .is_err()
        );
    }

    #[test]
    fn blocks_are_emitted_in_order() {
        let profile = ThrottleProfile::from_curve(&ThrottleCurve::Linear).unwrap();
        let blocks: Vec<_> = profile.blocks().collect();
        assert_eq!(blocks.len(), 6);

        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(block.index as usize, i);
            let bytes = block.to_bytes();
            assert_eq!(bytes.len(), 17);
            assert_eq!(bytes[0] as usize, i);
            assert_eq!(&bytes[1..], &profile.values()[i * 16..(i + 1) * 16]);
        }
        assert!(profile.block(6).is_none());
    }

    #[test]
    fn curve_serializes_with_type_tag() {
        let yaml = serde_yaml_ng::to_string(&ThrottleCurve::Exponential { exponent: 2.0 }).unwrap();
        assert!(yaml.contains("type: exponential"));
        let parsed: ThrottleCurve = serde_yaml_ng::from_str("type: stepped\nsteps: 3\n").unwrap();
        assert_eq!(parsed, ThrottleCurve::Stepped { steps: 3 });
    }

    proptest! {
        #[test]
        fn exponential_profiles_are_monotonic(exponent in 0.1f32..5.0) {
            let curve = ThrottleCurve::exponential(exponent).unwrap();
            let profile = ThrottleProfile::from_curve(&curve).unwrap();
            prop_assert!(is_non_decreasing(profile.values()));
            prop_assert!(profile.values().iter().all(|&v| v <= 63));
            prop_assert_eq!(profile.values()[95], 63);
        }

        #[test]
        fn stepped_profiles_stay_in_range(steps in 2u8..=32) {
            let curve = ThrottleCurve::stepped(steps).unwrap();
            let profile = ThrottleProfile::from_curve(&curve).unwrap();
            prop_assert!(is_non_decreasing(profile.values()));
            prop_assert!(profile.values().iter().all(|&v| v <= 63));
        }
    }
}
