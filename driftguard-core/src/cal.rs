//! Calibration Data Types
//!
//! The plain numeric structures exchanged across the core's boundary: raw
//! samples coming in, bias/scale corrections going out. These are the only
//! types a host persistence layer ever sees, which is why they are simple
//! `Copy` structs with serde derives (std builds) and no behavior beyond
//! applying a correction.

use crate::errors::{CalError, CalResult};
use crate::matrix::{Mat3, Vec3};
use crate::time::Timestamp;

/// One timestamped 3-axis sensor sample
///
/// Ephemeral: samples feed an accumulator or a window and are never stored
/// beyond the fixed history buffers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample3 {
    /// Caller-supplied monotonic timestamp
    pub timestamp: Timestamp,
    /// Axis values in sensor units
    pub values: Vec3,
}

/// Bias and scale/skew correction for one 3-axis sensor
///
/// The correction model is
///
/// ```text
/// corrected = M · (raw − bias)
/// ```
///
/// where `M` is lower-triangular: three scale factors on the diagonal and
/// three skew terms below it. A freshly reset instance is the identity
/// correction.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThreeAxisCalData {
    /// Lower-triangular scale/skew matrix
    pub scale: Mat3,
    /// Per-axis bias in sensor units
    pub bias: Vec3,
    /// Timestamp of the update that produced this calibration
    pub cal_time: Timestamp,
}

impl Default for ThreeAxisCalData {
    fn default() -> Self {
        Self::identity()
    }
}

impl ThreeAxisCalData {
    /// The identity correction: unit scale, zero skew, zero bias
    pub const fn identity() -> Self {
        Self {
            scale: [
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            bias: [0.0; 3],
            cal_time: 0,
        }
    }

    /// Restore to the identity correction
    pub fn reset(&mut self) {
        *self = Self::identity();
    }

    /// Apply the correction: `M · (raw − bias)`
    pub fn correct(&self, raw: &Vec3) -> Vec3 {
        let d = [raw[0] - self.bias[0], raw[1] - self.bias[1], raw[2] - self.bias[2]];
        let mut out = [0.0; 3];
        for i in 0..3 {
            for j in 0..3 {
                out[i] += self.scale[i][j] * d[j];
            }
        }
        out
    }

    /// Subtract only the bias, leaving scale untouched
    pub fn remove_bias(&self, raw: &Vec3) -> Vec3 {
        [
            raw[0] - self.bias[0],
            raw[1] - self.bias[1],
            raw[2] - self.bias[2],
        ]
    }

    /// Build a calibration from restored host data, rejecting non-finite
    /// entries.
    ///
    /// This is the seam where previously persisted blobs re-enter the core;
    /// a corrupted blob must not become a NaN factory.
    pub fn validated(scale: Mat3, bias: Vec3, cal_time: Timestamp) -> CalResult<Self> {
        for row in &scale {
            for v in row {
                if !v.is_finite() {
                    return Err(CalError::InvalidValue);
                }
            }
        }
        for v in &bias {
            if !v.is_finite() {
                return Err(CalError::InvalidValue);
            }
        }
        Ok(Self { scale, bias, cal_time })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_is_identity_correction() {
        let mut cal = ThreeAxisCalData {
            scale: [[2.0, 0.0, 0.0], [0.1, 2.0, 0.0], [0.0, 0.1, 2.0]],
            bias: [1.0, 2.0, 3.0],
            cal_time: 42,
        };
        cal.reset();

        for i in 0..3 {
            assert_eq!(cal.scale[i][i], 1.0);
        }
        assert_eq!(cal.bias, [0.0; 3]);

        let x = [0.3, -1.7, 9.81];
        assert_eq!(cal.correct(&x), x);
    }

    #[test]
    fn correct_applies_scale_and_bias() {
        let cal = ThreeAxisCalData {
            scale: [
                [2.0, 0.0, 0.0],
                [0.5, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            bias: [1.0, 0.0, -1.0],
            cal_time: 0,
        };

        let out = cal.correct(&[2.0, 3.0, 0.0]);
        // d = (1, 3, 1); M·d = (2, 3.5, 1)
        assert_eq!(out, [2.0, 3.5, 1.0]);
    }

    #[test]
    fn remove_bias_leaves_scale_alone() {
        let cal = ThreeAxisCalData {
            scale: [[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]],
            bias: [1.0, 1.0, 1.0],
            cal_time: 0,
        };
        assert_eq!(cal.remove_bias(&[2.0, 3.0, 4.0]), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn validated_rejects_non_finite() {
        let bad_scale = [[f32::NAN, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert_eq!(
            ThreeAxisCalData::validated(bad_scale, [0.0; 3], 0),
            Err(CalError::InvalidValue)
        );

        let ok = ThreeAxisCalData::validated(
            ThreeAxisCalData::identity().scale,
            [0.1, 0.2, 0.3],
            7,
        )
        .unwrap();
        assert_eq!(ok.bias, [0.1, 0.2, 0.3]);
        assert_eq!(ok.cal_time, 7);
    }
}
