//! Progression Engine
//!
//! Pure numeric stepping laws for ladder geometry. A family is selected once
//! at session start and bound into a [`Progression`]; no component re-derives
//! it later. All operations are stateless and return descriptive errors for
//! numeric edge cases instead of NaN/Inf.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};

use crate::error::ProgressionError;

/// Hard cap on term counts; ladder depths are orders of magnitude smaller
const MAX_TERMS: u32 = 10_000;

/// The numeric law governing price/quantity steps
///
/// Arithmetic and geometric use their textbook closed forms, exponential
/// steps the exponent linearly. The remaining families are arithmetic under
/// a monotone transform: quadratic under square root, cubic under cube root,
/// cubic-root under cube, harmonic under reciprocal. Logarithmic grows as
/// `first + step * ln(n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressionFamily {
    Arithmetic,
    Geometric,
    Quadratic,
    Cubic,
    CubicRoot,
    Harmonic,
    Logarithmic,
    Exponential,
}

impl ProgressionFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arithmetic => "arithmetic",
            Self::Geometric => "geometric",
            Self::Quadratic => "quadratic",
            Self::Cubic => "cubic",
            Self::CubicRoot => "cubic-root",
            Self::Harmonic => "harmonic",
            Self::Logarithmic => "logarithmic",
            Self::Exponential => "exponential",
        }
    }
}

/// A progression family bound to its five operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progression {
    family: ProgressionFamily,
}

impl Progression {
    pub fn new(family: ProgressionFamily) -> Self {
        Self { family }
    }

    pub fn family(&self) -> ProgressionFamily {
        self.family
    }

    /// Term `n` (1-based) of the sequence starting at `first` with `step`
    ///
    /// For geometric, `step` is the ratio; for exponential, the exponent
    /// increment; for the transform families, the increment in transform
    /// space; for logarithmic, the `ln(n)` coefficient.
    pub fn nth_term(&self, first: Decimal, step: Decimal, n: u32) -> Result<Decimal, ProgressionError> {
        if n == 0 {
            return Err(ProgressionError::ZeroIndex);
        }
        let k = Decimal::from(n - 1);
        match self.family {
            ProgressionFamily::Geometric => {
                self.require_positive_ratio(step)?;
                let grown = step
                    .checked_powi((n - 1) as i64)
                    .ok_or(self.overflow())?;
                first.checked_mul(grown).ok_or(self.overflow())
            }
            ProgressionFamily::Exponential => {
                let exponent = step.checked_mul(k).ok_or(self.overflow())?;
                let grown = exponent.checked_exp().ok_or(self.overflow())?;
                first.checked_mul(grown).ok_or(self.overflow())
            }
            ProgressionFamily::Logarithmic => {
                let weight = Decimal::from(n).checked_ln().ok_or(self.overflow())?;
                let offset = step.checked_mul(weight).ok_or(self.overflow())?;
                first.checked_add(offset).ok_or(self.overflow())
            }
            _ => {
                let base = self.forward(first)?;
                let offset = step.checked_mul(k).ok_or(self.overflow())?;
                let travelled = base.checked_add(offset).ok_or(self.overflow())?;
                self.inverse(travelled)
            }
        }
    }

    /// Sum of the first `n` terms
    pub fn sum(&self, first: Decimal, step: Decimal, n: u32) -> Result<Decimal, ProgressionError> {
        if n == 0 {
            return Err(ProgressionError::ZeroIndex);
        }
        if n > MAX_TERMS {
            return Err(self.overflow());
        }
        match self.family {
            ProgressionFamily::Arithmetic => {
                // n * (2*first + (n-1)*step) / 2
                let k = Decimal::from(n - 1);
                let last_pair = step.checked_mul(k).ok_or(self.overflow())?;
                let twice_first = first.checked_mul(Decimal::TWO).ok_or(self.overflow())?;
                let inner = twice_first.checked_add(last_pair).ok_or(self.overflow())?;
                Decimal::from(n)
                    .checked_mul(inner)
                    .and_then(|v| v.checked_div(Decimal::TWO))
                    .ok_or(self.overflow())
            }
            ProgressionFamily::Geometric => {
                self.require_positive_ratio(step)?;
                if step == Decimal::ONE {
                    return first.checked_mul(Decimal::from(n)).ok_or(self.overflow());
                }
                // first * (step^n - 1) / (step - 1)
                let grown = step.checked_powi(n as i64).ok_or(self.overflow())?;
                let numerator = first
                    .checked_mul(grown - Decimal::ONE)
                    .ok_or(self.overflow())?;
                numerator
                    .checked_div(step - Decimal::ONE)
                    .ok_or(ProgressionError::DivisionByZero {
                        family: self.family.as_str(),
                        first,
                    })
            }
            _ => {
                let mut total = Decimal::ZERO;
                for i in 1..=n {
                    let term = self.nth_term(first, step, i)?;
                    total = total.checked_add(term).ok_or(self.overflow())?;
                }
                Ok(total)
            }
        }
    }

    /// Derive the step from two consecutive observed terms, then evaluate
    /// term `n`
    pub fn find_nth_term(
        &self,
        first: Decimal,
        second: Decimal,
        n: u32,
    ) -> Result<Decimal, ProgressionError> {
        let step = self.derive_step(first, second)?;
        self.nth_term(first, step, n)
    }

    /// Minimal number of terms to travel from `first` to (at or past) `last`
    /// given the step implied by `(first, second)`
    pub fn find_length(
        &self,
        first: Decimal,
        second: Decimal,
        last: Decimal,
    ) -> Result<u32, ProgressionError> {
        if last == first {
            return Ok(1);
        }
        let step = self.derive_step(first, second)?;
        let travel = match self.family {
            ProgressionFamily::Geometric | ProgressionFamily::Exponential => {
                let span = self.log_ratio(last, first)?;
                let unit = match self.family {
                    ProgressionFamily::Geometric => {
                        step.checked_ln().ok_or(ProgressionError::Domain {
                            family: self.family.as_str(),
                            value: step,
                            constraint: "ratio must be positive",
                        })?
                    }
                    _ => step,
                };
                if unit.is_zero() {
                    return Err(ProgressionError::ZeroStep { first, last });
                }
                span / unit
            }
            ProgressionFamily::Logarithmic => {
                if step.is_zero() {
                    return Err(ProgressionError::ZeroStep { first, last });
                }
                let t = (last - first) / step;
                if t < Decimal::ZERO {
                    return Err(ProgressionError::DirectionMismatch { first, last, step });
                }
                // ln(n) >= t  =>  n >= e^t; count includes the first term
                let n = t.checked_exp().ok_or(self.overflow())?;
                return clamp_length(n.ceil(), self.family);
            }
            _ => {
                if step.is_zero() {
                    return Err(ProgressionError::ZeroStep { first, last });
                }
                let span = self.forward(last)? - self.forward(first)?;
                span / step
            }
        };
        if travel < Decimal::ZERO {
            return Err(ProgressionError::DirectionMismatch { first, last, step });
        }
        clamp_length(travel.ceil() + Decimal::ONE, self.family)
    }

    /// Family-specific distance between two values: the step that separates
    /// them as adjacent terms (`b - a` for arithmetic, `b / a` for
    /// geometric, and so on)
    pub fn delta(&self, a: Decimal, b: Decimal) -> Result<Decimal, ProgressionError> {
        self.derive_step(a, b)
    }

    fn derive_step(&self, first: Decimal, second: Decimal) -> Result<Decimal, ProgressionError> {
        match self.family {
            ProgressionFamily::Geometric => {
                if first.is_zero() {
                    return Err(ProgressionError::DivisionByZero {
                        family: self.family.as_str(),
                        first,
                    });
                }
                let ratio = second / first;
                self.require_positive_ratio(ratio)?;
                Ok(ratio)
            }
            ProgressionFamily::Exponential => self.log_ratio(second, first),
            ProgressionFamily::Logarithmic => {
                // a_2 - a_1 = step * ln(2)
                let ln2 = Decimal::TWO.checked_ln().ok_or(self.overflow())?;
                Ok((second - first) / ln2)
            }
            _ => Ok(self.forward(second)? - self.forward(first)?),
        }
    }

    /// ln(numerator / denominator), both strictly positive
    fn log_ratio(&self, numerator: Decimal, denominator: Decimal) -> Result<Decimal, ProgressionError> {
        if denominator.is_zero() {
            return Err(ProgressionError::DivisionByZero {
                family: self.family.as_str(),
                first: denominator,
            });
        }
        let ratio = numerator / denominator;
        if ratio <= Decimal::ZERO {
            return Err(ProgressionError::NonPositiveRatio {
                family: self.family.as_str(),
                ratio,
            });
        }
        ratio.checked_ln().ok_or(self.overflow())
    }

    /// Transform into the space where the family is arithmetic
    fn forward(&self, x: Decimal) -> Result<Decimal, ProgressionError> {
        match self.family {
            ProgressionFamily::Arithmetic => Ok(x),
            ProgressionFamily::Quadratic => x.sqrt().ok_or(self.domain(x, "value must not be negative")),
            ProgressionFamily::Cubic => cbrt(x).ok_or(self.domain(x, "value must be positive")),
            ProgressionFamily::CubicRoot => {
                x.checked_powi(3).ok_or(self.overflow())
            }
            ProgressionFamily::Harmonic => {
                if x.is_zero() {
                    return Err(self.domain(x, "value must not be zero"));
                }
                Ok(Decimal::ONE / x)
            }
            _ => unreachable!("multiplicative and logarithmic families bypass the transform"),
        }
    }

    /// Inverse of [`forward`](Self::forward)
    fn inverse(&self, x: Decimal) -> Result<Decimal, ProgressionError> {
        match self.family {
            ProgressionFamily::Arithmetic => Ok(x),
            ProgressionFamily::Quadratic => x.checked_powi(2).ok_or(self.overflow()),
            ProgressionFamily::Cubic => x.checked_powi(3).ok_or(self.overflow()),
            ProgressionFamily::CubicRoot => cbrt(x).ok_or(self.domain(x, "value must be positive")),
            ProgressionFamily::Harmonic => {
                if x.is_zero() {
                    return Err(self.domain(x, "value must not be zero"));
                }
                Ok(Decimal::ONE / x)
            }
            _ => unreachable!("multiplicative and logarithmic families bypass the transform"),
        }
    }

    fn require_positive_ratio(&self, ratio: Decimal) -> Result<(), ProgressionError> {
        if ratio <= Decimal::ZERO {
            return Err(ProgressionError::NonPositiveRatio {
                family: self.family.as_str(),
                ratio,
            });
        }
        Ok(())
    }

    fn overflow(&self) -> ProgressionError {
        ProgressionError::Overflow {
            family: self.family.as_str(),
        }
    }

    fn domain(&self, value: Decimal, constraint: &'static str) -> ProgressionError {
        ProgressionError::Domain {
            family: self.family.as_str(),
            value,
            constraint,
        }
    }
}

/// Cube root for strictly positive values
fn cbrt(x: Decimal) -> Option<Decimal> {
    if x <= Decimal::ZERO {
        return None;
    }
    let third = Decimal::ONE / Decimal::from(3);
    x.checked_powd(third)
}

fn clamp_length(n: Decimal, family: ProgressionFamily) -> Result<u32, ProgressionError> {
    // A sequence has at least its first term
    let n = n.max(Decimal::ONE);
    match n.to_u32() {
        Some(v) if v <= MAX_TERMS => Ok(v),
        _ => Err(ProgressionError::Overflow {
            family: family.as_str(),
        }),
    }
}
