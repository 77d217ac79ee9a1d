//! Fixed-point helpers.
//!
//! Share and fee formulas multiply three or four 18-decimal quantities
//! before dividing. `u128` cannot hold those products, so the intermediate
//! runs in `U256` and only the final quotient must fit back into `u128`.

use primitive_types::U256;
use thiserror::Error;

/// Arithmetic failures. All of them are precondition violations from the
/// caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MathError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow")]
    Overflow,
}

/// `a × b / denominator`, rounding down.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Result<u128, MathError> {
    mul_div_chain(&[a, b], &[denominator])
}

/// Multiplies every numerator term, then divides by every denominator term,
/// all in 256-bit space. Rounds down.
pub fn mul_div_chain(numerators: &[u128], denominators: &[u128]) -> Result<u128, MathError> {
    let mut num = U256::one();
    for n in numerators {
        num = num
            .checked_mul(U256::from(*n))
            .ok_or(MathError::Overflow)?;
    }
    let mut den = U256::one();
    for d in denominators {
        if *d == 0 {
            return Err(MathError::DivisionByZero);
        }
        den = den
            .checked_mul(U256::from(*d))
            .ok_or(MathError::Overflow)?;
    }
    let q = num / den;
    if q > U256::from(u128::MAX) {
        return Err(MathError::Overflow);
    }
    Ok(q.as_u128())
}
