//! Overflow-safe `(x * y) / d` with explicit rounding.
//!
//! Share/asset conversions multiply two u128 values before dividing, so the
//! intermediate product is computed in 256 bits. The rounding direction is
//! always chosen to favor the vault: round down when minting shares or
//! paying out assets, round up when charging shares for a requested asset
//! amount.

/// Rounding direction for division.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rounding {
    /// Floor division.
    Down,
    /// Ceiling division.
    Up,
}

/// Computes `(x * y) / denominator` with the given rounding.
///
/// # Panics
///
/// Panics on division by zero.
pub fn mul_div(x: u128, y: u128, denominator: u128, rounding: Rounding) -> u128 {
    use super::U256;

    let numerator = U256::from(x) * U256::from(y);
    let denominator = U256::from(denominator);
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;

    match rounding {
        Rounding::Down => quotient.as_u128(),
        Rounding::Up => {
            if remainder > U256::zero() {
                quotient.as_u128() + 1
            } else {
                quotient.as_u128()
            }
        }
    }
}
