use alloc::vec::Vec;

use num_bigint::BigUint;

use crate::GroupParams;

/// A source of private Diffie-Hellman scalars.
///
/// Implementations must yield values in `[2, p - 2]`. The protocol only
/// depends on `g^x mod p` behavior, so any cryptographically strong source is
/// acceptable; deterministic sources exist for tests.
pub trait ScalarSource: Send {
    /// Draws the next private scalar.
    fn draw(&mut self, params: &GroupParams) -> BigUint;
}

#[cfg(feature = "rand")]
pub use random::*;

#[cfg(feature = "rand")]
mod random {
    use num_bigint::{BigUint, RandBigInt as _};
    use rand::rngs::OsRng;

    use super::ScalarSource;
    use crate::GroupParams;

    /// Uniform scalars in `[2, p - 2]` from the operating system RNG.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct RandomScalars;

    impl ScalarSource for RandomScalars {
        fn draw(&mut self, params: &GroupParams) -> BigUint {
            let low = BigUint::from(2u32);
            let high = params.modulus() - 1u32;

            OsRng.gen_biguint_range(&low, &high)
        }
    }
}

/// A fixed cycle of scalars for deterministic tests.
#[derive(Debug, Clone)]
pub struct SequenceScalars {
    values: Vec<BigUint>,
    next: usize,
}

impl SequenceScalars {
    /// Creates a source cycling through the provided scalars.
    pub fn new(values: Vec<BigUint>) -> Self {
        Self { values, next: 0 }
    }

    /// Convenience constructor from small integers.
    pub fn from_u64s<I: IntoIterator<Item = u64>>(values: I) -> Self {
        Self::new(values.into_iter().map(BigUint::from).collect())
    }
}

impl ScalarSource for SequenceScalars {
    fn draw(&mut self, _params: &GroupParams) -> BigUint {
        if self.values.is_empty() {
            return BigUint::from(2u32);
        }

        let value = self.values[self.next % self.values.len()].clone();

        self.next += 1;

        value
    }
}
