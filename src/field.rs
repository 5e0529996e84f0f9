//! # Prime field arithmetic
//!
//! Every value exchanged by the share/open protocol is an integer modulo a
//! public prime `P`. Elements are plain `u64`s normalised into `[0, P)`; the
//! [`Field`] value carries the modulus and performs the arithmetic.
//!
//! The modulus is limited to `P < 2^63` so that the sum of two elements never
//! overflows a `u64`. Products are computed in `u128`.

use crate::error::{MpcError, Result};

/// The Mersenne prime `2^31 - 1`, used when no modulus is configured.
pub const DEFAULT_MODULUS: u64 = 2_147_483_647;

const MAX_MODULUS: u64 = 1 << 63;

/// Arithmetic modulo a fixed public prime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field {
    p: u64,
}

impl Default for Field {
    fn default() -> Self {
        Field { p: DEFAULT_MODULUS }
    }
}

impl Field {
    /// Creates a field for modulus `p`, rejecting anything that is not an odd
    /// prime below `2^63`.
    pub fn new(p: u64) -> Result<Self> {
        if p < 3 || p >= MAX_MODULUS {
            return Err(MpcError::InvalidConfig(format!(
                "modulus {} must lie in [3, 2^63)",
                p
            )));
        }
        if !is_prime(p) {
            return Err(MpcError::InvalidConfig(format!("modulus {} is not prime", p)));
        }
        Ok(Field { p })
    }

    pub fn modulus(&self) -> u64 {
        self.p
    }

    /// Reduces an arbitrary `u64` into the field.
    #[inline]
    pub fn element(&self, v: u64) -> u64 {
        v % self.p
    }

    /// Embeds a signed integer, mapping `-k` to `P - k`.
    #[inline]
    pub fn reduce_signed(&self, v: i64) -> u64 {
        (v as i128).rem_euclid(self.p as i128) as u64
    }

    #[inline]
    pub fn add(&self, a: u64, b: u64) -> u64 {
        let s = a + b;
        if s >= self.p {
            s - self.p
        } else {
            s
        }
    }

    #[inline]
    pub fn sub(&self, a: u64, b: u64) -> u64 {
        if a >= b {
            a - b
        } else {
            a + self.p - b
        }
    }

    #[inline]
    pub fn neg(&self, a: u64) -> u64 {
        if a == 0 {
            0
        } else {
            self.p - a
        }
    }

    #[inline]
    pub fn mul(&self, a: u64, b: u64) -> u64 {
        ((a as u128 * b as u128) % self.p as u128) as u64
    }

    /// Multiplies an element by a public constant, which need not be reduced.
    #[inline]
    pub fn scalar_mul(&self, a: u64, k: u64) -> u64 {
        self.mul(a, self.element(k))
    }

    pub fn pow(&self, base: u64, mut exp: u64) -> u64 {
        let mut result = 1;
        let mut base = self.element(base);
        while exp > 0 {
            if exp & 1 == 1 {
                result = self.mul(result, base);
            }
            base = self.mul(base, base);
            exp >>= 1;
        }
        result
    }

    /// Multiplicative inverse via Fermat's little theorem. Zero has none.
    pub fn inv(&self, a: u64) -> Option<u64> {
        let a = self.element(a);
        if a == 0 {
            None
        } else {
            Some(self.pow(a, self.p - 2))
        }
    }
}

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut result = 1 % m;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_mod(result, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    result
}

/// Deterministic Miller-Rabin; these witnesses are exact for every `u64`.
fn is_prime(n: u64) -> bool {
    const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

    if n < 2 {
        return false;
    }
    for &w in &WITNESSES {
        if n % w == 0 {
            return n == w;
        }
    }

    let mut d = n - 1;
    let mut r = 0;
    while d % 2 == 0 {
        d /= 2;
        r += 1;
    }

    'witness: for &a in &WITNESSES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..r {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
