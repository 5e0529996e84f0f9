//! Shamir sharing over the prime field.
//!
//! A secret is the constant term of a random polynomial of degree
//! `t = ceil(n/2) - 1`; party `i` receives the evaluation at `x = i`. Any
//! `t + 1` evaluations determine the secret through Lagrange interpolation at
//! zero, fewer reveal nothing about it.

use std::collections::BTreeMap;

use rand::{CryptoRng, Rng};
use smallvec::SmallVec;

use crate::error::{MpcError, Result};
use crate::field::Field;
use crate::PartyId;

/// Honest-majority threshold for `party_count` parties.
pub fn threshold(party_count: usize) -> usize {
    party_count.div_ceil(2).saturating_sub(1)
}

/// Splits `secret` into one share per party id in `1..=party_count`.
///
/// The random coefficients come from `rng`, which must be a cryptographically
/// secure generator; `rand::rng()` is the usual choice.
pub fn compute_shares<R: Rng + CryptoRng>(
    field: &Field,
    secret: u64,
    party_count: usize,
    rng: &mut R,
) -> BTreeMap<PartyId, u64> {
    let t = threshold(party_count);

    let mut coefficients: SmallVec<[u64; 8]> = SmallVec::with_capacity(t + 1);
    coefficients.push(field.element(secret));
    for _ in 0..t {
        coefficients.push(rng.random_range(0..field.modulus()));
    }

    (1..=party_count)
        .map(|id| (id, evaluate(field, &coefficients, id as u64)))
        .collect()
}

/// Horner evaluation of `coefficients` (constant term first) at `x`.
pub fn evaluate(field: &Field, coefficients: &[u64], x: u64) -> u64 {
    let x = field.element(x);
    coefficients
        .iter()
        .rev()
        .fold(0, |acc, &c| field.add(field.mul(acc, x), c))
}

/// Recovers the secret from the shares of parties in `1..=party_count`.
pub fn reconstruct(
    field: &Field,
    shares: &BTreeMap<PartyId, u64>,
    party_count: usize,
) -> Result<u64> {
    if shares.is_empty() {
        return Err(MpcError::invalid_shares("no shares to reconstruct from"));
    }
    if let Some(id) = shares.keys().find(|&&id| id == 0 || id > party_count) {
        return Err(MpcError::invalid_shares(format!(
            "party id {} outside 1..={}",
            id, party_count
        )));
    }

    let points: Vec<(u64, u64)> = shares
        .iter()
        .map(|(&id, &share)| (id as u64, share))
        .collect();
    interpolate_at_zero(field, &points)
}

/// Lagrange interpolation of `points` evaluated at zero.
pub fn interpolate_at_zero(field: &Field, points: &[(u64, u64)]) -> Result<u64> {
    interpolate_at(field, points, 0)
}

/// Lagrange interpolation of `points` evaluated at `x`.
///
/// The x-coordinates must be pairwise distinct modulo `P`.
pub fn interpolate_at(field: &Field, points: &[(u64, u64)], x: u64) -> Result<u64> {
    if points.is_empty() {
        return Err(MpcError::invalid_shares("no points to interpolate"));
    }

    let x = field.element(x);
    let xs: Vec<u64> = points.iter().map(|&(xi, _)| field.element(xi)).collect();

    let mut result = 0;
    for (i, &(_, yi)) in points.iter().enumerate() {
        let mut numerator = 1;
        let mut denominator = 1;
        for (j, &xj) in xs.iter().enumerate() {
            if i == j {
                continue;
            }
            numerator = field.mul(numerator, field.sub(x, xj));
            denominator = field.mul(denominator, field.sub(xs[i], xj));
        }

        let inverse = field.inv(denominator).ok_or_else(|| {
            MpcError::invalid_shares(format!("duplicate evaluation point {}", xs[i]))
        })?;
        let basis = field.mul(numerator, inverse);
        result = field.add(result, field.mul(field.element(yi), basis));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_threshold() {
        assert_eq!(threshold(2), 0);
        assert_eq!(threshold(3), 1);
        assert_eq!(threshold(4), 1);
        assert_eq!(threshold(5), 2);
        assert_eq!(threshold(10), 4);
    }

    #[test]
    fn test_round_trip() {
        let field = Field::default();
        let mut rng = StdRng::seed_from_u64(7);
        for n in 2..=9 {
            for secret in [0, 1, 42, field.modulus() - 1, rng.random_range(0..field.modulus())] {
                let shares = compute_shares(&field, secret, n, &mut rng);
                assert_eq!(shares.len(), n);
                assert_eq!(reconstruct(&field, &shares, n).unwrap(), secret);
            }
        }
    }

    #[test]
    fn test_any_qualified_subset_reconstructs() {
        let field = Field::default();
        let mut rng = StdRng::seed_from_u64(11);
        let n = 7;
        let t = threshold(n);
        let shares = compute_shares(&field, 1234, n, &mut rng);

        for start in 1..=(n - t) {
            let subset: Vec<(u64, u64)> = (start..=start + t)
                .map(|id| (id as u64, shares[&id]))
                .collect();
            assert_eq!(interpolate_at_zero(&field, &subset).unwrap(), 1234);
        }
    }

    #[test]
    fn test_fewer_than_threshold_shares_underdetermine_secret() {
        let field = Field::default();
        let mut rng = StdRng::seed_from_u64(3);
        let n = 5;
        let t = threshold(n);
        let secret = 99;
        let shares = compute_shares(&field, secret, n, &mut rng);

        // Any alternate secret is consistent with the first t shares: extend
        // those t points plus (0, alternate) into a full sharing of it.
        let alternate = 12_345;
        let mut anchor: Vec<(u64, u64)> = (1..=t).map(|id| (id as u64, shares[&id])).collect();
        anchor.push((0, alternate));

        let forged: BTreeMap<PartyId, u64> = (1..=n)
            .map(|id| (id, interpolate_at(&field, &anchor, id as u64).unwrap()))
            .collect();
        for id in 1..=t {
            assert_eq!(forged[&id], shares[&id]);
        }
        assert_eq!(reconstruct(&field, &forged, n).unwrap(), alternate);

        // Interpolating only t points does not recover the secret.
        let mut misses = 0;
        for _ in 0..8 {
            let shares = compute_shares(&field, secret, n, &mut rng);
            let partial: Vec<(u64, u64)> = (1..=t).map(|id| (id as u64, shares[&id])).collect();
            if interpolate_at_zero(&field, &partial).unwrap() != secret {
                misses += 1;
            }
        }
        assert!(misses > 0);
    }

    #[test]
    fn test_reconstruct_rejects_bad_ids() {
        let field = Field::default();
        let mut shares = BTreeMap::new();
        assert!(matches!(
            reconstruct(&field, &shares, 3),
            Err(MpcError::InvalidShares(_))
        ));

        shares.insert(1, 5);
        shares.insert(4, 6);
        assert!(matches!(
            reconstruct(&field, &shares, 3),
            Err(MpcError::InvalidShares(_))
        ));

        shares.clear();
        shares.insert(0, 5);
        assert!(reconstruct(&field, &shares, 3).is_err());
    }

    #[test]
    fn test_duplicate_points_rejected() {
        let field = Field::default();
        let points = [(1, 10), (2, 20), (1, 30)];
        assert!(matches!(
            interpolate_at_zero(&field, &points),
            Err(MpcError::InvalidShares(_))
        ));

        let wrapped = [(1, 10), (1 + field.modulus(), 20)];
        assert!(interpolate_at_zero(&field, &wrapped).is_err());
    }

    #[test]
    fn test_evaluate_horner() {
        let field = Field::default();
        // 3 + 2x + x^2 at x = 4
        assert_eq!(evaluate(&field, &[3, 2, 1], 4), 27);
        assert_eq!(evaluate(&field, &[5], 100), 5);
    }
}
