//! Feldman verifiable secret sharing.
//!
//! A dealer shares a secret `a₀` by sampling a degree-`t` polynomial
//! `f(X) = a₀ + a₁X + … + a_t X^t` over the scalar field and handing party
//! `j` the evaluation `f(j)` at its (non-zero) share coordinate. The public
//! commitments `V_k = a_k · G` let every recipient check its share against
//! the dealer's polynomial; any `t + 1` shares reconstruct `a₀` by Lagrange
//! interpolation at zero.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{CallerError, InternalError, Result},
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// One party's evaluation of a dealer's sharing polynomial.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct VssShare<C: CurveTrait> {
    /// The (1-based) share coordinate the polynomial was evaluated at.
    pub(crate) coordinate: usize,
    /// The evaluation itself.
    pub(crate) value: C::Scalar,
}

impl<C: CurveTrait> std::fmt::Debug for VssShare<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VssShare")
            .field("coordinate", &self.coordinate)
            .field("value", &"[redacted]")
            .finish()
    }
}

impl<C: CurveTrait> VssShare<C> {
    /// The curve point implied by this share.
    pub(crate) fn public_point(&self) -> C {
        C::generator().multiply_by_scalar(&self.value)
    }
}

/// Share `secret` over a fresh degree-`threshold` polynomial, producing the
/// public coefficient commitments and one share per requested coordinate.
pub(crate) fn share<C: CurveTrait, R: RngCore + CryptoRng>(
    rng: &mut R,
    threshold: usize,
    secret: &C::Scalar,
    coordinates: &[usize],
) -> Result<(Vec<C>, Vec<VssShare<C>>)> {
    if coordinates.iter().any(|&coordinate| coordinate == 0) {
        error!("share coordinates must be non-zero");
        Err(CallerError::BadInput)?;
    }
    if coordinates.len() <= threshold {
        error!(
            "cannot share a secret with threshold {threshold} among {} parties",
            coordinates.len()
        );
        Err(CallerError::BadInput)?;
    }

    let mut coefficients = vec![*secret];
    coefficients
        .extend(std::iter::repeat_with(|| C::Scalar::random(rng)).take(threshold));

    let commitments = coefficients
        .iter()
        .map(|coefficient| C::generator().multiply_by_scalar(coefficient))
        .collect::<Vec<_>>();

    let shares = coordinates
        .iter()
        .map(|&coordinate| VssShare {
            coordinate,
            value: evaluate::<C>(&coefficients, coordinate),
        })
        .collect::<Vec<_>>();

    for coefficient in coefficients.iter_mut() {
        coefficient.zeroize();
    }

    Ok((commitments, shares))
}

/// Evaluate the polynomial with the given coefficients at `coordinate` using
/// Horner's rule.
fn evaluate<C: CurveTrait>(coefficients: &[C::Scalar], coordinate: usize) -> C::Scalar {
    let x = C::Scalar::convert_from_u128(coordinate as u128);
    let mut sum = C::Scalar::zero();
    for coefficient in coefficients.iter().rev() {
        sum = sum.mul(&x).add(coefficient);
    }
    sum
}

/// Evaluate the committed polynomial "in the exponent" at `coordinate`:
/// `Σ_k coordinate^k · V_k`.
pub(crate) fn eval_commitment<C: CurveTrait>(commitments: &[C], coordinate: usize) -> C {
    let x = C::Scalar::convert_from_u128(coordinate as u128);
    let mut sum = C::identity();
    for commitment in commitments.iter().rev() {
        sum = sum.multiply_by_scalar(&x) + *commitment;
    }
    sum
}

/// Whether `share` is a correct evaluation of the polynomial committed to by
/// `commitments`.
pub(crate) fn verify_share<C: CurveTrait>(commitments: &[C], share: &VssShare<C>) -> bool {
    share.public_point() == eval_commitment(commitments, share.coordinate)
}

/// The Lagrange coefficient at zero for `coordinate` within `quorum`:
/// multiplying a party's share by it turns the Shamir share into an additive
/// share of the secret for that quorum.
pub(crate) fn lagrange_coefficient_at_zero<C: CurveTrait>(
    coordinate: usize,
    quorum: &[usize],
) -> Result<C::Scalar> {
    let my_point = C::Scalar::convert_from_u128(coordinate as u128);
    let mut result = C::Scalar::one();
    for &other in quorum {
        if other == coordinate {
            continue;
        }
        let point = C::Scalar::convert_from_u128(other as u128);
        let numerator = C::Scalar::zero().sub(&point);
        let denominator = my_point.sub(&point);
        let inverse = denominator.invert().ok_or_else(|| {
            error!("share coordinates within a quorum must be distinct");
            InternalError::CallingApplicationMistake(CallerError::BadInput)
        })?;
        result = result.mul(&numerator.mul(&inverse));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{curve::TestCurve, utils::testing::init_testing};

    type Scalar = <TestCurve as CurveTrait>::Scalar;

    #[test]
    fn shares_verify_against_commitments() {
        let mut rng = init_testing();
        let secret = Scalar::random(&mut rng);
        let coordinates = [1, 2, 3, 4, 5];
        let (commitments, shares) =
            share::<TestCurve, _>(&mut rng, 2, &secret, &coordinates).unwrap();

        assert_eq!(commitments.len(), 3);
        for vss_share in &shares {
            assert!(verify_share(&commitments, vss_share));
        }

        // The constant-term commitment is the secret's public point.
        assert_eq!(
            commitments[0],
            TestCurve::generator().multiply_by_scalar(&secret)
        );
    }

    #[test]
    fn tampered_shares_fail_verification() {
        let mut rng = init_testing();
        let secret = Scalar::random(&mut rng);
        let (commitments, mut shares) =
            share::<TestCurve, _>(&mut rng, 1, &secret, &[1, 2, 3]).unwrap();

        shares[0].value = shares[0].value.add(&Scalar::one());
        assert!(!verify_share(&commitments, &shares[0]));
    }

    #[test]
    fn any_quorum_reconstructs_the_secret() {
        let mut rng = init_testing();
        let secret = Scalar::random(&mut rng);
        let threshold = 2;
        let coordinates = [1, 2, 3, 4, 5];
        let (_, shares) =
            share::<TestCurve, _>(&mut rng, threshold, &secret, &coordinates).unwrap();

        // Every (threshold + 1)-subset of consecutive shares reconstructs.
        for window in shares.windows(threshold + 1) {
            let quorum = window
                .iter()
                .map(|share| share.coordinate)
                .collect::<Vec<_>>();
            let reconstructed = window.iter().fold(Scalar::zero(), |sum, share| {
                let lambda =
                    lagrange_coefficient_at_zero::<TestCurve>(share.coordinate, &quorum).unwrap();
                sum.add(&lambda.mul(&share.value))
            });
            assert_eq!(reconstructed, secret);
        }
    }

    #[test]
    fn too_few_shares_reconstruct_garbage() {
        let mut rng = init_testing();
        let secret = Scalar::random(&mut rng);
        let (_, shares) = share::<TestCurve, _>(&mut rng, 2, &secret, &[1, 2, 3]).unwrap();

        let quorum = [shares[0].coordinate, shares[1].coordinate];
        let reconstructed = shares[..2].iter().fold(Scalar::zero(), |sum, share| {
            let lambda =
                lagrange_coefficient_at_zero::<TestCurve>(share.coordinate, &quorum).unwrap();
            sum.add(&lambda.mul(&share.value))
        });
        assert_ne!(reconstructed, secret);
    }
}
