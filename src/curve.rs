//! Elliptic curve abstraction.
//!
//! Protocol code treats the curve as a capability set: generator and
//! identity, scalar and point arithmetic, the group order `q`, byte
//! encodings and conversions between scalars and [`BigNumber`]s. It is
//! instantiated twice — secp256k1 for ECDSA ([`crate::K256`]) and Ed25519
//! for EdDSA ([`crate::Ed25519`]) — and nothing in the round logic
//! conditions on the concrete type.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{errors::Result, k256::K256};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, RngCore};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, ops::Add};
use zeroize::Zeroize;

/// Generic elliptic curve point.
pub trait CurveTrait:
    'static
    + Clone
    + Copy
    + Debug
    + Send
    + Sync
    + Eq
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Add<Output = Self>
    + Zeroize
    + AsRef<Self>
{
    /// The type of scalars.
    type Scalar: ScalarTrait;

    /// The base point of the prime-order group.
    fn generator() -> Self;

    /// The identity point, used to initialize point aggregations.
    fn identity() -> Self;

    /// The order of the group.
    fn order() -> BigNumber;

    /// Multiply the generator by a [`BigNumber`] scalar.
    fn scale_generator(scalar: &BigNumber) -> Result<Self>;

    /// Multiply `self` by a [`BigNumber`], which is first converted to the
    /// [`Self::Scalar`] field (taken mod `q`, where `q` is the order of the
    /// group).
    fn multiply_by_bignum(&self, scalar: &BigNumber) -> Result<Self>;

    /// Multiply `self` by a [`Self::Scalar`].
    fn multiply_by_scalar(&self, scalar: &Self::Scalar) -> Self;

    /// Serialize the point as a compressed byte array.
    fn to_bytes(self) -> Vec<u8>;

    /// Deserialize a point from a compressed byte array.
    fn try_from_bytes(bytes: &[u8]) -> Result<Self>;

    /// Convert a [`BigNumber`] to a [`Self::Scalar`], reducing mod `q` and
    /// preserving sign.
    fn bn_to_scalar(bn: &BigNumber) -> Result<Self::Scalar>;

    /// Convert a [`Self::Scalar`] to a [`BigNumber`] in `[0, q)`.
    fn scalar_to_bn(scalar: &Self::Scalar) -> BigNumber;
}

/// Scalar of a generic elliptic curve.
pub trait ScalarTrait:
    'static
    + Sync
    + Send
    + Clone
    + Copy
    + Debug
    + PartialEq
    + Eq
    + Zeroize
    + Serialize
    + DeserializeOwned
    + Add<Output = Self>
{
    /// Return the zero scalar.
    fn zero() -> Self;

    /// Return the one scalar.
    fn one() -> Self;

    /// Convert a u128 to a scalar.
    fn convert_from_u128(x: u128) -> Self;

    /// Add two scalars.
    fn add(&self, other: &Self) -> Self;

    /// Subtract two scalars.
    fn sub(&self, other: &Self) -> Self;

    /// Negate.
    fn negate(&self) -> Self;

    /// Multiply two scalars.
    fn mul(&self, other: &Self) -> Self;

    /// Invert the scalar, if non-zero.
    fn invert(&self) -> Option<Self>;

    /// Sample a uniformly random scalar.
    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self;

    /// Serialize to the scalar's canonical byte encoding.
    fn to_bytes(&self) -> Vec<u8>;

    /// Deserialize from the scalar's canonical byte encoding.
    fn from_bytes(bytes: &[u8]) -> Result<Option<Self>>;
}

/// Capabilities needed to assemble and verify ECDSA signatures; implemented
/// for secp256k1 only.
pub trait EcdsaCurveTrait: CurveTrait {
    /// The verifying key type.
    type VerifyingKey: VerifyingKeyTrait<C = Self>;

    /// The signature type.
    type Signature: SignatureTrait + Clone + Copy + Debug + PartialEq;

    /// Compute the x-projection of the point: the affine x-coordinate
    /// reduced mod `q`.
    fn x_projection(&self) -> Result<Self::Scalar>;

    /// The parity of the affine y-coordinate (0 for even, 1 for odd); the
    /// recovery id of a signature whose nonce point is `self`.
    fn y_parity(&self) -> u8;

    /// Whether the scalar is greater than half the group order. Signatures
    /// are normalized to the low-s form before release.
    fn is_high(scalar: &Self::Scalar) -> bool;
}

/// Capabilities needed to produce and verify Schnorr-style (EdDSA)
/// signatures; implemented for Ed25519 only.
pub trait SchnorrCurveTrait: CurveTrait {
    /// Compute the signature challenge scalar for nonce commitment `big_r`,
    /// public key `public_key` and message `message`.
    fn schnorr_challenge(big_r: &Self, public_key: &Self, message: &[u8]) -> Self::Scalar;

    /// Verify an assembled signature `(big_r, s)` over `message` under
    /// `public_key`, using the curve's standard verifier.
    fn verify_schnorr(
        big_r: &Self,
        s: &Self::Scalar,
        public_key: &Self,
        message: &[u8],
    ) -> Result<()>;
}

/// ECDSA signature assembly.
pub trait SignatureTrait {
    /// Create a signature from the two signature scalars.
    fn from_scalars(r: &BigNumber, s: &BigNumber) -> Result<Self>
    where
        Self: Sized;
}

/// ECDSA verifying key.
pub trait VerifyingKeyTrait: Clone + Copy + Debug + Send + Sync + Eq + PartialEq {
    /// The curve associated with this verifying key.
    type C: CurveTrait;

    /// Create a verifying key from a curve point.
    fn from_point(point: Self::C) -> Result<Self>;

    /// Verify the signature against a 32-byte prehashed message digest.
    fn verify_prehashed(
        &self,
        digest: &[u8; 32],
        signature: &<Self::C as EcdsaCurveTrait>::Signature,
    ) -> Result<()>
    where
        Self::C: EcdsaCurveTrait;
}

/// Default curve type for tests.
pub type TestCurve = K256;

#[cfg(test)]
mod tests {
    use crate::{
        curve::{CurveTrait, ScalarTrait, TestCurve},
        utils::testing::init_testing,
    };
    use libpaillier::unknown_order::BigNumber;

    #[test]
    fn test_bn_to_scalar_neg() {
        let _rng = init_testing();
        let neg1 = BigNumber::zero() - BigNumber::one();

        let scalar = TestCurve::bn_to_scalar(&neg1).unwrap();
        assert_eq!(
            <TestCurve as CurveTrait>::Scalar::zero(),
            scalar.add(&<TestCurve as CurveTrait>::Scalar::one())
        );
    }

    #[test]
    fn scalar_bn_roundtrip() {
        let mut rng = init_testing();
        for _ in 0..10 {
            let x = BigNumber::from_rng(&TestCurve::order(), &mut rng);
            let scalar = TestCurve::bn_to_scalar(&x).unwrap();
            assert_eq!(TestCurve::scalar_to_bn(&scalar), x);
        }
    }
}
