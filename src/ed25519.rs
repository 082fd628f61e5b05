//! Ed25519 instantiation of the curve abstraction.
//!
//! Points live in the prime-order subgroup of the Edwards curve; scalars are
//! integers mod the subgroup order `l`. The Schnorr challenge and the final
//! verification follow the standard Ed25519 conventions (SHA-512 over
//! `R ‖ A ‖ M`), so aggregated threshold signatures verify under any
//! off-the-shelf Ed25519 verifier.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::{CurveTrait, ScalarTrait, SchnorrCurveTrait},
    errors::{CallerError, InternalError, ProtocolFault, Result},
};
use curve25519_dalek::{
    constants::ED25519_BASEPOINT_POINT, edwards::CompressedEdwardsY, traits::Identity,
    EdwardsPoint, Scalar as Ed25519Scalar,
};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512};
use tracing::error;
use zeroize::Zeroize;

/// The order of the Ed25519 prime-order subgroup,
/// `l = 2^252 + 27742317777372353535851937790883648493`, big-endian.
const ED25519_ORDER_BYTES: [u8; 32] = [
    0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x14, 0xde, 0xf9, 0xde, 0xa2, 0xf7, 0x9c, 0xd6, 0x58, 0x12, 0x63, 0x1a, 0x5c, 0xf5,
    0xd3, 0xed,
];

/// Wrapper around a curve25519 Edwards point so that we can define our own
/// serialization/deserialization for it.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Zeroize)]
pub struct Ed25519(pub(crate) EdwardsPoint);

impl AsRef<Ed25519> for Ed25519 {
    fn as_ref(&self) -> &Ed25519 {
        self
    }
}

impl std::ops::Add for Ed25519 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Serialize for Ed25519 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.compress().to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Ed25519 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = <[u8; 32]>::deserialize(deserializer)?;
        let point = CompressedEdwardsY(bytes)
            .decompress()
            .ok_or_else(|| serde::de::Error::custom("invalid Edwards point encoding"))?;
        Ok(Self(point))
    }
}

pub(crate) fn ed25519_order() -> BigNumber {
    BigNumber::from_slice(ED25519_ORDER_BYTES)
}

impl CurveTrait for Ed25519 {
    type Scalar = Ed25519Scalar;

    fn generator() -> Self {
        Self(ED25519_BASEPOINT_POINT)
    }

    fn identity() -> Self {
        Self(EdwardsPoint::identity())
    }

    fn order() -> BigNumber {
        ed25519_order()
    }

    fn scale_generator(scalar: &BigNumber) -> Result<Self> {
        Self::generator().multiply_by_bignum(scalar)
    }

    fn multiply_by_bignum(&self, scalar: &BigNumber) -> Result<Self> {
        let s = Self::bn_to_scalar(scalar)?;
        Ok(self.multiply_by_scalar(&s))
    }

    fn multiply_by_scalar(&self, scalar: &Self::Scalar) -> Self {
        Self(self.0 * scalar)
    }

    fn to_bytes(self) -> Vec<u8> {
        self.0.compress().to_bytes().to_vec()
    }

    fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        let fixed_len_bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            error!("Failed to decode bytes as an Edwards point");
            CallerError::DeserializationFailed
        })?;
        CompressedEdwardsY(fixed_len_bytes)
            .decompress()
            .map(Self)
            .ok_or_else(|| {
                error!("Failed to decode bytes as an Edwards point");
                CallerError::DeserializationFailed.into()
            })
    }

    // Returns x: BigNumber as an Ed25519 scalar mod l
    fn bn_to_scalar(x: &BigNumber) -> Result<Self::Scalar> {
        let reduced = x.nmod(&Self::order());
        let be_bytes = reduced.to_bytes();
        if be_bytes.len() > 32 {
            error!("Reduced scalar encoding exceeds 32 bytes");
            return Err(InternalError::InternalInvariantFailed);
        }

        // The scalar encoding is little-endian.
        let mut le_bytes = [0u8; 32];
        for (i, byte) in be_bytes.iter().rev().enumerate() {
            le_bytes[i] = *byte;
        }
        let scalar = Option::from(Ed25519Scalar::from_canonical_bytes(le_bytes)).ok_or_else(|| {
            error!("Failed to convert BigNumber into an Ed25519 scalar");
            InternalError::InternalInvariantFailed
        })?;
        Ok(scalar)
    }

    fn scalar_to_bn(scalar: &Self::Scalar) -> BigNumber {
        let mut be_bytes = scalar.to_bytes();
        be_bytes.reverse();
        BigNumber::from_slice(be_bytes)
    }
}

impl ScalarTrait for Ed25519Scalar {
    fn zero() -> Self {
        Ed25519Scalar::ZERO
    }

    fn one() -> Self {
        Ed25519Scalar::ONE
    }

    fn convert_from_u128(x: u128) -> Self {
        Ed25519Scalar::from(x)
    }

    fn add(&self, other: &Self) -> Self {
        self + other
    }

    fn sub(&self, other: &Self) -> Self {
        self - other
    }

    fn negate(&self) -> Self {
        -self
    }

    fn mul(&self, other: &Self) -> Self {
        self * other
    }

    fn invert(&self) -> Option<Self> {
        if self == &Ed25519Scalar::ZERO {
            return None;
        }
        Some(Ed25519Scalar::invert(self))
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        let scalar = Ed25519Scalar::from_bytes_mod_order_wide(&wide);
        wide.zeroize();
        scalar
    }

    fn to_bytes(&self) -> Vec<u8> {
        Ed25519Scalar::to_bytes(self).to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Option<Self>> {
        let fixed_len_bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            error!("Expected a 32-byte scalar encoding, got {}", bytes.len());
            InternalError::CallingApplicationMistake(CallerError::DeserializationFailed)
        })?;
        Ok(Option::from(Ed25519Scalar::from_canonical_bytes(
            fixed_len_bytes,
        )))
    }
}

impl SchnorrCurveTrait for Ed25519 {
    fn schnorr_challenge(big_r: &Self, public_key: &Self, message: &[u8]) -> Self::Scalar {
        let digest = Sha512::new()
            .chain_update(big_r.0.compress().as_bytes())
            .chain_update(public_key.0.compress().as_bytes())
            .chain_update(message)
            .finalize();
        let mut wide = [0u8; 64];
        wide.copy_from_slice(&digest);
        Ed25519Scalar::from_bytes_mod_order_wide(&wide)
    }

    fn verify_schnorr(
        big_r: &Self,
        s: &Self::Scalar,
        public_key: &Self,
        message: &[u8],
    ) -> Result<()> {
        let verifying_key =
            ed25519_dalek::VerifyingKey::from_bytes(public_key.0.compress().as_bytes()).map_err(
                |_| {
                    error!("aggregate public key is not a valid Ed25519 verifying key");
                    InternalError::ProtocolError(ProtocolFault::SignatureVerifyFail)
                },
            )?;

        let mut signature_bytes = [0u8; 64];
        signature_bytes[..32].copy_from_slice(big_r.0.compress().as_bytes());
        signature_bytes[32..].copy_from_slice(&s.to_bytes());
        let signature = ed25519_dalek::Signature::from_bytes(&signature_bytes);

        verifying_key.verify_strict(message, &signature).map_err(|_| {
            error!("assembled Ed25519 signature failed verification");
            InternalError::ProtocolError(ProtocolFault::SignatureVerifyFail)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    #[test]
    fn point_byte_conversion_works() {
        let mut rng = init_testing();
        let scalar = <Ed25519Scalar as ScalarTrait>::random(&mut rng);
        let point = Ed25519::generator().multiply_by_scalar(&scalar);
        let bytes = point.to_bytes();
        let reconstructed = Ed25519::try_from_bytes(&bytes).unwrap();
        assert_eq!(point, reconstructed);
    }

    #[test]
    fn order_matches_scalar_reduction() {
        // l - 1 must survive the BigNumber -> Scalar -> BigNumber roundtrip;
        // l itself must reduce to zero.
        let l = ed25519_order();
        let l_minus_one = &l - 1;
        let scalar = Ed25519::bn_to_scalar(&l_minus_one).unwrap();
        assert_eq!(Ed25519::scalar_to_bn(&scalar), l_minus_one);

        let zero = Ed25519::bn_to_scalar(&l).unwrap();
        assert_eq!(zero, Ed25519Scalar::ZERO);
    }

    #[test]
    fn schnorr_signature_verifies_under_standard_verifier() {
        let mut rng = init_testing();
        let secret = <Ed25519Scalar as ScalarTrait>::random(&mut rng);
        let public_key = Ed25519::generator().multiply_by_scalar(&secret);
        let nonce = <Ed25519Scalar as ScalarTrait>::random(&mut rng);
        let big_r = Ed25519::generator().multiply_by_scalar(&nonce);

        let message = b"threshold schnorr test";
        let challenge = Ed25519::schnorr_challenge(&big_r, &public_key, message);
        let s = nonce + challenge * secret;

        assert!(Ed25519::verify_schnorr(&big_r, &s, &public_key, message).is_ok());
        // A tampered s must fail.
        let bad_s = s + Ed25519Scalar::ONE;
        assert!(Ed25519::verify_schnorr(&big_r, &bad_s, &public_key, message).is_err());
    }
}
