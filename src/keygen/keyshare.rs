//! Key share material produced by distributed key generation.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::CurveTrait,
    errors::{CallerError, ProtocolFault, Result},
    paillier::{Ciphertext, DecryptionKey, EncryptionKey, PAILLIER_MODULUS_BITS},
    ring_pedersen::{RingPedersen, RingPedersenWitness},
    protocol::ParticipantIdentifier,
    vss::VssShare,
};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Formatter},
    time::Duration,
};
use tracing::error;
use zeroize::ZeroizeOnDrop;

/// Default budget for safe-prime generation.
pub const DEFAULT_SAFE_PRIME_GEN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// This participant's Shamir share of the joint private key.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct KeySharePrivate {
    x: BigNumber,
}

impl Debug for KeySharePrivate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeySharePrivate([redacted])")
    }
}

impl KeySharePrivate {
    pub(crate) fn from_bigint(x: &BigNumber) -> Self {
        Self { x: x.clone() }
    }

    /// The share as a scalar of the given curve.
    pub fn to_scalar<C: CurveTrait>(&self) -> Result<C::Scalar> {
        C::bn_to_scalar(&self.x)
    }
}

impl AsRef<BigNumber> for KeySharePrivate {
    fn as_ref(&self) -> &BigNumber {
        &self.x
    }
}

/// A participant's public share of the joint key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct KeySharePublic<C: CurveTrait> {
    participant: ParticipantIdentifier,
    X: C,
}

impl<C: CurveTrait> KeySharePublic<C> {
    pub(crate) fn new(participant: ParticipantIdentifier, share: C) -> Self {
        Self {
            participant,
            X: share,
        }
    }

    /// The participant this public share belongs to.
    pub fn participant(&self) -> ParticipantIdentifier {
        self.participant
    }
}

impl<C: CurveTrait> AsRef<C> for KeySharePublic<C> {
    fn as_ref(&self) -> &C {
        &self.X
    }
}

/// A peer's auxiliary encryption material: its Paillier encryption key and
/// ring-Pedersen parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxInfoPublic {
    participant: ParticipantIdentifier,
    paillier_pk: EncryptionKey,
    ring_pedersen: RingPedersen,
}

impl AuxInfoPublic {
    pub(crate) fn new(
        participant: ParticipantIdentifier,
        paillier_pk: EncryptionKey,
        ring_pedersen: RingPedersen,
    ) -> Self {
        Self {
            participant,
            paillier_pk,
            ring_pedersen,
        }
    }

    /// The participant these parameters belong to.
    pub fn participant(&self) -> ParticipantIdentifier {
        self.participant
    }

    pub(crate) fn pk(&self) -> &EncryptionKey {
        &self.paillier_pk
    }

    pub(crate) fn ring_pedersen(&self) -> &RingPedersen {
        &self.ring_pedersen
    }

    /// Validate a peer's parameters: Paillier modulus size and ring-Pedersen
    /// well-formedness. Proofs are checked separately.
    pub(crate) fn validate(&self, check_h1_h2_distinct: bool) -> Result<()> {
        if self.paillier_pk.modulus().bit_length() < PAILLIER_MODULUS_BITS - 2 {
            error!(
                "Paillier modulus from {} is too small",
                self.participant
            );
            Err(ProtocolFault::PaillierParamInvalid(vec![self.participant]))?;
        }
        self.ring_pedersen.validate(check_h1_h2_distinct).map_err(|_| {
            ProtocolFault::PaillierParamInvalid(vec![self.participant]).into()
        })
    }
}

/// This participant's own auxiliary secrets.
///
/// The ring-Pedersen witness is not carried here: it is only needed while
/// proving the parameters well-formed, which happens during the run that
/// consumes the [`PreParams`].
#[derive(Clone, Serialize, Deserialize)]
pub struct AuxInfoPrivate {
    paillier_dk: DecryptionKey,
}

impl Debug for AuxInfoPrivate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuxInfoPrivate([redacted])")
    }
}

impl AuxInfoPrivate {
    pub(crate) fn decryption_key(&self) -> &DecryptionKey {
        &self.paillier_dk
    }
}

/// Pre-generated Paillier and ring-Pedersen material for one party.
///
/// Generating safe primes dominates key generation time, so the material can
/// be produced ahead of the protocol run and injected; [`PreParams::generate`]
/// is the pluggable default.
#[derive(Clone)]
pub struct PreParams {
    pub(crate) paillier_dk: DecryptionKey,
    pub(crate) ring_pedersen: RingPedersen,
    pub(crate) ring_pedersen_witness: RingPedersenWitness,
}

impl Debug for PreParams {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("PreParams([redacted])")
    }
}

impl PreParams {
    /// Generate fresh pre-parameters with the default safe-prime budget.
    pub fn generate() -> Result<Self> {
        Self::generate_with_timeout(DEFAULT_SAFE_PRIME_GEN_TIMEOUT)
    }

    /// Generate fresh pre-parameters, spending at most `timeout` on each
    /// pair of safe primes.
    pub fn generate_with_timeout(timeout: Duration) -> Result<Self> {
        let (_, paillier_dk) = DecryptionKey::keygen(timeout)?;
        let (ring_pedersen, ring_pedersen_witness) = RingPedersen::gen(timeout)?;
        Ok(Self {
            paillier_dk,
            ring_pedersen,
            ring_pedersen_witness,
        })
    }

    /// Assemble pre-parameters from pooled test primes.
    #[cfg(test)]
    pub(crate) fn simulate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        use crate::paillier::prime_gen;

        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(rng)?;
        let (_, paillier_dk) = DecryptionKey::from_primes(p, q);
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(rng)?;
        let (ring_pedersen, ring_pedersen_witness) = RingPedersen::from_primes(rng, &p, &q)?;
        Ok(Self {
            paillier_dk,
            ring_pedersen,
            ring_pedersen_witness,
        })
    }

    pub(crate) fn into_private(self) -> AuxInfoPrivate {
        AuxInfoPrivate {
            paillier_dk: self.paillier_dk,
        }
    }
}

/// A Feldman sub-share encrypted to its recipient's Paillier key.
///
/// The plaintext is the scalar share value; encryption keeps the transport
/// out of the trust base for share confidentiality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EncryptedVssShare {
    ciphertext: Ciphertext,
}

impl EncryptedVssShare {
    pub(crate) fn encrypt<C: CurveTrait, R: RngCore + CryptoRng>(
        share: &VssShare<C>,
        pk: &EncryptionKey,
        rng: &mut R,
    ) -> Result<Self> {
        if &(C::order() * 2) >= pk.modulus() {
            error!("the Paillier modulus must be much larger than the curve order");
            Err(CallerError::BadInput)?;
        }
        let value = C::scalar_to_bn(&share.value);
        let (ciphertext, _nonce) = pk.encrypt(rng, &value).map_err(|err| {
            error!("failed to encrypt a sub-share: {err}");
            crate::errors::InternalError::InternalInvariantFailed
        })?;
        Ok(Self { ciphertext })
    }

    /// Decrypt a sub-share sent by `dealer`, rejecting values outside the
    /// scalar field.
    pub(crate) fn decrypt<C: CurveTrait>(
        &self,
        dk: &DecryptionKey,
        coordinate: usize,
        dealer: ParticipantIdentifier,
    ) -> Result<VssShare<C>> {
        let value = dk.decrypt(&self.ciphertext).map_err(|_| {
            error!("sub-share from {dealer} failed to decrypt");
            ProtocolFault::ShareInconsistent(vec![dealer])
        })?;
        if value >= C::order() {
            error!("sub-share from {dealer} is out of the scalar range");
            Err(ProtocolFault::ShareInconsistent(vec![dealer]))?;
        }
        let value = C::bn_to_scalar(&value)?;
        Ok(VssShare { coordinate, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::{ScalarTrait, TestCurve},
        utils::testing::init_testing,
    };

    #[test]
    fn encrypted_shares_roundtrip() {
        let mut rng = init_testing();
        let pre_params = PreParams::simulate(&mut rng).unwrap();
        let pk = pre_params.paillier_dk.encryption_key();
        let pid = crate::protocol::ParticipantIdentifier::random(&mut rng);

        let share = VssShare::<TestCurve> {
            coordinate: 2,
            value: <TestCurve as CurveTrait>::Scalar::random(&mut rng),
        };
        let encrypted = EncryptedVssShare::encrypt(&share, &pk, &mut rng).unwrap();
        let decrypted = encrypted
            .decrypt::<TestCurve>(&pre_params.paillier_dk, 2, pid)
            .unwrap();
        assert_eq!(decrypted, share);
    }
}
