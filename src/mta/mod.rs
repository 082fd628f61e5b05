//! Multiplicative-to-additive share conversion.
//!
//! Two parties hold secret multiplicands `a` (Alice) and `b` (Bob); the
//! conversion ends with Alice holding `α` and Bob holding `β` such that
//! `α + β ≡ a·b (mod q)`, with neither side learning the other's input:
//!
//! 1. Alice encrypts `a` under her Paillier key and attaches a
//!    [`RangeProofAlice`] towards Bob's ring-Pedersen parameters.
//! 2. Bob verifies the range proof, picks a mask `β' ← Z_{q⁵}`, responds
//!    with `cB = b ⊗ cA ⊕ Enc(β')` and a [`ProofBob`] towards Alice's
//!    parameters, and keeps `β = −β' mod q`.
//! 3. Alice verifies Bob's proof, decrypts `cB` and reduces mod `q`.
//!
//! The with-check variants additionally bind Bob's multiplier to a public
//! curve point `B = b·G` via [`ProofBobWC`]; signing uses them for the
//! key-share pairing, where `B` is derivable from public key material.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

pub(crate) mod proofs;
pub(crate) mod range_proof;

use crate::{
    curve::CurveTrait,
    errors::{InternalError, Result},
    paillier::{Ciphertext, DecryptionKey, EncryptionKey, Nonce},
    ring_pedersen::RingPedersen,
    utils::random_positive_bn,
    zkp::ProofContext,
};
use libpaillier::unknown_order::BigNumber;
pub(crate) use proofs::{BobSecret, ProofBob, ProofBobWC};
use rand::{CryptoRng, RngCore};
pub(crate) use range_proof::RangeProofAlice;
use tracing::error;

/// Alice's opening move: prove that `ciphertext = Enc_pk(a; nonce)` encrypts
/// an in-range value, towards `receiver_params`.
pub(crate) fn alice_init<R: RngCore + CryptoRng>(
    pk: &EncryptionKey,
    a: &BigNumber,
    ciphertext: &Ciphertext,
    nonce: &Nonce,
    receiver_params: &RingPedersen,
    order: &BigNumber,
    context: &impl ProofContext,
    rng: &mut R,
) -> Result<RangeProofAlice> {
    RangeProofAlice::prove(
        pk,
        receiver_params,
        ciphertext,
        a,
        nonce,
        order,
        context,
        rng,
    )
}

/// Bob's response without the point check.
///
/// Verifies Alice's range proof against `own_params` (the parameters Alice
/// proved towards), then computes `cB = b ⊗ cA ⊕ Enc(β')` with a fresh mask
/// `β' ← Z_{q⁵}` and proves correctness towards `alice_params`.
///
/// Returns `(β, cB, β', proof)` where `β = −β' mod q` is Bob's additive
/// share.
#[allow(clippy::too_many_arguments)]
pub(crate) fn bob_mid<C: CurveTrait, R: RngCore + CryptoRng>(
    rng: &mut R,
    alice_pk: &EncryptionKey,
    alice_proof: &RangeProofAlice,
    b: &BigNumber,
    alice_ciphertext: &Ciphertext,
    alice_params: &RingPedersen,
    own_params: &RingPedersen,
    context: &impl ProofContext,
) -> Result<(BigNumber, Ciphertext, BigNumber, ProofBob)> {
    let order = C::order();
    if !alice_proof.verify(alice_pk, own_params, alice_ciphertext, &order, context) {
        error!("initiator's range proof failed to verify");
        return Err(InternalError::FailedToVerifyProof);
    }

    let (beta, response_ciphertext, beta_prm, nonce) =
        bob_response(rng, alice_pk, b, alice_ciphertext, &order)?;

    let secret = BobSecret {
        x: b,
        y: &beta_prm,
        nonce: &nonce,
    };
    let proof = ProofBob::prove::<C, _>(
        alice_pk,
        alice_params,
        alice_ciphertext,
        &response_ciphertext,
        &secret,
        context,
        rng,
    )?;
    Ok((beta, response_ciphertext, beta_prm, proof))
}

/// Bob's response with the point check: as [`bob_mid`], but the proof also
/// binds `b_point = b·G`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn bob_mid_wc<C: CurveTrait, R: RngCore + CryptoRng>(
    rng: &mut R,
    alice_pk: &EncryptionKey,
    alice_proof: &RangeProofAlice,
    b: &BigNumber,
    alice_ciphertext: &Ciphertext,
    alice_params: &RingPedersen,
    own_params: &RingPedersen,
    b_point: &C,
    context: &impl ProofContext,
) -> Result<(BigNumber, Ciphertext, BigNumber, ProofBobWC<C>)> {
    let order = C::order();
    if !alice_proof.verify(alice_pk, own_params, alice_ciphertext, &order, context) {
        error!("initiator's range proof failed to verify");
        return Err(InternalError::FailedToVerifyProof);
    }

    let (beta, response_ciphertext, beta_prm, nonce) =
        bob_response(rng, alice_pk, b, alice_ciphertext, &order)?;

    let secret = BobSecret {
        x: b,
        y: &beta_prm,
        nonce: &nonce,
    };
    let proof = ProofBobWC::<C>::prove(
        alice_pk,
        alice_params,
        alice_ciphertext,
        &response_ciphertext,
        &secret,
        b_point,
        context,
        rng,
    )?;
    Ok((beta, response_ciphertext, beta_prm, proof))
}

/// The homomorphic heart of Bob's response, shared by both variants.
fn bob_response<R: RngCore + CryptoRng>(
    rng: &mut R,
    alice_pk: &EncryptionKey,
    b: &BigNumber,
    alice_ciphertext: &Ciphertext,
    order: &BigNumber,
) -> Result<(BigNumber, Ciphertext, BigNumber, Nonce)> {
    // beta' masks b across the Paillier plaintext space: q^5 swallows the
    // q^2-sized product b·a without ever approaching N.
    let q5 = order * order * order * order * order;
    let beta_prm = random_positive_bn(rng, &q5);
    let (c_beta_prm, nonce) = alice_pk.encrypt(rng, &beta_prm)?;
    let scaled = alice_pk.homo_mul(b, alice_ciphertext)?;
    let response_ciphertext = alice_pk.homo_add(&scaled, &c_beta_prm)?;
    let beta = (BigNumber::zero() - &beta_prm).nmod(order);
    Ok((beta, response_ciphertext, beta_prm, nonce))
}

/// Alice's closing move without the point check: verify Bob's proof against
/// her own parameters, decrypt and reduce.
#[allow(clippy::too_many_arguments)]
pub(crate) fn alice_end<C: CurveTrait>(
    alice_pk: &EncryptionKey,
    proof: &ProofBob,
    own_params: &RingPedersen,
    alice_ciphertext: &Ciphertext,
    response_ciphertext: &Ciphertext,
    dk: &DecryptionKey,
    context: &impl ProofContext,
) -> Result<BigNumber> {
    if !proof.verify::<C>(
        alice_pk,
        own_params,
        alice_ciphertext,
        response_ciphertext,
        context,
    ) {
        error!("responder's proof failed to verify");
        return Err(InternalError::FailedToVerifyProof);
    }
    let alpha = dk.decrypt(response_ciphertext)?;
    Ok(alpha.nmod(&C::order()))
}

/// Alice's closing move with the point check: verify the point-bound proof,
/// decrypt and reduce.
///
/// Returns the reduced share, the raw plaintext and the recovered
/// encryption nonce; the latter two seed proofs in protocol extensions that
/// audit a failed signing run.
#[allow(clippy::too_many_arguments)]
pub(crate) fn alice_end_wc<C: CurveTrait>(
    alice_pk: &EncryptionKey,
    proof: &ProofBobWC<C>,
    b_point: &C,
    alice_ciphertext: &Ciphertext,
    response_ciphertext: &Ciphertext,
    own_params: &RingPedersen,
    dk: &DecryptionKey,
    context: &impl ProofContext,
) -> Result<(BigNumber, BigNumber, Nonce)> {
    if !proof.verify(
        alice_pk,
        own_params,
        alice_ciphertext,
        response_ciphertext,
        b_point,
        context,
    ) {
        error!("responder's point-bound proof failed to verify");
        return Err(InternalError::FailedToVerifyProof);
    }
    let (raw, nonce) = dk.decrypt_with_nonce(response_ciphertext)?;
    let mu = raw.nmod(&C::order());
    Ok((mu, raw, nonce))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::{CurveTrait, TestCurve},
        paillier::prime_gen,
        protocol::SharedContext,
        utils::testing::init_testing,
    };
    use rand::rngs::StdRng;

    struct Party {
        pk: EncryptionKey,
        dk: DecryptionKey,
        params: RingPedersen,
    }

    fn party(rng: &mut StdRng) -> Party {
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(rng).unwrap();
        let (pk, dk) = DecryptionKey::from_primes(p, q);
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(rng).unwrap();
        let (params, _) = RingPedersen::from_primes(rng, &p, &q).unwrap();
        Party { pk, dk, params }
    }

    #[test]
    fn conversion_produces_additive_shares() {
        let mut rng = init_testing();
        let order = TestCurve::order();
        let context = SharedContext::random(&mut rng);
        let alice = party(&mut rng);
        let bob = party(&mut rng);

        let a = BigNumber::from_rng(&order, &mut rng);
        let b = BigNumber::from_rng(&order, &mut rng);

        let (c_a, nonce_a) = alice.pk.encrypt(&mut rng, &a).unwrap();
        let alice_proof = alice_init(
            &alice.pk, &a, &c_a, &nonce_a, &bob.params, &order, &context, &mut rng,
        )
        .unwrap();

        let (beta, c_b, _beta_prm, bob_proof) = bob_mid::<TestCurve, _>(
            &mut rng,
            &alice.pk,
            &alice_proof,
            &b,
            &c_a,
            &alice.params,
            &bob.params,
            &context,
        )
        .unwrap();

        let alpha = alice_end::<TestCurve>(
            &alice.pk,
            &bob_proof,
            &alice.params,
            &c_a,
            &c_b,
            &alice.dk,
            &context,
        )
        .unwrap();

        // alpha + beta == a * b (mod q)
        assert_eq!(
            (&alpha + &beta).nmod(&order),
            (&a * &b).nmod(&order)
        );
    }

    #[test]
    fn conversion_with_check_produces_additive_shares() {
        let mut rng = init_testing();
        let order = TestCurve::order();
        let context = SharedContext::random(&mut rng);
        let alice = party(&mut rng);
        let bob = party(&mut rng);

        let a = BigNumber::from_rng(&order, &mut rng);
        let b = BigNumber::from_rng(&order, &mut rng);
        let b_point = TestCurve::scale_generator(&b).unwrap();

        let (c_a, nonce_a) = alice.pk.encrypt(&mut rng, &a).unwrap();
        let alice_proof = alice_init(
            &alice.pk, &a, &c_a, &nonce_a, &bob.params, &order, &context, &mut rng,
        )
        .unwrap();

        let (nu, c_b, _beta_prm, bob_proof) = bob_mid_wc::<TestCurve, _>(
            &mut rng,
            &alice.pk,
            &alice_proof,
            &b,
            &c_a,
            &alice.params,
            &bob.params,
            &b_point,
            &context,
        )
        .unwrap();

        let (mu, _raw, _nonce) = alice_end_wc::<TestCurve>(
            &alice.pk,
            &bob_proof,
            &b_point,
            &c_a,
            &c_b,
            &alice.params,
            &alice.dk,
            &context,
        )
        .unwrap();

        assert_eq!((&mu + &nu).nmod(&order), (&a * &b).nmod(&order));
    }

    #[test]
    fn tampered_range_proof_is_rejected_by_bob() {
        let mut rng = init_testing();
        let order = TestCurve::order();
        let context = SharedContext::random(&mut rng);
        let alice = party(&mut rng);
        let bob = party(&mut rng);

        let a = BigNumber::from_rng(&order, &mut rng);
        let b = BigNumber::from_rng(&order, &mut rng);

        let (c_a, nonce_a) = alice.pk.encrypt(&mut rng, &a).unwrap();
        let alice_proof = alice_init(
            &alice.pk, &a, &c_a, &nonce_a, &bob.params, &order, &context, &mut rng,
        )
        .unwrap();

        // Swapping in a different ciphertext invalidates the proof.
        let (other_c_a, _) = alice.pk.encrypt(&mut rng, &a).unwrap();
        let result = bob_mid::<TestCurve, _>(
            &mut rng,
            &alice.pk,
            &alice_proof,
            &b,
            &other_c_a,
            &alice.params,
            &bob.params,
            &context,
        );
        assert_eq!(result.unwrap_err(), InternalError::FailedToVerifyProof);
    }

    #[test]
    fn tampered_bob_point_is_rejected_by_alice() {
        let mut rng = init_testing();
        let order = TestCurve::order();
        let context = SharedContext::random(&mut rng);
        let alice = party(&mut rng);
        let bob = party(&mut rng);

        let a = BigNumber::from_rng(&order, &mut rng);
        let b = BigNumber::from_rng(&order, &mut rng);
        let b_point = TestCurve::scale_generator(&b).unwrap();

        let (c_a, nonce_a) = alice.pk.encrypt(&mut rng, &a).unwrap();
        let alice_proof = alice_init(
            &alice.pk, &a, &c_a, &nonce_a, &bob.params, &order, &context, &mut rng,
        )
        .unwrap();

        let (_nu, c_b, _beta_prm, bob_proof) = bob_mid_wc::<TestCurve, _>(
            &mut rng,
            &alice.pk,
            &alice_proof,
            &b,
            &c_a,
            &alice.params,
            &bob.params,
            &b_point,
            &context,
        )
        .unwrap();

        // Alice checks the transcript against the point she derived herself;
        // a different point must fail.
        let wrong_point = b_point + TestCurve::generator();
        let result = alice_end_wc::<TestCurve>(
            &alice.pk,
            &bob_proof,
            &wrong_point,
            &c_a,
            &c_b,
            &alice.params,
            &alice.dk,
            &context,
        );
        assert_eq!(result.unwrap_err(), InternalError::FailedToVerifyProof);
    }
}
