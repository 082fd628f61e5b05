//! The responder's proofs for the multiplicative-to-additive conversion.
//!
//! [`ProofBob`] shows that the responder's ciphertext was formed correctly:
//! for public ciphertexts `c1`, `c2` there exist `x ∈ [0, q³]`, `y` and a
//! nonce `r` with `c2 = c1^x · Γ^y · r^N mod N²`. [`ProofBobWC`] ("with
//! check") additionally binds an elliptic-curve point `X = x·G`, tying the
//! responder's multiplier to a public key-share point.
//!
//! Verification is a pure predicate: any failed check yields `false`, never
//! an error.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::CurveTrait,
    errors::Result,
    paillier::{Ciphertext, EncryptionKey, Nonce},
    ring_pedersen::RingPedersen,
    utils::{
        modpow, positive_challenge_from_transcript, random_bn_in_z_star, random_positive_bn,
        transcript_bn,
    },
    zkp::ProofContext,
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::error;

/// The responder's proof without the point check.
///
/// The ten integers constitute the historical wire shape of this proof; the
/// with-check variant appends the point `U`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ProofBob {
    z: BigNumber,
    z_prm: BigNumber,
    t: BigNumber,
    v: BigNumber,
    w: BigNumber,
    s: BigNumber,
    s1: BigNumber,
    s2: BigNumber,
    t1: BigNumber,
    t2: BigNumber,
}

/// The responder's proof with the point check: additionally binds
/// `X = x·G`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct ProofBobWC<C: CurveTrait> {
    pub(crate) bob: ProofBob,
    u: C,
}

/// The witness for either proof variant.
pub(crate) struct BobSecret<'a> {
    /// The multiplier applied to `c1` (a curve scalar, as an integer).
    pub(crate) x: &'a BigNumber,
    /// The masking plaintext added into `c2`.
    pub(crate) y: &'a BigNumber,
    /// The nonce of the encryption of `y`.
    pub(crate) nonce: &'a Nonce,
}

impl std::fmt::Debug for BobSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BobSecret([redacted])")
    }
}

impl ProofBob {
    /// Prove correctness of the responder's ciphertext without the point
    /// check.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn prove<C: CurveTrait, R: RngCore + CryptoRng>(
        pk: &EncryptionKey,
        verifier_params: &RingPedersen,
        c1: &Ciphertext,
        c2: &Ciphertext,
        secret: &BobSecret,
        context: &impl ProofContext,
        rng: &mut R,
    ) -> Result<Self> {
        let (bob, _) = prove_inner::<C, R>(pk, verifier_params, c1, c2, secret, None, context, rng)?;
        Ok(bob)
    }

    /// Verify the proof. Returns `false` on any failed predicate.
    pub(crate) fn verify<C: CurveTrait>(
        &self,
        pk: &EncryptionKey,
        verifier_params: &RingPedersen,
        c1: &Ciphertext,
        c2: &Ciphertext,
        context: &impl ProofContext,
    ) -> bool {
        verify_inner::<C>(self, None, pk, verifier_params, c1, c2, context)
    }
}

impl<C: CurveTrait> ProofBobWC<C> {
    /// Prove correctness of the responder's ciphertext, binding the point
    /// `x_point = x·G`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn prove<R: RngCore + CryptoRng>(
        pk: &EncryptionKey,
        verifier_params: &RingPedersen,
        c1: &Ciphertext,
        c2: &Ciphertext,
        secret: &BobSecret,
        x_point: &C,
        context: &impl ProofContext,
        rng: &mut R,
    ) -> Result<Self> {
        let (bob, u) =
            prove_inner::<C, R>(pk, verifier_params, c1, c2, secret, Some(x_point), context, rng)?;
        let u = u.ok_or_else(|| {
            error!("with-check proof must produce a point commitment");
            crate::errors::InternalError::InternalInvariantFailed
        })?;
        Ok(Self { bob, u })
    }

    /// Verify the proof against the bound point. Returns `false` on any
    /// failed predicate.
    pub(crate) fn verify(
        &self,
        pk: &EncryptionKey,
        verifier_params: &RingPedersen,
        c1: &Ciphertext,
        c2: &Ciphertext,
        x_point: &C,
        context: &impl ProofContext,
    ) -> bool {
        verify_inner::<C>(
            &self.bob,
            Some((x_point, &self.u)),
            pk,
            verifier_params,
            c1,
            c2,
            context,
        )
    }
}

/// Shared prover; produces the point commitment `u = α·G` iff `x_point` is
/// present.
#[allow(clippy::too_many_arguments)]
fn prove_inner<C: CurveTrait, R: RngCore + CryptoRng>(
    pk: &EncryptionKey,
    verifier_params: &RingPedersen,
    c1: &Ciphertext,
    c2: &Ciphertext,
    secret: &BobSecret,
    x_point: Option<&C>,
    context: &impl ProofContext,
    rng: &mut R,
) -> Result<(ProofBob, Option<C>)> {
    let n = pk.modulus();
    let nn = pk.modulus_squared();
    let n_tilde = verifier_params.modulus();
    let h1 = verifier_params.h1();
    let h2 = verifier_params.h2();

    let q = C::order();
    let q3 = &q * &q * &q;
    let q7 = &q3 * &q3 * &q;
    let q_n_tilde = &q * n_tilde;
    let q3_n_tilde = &q3 * n_tilde;

    let alpha = random_positive_bn(rng, &q3);
    let rho = random_positive_bn(rng, &q_n_tilde);
    let sigma = random_positive_bn(rng, &q_n_tilde);
    let tau = random_positive_bn(rng, &q3_n_tilde);
    let rho_prm = random_positive_bn(rng, &q3_n_tilde);
    let beta = random_bn_in_z_star(rng, n)?;
    let gamma = random_positive_bn(rng, &q7);

    let u = match x_point {
        Some(_) => Some(C::scale_generator(&alpha)?),
        None => None,
    };

    let z = modpow(h1, secret.x, n_tilde).modmul(&modpow(h2, &rho, n_tilde), n_tilde);
    let z_prm = modpow(h1, &alpha, n_tilde).modmul(&modpow(h2, &rho_prm, n_tilde), n_tilde);
    let t = modpow(h1, secret.y, n_tilde).modmul(&modpow(h2, &sigma, n_tilde), n_tilde);
    let v = modpow(&c1.0, &alpha, &nn)
        .modmul(&modpow(&pk.gamma(), &gamma, &nn), &nn)
        .modmul(&modpow(&beta, n, &nn), &nn);
    let w = modpow(h1, &gamma, n_tilde).modmul(&modpow(h2, &tau, n_tilde), n_tilde);

    let e = challenge::<C>(
        pk,
        c1,
        c2,
        x_point,
        u.as_ref(),
        &z,
        &z_prm,
        &t,
        &v,
        &w,
        &q,
        context,
    )?;

    let s = modpow(&secret.nonce.0, &e, n).modmul(&beta, n);
    let s1 = &e * secret.x + alpha;
    let s2 = &e * rho + rho_prm;
    let t1 = &e * secret.y + gamma;
    let t2 = &e * sigma + tau;

    Ok((
        ProofBob {
            z,
            z_prm,
            t,
            v,
            w,
            s,
            s1,
            s2,
            t1,
            t2,
        },
        u,
    ))
}

/// Shared verifier; checks the point equation iff the bound point is
/// present.
fn verify_inner<C: CurveTrait>(
    pf: &ProofBob,
    with_check: Option<(&C, &C)>,
    pk: &EncryptionKey,
    verifier_params: &RingPedersen,
    c1: &Ciphertext,
    c2: &Ciphertext,
    context: &impl ProofContext,
) -> bool {
    let n = pk.modulus();
    let nn = pk.modulus_squared();
    let n_tilde = verifier_params.modulus();
    let h1 = verifier_params.h1();
    let h2 = verifier_params.h2();

    let q = C::order();
    let q3 = &q * &q * &q;
    let q7 = &q3 * &q3 * &q;

    // Group membership and coprimality of every component.
    for (value, modulus) in [
        (&pf.z, n_tilde),
        (&pf.z_prm, n_tilde),
        (&pf.t, n_tilde),
        (&pf.v, &nn),
        (&pf.w, n_tilde),
        (&pf.s, n),
    ] {
        if value <= &BigNumber::zero()
            || value >= modulus
            || value.gcd(modulus) != BigNumber::one()
        {
            return false;
        }
    }
    if pf.s.gcd(n) != BigNumber::one() || pf.v.gcd(n) != BigNumber::one() {
        return false;
    }

    // Range bounds on the responses.
    if pf.s1 > q3 || pf.s1 < BigNumber::zero() {
        return false;
    }
    if pf.t1 > q7 || pf.t1 < BigNumber::zero() {
        return false;
    }

    let (x_point, u) = match with_check {
        Some((x_point, u)) => (Some(x_point), Some(u)),
        None => (None, None),
    };
    let e = match challenge::<C>(
        pk, c1, c2, x_point, u, &pf.z, &pf.z_prm, &pf.t, &pf.v, &pf.w, &q, context,
    ) {
        Ok(e) => e,
        Err(_) => return false,
    };

    // (s1 mod q)·G == e·X + U, only in with-check mode.
    if let (Some(x_point), Some(u)) = (x_point, u) {
        let s1_mod_q = pf.s1.nmod(&q);
        let lhs = match C::scale_generator(&s1_mod_q) {
            Ok(point) => point,
            Err(_) => return false,
        };
        let rhs = match x_point.multiply_by_bignum(&e) {
            Ok(point) => point + *u,
            Err(_) => return false,
        };
        if lhs != rhs {
            return false;
        }
    }

    // h1^s1 · h2^s2 ≡ z^e · z' (mod NTilde)
    let lhs = modpow(h1, &pf.s1, n_tilde).modmul(&modpow(h2, &pf.s2, n_tilde), n_tilde);
    let rhs = modpow(&pf.z, &e, n_tilde).modmul(&pf.z_prm, n_tilde);
    if lhs != rhs {
        return false;
    }

    // h1^t1 · h2^t2 ≡ t^e · w (mod NTilde)
    let lhs = modpow(h1, &pf.t1, n_tilde).modmul(&modpow(h2, &pf.t2, n_tilde), n_tilde);
    let rhs = modpow(&pf.t, &e, n_tilde).modmul(&pf.w, n_tilde);
    if lhs != rhs {
        return false;
    }

    // c1^s1 · s^N · Γ^t1 ≡ c2^e · v (mod N²)
    let lhs = modpow(&c1.0, &pf.s1, &nn)
        .modmul(&modpow(&pf.s, n, &nn), &nn)
        .modmul(&modpow(&pk.gamma(), &pf.t1, &nn), &nn);
    let rhs = modpow(&c2.0, &e, &nn).modmul(&pf.v, &nn);
    if lhs != rhs {
        return false;
    }

    true
}

/// Derive the challenge `e ∈ [0, q)`. The bound point and its commitment
/// enter the transcript only in with-check mode, so the two variants derive
/// from disjoint transcript states.
#[allow(clippy::too_many_arguments)]
fn challenge<C: CurveTrait>(
    pk: &EncryptionKey,
    c1: &Ciphertext,
    c2: &Ciphertext,
    x_point: Option<&C>,
    u: Option<&C>,
    z: &BigNumber,
    z_prm: &BigNumber,
    t: &BigNumber,
    v: &BigNumber,
    w: &BigNumber,
    order: &BigNumber,
    context: &impl ProofContext,
) -> Result<BigNumber> {
    let mut transcript = Transcript::new(b"ProofBob");
    transcript.append_message(b"Context", &context.as_bytes()?);
    transcript_bn(&mut transcript, b"N", pk.modulus());
    transcript_bn(&mut transcript, b"Gamma", &pk.gamma());
    if let Some(x_point) = x_point {
        transcript.append_message(b"X", &x_point.to_bytes());
    }
    transcript_bn(&mut transcript, b"c1", &c1.0);
    transcript_bn(&mut transcript, b"c2", &c2.0);
    if let Some(u) = u {
        transcript.append_message(b"U", &u.to_bytes());
    }
    transcript_bn(&mut transcript, b"z", z);
    transcript_bn(&mut transcript, b"zPrm", z_prm);
    transcript_bn(&mut transcript, b"t", t);
    transcript_bn(&mut transcript, b"v", v);
    transcript_bn(&mut transcript, b"w", w);
    positive_challenge_from_transcript(&mut transcript, order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::{CurveTrait, TestCurve},
        paillier::{prime_gen, DecryptionKey},
        protocol::SharedContext,
        utils::testing::init_testing,
    };
    use rand::rngs::StdRng;

    struct TestSetup {
        pk: EncryptionKey,
        params: RingPedersen,
        context: SharedContext,
        c1: Ciphertext,
        c2: Ciphertext,
        x: BigNumber,
        y: BigNumber,
        nonce: Nonce,
    }

    fn setup(rng: &mut StdRng) -> TestSetup {
        let order = TestCurve::order();
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(rng).unwrap();
        let (pk, _) = DecryptionKey::from_primes(p, q);
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(rng).unwrap();
        let (params, _) = RingPedersen::from_primes(rng, &p, &q).unwrap();
        let context = SharedContext::random(rng);

        // c1 encrypts some initiator value; c2 = c1^x · Enc(y).
        let a = BigNumber::from_rng(&order, rng);
        let (c1, _) = pk.encrypt(rng, &a).unwrap();
        let x = BigNumber::from_rng(&order, rng);
        let q5 = &order * &order * &order * &order * &order;
        let y = BigNumber::from_rng(&q5, rng);
        let (c_y, nonce) = pk.encrypt(rng, &y).unwrap();
        let c2 = pk.homo_add(&pk.homo_mul(&x, &c1).unwrap(), &c_y).unwrap();

        TestSetup {
            pk,
            params,
            context,
            c1,
            c2,
            x,
            y,
            nonce,
        }
    }

    #[test]
    fn honest_proof_without_check_verifies() {
        let mut rng = init_testing();
        let s = setup(&mut rng);
        let secret = BobSecret {
            x: &s.x,
            y: &s.y,
            nonce: &s.nonce,
        };
        let proof = ProofBob::prove::<TestCurve, _>(
            &s.pk, &s.params, &s.c1, &s.c2, &secret, &s.context, &mut rng,
        )
        .unwrap();
        assert!(proof.verify::<TestCurve>(&s.pk, &s.params, &s.c1, &s.c2, &s.context));
    }

    #[test]
    fn honest_proof_with_check_verifies() {
        let mut rng = init_testing();
        let s = setup(&mut rng);
        let x_point = TestCurve::scale_generator(&s.x).unwrap();
        let secret = BobSecret {
            x: &s.x,
            y: &s.y,
            nonce: &s.nonce,
        };
        let proof = ProofBobWC::<TestCurve>::prove(
            &s.pk, &s.params, &s.c1, &s.c2, &secret, &x_point, &s.context, &mut rng,
        )
        .unwrap();
        assert!(proof.verify(&s.pk, &s.params, &s.c1, &s.c2, &x_point, &s.context));
    }

    #[test]
    fn binding_to_the_wrong_point_fails() {
        let mut rng = init_testing();
        let s = setup(&mut rng);
        let x_point = TestCurve::scale_generator(&s.x).unwrap();
        let secret = BobSecret {
            x: &s.x,
            y: &s.y,
            nonce: &s.nonce,
        };
        let proof = ProofBobWC::<TestCurve>::prove(
            &s.pk, &s.params, &s.c1, &s.c2, &secret, &x_point, &s.context, &mut rng,
        )
        .unwrap();

        let wrong_point = x_point + TestCurve::generator();
        assert!(!proof.verify(&s.pk, &s.params, &s.c1, &s.c2, &wrong_point, &s.context));
    }

    #[test]
    fn tampered_responses_fail() {
        let mut rng = init_testing();
        let s = setup(&mut rng);
        let secret = BobSecret {
            x: &s.x,
            y: &s.y,
            nonce: &s.nonce,
        };
        let proof = ProofBob::prove::<TestCurve, _>(
            &s.pk, &s.params, &s.c1, &s.c2, &secret, &s.context, &mut rng,
        )
        .unwrap();

        let mut tampered = proof.clone();
        tampered.s1 = tampered.s1 + 1;
        assert!(!tampered.verify::<TestCurve>(&s.pk, &s.params, &s.c1, &s.c2, &s.context));

        let mut tampered = proof.clone();
        tampered.t2 = tampered.t2 + 1;
        assert!(!tampered.verify::<TestCurve>(&s.pk, &s.params, &s.c1, &s.c2, &s.context));

        // Zero components must be rejected outright.
        let mut tampered = proof.clone();
        tampered.v = BigNumber::zero();
        assert!(!tampered.verify::<TestCurve>(&s.pk, &s.params, &s.c1, &s.c2, &s.context));
    }

    #[test]
    fn oversized_bounds_fail() {
        let mut rng = init_testing();
        let s = setup(&mut rng);
        let order = TestCurve::order();
        let secret = BobSecret {
            x: &s.x,
            y: &s.y,
            nonce: &s.nonce,
        };
        let proof = ProofBob::prove::<TestCurve, _>(
            &s.pk, &s.params, &s.c1, &s.c2, &secret, &s.context, &mut rng,
        )
        .unwrap();

        let q3 = &order * &order * &order;
        let mut tampered = proof.clone();
        tampered.s1 = &q3 + 1;
        assert!(!tampered.verify::<TestCurve>(&s.pk, &s.params, &s.c1, &s.c2, &s.context));

        let mut tampered = proof;
        tampered.t1 = &q3 * &q3 * &order + 1;
        assert!(!tampered.verify::<TestCurve>(&s.pk, &s.params, &s.c1, &s.c2, &s.context));
    }
}
