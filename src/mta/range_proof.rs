//! Alice's range proof for the multiplicative-to-additive conversion.
//!
//! Proves that a Paillier ciphertext `c = Enc_pk(m; r)` encrypts a value
//! with `|m| ≤ q³`, against a verifier's ring-Pedersen parameters. Without
//! this bound a malicious initiator could use an oversized share to fish for
//! information about the responder's secret when the response ciphertext
//! wraps the Paillier modulus.
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

/// Alice's non-interactive range proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RangeProofAlice {
    z: BigNumber,
    u: BigNumber,
    w: BigNumber,
    s: BigNumber,
    s1: BigNumber,
    s2: BigNumber,
}

impl RangeProofAlice {
    /// Prove that `ciphertext = Enc_pk(m; nonce)` encrypts a value in range,
    /// towards a verifier holding `verifier_params`.
    ///
    /// `order` is the curve order `q`; the witness `m` must lie in `[0, q)`.
    pub(crate) fn prove<R: RngCore + CryptoRng>(
        pk: &EncryptionKey,
        verifier_params: &RingPedersen,
        ciphertext: &Ciphertext,
        m: &BigNumber,
        nonce: &Nonce,
        order: &BigNumber,
        context: &impl ProofContext,
        rng: &mut R,
    ) -> Result<Self> {
        let n = pk.modulus();
        let nn = pk.modulus_squared();
        let n_tilde = verifier_params.modulus();
        let h1 = verifier_params.h1();
        let h2 = verifier_params.h2();

        let q3 = order * order * order;
        let q_n_tilde = order * n_tilde;
        let q3_n_tilde = &q3 * n_tilde;

        let alpha = random_positive_bn(rng, &q3);
        let beta = random_bn_in_z_star(rng, n)?;
        let gamma = random_positive_bn(rng, &q3_n_tilde);
        let rho = random_positive_bn(rng, &q_n_tilde);

        let z = modpow(h1, m, n_tilde).modmul(&modpow(h2, &rho, n_tilde), n_tilde);
        let u = modpow(&pk.gamma(), &alpha, &nn).modmul(&modpow(&beta, n, &nn), &nn);
        let w = modpow(h1, &alpha, n_tilde).modmul(&modpow(h2, &gamma, n_tilde), n_tilde);

        let e = Self::challenge(
            pk,
            verifier_params,
            ciphertext,
            &z,
            &u,
            &w,
            order,
            context,
        )?;

        let s = modpow(&nonce.0, &e, n).modmul(&beta, n);
        let s1 = &e * m + alpha;
        let s2 = &e * rho + gamma;

        Ok(Self { z, u, w, s, s1, s2 })
    }

    /// Verify the proof. Returns `false` on any failed predicate.
    pub(crate) fn verify(
        &self,
        pk: &EncryptionKey,
        verifier_params: &RingPedersen,
        ciphertext: &Ciphertext,
        order: &BigNumber,
        context: &impl ProofContext,
    ) -> bool {
        let n = pk.modulus();
        let nn = pk.modulus_squared();
        let n_tilde = verifier_params.modulus();
        let h1 = verifier_params.h1();
        let h2 = verifier_params.h2();

        let q3 = order * order * order;
        if self.s1 > q3 || self.s1 < BigNumber::zero() {
            return false;
        }

        // Group membership of the proof components.
        for (value, modulus) in [
            (&self.z, n_tilde),
            (&self.w, n_tilde),
            (&self.u, &nn),
            (&self.s, n),
        ] {
            if value <= &BigNumber::zero()
                || value >= modulus
                || value.gcd(modulus) != BigNumber::one()
            {
                return false;
            }
        }

        let e = match Self::challenge(
            pk,
            verifier_params,
            ciphertext,
            &self.z,
            &self.u,
            &self.w,
            order,
            context,
        ) {
            Ok(e) => e,
            Err(_) => return false,
        };

        // Γ^s1 · s^N ≡ u · c^e (mod N²)
        let lhs = modpow(&pk.gamma(), &self.s1, &nn).modmul(&modpow(&self.s, n, &nn), &nn);
        let rhs = self.u.modmul(&modpow(&ciphertext.0, &e, &nn), &nn);
        if lhs != rhs {
            return false;
        }

        // h1^s1 · h2^s2 ≡ w · z^e (mod NTilde)
        let lhs = modpow(h1, &self.s1, n_tilde).modmul(&modpow(h2, &self.s2, n_tilde), n_tilde);
        let rhs = self.w.modmul(&modpow(&self.z, &e, n_tilde), n_tilde);
        if lhs != rhs {
            return false;
        }

        true
    }

    #[allow(clippy::too_many_arguments)]
    fn challenge(
        pk: &EncryptionKey,
        verifier_params: &RingPedersen,
        ciphertext: &Ciphertext,
        z: &BigNumber,
        u: &BigNumber,
        w: &BigNumber,
        order: &BigNumber,
        context: &impl ProofContext,
    ) -> Result<BigNumber> {
        let mut transcript = Transcript::new(b"RangeProofAlice");
        transcript.append_message(b"Context", &context.as_bytes()?);
        transcript_bn(&mut transcript, b"N", pk.modulus());
        transcript_bn(&mut transcript, b"Gamma", &pk.gamma());
        transcript_bn(&mut transcript, b"NTilde", verifier_params.modulus());
        transcript_bn(&mut transcript, b"h1", verifier_params.h1());
        transcript_bn(&mut transcript, b"h2", verifier_params.h2());
        transcript_bn(&mut transcript, b"c", &ciphertext.0);
        transcript_bn(&mut transcript, b"z", z);
        transcript_bn(&mut transcript, b"u", u);
        transcript_bn(&mut transcript, b"w", w);
        positive_challenge_from_transcript(&mut transcript, order).map_err(|err| {
            error!("failed to derive a range proof challenge");
            err
        })
    }
}
