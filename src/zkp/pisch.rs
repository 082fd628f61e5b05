//! Schnorr proof of knowledge of a discrete logarithm.
//!
//! Proves knowledge of `x` such that `X = x·G`. The prover samples
//! `α ← Z_q`, sends `A = α·G`, derives the challenge `e ∈ [0, q)` from the
//! transcript and responds with `z = α + e·x mod q`. The verifier accepts
//! iff `z·G = A + e·X`.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{InternalError, Result},
    utils::positive_challenge_from_transcript,
    zkp::{Proof, ProofContext},
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::error;
use zeroize::Zeroize;

/// Public input: the point whose discrete log is proven.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a, C> {
    x_point: &'a C,
}

impl<'a, C: CurveTrait> CommonInput<'a, C> {
    pub(crate) fn new(x_point: &'a C) -> Self {
        Self { x_point }
    }
}

/// The prover's witness.
pub(crate) struct ProverSecret<'a, C: CurveTrait> {
    x: &'a C::Scalar,
}

impl<'a, C: CurveTrait> ProverSecret<'a, C> {
    pub(crate) fn new(x: &'a C::Scalar) -> Self {
        Self { x }
    }
}

impl<C: CurveTrait> std::fmt::Debug for ProverSecret<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pisch::ProverSecret([redacted])")
    }
}

/// A non-interactive Schnorr proof of knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct PiSchProof<C: CurveTrait> {
    /// The commitment `A = α·G`.
    commitment: C,
    /// The response `z = α + e·x mod q`.
    response: C::Scalar,
}

impl<C: CurveTrait> Proof for PiSchProof<C> {
    type CommonInput<'a> = CommonInput<'a, C>;
    type ProverSecret<'a> = ProverSecret<'a, C>;

    fn prove<'a, R: RngCore + CryptoRng>(
        input: Self::CommonInput<'a>,
        secret: Self::ProverSecret<'a>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let mut alpha = C::Scalar::random(rng);
        let commitment = C::generator().multiply_by_scalar(&alpha);

        let e = challenge(&commitment, input.x_point, context, transcript)?;
        let response = alpha.add(&e.mul(secret.x));

        alpha.zeroize();
        Ok(Self {
            commitment,
            response,
        })
    }

    fn verify<'a>(
        self,
        input: Self::CommonInput<'a>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        let e = challenge(&self.commitment, input.x_point, context, transcript)?;

        let lhs = C::generator().multiply_by_scalar(&self.response);
        let rhs = self.commitment + input.x_point.multiply_by_scalar(&e);
        if lhs != rhs {
            error!("Schnorr proof verification failed");
            return Err(InternalError::FailedToVerifyProof);
        }
        Ok(())
    }
}

/// Derive the challenge `e ∈ [0, q)` from the transcript.
fn challenge<C: CurveTrait>(
    commitment: &C,
    x_point: &C,
    context: &impl ProofContext,
    transcript: &mut Transcript,
) -> Result<C::Scalar> {
    transcript.append_message(b"PiSch ProofContext", &context.as_bytes()?);
    transcript.append_message(b"G", &C::generator().to_bytes());
    transcript.append_message(b"X", &x_point.to_bytes());
    transcript.append_message(b"A", &commitment.to_bytes());

    let e = positive_challenge_from_transcript(transcript, &C::order())?;
    C::bn_to_scalar(&e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{curve::TestCurve, protocol::SharedContext, utils::testing::init_testing};
    use rand::rngs::StdRng;

    type Scalar = <TestCurve as CurveTrait>::Scalar;

    fn transcript() -> Transcript {
        Transcript::new(b"PiSchProof Test")
    }

    fn random_statement(rng: &mut StdRng) -> (Scalar, TestCurve) {
        let x = Scalar::random(rng);
        let x_point = TestCurve::generator().multiply_by_scalar(&x);
        (x, x_point)
    }

    #[test]
    fn proof_verifies_for_honest_prover() {
        let mut rng = init_testing();
        let context = SharedContext::random(&mut rng);
        let (x, x_point) = random_statement(&mut rng);

        let proof = PiSchProof::<TestCurve>::prove(
            CommonInput::new(&x_point),
            ProverSecret::new(&x),
            &context,
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof
            .verify(CommonInput::new(&x_point), &context, &mut transcript())
            .is_ok());
    }

    #[test]
    fn tampered_response_is_rejected() {
        let mut rng = init_testing();
        let context = SharedContext::random(&mut rng);
        let (x, x_point) = random_statement(&mut rng);

        let proof = PiSchProof::<TestCurve>::prove(
            CommonInput::new(&x_point),
            ProverSecret::new(&x),
            &context,
            &mut transcript(),
            &mut rng,
        )
        .unwrap();

        for delta in [Scalar::one(), Scalar::one().negate()] {
            let mut tampered = proof.clone();
            tampered.response = tampered.response.add(&delta);
            assert!(tampered
                .verify(CommonInput::new(&x_point), &context, &mut transcript())
                .is_err());
        }
    }

    #[test]
    fn wrong_statement_is_rejected() {
        let mut rng = init_testing();
        let context = SharedContext::random(&mut rng);
        let (x, x_point) = random_statement(&mut rng);

        let proof = PiSchProof::<TestCurve>::prove(
            CommonInput::new(&x_point),
            ProverSecret::new(&x),
            &context,
            &mut transcript(),
            &mut rng,
        )
        .unwrap();

        // Shift the public point to (x + 1) G.
        let shifted = x_point + TestCurve::generator();
        assert!(proof
            .verify(CommonInput::new(&shifted), &context, &mut transcript())
            .is_err());
    }

    #[test]
    fn context_binding_is_enforced() {
        let mut rng = init_testing();
        let context = SharedContext::random(&mut rng);
        let other_context = SharedContext::random(&mut rng);
        let (x, x_point) = random_statement(&mut rng);

        let proof = PiSchProof::<TestCurve>::prove(
            CommonInput::new(&x_point),
            ProverSecret::new(&x),
            &context,
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof
            .verify(CommonInput::new(&x_point), &other_context, &mut transcript())
            .is_err());
    }
}
