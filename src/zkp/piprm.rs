//! Proof of well-formedness of ring-Pedersen parameters.
//!
//! Proves knowledge of an exponent `α` with `h2 = h1^α mod NTilde`, which
//! places `h2` in the subgroup generated by `h1`. Soundness comes from 128
//! parallel repetitions with binary challenges; during key generation each
//! party proves both directions (`h2` w.r.t. `h1` and `h1` w.r.t. `h2`), so
//! the two generators span the same subgroup.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    errors::{InternalError, Result},
    utils::{modpow, random_positive_bn, transcript_bn},
    zkp::{Proof, ProofContext},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Number of parallel repetitions; the soundness error is `2^-128`.
const SOUNDNESS: usize = 128;

/// Public input: the modulus and the claimed base/target generators.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a> {
    modulus: &'a BigNumber,
    base: &'a BigNumber,
    target: &'a BigNumber,
}

impl<'a> CommonInput<'a> {
    pub(crate) fn new(modulus: &'a BigNumber, base: &'a BigNumber, target: &'a BigNumber) -> Self {
        Self {
            modulus,
            base,
            target,
        }
    }
}

/// The prover's witness: the exponent and the group order.
pub(crate) struct ProverSecret<'a> {
    exponent: &'a BigNumber,
    phi: &'a BigNumber,
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(exponent: &'a BigNumber, phi: &'a BigNumber) -> Self {
        Self { exponent, phi }
    }
}

impl std::fmt::Debug for ProverSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("piprm::ProverSecret([redacted])")
    }
}

/// A non-interactive proof that `target` lies in the subgroup generated by
/// `base` modulo `modulus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PiPrmProof {
    commitments: Vec<BigNumber>,
    responses: Vec<BigNumber>,
}

impl Proof for PiPrmProof {
    type CommonInput<'a> = CommonInput<'a>;
    type ProverSecret<'a> = ProverSecret<'a>;

    fn prove<'a, R: RngCore + CryptoRng>(
        input: Self::CommonInput<'a>,
        secret: Self::ProverSecret<'a>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let nonces = std::iter::repeat_with(|| random_positive_bn(rng, secret.phi))
            .take(SOUNDNESS)
            .collect::<Vec<_>>();
        let commitments = nonces
            .iter()
            .map(|nonce| modpow(input.base, nonce, input.modulus))
            .collect::<Vec<_>>();

        let challenge_bits = challenge_bits(&input, &commitments, context, transcript)?;
        let responses = nonces
            .iter()
            .zip(&challenge_bits)
            .map(|(nonce, &bit)| {
                if bit {
                    (nonce + secret.exponent).nmod(secret.phi)
                } else {
                    nonce.clone()
                }
            })
            .collect::<Vec<_>>();

        Ok(Self {
            commitments,
            responses,
        })
    }

    fn verify<'a>(
        self,
        input: Self::CommonInput<'a>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        if self.commitments.len() != SOUNDNESS || self.responses.len() != SOUNDNESS {
            error!("ring-Pedersen proof has the wrong number of repetitions");
            return Err(InternalError::FailedToVerifyProof);
        }

        let challenge_bits = challenge_bits(&input, &self.commitments, context, transcript)?;
        for ((commitment, response), bit) in self
            .commitments
            .iter()
            .zip(&self.responses)
            .zip(&challenge_bits)
        {
            // base^z must equal A · target^e for the binary challenge e.
            let lhs = modpow(input.base, response, input.modulus);
            let rhs = if *bit {
                commitment.modmul(input.target, input.modulus)
            } else {
                commitment.nmod(input.modulus)
            };
            if lhs != rhs {
                error!("ring-Pedersen parameter proof failed to verify");
                return Err(InternalError::FailedToVerifyProof);
            }
        }
        Ok(())
    }
}

/// Derive the `SOUNDNESS` binary challenges from the transcript.
fn challenge_bits(
    input: &CommonInput,
    commitments: &[BigNumber],
    context: &impl ProofContext,
    transcript: &mut Transcript,
) -> Result<Vec<bool>> {
    transcript.append_message(b"PiPrm ProofContext", &context.as_bytes()?);
    transcript_bn(transcript, b"modulus", input.modulus);
    transcript_bn(transcript, b"base", input.base);
    transcript_bn(transcript, b"target", input.target);
    for commitment in commitments {
        transcript_bn(transcript, b"commitment", commitment);
    }

    let mut bytes = [0u8; SOUNDNESS / 8];
    transcript.challenge_bytes(b"challenge bits", &mut bytes);
    Ok(bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |i| (byte >> i) & 1 == 1))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        paillier::prime_gen, protocol::SharedContext, ring_pedersen::RingPedersen,
        utils::testing::init_testing,
    };

    fn transcript() -> Transcript {
        Transcript::new(b"PiPrmProof Test")
    }

    #[test]
    fn honest_proofs_verify_in_both_directions() {
        let mut rng = init_testing();
        let context = SharedContext::random(&mut rng);
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(&mut rng).unwrap();
        let (params, witness) = RingPedersen::from_primes(&mut rng, &p, &q).unwrap();

        let forward = CommonInput::new(params.modulus(), params.h1(), params.h2());
        let proof = PiPrmProof::prove(
            forward,
            ProverSecret::new(witness.alpha(), witness.phi()),
            &context,
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(forward, &context, &mut transcript()).is_ok());

        let reverse = CommonInput::new(params.modulus(), params.h2(), params.h1());
        let proof = PiPrmProof::prove(
            reverse,
            ProverSecret::new(witness.beta(), witness.phi()),
            &context,
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(reverse, &context, &mut transcript()).is_ok());
    }

    #[test]
    fn proof_for_unrelated_target_is_rejected() {
        let mut rng = init_testing();
        let context = SharedContext::random(&mut rng);
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(&mut rng).unwrap();
        let (params, witness) = RingPedersen::from_primes(&mut rng, &p, &q).unwrap();

        let input = CommonInput::new(params.modulus(), params.h1(), params.h2());
        let proof = PiPrmProof::prove(
            input,
            ProverSecret::new(witness.alpha(), witness.phi()),
            &context,
            &mut transcript(),
            &mut rng,
        )
        .unwrap();

        // Verifying against a shifted target must fail.
        let shifted_target = params.h2().modmul(params.h1(), params.modulus());
        let bad_input = CommonInput::new(params.modulus(), params.h1(), &shifted_target);
        assert!(proof
            .verify(bad_input, &context, &mut transcript())
            .is_err());
    }

    #[test]
    fn truncated_proofs_are_rejected() {
        let mut rng = init_testing();
        let context = SharedContext::random(&mut rng);
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(&mut rng).unwrap();
        let (params, witness) = RingPedersen::from_primes(&mut rng, &p, &q).unwrap();

        let input = CommonInput::new(params.modulus(), params.h1(), params.h2());
        let mut proof = PiPrmProof::prove(
            input,
            ProverSecret::new(witness.alpha(), witness.phi()),
            &context,
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        let _ = proof.responses.pop();
        assert!(proof.verify(input, &context, &mut transcript()).is_err());
    }
}
