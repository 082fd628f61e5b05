//! Zero-knowledge proofs used across the protocols.
//!
//! All proofs are non-interactive via Fiat-Shamir over a
//! [`merlin::Transcript`]; challenges are rejection-sampled into the target
//! interval rather than reduced, to avoid bias. Every transcript binds a
//! [`ProofContext`] so proofs cannot be replayed across sessions or
//! protocols.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

pub(crate) mod piprm;
pub(crate) mod pisch;

use crate::errors::Result;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};

/// Context to bind to a proof transcript, tying it to one protocol run.
pub(crate) trait ProofContext {
    /// A byte encoding of the context.
    fn as_bytes(&self) -> Result<Vec<u8>>;
}

/// A generic zero-knowledge proof over public input `CommonInput` and
/// witness `ProverSecret`.
pub(crate) trait Proof: Sized {
    type CommonInput<'a>;
    type ProverSecret<'a>;

    /// Produce a proof for the given statement and witness.
    fn prove<'a, R: RngCore + CryptoRng>(
        input: Self::CommonInput<'a>,
        secret: Self::ProverSecret<'a>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self>;

    /// Verify the proof against the given statement; fails with
    /// [`crate::errors::InternalError::FailedToVerifyProof`] on rejection.
    fn verify<'a>(
        self,
        input: Self::CommonInput<'a>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()>;
}
