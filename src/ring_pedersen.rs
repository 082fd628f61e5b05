//! Ring-Pedersen commitment parameters.
//!
//! The auxiliary triple `(NTilde, h1, h2)` backs the range and
//! multiplicative-to-additive proofs: `NTilde` is a product of two safe
//! primes and `h1`, `h2` generate the same quadratic-residue subgroup of
//! `Z*_NTilde`, with `h2 = h1^α` for a secret `α`. Well-formedness is
//! established towards peers with the discrete-log proofs in
//! [`crate::zkp::piprm`], run in both directions.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    errors::{CallerError, InternalError, Result},
    paillier::{PaillierError, PAILLIER_PRIME_BITS},
    utils::{modpow, random_bn_in_z_star, random_positive_bn, CRYPTOGRAPHIC_RETRY_MAX},
};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Formatter},
    sync::mpsc,
    time::{Duration, Instant},
};
use tracing::error;
use zeroize::ZeroizeOnDrop;

/// The public ring-Pedersen parameters of one party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingPedersen {
    n_tilde: BigNumber,
    h1: BigNumber,
    h2: BigNumber,
}

/// The secrets behind a party's own [`RingPedersen`] parameters, retained to
/// prove their well-formedness.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct RingPedersenWitness {
    phi: BigNumber,
    /// `h2 = h1^alpha mod NTilde`.
    alpha: BigNumber,
    /// `h1 = h2^beta mod NTilde`; `beta = alpha⁻¹ mod phi`.
    beta: BigNumber,
}

impl Debug for RingPedersenWitness {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("RingPedersenWitness([redacted])")
    }
}

impl RingPedersen {
    /// The modulus `NTilde`.
    pub(crate) fn modulus(&self) -> &BigNumber {
        &self.n_tilde
    }

    /// The first generator.
    pub(crate) fn h1(&self) -> &BigNumber {
        &self.h1
    }

    /// The second generator.
    pub(crate) fn h2(&self) -> &BigNumber {
        &self.h2
    }

    /// Generate fresh parameters from two safe primes produced within
    /// `timeout`.
    pub(crate) fn gen(timeout: Duration) -> Result<(Self, RingPedersenWitness)> {
        let deadline = Instant::now() + timeout;
        let (sender, receiver) = mpsc::channel();
        for _ in 0..2 {
            let sender = sender.clone();
            let _ = std::thread::spawn(move || {
                let prime = BigNumber::safe_prime(PAILLIER_PRIME_BITS);
                let _ = sender.send(prime);
            });
        }
        drop(sender);

        let mut primes = Vec::with_capacity(2);
        while primes.len() < 2 {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| paillier_timeout())?;
            let prime = receiver
                .recv_timeout(remaining)
                .map_err(|_| paillier_timeout())?;
            primes.push(prime);
        }
        let q = primes.pop().ok_or_else(paillier_timeout)?;
        let p = primes.pop().ok_or_else(paillier_timeout)?;
        let mut rng = rand::rngs::OsRng;
        Self::from_primes(&mut rng, &p, &q)
    }

    /// Assemble parameters from two (safe) primes.
    pub(crate) fn from_primes<R: RngCore + CryptoRng>(
        rng: &mut R,
        p: &BigNumber,
        q: &BigNumber,
    ) -> Result<(Self, RingPedersenWitness)> {
        let n_tilde = p * q;
        let phi = (p - 1) * (q - 1);

        // h1 is a random quadratic residue, so it generates the subgroup of
        // squares.
        let f = random_bn_in_z_star(rng, &n_tilde)?;
        let h1 = f.modmul(&f, &n_tilde);

        // alpha must be invertible mod phi so that the reverse direction
        // h1 = h2^beta can also be proven.
        let (alpha, beta) = std::iter::repeat_with(|| random_positive_bn(rng, &phi))
            .take(CRYPTOGRAPHIC_RETRY_MAX)
            .find_map(|alpha| alpha.invert(&phi).map(|beta| (alpha, beta)))
            .ok_or_else(|| {
                error!("failed to sample an invertible exponent for ring-Pedersen parameters");
                InternalError::CallingApplicationMistake(CallerError::RetryFailed)
            })?;
        let h2 = modpow(&h1, &alpha, &n_tilde);

        Ok((
            Self { n_tilde, h1, h2 },
            RingPedersenWitness { phi, alpha, beta },
        ))
    }

    /// Validate a peer's parameters: modulus size, generators in range and
    /// coprime to the modulus, and `h1 ≠ h2`.
    ///
    /// The `h1 ≠ h2` check may be skipped in benchmark setups via the unsafe
    /// keygen flag; callers log loudly when they do so.
    pub(crate) fn validate(&self, check_h1_h2_distinct: bool) -> Result<()> {
        if self.n_tilde.bit_length() < PAILLIER_PRIME_BITS * 2 - 1 {
            error!("ring-Pedersen modulus is too small");
            return Err(InternalError::FailedToVerifyProof);
        }
        for h in [&self.h1, &self.h2] {
            if h <= &BigNumber::one()
                || h >= &self.n_tilde
                || h.gcd(&self.n_tilde) != BigNumber::one()
            {
                error!("ring-Pedersen generator is not a unit in the ring");
                return Err(InternalError::FailedToVerifyProof);
            }
        }
        if check_h1_h2_distinct && self.h1 == self.h2 {
            error!("ring-Pedersen generators are equal");
            return Err(InternalError::FailedToVerifyProof);
        }
        Ok(())
    }
}

impl RingPedersenWitness {
    pub(crate) fn phi(&self) -> &BigNumber {
        &self.phi
    }

    pub(crate) fn alpha(&self) -> &BigNumber {
        &self.alpha
    }

    pub(crate) fn beta(&self) -> &BigNumber {
        &self.beta
    }
}

fn paillier_timeout() -> InternalError {
    error!("{}", PaillierError::PrimeGenTimeout);
    InternalError::PaillierError(PaillierError::PrimeGenTimeout)
}
