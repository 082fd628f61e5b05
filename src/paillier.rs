//! The Paillier cryptosystem.
//!
//! Paillier is an additively homomorphic public-key scheme over `Z*_{N²}`:
//! the product of two ciphertexts decrypts to the sum of their plaintexts,
//! and a ciphertext raised to a constant decrypts to the scaled plaintext.
//! The multiplicative-to-additive conversion at the heart of threshold ECDSA
//! is built entirely out of these two operations.
//!
//! Key generation requires safe primes and can take a long time; it runs
//! under a caller-supplied deadline and fails with
//! [`PaillierError::PrimeGenTimeout`] when the budget is exhausted.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::utils::{modpow, random_bn_in_z_star};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Display, Formatter},
    sync::mpsc,
    time::{Duration, Instant},
};
use tracing::error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The bit length of a Paillier modulus `N`.
pub(crate) const PAILLIER_MODULUS_BITS: usize = 2048;
/// The bit length of each safe prime factor of `N`.
pub(crate) const PAILLIER_PRIME_BITS: usize = PAILLIER_MODULUS_BITS / 2;

/// Errors arising from Paillier operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaillierError {
    /// Safe-prime generation exceeded its time budget.
    PrimeGenTimeout,
    /// A plaintext was outside `[0, N)`.
    PlaintextOutOfRange,
    /// A ciphertext was outside `Z*_{N²}`.
    CiphertextOutOfRange,
    /// Failed to sample an encryption nonce.
    NonceSamplingFailed,
}

impl Display for PaillierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::PrimeGenTimeout => "safe-prime generation exceeded its time budget",
            Self::PlaintextOutOfRange => "plaintext out of range for the Paillier modulus",
            Self::CiphertextOutOfRange => "ciphertext is not a unit modulo N^2",
            Self::NonceSamplingFailed => "failed to sample an encryption nonce",
        };
        write!(f, "{message}")
    }
}

impl std::error::Error for PaillierError {}

/// A Paillier ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext(pub(crate) BigNumber);

/// The randomness used to produce a [`Ciphertext`]; an element of `Z*_N`.
///
/// The nonce seeds the zero-knowledge proofs made about its ciphertext, so
/// it is secret material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct Nonce(pub(crate) BigNumber);

impl Debug for Nonce {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Nonce([redacted])")
    }
}

/// A Paillier encryption key.
///
/// The key stores the modulus `N`; the scheme's generator is `Γ = N + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    n: BigNumber,
}

impl EncryptionKey {
    pub(crate) fn from_modulus(n: BigNumber) -> Self {
        Self { n }
    }

    /// The modulus `N`.
    pub(crate) fn modulus(&self) -> &BigNumber {
        &self.n
    }

    /// The generator `Γ = N + 1`.
    pub(crate) fn gamma(&self) -> BigNumber {
        &self.n + 1
    }

    pub(crate) fn modulus_squared(&self) -> BigNumber {
        &self.n * &self.n
    }

    /// Encrypt `m ∈ [0, N)`, returning the ciphertext and the nonce drawn
    /// for it.
    ///
    /// Encryption is the only probabilistic operation of the scheme; the
    /// nonce is needed to later prove statements about the ciphertext.
    pub(crate) fn encrypt<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        m: &BigNumber,
    ) -> Result<(Ciphertext, Nonce), PaillierError> {
        if m < &BigNumber::zero() || m >= &self.n {
            error!("cannot encrypt a plaintext outside [0, N)");
            return Err(PaillierError::PlaintextOutOfRange);
        }
        let nonce =
            random_bn_in_z_star(rng, &self.n).map_err(|_| PaillierError::NonceSamplingFailed)?;
        let c = self.encrypt_with_nonce(m, &nonce)?;
        Ok((c, Nonce(nonce)))
    }

    /// Encrypt `m` with a fixed nonce: `c = (1 + N)^m · r^N mod N²`.
    pub(crate) fn encrypt_with_nonce(
        &self,
        m: &BigNumber,
        nonce: &BigNumber,
    ) -> Result<Ciphertext, PaillierError> {
        if m < &BigNumber::zero() || m >= &self.n {
            error!("cannot encrypt a plaintext outside [0, N)");
            return Err(PaillierError::PlaintextOutOfRange);
        }
        let nn = self.modulus_squared();
        // (1 + N)^m = 1 + mN (mod N²), but the generic modpow is clearer
        // and this is not a hot path.
        let gm = modpow(&self.gamma(), m, &nn);
        let rn = modpow(nonce, &self.n, &nn);
        Ok(Ciphertext(gm.modmul(&rn, &nn)))
    }

    /// Homomorphic addition: a ciphertext of `a + b mod N` from ciphertexts
    /// of `a` and `b`.
    pub(crate) fn homo_add(
        &self,
        c1: &Ciphertext,
        c2: &Ciphertext,
    ) -> Result<Ciphertext, PaillierError> {
        let nn = self.modulus_squared();
        self.check_ciphertext(&c1.0)?;
        self.check_ciphertext(&c2.0)?;
        Ok(Ciphertext(c1.0.modmul(&c2.0, &nn)))
    }

    /// Homomorphic scaling: a ciphertext of `k · a mod N` from a ciphertext
    /// of `a` and a public constant `k ≥ 0`.
    pub(crate) fn homo_mul(
        &self,
        k: &BigNumber,
        c: &Ciphertext,
    ) -> Result<Ciphertext, PaillierError> {
        if k < &BigNumber::zero() {
            error!("homomorphic scaling expects a non-negative constant");
            return Err(PaillierError::PlaintextOutOfRange);
        }
        let nn = self.modulus_squared();
        self.check_ciphertext(&c.0)?;
        Ok(Ciphertext(modpow(&c.0, k, &nn)))
    }

    fn check_ciphertext(&self, c: &BigNumber) -> Result<(), PaillierError> {
        let nn = self.modulus_squared();
        if c <= &BigNumber::zero() || c >= &nn || c.gcd(&nn) != BigNumber::one() {
            error!("ciphertext is not a unit modulo N^2");
            return Err(PaillierError::CiphertextOutOfRange);
        }
        Ok(())
    }
}

/// A Paillier decryption key.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct DecryptionKey {
    p: BigNumber,
    q: BigNumber,
}

impl Debug for DecryptionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("DecryptionKey([redacted])")
    }
}

impl DecryptionKey {
    /// Generate a fresh keypair from safe primes of [`PAILLIER_PRIME_BITS`]
    /// bits each.
    ///
    /// Generation is unbounded in theory; in practice it completes well
    /// within the default five-minute budget. If the `timeout` elapses first
    /// this fails with [`PaillierError::PrimeGenTimeout`] and the orphaned
    /// worker results are discarded.
    pub(crate) fn keygen(timeout: Duration) -> Result<(EncryptionKey, Self), PaillierError> {
        let deadline = Instant::now() + timeout;
        let (sender, receiver) = mpsc::channel();
        for _ in 0..2 {
            let sender = sender.clone();
            let _ = std::thread::spawn(move || {
                let prime = BigNumber::safe_prime(PAILLIER_PRIME_BITS);
                // The receiver may be gone if the deadline passed.
                let _ = sender.send(prime);
            });
        }
        drop(sender);

        let mut primes = Vec::with_capacity(2);
        while primes.len() < 2 {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(PaillierError::PrimeGenTimeout)?;
            match receiver.recv_timeout(remaining) {
                Ok(prime) => primes.push(prime),
                Err(_) => {
                    error!("safe-prime generation timed out");
                    return Err(PaillierError::PrimeGenTimeout);
                }
            }
        }
        let q = primes.pop().ok_or(PaillierError::PrimeGenTimeout)?;
        let p = primes.pop().ok_or(PaillierError::PrimeGenTimeout)?;
        Ok(Self::from_primes(p, q))
    }

    /// Assemble a keypair from two (safe) primes.
    pub(crate) fn from_primes(p: BigNumber, q: BigNumber) -> (EncryptionKey, Self) {
        let n = &p * &q;
        (EncryptionKey::from_modulus(n), Self { p, q })
    }

    /// The public key for this decryption key.
    pub(crate) fn encryption_key(&self) -> EncryptionKey {
        EncryptionKey::from_modulus(self.modulus())
    }

    pub(crate) fn modulus(&self) -> BigNumber {
        &self.p * &self.q
    }

    /// The prime factors of the modulus, for proofs about it.
    pub(crate) fn primes(&self) -> (&BigNumber, &BigNumber) {
        (&self.p, &self.q)
    }

    fn totient(&self) -> BigNumber {
        (&self.p - 1) * (&self.q - 1)
    }

    /// Decrypt a ciphertext: `m = L(c^λ mod N²) · L(Γ^λ mod N²)⁻¹ mod N`
    /// where `L(x) = (x - 1) / N` and `λ = lcm(p - 1, q - 1)`.
    pub(crate) fn decrypt(&self, c: &Ciphertext) -> Result<BigNumber, PaillierError> {
        let n = self.modulus();
        let nn = &n * &n;
        self.encryption_key().check_ciphertext(&c.0)?;

        let lambda = (&self.p - 1i64).lcm(&(&self.q - 1i64));
        let ell = |x: BigNumber| -> BigNumber { (x - 1) / &n };

        let mu = ell(modpow(&(&n + 1), &lambda, &nn))
            .invert(&n)
            .ok_or(PaillierError::CiphertextOutOfRange)?;
        let m = ell(modpow(&c.0, &lambda, &nn)).modmul(&mu, &n);
        Ok(m)
    }

    /// Decrypt a ciphertext and recover the nonce it was produced with.
    ///
    /// With `m` known, `c · Γ^{-m} ≡ r^N (mod N²)`; reducing mod `N` and
    /// taking the `N`-th root via `N⁻¹ mod φ(N)` yields `r`.
    pub(crate) fn decrypt_with_nonce(
        &self,
        c: &Ciphertext,
    ) -> Result<(BigNumber, Nonce), PaillierError> {
        let m = self.decrypt(c)?;
        let n = self.modulus();
        let nn = &n * &n;

        let gamma_to_m = modpow(&(&n + 1), &m, &nn);
        let gamma_inverse = gamma_to_m
            .invert(&nn)
            .ok_or(PaillierError::CiphertextOutOfRange)?;
        let r_to_n = c.0.modmul(&gamma_inverse, &nn).nmod(&n);

        let n_inverse = n
            .invert(&self.totient())
            .ok_or(PaillierError::CiphertextOutOfRange)?;
        let r = modpow(&r_to_n, &n_inverse, &n);
        Ok((m, Nonce(r)))
    }
}

/// Safe-prime generation for tests.
///
/// Producing fresh safe primes for every test run is prohibitively slow, so
/// tests draw from a small process-wide pool that is filled once. Primes
/// from the pool are shared across test keys; never use this outside tests.
#[cfg(test)]
pub(crate) mod prime_gen {
    use super::*;
    use crate::errors::{CallerError, InternalError, Result};
    use rand::Rng;
    use std::sync::OnceLock;

    /// Number of distinct safe primes in the pool.
    const POOL_SIZE: usize = 4;

    static POOL: OnceLock<Vec<BigNumber>> = OnceLock::new();

    fn pool() -> &'static [BigNumber] {
        POOL.get_or_init(|| {
            eprintln!(
                "Filling the test pool with {POOL_SIZE} safe primes; this is done once per run"
            );
            (0..POOL_SIZE)
                .map(|_| BigNumber::safe_prime(PAILLIER_PRIME_BITS))
                .collect()
        })
    }

    /// Get a pair of distinct safe primes from the pool.
    pub(crate) fn get_prime_pair_from_pool_insecure<R: RngCore + CryptoRng>(
        rng: &mut R,
    ) -> Result<(BigNumber, BigNumber)> {
        let pool = pool();
        let i = rng.gen_range(0..pool.len());
        let offset = rng.gen_range(1..pool.len());
        let j = (i + offset) % pool.len();
        if i == j {
            return Err(InternalError::CallingApplicationMistake(
                CallerError::RetryFailed,
            ));
        }
        Ok((pool[i].clone(), pool[j].clone()))
    }
}
