//! Key share material for the Schnorr-style (EdDSA) protocols.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::CurveTrait,
    errors::{CallerError, Result},
    keygen::KeySharePublic,
    protocol::{self, ParticipantIdentifier},
    vss,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// This participant's Shamir share of the joint EdDSA private key.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct SharePrivate<C: CurveTrait> {
    x: C::Scalar,
}

impl<C: CurveTrait> std::fmt::Debug for SharePrivate<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharePrivate([redacted])")
    }
}

impl<C: CurveTrait> SharePrivate<C> {
    pub(crate) fn from_scalar(x: &C::Scalar) -> Self {
        Self { x: *x }
    }

    /// The share as a scalar.
    pub(crate) fn as_scalar(&self) -> &C::Scalar {
        &self.x
    }
}

/// The output of a successful EdDSA key generation (or resharing) run for
/// one party.
///
/// Structurally a slimmed-down ECDSA key share: there is no Paillier or
/// ring-Pedersen material because Schnorr-style signing needs none.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct Output<C: CurveTrait> {
    threshold: usize,
    public_key: C,
    private_key_share: SharePrivate<C>,
    public_key_shares: Vec<KeySharePublic<C>>,
    vss_commitments: Vec<(ParticipantIdentifier, Vec<C>)>,
}

impl<C: CurveTrait> Output<C> {
    pub(crate) fn from_parts(
        threshold: usize,
        public_key: C,
        private_key_share: SharePrivate<C>,
        public_key_shares: Vec<KeySharePublic<C>>,
        vss_commitments: Vec<(ParticipantIdentifier, Vec<C>)>,
    ) -> Result<Self> {
        let share_pids = public_key_shares
            .iter()
            .map(KeySharePublic::participant)
            .collect::<HashSet<_>>();
        if share_pids.len() != public_key_shares.len() {
            error!("output must contain exactly one share per participant");
            Err(CallerError::BadInput)?;
        }
        if public_key_shares.len() <= threshold {
            error!("threshold must be below the number of shareholders");
            Err(CallerError::BadInput)?;
        }

        let output = Self {
            threshold,
            public_key,
            private_key_share,
            public_key_shares,
            vss_commitments,
        };
        output.check_shares_interpolate()?;
        Ok(output)
    }

    /// Check that the Shamir share points interpolate, in the exponent, to
    /// the claimed joint public key.
    fn check_shares_interpolate(&self) -> Result<()> {
        let participants = self.participants();
        let quorum = self
            .public_key_shares
            .iter()
            .take(self.threshold + 1)
            .map(|share| protocol::share_coordinate(&participants, share.participant()))
            .collect::<Result<Vec<_>>>()?;

        let mut interpolated = C::identity();
        for share in self.public_key_shares.iter().take(self.threshold + 1) {
            let coordinate = protocol::share_coordinate(&participants, share.participant())?;
            let lambda = vss::lagrange_coefficient_at_zero::<C>(coordinate, &quorum)?;
            interpolated = interpolated + share.as_ref().multiply_by_scalar(&lambda);
        }
        if interpolated != self.public_key {
            error!("share points do not interpolate to the joint public key");
            Err(CallerError::BadInput)?;
        }
        Ok(())
    }

    /// The signing threshold `t`; any `t + 1` shareholders can sign.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// This party's secret key share.
    pub(crate) fn private_key_share(&self) -> &SharePrivate<C> {
        &self.private_key_share
    }

    /// Every party's public key share.
    pub fn public_key_shares(&self) -> &[KeySharePublic<C>] {
        &self.public_key_shares
    }

    /// All shareholders of this key.
    pub fn participants(&self) -> Vec<ParticipantIdentifier> {
        self.public_key_shares
            .iter()
            .map(KeySharePublic::participant)
            .collect()
    }

    /// The 1-based share coordinate of `pid` among the shareholders.
    pub(crate) fn share_coordinate(&self, pid: ParticipantIdentifier) -> Result<usize> {
        protocol::share_coordinate(&self.participants(), pid)
    }

    /// The joint public key as a curve point.
    pub fn public_key_point(&self) -> C {
        self.public_key
    }

    /// The Lagrange coefficient at zero of `pid` within `quorum`.
    pub(crate) fn lagrange_coefficient(
        &self,
        pid: ParticipantIdentifier,
        quorum: &[ParticipantIdentifier],
    ) -> Result<C::Scalar> {
        let coordinates = quorum
            .iter()
            .map(|&member| self.share_coordinate(member))
            .collect::<Result<Vec<_>>>()?;
        vss::lagrange_coefficient_at_zero::<C>(self.share_coordinate(pid)?, &coordinates)
    }
}
