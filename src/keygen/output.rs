//! The long-lived key material a participant walks away with.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::{CurveTrait, EcdsaCurveTrait, VerifyingKeyTrait},
    errors::{CallerError, Result},
    keygen::keyshare::{AuxInfoPrivate, AuxInfoPublic, KeySharePrivate, KeySharePublic},
    protocol::{self, ParticipantIdentifier},
    vss,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::error;

/// The output of a successful key generation (or resharing) run for one
/// party.
///
/// Contains the party's secret Shamir share, every party's public share and
/// auxiliary encryption material, and the dealers' Feldman commitment
/// vectors. The secret parts zeroize on drop; the caller is responsible for
/// storing the whole structure securely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct Output<C: CurveTrait> {
    threshold: usize,
    public_key: C,
    private_key_share: KeySharePrivate,
    public_key_shares: Vec<KeySharePublic<C>>,
    vss_commitments: Vec<(ParticipantIdentifier, Vec<C>)>,
    aux_info: Vec<AuxInfoPublic>,
    private_aux: AuxInfoPrivate,
}

impl<C: CurveTrait> Output<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        threshold: usize,
        public_key: C,
        private_key_share: KeySharePrivate,
        public_key_shares: Vec<KeySharePublic<C>>,
        vss_commitments: Vec<(ParticipantIdentifier, Vec<C>)>,
        aux_info: Vec<AuxInfoPublic>,
        private_aux: AuxInfoPrivate,
    ) -> Result<Self> {
        let share_pids = public_key_shares
            .iter()
            .map(KeySharePublic::participant)
            .collect::<HashSet<_>>();
        let aux_pids = aux_info
            .iter()
            .map(AuxInfoPublic::participant)
            .collect::<HashSet<_>>();
        if share_pids.len() != public_key_shares.len() || share_pids != aux_pids {
            error!("output must contain exactly one share and one aux entry per participant");
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
            aux_info,
            private_aux,
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
    pub fn private_key_share(&self) -> &KeySharePrivate {
        &self.private_key_share
    }

    /// Every party's public key share.
    pub fn public_key_shares(&self) -> &[KeySharePublic<C>] {
        &self.public_key_shares
    }

    /// This party's own auxiliary secrets.
    pub(crate) fn private_aux(&self) -> &AuxInfoPrivate {
        &self.private_aux
    }

    /// A peer's auxiliary public material.
    pub(crate) fn find_aux_info(&self, pid: ParticipantIdentifier) -> Result<&AuxInfoPublic> {
        self.aux_info
            .iter()
            .find(|aux| aux.participant() == pid)
            .ok_or_else(|| {
                error!("no auxiliary material for {pid}");
                CallerError::BadInput.into()
            })
    }

    /// A peer's public key share.
    pub(crate) fn find_public_share(
        &self,
        pid: ParticipantIdentifier,
    ) -> Result<&KeySharePublic<C>> {
        self.public_key_shares
            .iter()
            .find(|share| share.participant() == pid)
            .ok_or_else(|| {
                error!("no public key share for {pid}");
                CallerError::BadInput.into()
            })
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
}

impl<C: EcdsaCurveTrait> Output<C> {
    /// The joint public key as a verifying key.
    pub fn public_key(&self) -> Result<C::VerifyingKey> {
        C::VerifyingKey::from_point(self.public_key_point())
    }
}
