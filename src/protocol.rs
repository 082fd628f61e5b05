//! Session and participant identities shared by all protocols.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    errors::{CallerError, InternalError, Result},
    participant::{InnerProtocolParticipant, ProtocolParticipant},
    zkp::ProofContext,
};
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt::{Display, Formatter},
};
use tracing::error;

/// A unique identifier for a single protocol session.
///
/// All messages of a run carry the session identifier; it is also bound into
/// every Fiat-Shamir transcript produced during the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier(u128);

impl Identifier {
    /// Produce a random [`Identifier`].
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(rng.gen())
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{:x}", self.0 >> 96)
    }
}

/// The unique key identifying a party across protocol runs.
///
/// The key is the party's cryptographic identity; its rank among all
/// participants' keys, sorted ascending, yields the party's 1-based share
/// coordinate (see [`ParticipantConfig::share_coordinate`]). Human-readable
/// monikers are presentation-only and live in the calling application.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct ParticipantIdentifier(u128);

impl ParticipantIdentifier {
    /// Produce a random [`ParticipantIdentifier`].
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(rng.gen())
    }

    /// Build a [`ParticipantIdentifier`] from a fixed key.
    pub fn from_u128(key: u128) -> Self {
        Self(key)
    }

    /// The raw key.
    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl Display for ParticipantIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "party-{:x}", self.0 >> 96)
    }
}

/// The set of parties taking part in a protocol run, from the point of view
/// of one of them.
///
/// The config is immutable for the lifetime of a run. Share coordinates are
/// derived from it: participants are sorted by key ascending and numbered
/// from 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantConfig {
    id: ParticipantIdentifier,
    other_ids: Vec<ParticipantIdentifier>,
}

impl ParticipantConfig {
    /// Create a new config for a party with the given `id`, running a
    /// protocol with the parties listed in `other_ids`.
    pub fn new(id: ParticipantIdentifier, other_ids: &[ParticipantIdentifier]) -> Result<Self> {
        let mut all = other_ids.to_vec();
        all.push(id);
        let unique = all.iter().collect::<HashSet<_>>();
        if unique.len() != all.len() {
            error!("participant identifiers must be distinct");
            Err(CallerError::BadInput)?;
        }
        Ok(Self {
            id,
            other_ids: other_ids.to_vec(),
        })
    }

    /// This party's identifier.
    pub fn id(&self) -> ParticipantIdentifier {
        self.id
    }

    /// The identifiers of all the other parties.
    pub fn other_ids(&self) -> &[ParticipantIdentifier] {
        &self.other_ids
    }

    /// The total number of parties, including this one.
    pub fn count(&self) -> usize {
        self.other_ids.len() + 1
    }

    /// All party identifiers, including this one.
    pub fn all_participants(&self) -> Vec<ParticipantIdentifier> {
        let mut all = self.other_ids.clone();
        all.push(self.id);
        all
    }

    /// The 1-based share coordinate of `pid` within this config.
    ///
    /// Coordinates are assigned by sorting all participants' keys ascending;
    /// they serve as the (non-zero) evaluation points of every secret-sharing
    /// polynomial used in a run.
    pub fn share_coordinate(&self, pid: ParticipantIdentifier) -> Result<usize> {
        share_coordinate(&self.all_participants(), pid)
    }

    /// Generate a set of configs for a random quorum of the given size, one
    /// per party.
    pub fn random_quorum<R: RngCore + CryptoRng>(
        quorum_size: usize,
        rng: &mut R,
    ) -> Result<Vec<Self>> {
        if quorum_size < 2 {
            error!("a quorum requires at least two parties");
            Err(CallerError::BadInput)?;
        }
        let ids = std::iter::repeat_with(|| ParticipantIdentifier::random(rng))
            .take(quorum_size)
            .collect::<Vec<_>>();
        ids.iter()
            .map(|&id| {
                let other_ids = ids.iter().filter(|&&other| other != id).copied().collect::<Vec<_>>();
                Self::new(id, &other_ids)
            })
            .collect()
    }
}

/// Compute the 1-based rank of `pid` among `ids`, sorted by key ascending.
pub(crate) fn share_coordinate(
    ids: &[ParticipantIdentifier],
    pid: ParticipantIdentifier,
) -> Result<usize> {
    let mut sorted = ids.to_vec();
    sorted.sort();
    sorted
        .iter()
        .position(|&other| other == pid)
        .map(|rank| rank + 1)
        .ok_or_else(|| {
            error!("{pid} is not a member of this participant set");
            InternalError::CallingApplicationMistake(CallerError::BadInput)
        })
}

/// The protocol a message or participant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolType {
    /// Distributed ECDSA key generation.
    Keygen,
    /// Threshold ECDSA signing.
    Sign,
    /// ECDSA key resharing to a new committee.
    Reshare,
    /// Distributed EdDSA key generation.
    EddsaKeygen,
    /// Threshold EdDSA signing.
    EddsaSign,
    /// EdDSA key resharing to a new committee.
    EddsaReshare,
}

/// Context shared by all participants of a run; bound into every Fiat-Shamir
/// transcript to tie proofs to this session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedContext {
    sid: Identifier,
    protocol: ProtocolType,
    participants: Vec<ParticipantIdentifier>,
}

impl SharedContext {
    /// Collect the shared context of a running participant.
    pub(crate) fn collect<P: InnerProtocolParticipant + ProtocolParticipant>(p: &P) -> Self {
        let mut participants = p.all_participants();
        participants.sort();
        Self {
            sid: p.sid(),
            protocol: P::protocol_type(),
            participants,
        }
    }

    #[cfg(test)]
    pub(crate) fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut participants = std::iter::repeat_with(|| ParticipantIdentifier::random(rng))
            .take(3)
            .collect::<Vec<_>>();
        participants.sort();
        Self {
            sid: Identifier::random(rng),
            protocol: ProtocolType::Keygen,
            participants,
        }
    }
}

impl ProofContext for SharedContext {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        serialize!(self)
    }
}
