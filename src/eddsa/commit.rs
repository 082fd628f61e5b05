// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    commitment::{Commitment, CommitmentOpening},
    curve::CurveTrait,
    errors::{ProtocolFault, Result},
    messages::{Message, MessageType},
    protocol::{Identifier, ParticipantIdentifier},
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

/// The opening of a commitment to a vector of curve points, bound to the
/// session and sender.
///
/// Both EdDSA dealing rounds (key generation and resharing) commit to the
/// Feldman coefficient commitments; signing commits to the single nonce
/// point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct PointsDecommit<C: CurveTrait> {
    pub(crate) sid: Identifier,
    pub(crate) sender: ParticipantIdentifier,
    blinding: [u8; 32],
    pub(crate) points: Vec<C>,
}

impl<C: CurveTrait> PointsDecommit<C> {
    pub(crate) fn new<R: RngCore + CryptoRng>(
        rng: &mut R,
        sid: &Identifier,
        sender: &ParticipantIdentifier,
        points: &[C],
    ) -> Self {
        let mut blinding = [0u8; 32];
        rng.fill_bytes(&mut blinding);
        Self {
            sid: *sid,
            sender: *sender,
            blinding,
            points: points.to_vec(),
        }
    }

    pub(crate) fn commit(&self) -> Result<Commitment> {
        Ok(self.opening()?.commitment())
    }

    fn opening(&self) -> Result<CommitmentOpening> {
        let parts = vec![
            serialize!(&self.sid)?,
            serialize!(&self.sender)?,
            serialize!(&self.points)?,
        ];
        Ok(CommitmentOpening::new(self.blinding, parts))
    }

    /// Deserialize a decommitment from a message of the expected type and
    /// verify it against the previously received commitment.
    pub(crate) fn from_message(
        message: &Message,
        expected_type: MessageType,
        com: &Commitment,
    ) -> Result<Self> {
        message.check_broadcast(expected_type)?;
        let decommit: PointsDecommit<C> = deserialize!(&message.unverified_bytes)?;
        decommit.verify_against(message.id(), message.from(), com)?;
        Ok(decommit)
    }

    /// Verify this decommitment against a commitment and expected envelope
    /// fields.
    #[instrument(skip_all, err(Debug))]
    pub(crate) fn verify_against(
        &self,
        sid: Identifier,
        sender: ParticipantIdentifier,
        com: &Commitment,
    ) -> Result<()> {
        if self.sid != sid || self.sender != sender {
            error!("decommitment does not match its message envelope");
            Err(ProtocolFault::ShareInconsistent(vec![sender]))?;
        }
        if !com.verify(&self.opening()?) {
            error!("decommitment does not open the original commitment");
            Err(ProtocolFault::ShareInconsistent(vec![sender]))?;
        }
        Ok(())
    }
}
