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
    messages::{Message, MessageType, SignMessageType},
    protocol::{Identifier, ParticipantIdentifier},
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

/// The opening of a signer's round 1 commitment: its nonce witness point
/// `Γ_i = γ_i·G`, bound to the session and sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct SignDecommit<C: CurveTrait> {
    pub(crate) sid: Identifier,
    pub(crate) sender: ParticipantIdentifier,
    blinding: [u8; 32],
    pub(crate) gamma_point: C,
}

impl<C: CurveTrait> SignDecommit<C> {
    pub(crate) fn new<R: RngCore + CryptoRng>(
        rng: &mut R,
        sid: &Identifier,
        sender: &ParticipantIdentifier,
        gamma_point: C,
    ) -> Self {
        let mut blinding = [0u8; 32];
        rng.fill_bytes(&mut blinding);
        Self {
            sid: *sid,
            sender: *sender,
            blinding,
            gamma_point,
        }
    }

    /// The commitment this decommitment opens.
    pub(crate) fn commit(&self) -> Result<Commitment> {
        Ok(self.opening()?.commitment())
    }

    fn opening(&self) -> Result<CommitmentOpening> {
        let parts = vec![
            serialize!(&self.sid)?,
            serialize!(&self.sender)?,
            serialize!(&self.gamma_point)?,
        ];
        Ok(CommitmentOpening::new(self.blinding, parts))
    }

    /// Deserialize a decommitment from a message and verify it against the
    /// previously received commitment.
    pub(crate) fn from_message(message: &Message, com: &Commitment) -> Result<Self> {
        message.check_broadcast(MessageType::Sign(SignMessageType::R4Decommit))?;
        let decommit: SignDecommit<C> = deserialize!(&message.unverified_bytes)?;
        decommit.verify(message.id(), message.from(), com)?;
        Ok(decommit)
    }

    #[instrument(skip_all, err(Debug))]
    fn verify(
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
