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
    messages::{KeygenMessageType, Message, MessageType},
    protocol::{Identifier, ParticipantIdentifier},
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

/// The opening of a round 1 commitment: the dealer's Feldman coefficient
/// commitments, bound to the session and sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct KeygenDecommit<C: CurveTrait> {
    pub(crate) sid: Identifier,
    pub(crate) sender: ParticipantIdentifier,
    blinding: [u8; 32],
    pub(crate) vss_commitments: Vec<C>,
}

impl<C: CurveTrait> KeygenDecommit<C> {
    pub(crate) fn new<R: RngCore + CryptoRng>(
        rng: &mut R,
        sid: &Identifier,
        sender: &ParticipantIdentifier,
        vss_commitments: &[C],
    ) -> Self {
        let mut blinding = [0u8; 32];
        rng.fill_bytes(&mut blinding);
        Self {
            sid: *sid,
            sender: *sender,
            blinding,
            vss_commitments: vss_commitments.to_vec(),
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
            serialize!(&self.vss_commitments)?,
        ];
        Ok(CommitmentOpening::new(self.blinding, parts))
    }

    /// Deserialize a decommitment from a message and verify it against the
    /// previously received commitment.
    pub(crate) fn from_message(message: &Message, com: &Commitment) -> Result<Self> {
        message.check_broadcast(MessageType::Keygen(KeygenMessageType::R2Decommit))?;
        let decommit: KeygenDecommit<C> = deserialize!(&message.unverified_bytes)?;
        decommit.verify(message.id(), message.from(), com)?;
        Ok(decommit)
    }

    /// Verify this decommitment against a commitment and expected envelope
    /// fields.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::{CurveTrait, ScalarTrait, TestCurve},
        utils::testing::init_testing,
    };

    #[test]
    fn decommitment_opens_its_own_commitment() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let sender = ParticipantIdentifier::random(&mut rng);
        let points = vec![
            TestCurve::generator(),
            TestCurve::generator().multiply_by_scalar(
                &<TestCurve as CurveTrait>::Scalar::convert_from_u128(7),
            ),
        ];
        let decommit = KeygenDecommit::new(&mut rng, &sid, &sender, &points);
        let com = decommit.commit().unwrap();
        assert!(decommit.verify(sid, sender, &com).is_ok());

        // The wrong sender must not open it.
        let other = ParticipantIdentifier::random(&mut rng);
        assert!(decommit.verify(sid, other, &com).is_err());
    }
}
