//! Distributed EdDSA key generation.
//!
//! Feldman-shares a joint Ed25519-style key among `n` parties with
//! threshold `t`. The structure mirrors the ECDSA key generation but
//! carries no Paillier or ring-Pedersen material: sub-shares travel as
//! plain point-to-point payloads, since no encryption keys exist at this
//! stage (the transport is expected to protect point-to-point
//! confidentiality).

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    commitment::Commitment,
    curve::{CurveTrait, ScalarTrait},
    errors::{CallerError, InternalError, ProtocolFault, Result},
    eddsa::{
        commit::PointsDecommit,
        keyshare::{Output, SharePrivate},
    },
    keygen::KeySharePublic,
    local_storage::{LocalStorage, TypeTag},
    messages::{EddsaKeygenMessageType, Message, MessageType},
    participant::{InnerProtocolParticipant, ProcessOutcome, ProtocolParticipant, Status},
    protocol::{Identifier, ParticipantConfig, ParticipantIdentifier, ProtocolType, SharedContext},
    vss,
    vss::VssShare,
    zkp::{
        pisch::{self, PiSchProof},
        Proof,
    },
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use tracing::{error, info, instrument};

/// Input for the EdDSA key generation protocol.
#[derive(Debug, Clone)]
pub struct Input {
    threshold: usize,
}

impl Input {
    /// Create a new input with signing threshold `threshold`.
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub(crate) fn threshold(&self) -> usize {
        self.threshold
    }

    pub(crate) fn check_participant_config(&self, config: &ParticipantConfig) -> Result<()> {
        if self.threshold >= config.count() {
            error!(
                "threshold {} requires more than {} participants",
                self.threshold,
                config.count()
            );
            Err(CallerError::BadInput)?;
        }
        Ok(())
    }
}

mod storage {
    use super::*;

    pub(super) struct Commit;
    impl TypeTag for Commit {
        type Value = Commitment;
    }
    pub(super) struct Decommit<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Decommit<C> {
        type Value = PointsDecommit<C>;
    }
    pub(super) struct SharesForOthers<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for SharesForOthers<C> {
        type Value = Vec<(ParticipantIdentifier, VssShare<C>)>;
    }
    pub(super) struct PrivateShare<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for PrivateShare<C> {
        type Value = VssShare<C>;
    }
    pub(super) struct FinalShare<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for FinalShare<C> {
        type Value = SharePrivate<C>;
    }
    pub(super) struct ProofOk;
    impl TypeTag for ProofOk {
        type Value = ();
    }
}

/// A [`ProtocolParticipant`] that runs the EdDSA key generation protocol.
///
/// # Protocol input
/// The signing threshold; see [`Input`].
///
/// # Protocol output
/// Upon successful completion, the participant outputs an
/// [`Output`](crate::eddsa::Output): its secret Shamir share, everyone's
/// public shares, and the joint public key.
#[derive(Debug)]
pub struct EddsaKeygenParticipant<C: CurveTrait> {
    sid: Identifier,
    input: Input,
    id: ParticipantIdentifier,
    other_participant_ids: Vec<ParticipantIdentifier>,
    local_storage: LocalStorage,
    status: Status,
    _curve: std::marker::PhantomData<C>,
}

impl<C: CurveTrait> ProtocolParticipant for EddsaKeygenParticipant<C> {
    type Input = Input;
    type Output = Output<C>;

    fn new(
        sid: Identifier,
        id: ParticipantIdentifier,
        other_participant_ids: Vec<ParticipantIdentifier>,
        input: Self::Input,
    ) -> Result<Self> {
        input.check_participant_config(&ParticipantConfig::new(id, &other_participant_ids)?)?;

        Ok(Self {
            sid,
            input,
            id,
            other_participant_ids,
            local_storage: Default::default(),
            status: Status::NotReady,
            _curve: std::marker::PhantomData,
        })
    }

    fn ready_type() -> MessageType {
        MessageType::EddsaKeygen(EddsaKeygenMessageType::Ready)
    }

    fn protocol_type() -> ProtocolType {
        ProtocolType::EddsaKeygen
    }

    fn id(&self) -> ParticipantIdentifier {
        self.id
    }

    fn other_ids(&self) -> &[ParticipantIdentifier] {
        &self.other_participant_ids
    }

    fn sid(&self) -> Identifier {
        self.sid
    }

    #[instrument(skip_all)]
    fn process_message<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<Self::Output>> {
        info!(
            "EDDSA KEYGEN: player {}: received {:?} from {}",
            self.id(),
            message.message_type(),
            message.from()
        );

        if !self.check_can_process(message)? {
            return Ok(ProcessOutcome::Incomplete);
        }

        match message.message_type() {
            MessageType::EddsaKeygen(EddsaKeygenMessageType::Ready) => {
                self.handle_ready_msg(rng, message)
            }
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R1Commit) => {
                self.handle_round_one_msg(rng, message)
            }
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R2Decommit) => {
                self.handle_round_two_msg(rng, message)
            }
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R2PrivateShare) => {
                self.handle_round_two_msg_private(rng, message)
            }
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R3Proof) => {
                self.handle_round_three_msg(message)
            }
            message_type => {
                error!(
                    "incorrect message type given to EddsaKeygenParticipant: {message_type:?}"
                );
                Err(ProtocolFault::MessageOutOfOrder(vec![message.from()]))?
            }
        }
    }

    fn status(&self) -> &Status {
        &self.status
    }

    fn cancel(&mut self) {
        self.abort()
    }
}

impl<C: CurveTrait> InnerProtocolParticipant for EddsaKeygenParticipant<C> {
    type Context = SharedContext;

    fn retrieve_context(&self) -> Self::Context {
        SharedContext::collect(self)
    }

    fn local_storage(&self) -> &LocalStorage {
        &self.local_storage
    }

    fn local_storage_mut(&mut self) -> &mut LocalStorage {
        &mut self.local_storage
    }

    fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }
}

impl<C: CurveTrait> EddsaKeygenParticipant<C> {
    #[instrument(skip_all, err(Debug))]
    fn handle_ready_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        info!("Handling ready EdDSA keygen message.");

        let ready_outcome = self.process_ready_message(rng, message)?;
        if !self.is_ready() {
            return Ok(ready_outcome);
        }
        let round_one_messages = run_only_once!(self.gen_round_one_msgs(rng))?;

        let round_one_outcomes = self
            .fetch_messages(MessageType::EddsaKeygen(EddsaKeygenMessageType::R1Commit))?
            .iter()
            .map(|msg| self.handle_round_one_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;

        ready_outcome
            .with_messages(round_one_messages)
            .consolidate(round_one_outcomes)
    }

    /// Deal a fresh contribution and broadcast a commitment to its Feldman
    /// coefficient commitments.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_one_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round one EdDSA keygen messages.");

        let config = self.config()?;
        let coordinates = self
            .all_participants()
            .iter()
            .map(|&pid| config.share_coordinate(pid))
            .collect::<Result<Vec<_>>>()?;

        let contribution = C::Scalar::random(rng);
        let (vss_commitments, shares) =
            vss::share::<C, _>(rng, self.input.threshold(), &contribution, &coordinates)?;

        let mut shares_for_others = Vec::new();
        for (pid, share) in self.all_participants().into_iter().zip(shares) {
            if pid == self.id() {
                self.local_storage
                    .store::<storage::PrivateShare<C>>(pid, share);
            } else {
                shares_for_others.push((pid, share));
            }
        }
        self.local_storage
            .store::<storage::SharesForOthers<C>>(self.id(), shares_for_others);

        let decommit = PointsDecommit::new(rng, &self.sid(), &self.id(), &vss_commitments);
        let commit = decommit.commit()?;
        self.local_storage
            .store::<storage::Commit>(self.id(), commit);
        self.local_storage
            .store::<storage::Decommit<C>>(self.id(), decommit);

        self.broadcast_for_other_participants(
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R1Commit),
            commit,
        )
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_one_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Commit>(message.from())?;
        message.check_broadcast(MessageType::EddsaKeygen(EddsaKeygenMessageType::R1Commit))?;
        info!("Handling round one EdDSA keygen message.");

        let commit: Commitment = deserialize!(&message.unverified_bytes)?;
        self.local_storage
            .store_once::<storage::Commit>(message.from(), commit)?;

        let r1_done = self
            .local_storage
            .contains_for_all_ids::<storage::Commit>(&self.all_participants());
        if !r1_done {
            return Ok(ProcessOutcome::Incomplete);
        }

        let round_two_messages = run_only_once!(self.gen_round_two_msgs())?;

        let mut outcomes = self
            .fetch_messages(MessageType::EddsaKeygen(
                EddsaKeygenMessageType::R2PrivateShare,
            ))?
            .iter()
            .map(|msg| self.handle_round_two_msg_private(rng, msg))
            .collect::<Result<Vec<_>>>()?;
        let decommit_outcomes = self
            .fetch_messages(MessageType::EddsaKeygen(EddsaKeygenMessageType::R2Decommit))?
            .iter()
            .map(|msg| self.handle_round_two_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;
        outcomes.extend(decommit_outcomes);

        ProcessOutcome::collect_with_messages(outcomes, round_two_messages)
    }

    /// Open the round 1 commitment and send each peer its sub-share.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_two_msgs(&mut self) -> Result<Vec<Message>> {
        info!("Generating round two EdDSA keygen messages.");

        let decommit = self
            .local_storage
            .retrieve::<storage::Decommit<C>>(self.id())?
            .clone();
        let mut messages = self.broadcast_for_other_participants(
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R2Decommit),
            decommit,
        )?;

        let shares = self
            .local_storage
            .retrieve::<storage::SharesForOthers<C>>(self.id())?
            .clone();
        for (pid, share) in shares {
            messages.push(Message::new(
                MessageType::EddsaKeygen(EddsaKeygenMessageType::R2PrivateShare),
                self.sid(),
                self.id(),
                pid,
                &share,
            )?);
        }
        Ok(messages)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_two_msg_private<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::PrivateShare<C>>(message.from())?;
        message.check_peer_to_peer(MessageType::EddsaKeygen(
            EddsaKeygenMessageType::R2PrivateShare,
        ))?;
        info!("Handling round two EdDSA keygen private message.");

        let share: VssShare<C> = deserialize!(&message.unverified_bytes)?;
        let my_coordinate = self.config()?.share_coordinate(self.id())?;
        if share.coordinate != my_coordinate {
            error!(
                "sub-share from {} was evaluated at the wrong coordinate",
                message.from()
            );
            Err(ProtocolFault::ShareInconsistent(vec![message.from()]))?;
        }
        self.local_storage
            .store_once::<storage::PrivateShare<C>>(message.from(), share)?;

        self.maybe_finish_round_two(rng)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_two_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Decommit<C>>(message.from())?;

        let r1_done = self
            .local_storage
            .contains_for_all_ids::<storage::Commit>(&self.all_participants());
        if !r1_done {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round two EdDSA keygen message.");

        let commit = self
            .local_storage
            .retrieve::<storage::Commit>(message.from())?;
        let decommit = PointsDecommit::from_message(
            message,
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R2Decommit),
            commit,
        )?;
        if decommit.points.len() != self.input.threshold() + 1 {
            error!(
                "dealer {} opened a polynomial of the wrong degree",
                message.from()
            );
            Err(ProtocolFault::ShareInconsistent(vec![message.from()]))?;
        }
        self.local_storage
            .store_once::<storage::Decommit<C>>(message.from(), decommit)?;

        self.maybe_finish_round_two(rng)
    }

    fn maybe_finish_round_two<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let all_decommits = self
            .local_storage
            .contains_for_all_ids::<storage::Decommit<C>>(&self.all_participants());
        let all_shares = self
            .local_storage
            .contains_for_all_ids::<storage::PrivateShare<C>>(&self.all_participants());
        if !(all_decommits && all_shares) {
            return Ok(ProcessOutcome::Incomplete);
        }

        for pid in self.other_ids().to_vec() {
            let decommit = self.local_storage.retrieve::<storage::Decommit<C>>(pid)?;
            let share = self
                .local_storage
                .retrieve::<storage::PrivateShare<C>>(pid)?;
            if !vss::verify_share(&decommit.points, share) {
                error!("sub-share from {pid} does not match its public commitments");
                Err(ProtocolFault::ShareInconsistent(vec![pid]))?;
            }
        }

        let round_three_messages = run_only_once!(self.gen_round_three_msgs(rng))?;

        let outcomes = self
            .fetch_messages(MessageType::EddsaKeygen(EddsaKeygenMessageType::R3Proof))?
            .iter()
            .map(|msg| self.handle_round_three_msg(msg))
            .collect::<Result<Vec<_>>>()?;

        ProcessOutcome::collect_with_messages(outcomes, round_three_messages)
    }

    #[instrument(skip_all, err(Debug))]
    fn gen_round_three_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round three EdDSA keygen messages.");

        let mut final_share = C::Scalar::zero();
        for pid in self.all_participants() {
            let share = self
                .local_storage
                .retrieve::<storage::PrivateShare<C>>(pid)?;
            final_share = final_share.add(&share.value);
        }

        let my_coordinate = self.config()?.share_coordinate(self.id())?;
        let implied_public = self.eval_public_share(my_coordinate)?;
        if C::generator().multiply_by_scalar(&final_share) != implied_public {
            error!("aggregated share does not match the dealers' polynomials");
            return Err(InternalError::InternalInvariantFailed);
        }

        let context = self.retrieve_context();
        let proof = PiSchProof::<C>::prove(
            pisch::CommonInput::new(&implied_public),
            pisch::ProverSecret::new(&final_share),
            &context,
            &mut schnorr_transcript(self.id())?,
            rng,
        )?;

        self.local_storage
            .store::<storage::FinalShare<C>>(self.id(), SharePrivate::from_scalar(&final_share));
        self.local_storage.store::<storage::ProofOk>(self.id(), ());

        self.broadcast_for_other_participants(
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R3Proof),
            proof,
        )
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_three_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::ProofOk>(message.from())?;

        if !self
            .local_storage
            .contains::<storage::FinalShare<C>>(self.id())
        {
            info!("Not yet ready to handle a round three EdDSA keygen message.");
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        message.check_broadcast(MessageType::EddsaKeygen(EddsaKeygenMessageType::R3Proof))?;
        info!("Handling round three EdDSA keygen message.");

        let proof: PiSchProof<C> = deserialize!(&message.unverified_bytes)?;
        let their_coordinate = self.config()?.share_coordinate(message.from())?;
        let their_public = self.eval_public_share(their_coordinate)?;
        let context = self.retrieve_context();
        proof
            .verify(
                pisch::CommonInput::new(&their_public),
                &context,
                &mut schnorr_transcript(message.from())?,
            )
            .map_err(|_| ProtocolFault::SchnorrProofInvalid(vec![message.from()]))?;

        self.local_storage
            .store_once::<storage::ProofOk>(message.from(), ())?;

        self.maybe_finish_protocol()
    }

    fn maybe_finish_protocol(
        &mut self,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        if !self
            .local_storage
            .contains_for_all_ids::<storage::ProofOk>(&self.all_participants())
        {
            return Ok(ProcessOutcome::Incomplete);
        }

        let config = self.config()?;
        let mut public_key_shares = Vec::new();
        for pid in self.all_participants() {
            let coordinate = config.share_coordinate(pid)?;
            let public_share = self.eval_public_share(coordinate)?;
            public_key_shares.push(KeySharePublic::new(pid, public_share));
        }

        let mut public_key = C::identity();
        let mut vss_commitments = Vec::new();
        for pid in self.all_participants() {
            let decommit = self.local_storage.remove::<storage::Decommit<C>>(pid)?;
            public_key = public_key + decommit.points[0];
            vss_commitments.push((pid, decommit.points));
        }

        let private_key_share = self
            .local_storage
            .remove::<storage::FinalShare<C>>(self.id())?;

        let output = Output::from_parts(
            self.input.threshold(),
            public_key,
            private_key_share,
            public_key_shares,
            vss_commitments,
        )?;

        self.status = Status::TerminatedSuccessfully;
        Ok(ProcessOutcome::Terminated(output))
    }

    fn eval_public_share(&self, coordinate: usize) -> Result<C> {
        let mut sum = C::identity();
        for pid in self.all_participants() {
            let decommit = self.local_storage.retrieve::<storage::Decommit<C>>(pid)?;
            sum = sum + vss::eval_commitment(&decommit.points, coordinate);
        }
        Ok(sum)
    }

    fn config(&self) -> Result<ParticipantConfig> {
        ParticipantConfig::new(self.id(), self.other_ids())
    }
}

/// The transcript for a participant's Schnorr proof of its final share.
fn schnorr_transcript(sender: ParticipantIdentifier) -> Result<Transcript> {
    let mut transcript = Transcript::new(b"eddsa keygen schnorr");
    transcript.append_message(b"sender", &serialize!(&sender)?);
    Ok(transcript)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{ed25519::Ed25519, utils::testing::init_testing};
    use rand::{CryptoRng, Rng, RngCore};
    use std::collections::HashMap;

    type TestParticipant = EddsaKeygenParticipant<Ed25519>;

    pub(crate) fn deliver_all(
        messages: &[Message],
        inboxes: &mut HashMap<ParticipantIdentifier, Vec<Message>>,
    ) {
        for message in messages {
            inboxes
                .get_mut(&message.to())
                .unwrap()
                .push(message.clone());
        }
    }

    /// Run a full EdDSA keygen and return each party's output, in
    /// participant order.
    pub(crate) fn run_eddsa_keygen<R: RngCore + CryptoRng>(
        sid: Identifier,
        threshold: usize,
        quorum_size: usize,
        rng: &mut R,
    ) -> Result<Vec<(ParticipantIdentifier, Output<Ed25519>)>> {
        let configs = ParticipantConfig::random_quorum(quorum_size, rng)?;
        let mut quorum = configs
            .into_iter()
            .map(|config| {
                TestParticipant::new(
                    sid,
                    config.id(),
                    config.other_ids().to_vec(),
                    Input::new(threshold),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let mut inboxes: HashMap<ParticipantIdentifier, Vec<Message>> = HashMap::new();
        for participant in &quorum {
            let _ = inboxes.insert(participant.id(), vec![]);
        }
        for participant in &quorum {
            let message = participant.initialize_message()?;
            inboxes.get_mut(&participant.id()).unwrap().push(message);
        }

        let mut outputs = HashMap::new();
        while !quorum
            .iter()
            .all(|p| *p.status() == Status::TerminatedSuccessfully)
        {
            let index = rng.gen_range(0..quorum.len());
            let id = quorum[index].id();
            let inbox = inboxes.get_mut(&id).unwrap();
            if inbox.is_empty() {
                continue;
            }
            let message = inbox.remove(rng.gen_range(0..inbox.len()));
            match quorum[index].process_message(rng, &message)? {
                ProcessOutcome::Incomplete => {}
                ProcessOutcome::Processed(messages) => deliver_all(&messages, &mut inboxes),
                ProcessOutcome::Terminated(output) => {
                    assert!(outputs.insert(id, output).is_none())
                }
                ProcessOutcome::TerminatedForThisParticipant(output, messages) => {
                    deliver_all(&messages, &mut inboxes);
                    assert!(outputs.insert(id, output).is_none());
                }
            }
        }

        Ok(quorum
            .iter()
            .map(|p| (p.id(), outputs.remove(&p.id()).unwrap()))
            .collect())
    }

    #[test]
    fn eddsa_keygen_agrees_on_one_public_key() -> Result<()> {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let outputs = run_eddsa_keygen(sid, 1, 3, &mut rng)?;

        let reference = outputs[0].1.public_key_point();
        for (_, output) in &outputs {
            assert_eq!(output.public_key_point(), reference);
            assert_eq!(output.public_key_shares().len(), 3);
        }
        Ok(())
    }
}
