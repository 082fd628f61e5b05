//! EdDSA key resharing.
//!
//! The Schnorr-side analogue of the ECDSA resharing protocol: old-committee
//! members deal degree-`t'` sharings of their Lagrange-scaled shares over
//! the new committee under commitment, new members verify, aggregate and
//! prove their fresh shares. With no Paillier material in play the
//! sub-shares travel as plain point-to-point payloads and there is no
//! auxiliary parameter round.

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
    messages::{EddsaReshareMessageType, Message, MessageType},
    participant::{InnerProtocolParticipant, ProcessOutcome, ProtocolParticipant, Status},
    protocol::{
        self, Identifier, ParticipantConfig, ParticipantIdentifier, ProtocolType, SharedContext,
    },
    vss,
    vss::VssShare,
    zkp::{
        pisch::{self, PiSchProof},
        Proof,
    },
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use std::collections::HashSet;
use tracing::{error, info, instrument};

/// Input for the EdDSA resharing protocol.
#[derive(Debug)]
pub struct Input<C: CurveTrait> {
    new_threshold: usize,
    old_committee: Vec<ParticipantIdentifier>,
    new_committee: Vec<ParticipantIdentifier>,
    key_share: Option<Output<C>>,
}

impl<C: CurveTrait> Input<C> {
    /// Construct a resharing input. `key_share` must be provided iff this
    /// party belongs to the old committee.
    pub fn new(
        new_threshold: usize,
        old_committee: Vec<ParticipantIdentifier>,
        new_committee: Vec<ParticipantIdentifier>,
        key_share: Option<Output<C>>,
    ) -> Self {
        Self {
            new_threshold,
            old_committee,
            new_committee,
            key_share,
        }
    }

    fn is_old(&self, pid: ParticipantIdentifier) -> bool {
        self.old_committee.contains(&pid)
    }

    fn is_new(&self, pid: ParticipantIdentifier) -> bool {
        self.new_committee.contains(&pid)
    }

    fn key_share(&self) -> Result<&Output<C>> {
        self.key_share.as_ref().ok_or_else(|| {
            error!("an old-committee member requires its key share");
            CallerError::BadInput.into()
        })
    }

    fn check_participant_config(&self, config: &ParticipantConfig) -> Result<()> {
        if self.new_threshold >= self.new_committee.len() {
            error!(
                "new threshold {} requires more than {} new-committee members",
                self.new_threshold,
                self.new_committee.len()
            );
            Err(CallerError::BadInput)?;
        }
        let union = self
            .old_committee
            .iter()
            .chain(self.new_committee.iter())
            .copied()
            .collect::<HashSet<_>>();
        let participants = config
            .all_participants()
            .into_iter()
            .collect::<HashSet<_>>();
        if union != participants {
            error!("the participant set must be the union of the old and new committees");
            Err(CallerError::BadInput)?;
        }

        let id = config.id();
        if self.is_old(id) {
            let key_share = self.key_share()?;
            let shareholders = key_share.participants();
            for pid in &self.old_committee {
                if !shareholders.contains(pid) {
                    error!("{pid} is not a shareholder of the key being reshared");
                    Err(CallerError::BadInput)?;
                }
            }
            if self.old_committee.len() < key_share.threshold() + 1 {
                error!(
                    "resharing requires at least {} old-committee members",
                    key_share.threshold() + 1
                );
                Err(CallerError::BadInput)?;
            }
        } else if self.key_share.is_some() {
            error!("only old-committee members provide a key share");
            Err(CallerError::BadInput)?;
        }
        if !self.is_old(id) && !self.is_new(id) {
            error!("this party is in neither committee");
            Err(CallerError::BadInput)?;
        }
        Ok(())
    }
}

/// The outcome of an EdDSA resharing run for one party.
#[derive(Debug)]
pub enum ReshareOutput<C: CurveTrait> {
    /// This party belongs to the new committee.
    NewShare(Box<Output<C>>),
    /// This party belonged to the old committee only.
    Retired,
}

impl<C: CurveTrait> ReshareOutput<C> {
    /// Consume the output, returning the fresh key material if any.
    pub fn into_new_share(self) -> Option<Output<C>> {
        match self {
            Self::NewShare(output) => Some(*output),
            Self::Retired => None,
        }
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
    pub(super) struct SharesForNew<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for SharesForNew<C> {
        type Value = Vec<(ParticipantIdentifier, VssShare<C>)>;
    }
    pub(super) struct ShareFromOld<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for ShareFromOld<C> {
        type Value = VssShare<C>;
    }
    pub(super) struct FreshShare<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for FreshShare<C> {
        type Value = SharePrivate<C>;
    }
    pub(super) struct ProofOk;
    impl TypeTag for ProofOk {
        type Value = ();
    }
}

/// A [`ProtocolParticipant`] that runs the EdDSA resharing protocol.
#[derive(Debug)]
pub struct EddsaReshareParticipant<C: CurveTrait> {
    sid: Identifier,
    input: Input<C>,
    id: ParticipantIdentifier,
    other_participant_ids: Vec<ParticipantIdentifier>,
    local_storage: LocalStorage,
    status: Status,
}

impl<C: CurveTrait> ProtocolParticipant for EddsaReshareParticipant<C> {
    type Input = Input<C>;
    type Output = ReshareOutput<C>;

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
        })
    }

    fn ready_type() -> MessageType {
        MessageType::EddsaReshare(EddsaReshareMessageType::Ready)
    }

    fn protocol_type() -> ProtocolType {
        ProtocolType::EddsaReshare
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
            "EDDSA RESHARE: player {}: received {:?} from {}",
            self.id(),
            message.message_type(),
            message.from()
        );

        if !self.check_can_process(message)? {
            return Ok(ProcessOutcome::Incomplete);
        }

        match message.message_type() {
            MessageType::EddsaReshare(EddsaReshareMessageType::Ready) => {
                self.handle_ready_msg(rng, message)
            }
            MessageType::EddsaReshare(EddsaReshareMessageType::R1Commit) => {
                self.handle_round_one_msg(rng, message)
            }
            MessageType::EddsaReshare(EddsaReshareMessageType::R2PrivateShare) => {
                self.handle_round_two_msg(rng, message)
            }
            MessageType::EddsaReshare(EddsaReshareMessageType::R3Decommit) => {
                self.handle_round_three_msg(rng, message)
            }
            MessageType::EddsaReshare(EddsaReshareMessageType::R4Proof) => {
                self.handle_round_four_msg(message)
            }
            message_type => {
                error!(
                    "incorrect message type given to EddsaReshareParticipant: {message_type:?}"
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

impl<C: CurveTrait> InnerProtocolParticipant for EddsaReshareParticipant<C> {
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

impl<C: CurveTrait> EddsaReshareParticipant<C> {
    fn is_old(&self) -> bool {
        self.input.is_old(self.id())
    }

    fn is_new(&self) -> bool {
        self.input.is_new(self.id())
    }

    fn new_coordinate(&self, pid: ParticipantIdentifier) -> Result<usize> {
        protocol::share_coordinate(&self.input.new_committee, pid)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_ready_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        info!("Handling ready EdDSA reshare message.");

        let ready_outcome = self.process_ready_message(rng, message)?;
        if !self.is_ready() {
            return Ok(ready_outcome);
        }

        let messages = if self.is_old() {
            run_only_once!(self.gen_round_one_msgs(rng))?
        } else {
            Vec::new()
        };

        let outcomes = self
            .fetch_messages(MessageType::EddsaReshare(EddsaReshareMessageType::R1Commit))?
            .iter()
            .map(|msg| self.handle_round_one_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;

        ready_outcome.with_messages(messages).consolidate(outcomes)
    }

    /// Deal a fresh degree-`t'` sharing of this old member's Lagrange-scaled
    /// share over the new committee, under commitment.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_one_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round one EdDSA reshare messages.");

        let key_share = self.input.key_share()?;
        let lambda = key_share.lagrange_coefficient(self.id(), &self.input.old_committee)?;
        let w = lambda.mul(key_share.private_key_share().as_scalar());

        let new_committee = self.input.new_committee.clone();
        let coordinates = new_committee
            .iter()
            .map(|&pid| self.new_coordinate(pid))
            .collect::<Result<Vec<_>>>()?;
        let (vss_commitments, shares) =
            vss::share::<C, _>(rng, self.input.new_threshold, &w, &coordinates)?;

        let shares_for_new = new_committee.into_iter().zip(shares).collect::<Vec<_>>();
        self.local_storage
            .store::<storage::SharesForNew<C>>(self.id(), shares_for_new);

        let decommit = PointsDecommit::new(rng, &self.sid(), &self.id(), &vss_commitments);
        let commit = decommit.commit()?;
        self.local_storage
            .store::<storage::Commit>(self.id(), commit);
        self.local_storage
            .store::<storage::Decommit<C>>(self.id(), decommit);

        self.broadcast_for_other_participants(
            MessageType::EddsaReshare(EddsaReshareMessageType::R1Commit),
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
        message.check_broadcast(MessageType::EddsaReshare(EddsaReshareMessageType::R1Commit))?;
        if !self.input.is_old(message.from()) {
            error!("{} dealt a share but is not an old member", message.from());
            Err(ProtocolFault::MessageOutOfOrder(vec![message.from()]))?;
        }
        info!("Handling round one EdDSA reshare message.");

        let commit: Commitment = deserialize!(&message.unverified_bytes)?;
        self.local_storage
            .store_once::<storage::Commit>(message.from(), commit)?;

        // Commitments unblock any parked decommitments from this dealer.
        let outcomes = self
            .fetch_messages(MessageType::EddsaReshare(
                EddsaReshareMessageType::R3Decommit,
            ))?
            .iter()
            .map(|msg| self.handle_round_three_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;

        Ok(self.maybe_send_shares(rng)?.consolidate(outcomes)?)
    }

    /// Once every old member has committed, old members distribute the
    /// sub-shares and open their commitments.
    fn maybe_send_shares<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let commits_done = self
            .local_storage
            .contains_for_all_ids::<storage::Commit>(&self.input.old_committee);
        if !commits_done {
            return Ok(ProcessOutcome::Incomplete);
        }

        let messages = if self.is_old() {
            run_only_once!(self.gen_rounds_two_and_three_msgs())?
        } else {
            Vec::new()
        };

        let mut outcomes = self
            .fetch_messages(MessageType::EddsaReshare(
                EddsaReshareMessageType::R2PrivateShare,
            ))?
            .iter()
            .map(|msg| self.handle_round_two_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;
        let decommit_outcomes = self
            .fetch_messages(MessageType::EddsaReshare(
                EddsaReshareMessageType::R3Decommit,
            ))?
            .iter()
            .map(|msg| self.handle_round_three_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;
        outcomes.extend(decommit_outcomes);

        // Distributing our own sub-share may have been the last missing
        // piece for our new-committee role.
        if self.is_new() {
            outcomes.push(self.maybe_finish_new_share(rng)?);
        }

        ProcessOutcome::collect_with_messages(outcomes, messages)
    }

    #[instrument(skip_all, err(Debug))]
    fn gen_rounds_two_and_three_msgs(&mut self) -> Result<Vec<Message>> {
        info!("Generating rounds two and three EdDSA reshare messages.");

        let shares = self
            .local_storage
            .retrieve::<storage::SharesForNew<C>>(self.id())?
            .clone();
        let mut messages = Vec::new();
        for (pid, share) in shares {
            if pid == self.id() {
                self.local_storage
                    .store::<storage::ShareFromOld<C>>(self.id(), share);
                continue;
            }
            messages.push(Message::new(
                MessageType::EddsaReshare(EddsaReshareMessageType::R2PrivateShare),
                self.sid(),
                self.id(),
                pid,
                &share,
            )?);
        }

        let decommit = self
            .local_storage
            .retrieve::<storage::Decommit<C>>(self.id())?
            .clone();
        messages.extend(self.broadcast_for_other_participants(
            MessageType::EddsaReshare(EddsaReshareMessageType::R3Decommit),
            decommit,
        )?);
        Ok(messages)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_two_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::ShareFromOld<C>>(message.from())?;
        message.check_peer_to_peer(MessageType::EddsaReshare(
            EddsaReshareMessageType::R2PrivateShare,
        ))?;
        if !self.is_new() || !self.input.is_old(message.from()) {
            error!("unexpected sub-share from {}", message.from());
            Err(ProtocolFault::MessageOutOfOrder(vec![message.from()]))?;
        }
        info!("Handling round two EdDSA reshare message.");

        let share: VssShare<C> = deserialize!(&message.unverified_bytes)?;
        if share.coordinate != self.new_coordinate(self.id())? {
            error!(
                "sub-share from {} was evaluated at the wrong coordinate",
                message.from()
            );
            Err(ProtocolFault::ShareInconsistent(vec![message.from()]))?;
        }
        self.local_storage
            .store_once::<storage::ShareFromOld<C>>(message.from(), share)?;

        self.maybe_finish_new_share(rng)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_three_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Decommit<C>>(message.from())?;

        if !self.local_storage.contains::<storage::Commit>(message.from()) {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round three EdDSA reshare message.");

        let commit = self
            .local_storage
            .retrieve::<storage::Commit>(message.from())?;
        let decommit = PointsDecommit::from_message(
            message,
            MessageType::EddsaReshare(EddsaReshareMessageType::R3Decommit),
            commit,
        )?;
        if decommit.points.len() != self.input.new_threshold + 1 {
            error!(
                "dealer {} opened a polynomial of the wrong degree",
                message.from()
            );
            Err(ProtocolFault::ShareInconsistent(vec![message.from()]))?;
        }
        self.local_storage
            .store_once::<storage::Decommit<C>>(message.from(), decommit)?;

        if self.is_new() {
            self.maybe_finish_new_share(rng)
        } else {
            self.maybe_verify_proofs_as_old_member()
        }
    }

    fn maybe_finish_new_share<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let old_committee = self.input.old_committee.clone();
        let decommits_done = self
            .local_storage
            .contains_for_all_ids::<storage::Decommit<C>>(&old_committee);
        let shares_done = self
            .local_storage
            .contains_for_all_ids::<storage::ShareFromOld<C>>(&old_committee);
        if !(decommits_done && shares_done) {
            return Ok(ProcessOutcome::Incomplete);
        }

        let round_four_messages = run_only_once!(self.gen_round_four_msgs(rng))?;

        let outcomes = self
            .fetch_messages(MessageType::EddsaReshare(EddsaReshareMessageType::R4Proof))?
            .iter()
            .map(|msg| self.handle_round_four_msg(msg))
            .collect::<Result<Vec<_>>>()?;

        ProcessOutcome::collect_with_messages(outcomes, round_four_messages)
    }

    #[instrument(skip_all, err(Debug))]
    fn gen_round_four_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round four EdDSA reshare messages.");

        self.check_aggregate_preserved()?;

        let my_coordinate = self.new_coordinate(self.id())?;
        let mut fresh_share = C::Scalar::zero();
        for pid in self.input.old_committee.clone() {
            let decommit = self.local_storage.retrieve::<storage::Decommit<C>>(pid)?;
            let share = self
                .local_storage
                .retrieve::<storage::ShareFromOld<C>>(pid)?;
            if !vss::verify_share(&decommit.points, share) {
                error!("sub-share from {pid} does not match its public commitments");
                Err(ProtocolFault::ShareInconsistent(vec![pid]))?;
            }
            fresh_share = fresh_share.add(&share.value);
        }

        let implied_public = self.eval_new_public_share(my_coordinate)?;
        if C::generator().multiply_by_scalar(&fresh_share) != implied_public {
            error!("aggregated fresh share does not match the dealers' polynomials");
            return Err(InternalError::InternalInvariantFailed);
        }

        let context = self.retrieve_context();
        let proof = PiSchProof::<C>::prove(
            pisch::CommonInput::new(&implied_public),
            pisch::ProverSecret::new(&fresh_share),
            &context,
            &mut schnorr_transcript(self.id())?,
            rng,
        )?;

        self.local_storage
            .store::<storage::FreshShare<C>>(self.id(), SharePrivate::from_scalar(&fresh_share));
        self.local_storage.store::<storage::ProofOk>(self.id(), ());

        self.broadcast_for_other_participants(
            MessageType::EddsaReshare(EddsaReshareMessageType::R4Proof),
            proof,
        )
    }

    fn maybe_verify_proofs_as_old_member(
        &mut self,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let decommits_done = self
            .local_storage
            .contains_for_all_ids::<storage::Decommit<C>>(&self.input.old_committee);
        if !decommits_done {
            return Ok(ProcessOutcome::Incomplete);
        }

        self.check_aggregate_preserved()?;

        let outcomes = self
            .fetch_messages(MessageType::EddsaReshare(EddsaReshareMessageType::R4Proof))?
            .iter()
            .map(|msg| self.handle_round_four_msg(msg))
            .collect::<Result<Vec<_>>>()?;
        ProcessOutcome::collect(outcomes)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_four_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::ProofOk>(message.from())?;
        if !self.input.is_new(message.from()) {
            error!(
                "{} sent a share proof but is not a new member",
                message.from()
            );
            Err(ProtocolFault::MessageOutOfOrder(vec![message.from()]))?;
        }

        let decommits_done = self
            .local_storage
            .contains_for_all_ids::<storage::Decommit<C>>(&self.input.old_committee);
        let own_share_done = !self.is_new()
            || self
                .local_storage
                .contains::<storage::FreshShare<C>>(self.id());
        if !(decommits_done && own_share_done) {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        message.check_broadcast(MessageType::EddsaReshare(EddsaReshareMessageType::R4Proof))?;
        info!("Handling round four EdDSA reshare message.");

        let proof: PiSchProof<C> = deserialize!(&message.unverified_bytes)?;
        let their_coordinate = self.new_coordinate(message.from())?;
        let their_public = self.eval_new_public_share(their_coordinate)?;
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
            .contains_for_all_ids::<storage::ProofOk>(&self.input.new_committee)
        {
            return Ok(ProcessOutcome::Incomplete);
        }

        if !self.is_new() {
            self.status = Status::TerminatedSuccessfully;
            return Ok(ProcessOutcome::Terminated(ReshareOutput::Retired));
        }

        let mut public_key_shares = Vec::new();
        for pid in self.input.new_committee.clone() {
            let coordinate = self.new_coordinate(pid)?;
            let public_share = self.eval_new_public_share(coordinate)?;
            public_key_shares.push(KeySharePublic::new(pid, public_share));
        }

        let mut public_key = C::identity();
        let mut vss_commitments = Vec::new();
        for pid in self.input.old_committee.clone() {
            let decommit = self.local_storage.remove::<storage::Decommit<C>>(pid)?;
            public_key = public_key + decommit.points[0];
            vss_commitments.push((pid, decommit.points));
        }

        let private_key_share = self
            .local_storage
            .remove::<storage::FreshShare<C>>(self.id())?;

        let output = Output::from_parts(
            self.input.new_threshold,
            public_key,
            private_key_share,
            public_key_shares,
            vss_commitments,
        )?;

        self.status = Status::TerminatedSuccessfully;
        Ok(ProcessOutcome::Terminated(ReshareOutput::NewShare(
            Box::new(output),
        )))
    }

    fn eval_new_public_share(&self, coordinate: usize) -> Result<C> {
        let mut sum = C::identity();
        for pid in &self.input.old_committee {
            let decommit = self.local_storage.retrieve::<storage::Decommit<C>>(*pid)?;
            sum = sum + vss::eval_commitment(&decommit.points, coordinate);
        }
        Ok(sum)
    }

    /// The dealt constant terms must still sum to the public key being
    /// reshared; only members holding the old key material can check this.
    fn check_aggregate_preserved(&self) -> Result<()> {
        let Ok(key_share) = self.input.key_share() else {
            return Ok(());
        };
        let mut dealt = C::identity();
        for pid in &self.input.old_committee {
            let decommit = self.local_storage.retrieve::<storage::Decommit<C>>(*pid)?;
            dealt = dealt + decommit.points[0];
        }
        if dealt != key_share.public_key_point() {
            error!("resharing would change the aggregate public key; aborting");
            Err(ProtocolFault::ShareInconsistent(
                self.input.old_committee.clone(),
            ))?;
        }
        Ok(())
    }
}

/// The transcript for a new member's Schnorr proof of its fresh share.
fn schnorr_transcript(sender: ParticipantIdentifier) -> Result<Transcript> {
    let mut transcript = Transcript::new(b"eddsa reshare schnorr");
    transcript.append_message(b"sender", &serialize!(&sender)?);
    Ok(transcript)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::SchnorrCurveTrait,
        ed25519::Ed25519,
        eddsa::{
            keygen::tests::{deliver_all, run_eddsa_keygen},
            sign::{EddsaSignParticipant, Input as SignInput},
        },
        utils::testing::init_testing,
    };
    use rand::Rng;
    use std::collections::HashMap;

    #[test]
    fn eddsa_resharing_preserves_the_key_and_signs() -> Result<()> {
        let mut rng = init_testing();
        let keygen_sid = Identifier::random(&mut rng);
        let old_outputs = run_eddsa_keygen(keygen_sid, 1, 3, &mut rng)?;
        let public_key = old_outputs[0].1.public_key_point();

        let old_committee = old_outputs.iter().map(|(pid, _)| *pid).collect::<Vec<_>>();
        let mut new_committee = old_committee[..2].to_vec();
        new_committee.push(ParticipantIdentifier::random(&mut rng));
        new_committee.push(ParticipantIdentifier::random(&mut rng));
        let new_threshold = 2;

        let union = {
            let mut union = old_committee.clone();
            for pid in &new_committee {
                if !union.contains(pid) {
                    union.push(*pid);
                }
            }
            union
        };

        let reshare_sid = Identifier::random(&mut rng);
        let mut quorum = union
            .iter()
            .map(|&pid| {
                let key_share = old_outputs
                    .iter()
                    .find(|(old_pid, _)| *old_pid == pid)
                    .map(|(_, output)| output.clone());
                let input = Input::new(
                    new_threshold,
                    old_committee.clone(),
                    new_committee.clone(),
                    key_share,
                );
                let other_ids = union
                    .iter()
                    .filter(|&&other| other != pid)
                    .copied()
                    .collect::<Vec<_>>();
                EddsaReshareParticipant::<Ed25519>::new(reshare_sid, pid, other_ids, input)
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
            match quorum[index].process_message(&mut rng, &message)? {
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

        let mut new_shares = Vec::new();
        for pid in &new_committee {
            let output = outputs.remove(pid).unwrap();
            let share = output.into_new_share().unwrap();
            assert_eq!(share.public_key_point(), public_key);
            new_shares.push((*pid, share));
        }

        // Any t' + 1 = 3 of the new committee can sign under the old key.
        new_shares.truncate(3);
        let signer_ids = new_shares.iter().map(|(pid, _)| *pid).collect::<Vec<_>>();
        let message = b"signed after eddsa resharing";
        let sign_sid = Identifier::random(&mut rng);
        let mut signers = new_shares
            .into_iter()
            .map(|(pid, output)| {
                let other_ids = signer_ids
                    .iter()
                    .filter(|&&other| other != pid)
                    .copied()
                    .collect::<Vec<_>>();
                EddsaSignParticipant::<Ed25519>::new(
                    sign_sid,
                    pid,
                    other_ids,
                    SignInput::new(message.as_slice(), output),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let mut inboxes: HashMap<ParticipantIdentifier, Vec<Message>> = HashMap::new();
        for signer in &signers {
            let _ = inboxes.insert(signer.id(), vec![]);
        }
        for signer in &signers {
            let message = signer.initialize_message()?;
            inboxes.get_mut(&signer.id()).unwrap().push(message);
        }

        let mut signature = None;
        while !signers
            .iter()
            .all(|p| *p.status() == Status::TerminatedSuccessfully)
        {
            let index = rng.gen_range(0..signers.len());
            let id = signers[index].id();
            let inbox = inboxes.get_mut(&id).unwrap();
            if inbox.is_empty() {
                continue;
            }
            let next = inbox.remove(rng.gen_range(0..inbox.len()));
            match signers[index].process_message(&mut rng, &next)? {
                ProcessOutcome::Incomplete => {}
                ProcessOutcome::Processed(messages) => deliver_all(&messages, &mut inboxes),
                ProcessOutcome::Terminated(output) => signature = Some(output),
                ProcessOutcome::TerminatedForThisParticipant(output, messages) => {
                    deliver_all(&messages, &mut inboxes);
                    signature = Some(output);
                }
            }
        }

        let signature = signature.unwrap();
        assert!(Ed25519::verify_schnorr(
            signature.big_r(),
            signature.s(),
            &public_key,
            message
        )
        .is_ok());
        Ok(())
    }
}
