//! Types and functions related to the resharing sub-protocol.
//!
//! Resharing transfers a shared key from an old committee with threshold `t`
//! to a new committee with threshold `t'`, without ever reconstructing the
//! secret and without changing the public key:
//!
//! - **Round 1.** Each old member deals a fresh degree-`t'` Feldman sharing
//!   of its Lagrange-scaled share `w_i = λ_i·x_i` over the new committee's
//!   coordinates and broadcasts a commitment to the coefficient
//!   commitments.
//! - **Round 2.** Each new member broadcasts fresh Paillier and
//!   ring-Pedersen parameters with well-formedness proofs.
//! - **Rounds 3–4.** Old members send each new member its sub-share,
//!   encrypted to the new member's Paillier key, and open their round 1
//!   commitments.
//! - **Round 5.** New members verify the sub-shares against the opened
//!   polynomials, check that the dealt constant terms still sum to the old
//!   public key, aggregate their fresh share `x'_j = Σ_i f_i(j)` and
//!   broadcast a Schnorr proof of knowledge of it.
//!
//! New members terminate with key material interchangeable with a keygen
//! output; members of the old committee only terminate with a retirement
//! marker once every proof has verified.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    commitment::Commitment,
    curve::{CurveTrait, ScalarTrait},
    errors::{InternalError, ProtocolFault, Result},
    keygen::{self, AuxInfoPublic, EncryptedVssShare, KeySharePrivate, KeySharePublic},
    local_storage::{LocalStorage, TypeTag},
    messages::{Message, MessageType, ReshareMessageType},
    paillier::EncryptionKey,
    participant::{InnerProtocolParticipant, ProcessOutcome, ProtocolParticipant, Status},
    protocol::{
        self, Identifier, ParticipantConfig, ParticipantIdentifier, ProtocolType, SharedContext,
    },
    reshare::{commit::ReshareDecommit, input::Input, output::Output},
    ring_pedersen::RingPedersen,
    vss,
    vss::VssShare,
    zkp::{
        piprm::{self, PiPrmProof},
        pisch::{self, PiSchProof},
        Proof,
    },
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

/// A new-committee member's fresh auxiliary parameters and their proofs,
/// broadcast in round 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReshareAuxPayload {
    paillier_pk: EncryptionKey,
    ring_pedersen: RingPedersen,
    dln_proof_forward: PiPrmProof,
    dln_proof_reverse: PiPrmProof,
}

mod storage {
    use super::*;

    pub(super) struct Commit;
    impl TypeTag for Commit {
        type Value = Commitment;
    }
    pub(super) struct AuxInfo;
    impl TypeTag for AuxInfo {
        type Value = AuxInfoPublic;
    }
    pub(super) struct Decommit<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Decommit<C> {
        type Value = ReshareDecommit<C>;
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
    pub(super) struct FreshShare;
    impl TypeTag for FreshShare {
        type Value = KeySharePrivate;
    }
    pub(super) struct ProofOk;
    impl TypeTag for ProofOk {
        type Value = ();
    }
}

/// A [`ProtocolParticipant`] that runs the resharing protocol.
///
/// # Protocol input
/// The old and new committees, the new threshold, and this party's role
/// material; see [`Input`]. The participant set of the run is the union of
/// the two committees.
///
/// # Protocol output
/// Upon successful completion, a new-committee member outputs fresh key
/// material under the unchanged public key; an old-only member outputs a
/// retirement marker.
#[derive(Debug)]
pub struct ReshareParticipant<C: CurveTrait> {
    /// The current session identifier.
    sid: Identifier,
    /// The current protocol input.
    input: Input<C>,
    /// A unique identifier for this participant.
    id: ParticipantIdentifier,
    /// A list of all other participant identifiers participating in the
    /// protocol.
    other_participant_ids: Vec<ParticipantIdentifier>,
    /// Local storage for this participant to store secrets.
    local_storage: LocalStorage,
    /// Status of the protocol execution.
    status: Status,
}

impl<C: CurveTrait> ProtocolParticipant for ReshareParticipant<C> {
    type Input = Input<C>;
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
        })
    }

    fn ready_type() -> MessageType {
        MessageType::Reshare(ReshareMessageType::Ready)
    }

    fn protocol_type() -> ProtocolType {
        ProtocolType::Reshare
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
            "RESHARE: player {}: received {:?} from {}",
            self.id(),
            message.message_type(),
            message.from()
        );

        if !self.check_can_process(message)? {
            return Ok(ProcessOutcome::Incomplete);
        }

        match message.message_type() {
            MessageType::Reshare(ReshareMessageType::Ready) => self.handle_ready_msg(rng, message),
            MessageType::Reshare(ReshareMessageType::R1Commit) => {
                self.handle_round_one_msg(rng, message)
            }
            MessageType::Reshare(ReshareMessageType::R2AuxInfo) => {
                self.handle_round_two_msg(rng, message)
            }
            MessageType::Reshare(ReshareMessageType::R3PrivateShare) => {
                self.handle_round_three_msg(rng, message)
            }
            MessageType::Reshare(ReshareMessageType::R4Decommit) => {
                self.handle_round_four_msg(rng, message)
            }
            MessageType::Reshare(ReshareMessageType::R5Proof) => self.handle_round_five_msg(message),
            message_type => {
                error!("incorrect message type given to ReshareParticipant: {message_type:?}");
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

impl<C: CurveTrait> InnerProtocolParticipant for ReshareParticipant<C> {
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

impl<C: CurveTrait> ReshareParticipant<C> {
    fn is_old(&self) -> bool {
        self.input.is_old(self.id())
    }

    fn is_new(&self) -> bool {
        self.input.is_new(self.id())
    }

    /// The share coordinate of `pid` within the new committee.
    fn new_coordinate(&self, pid: ParticipantIdentifier) -> Result<usize> {
        protocol::share_coordinate(self.input.new_committee(), pid)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_ready_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        info!("Handling ready reshare message.");

        let ready_outcome = self.process_ready_message(rng, message)?;
        if !self.is_ready() {
            return Ok(ready_outcome);
        }

        let mut messages = Vec::new();
        if self.is_old() {
            messages.extend(run_only_once!(self.gen_round_one_msgs(rng))?);
        }
        if self.is_new() {
            messages.extend(run_only_once!(self.gen_round_two_msgs(rng))?);
        }

        let mut outcomes = self
            .fetch_messages(MessageType::Reshare(ReshareMessageType::R1Commit))?
            .iter()
            .map(|msg| self.handle_round_one_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;
        let aux_outcomes = self
            .fetch_messages(MessageType::Reshare(ReshareMessageType::R2AuxInfo))?
            .iter()
            .map(|msg| self.handle_round_two_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;
        outcomes.extend(aux_outcomes);

        ready_outcome.with_messages(messages).consolidate(outcomes)
    }

    /// Deal a fresh degree-`t'` sharing of this old member's Lagrange-scaled
    /// share and broadcast a commitment to the coefficient commitments.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_one_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round one reshare messages.");

        let key_share = self.input.key_share()?;

        // The constant term is w_i = λ_i·x_i over the old committee, so the
        // dealt constant terms sum to the joint private key.
        let old_quorum = self
            .input
            .old_committee()
            .iter()
            .map(|&pid| key_share.share_coordinate(pid))
            .collect::<Result<Vec<_>>>()?;
        let my_old_coordinate = key_share.share_coordinate(self.id())?;
        let lambda = vss::lagrange_coefficient_at_zero::<C>(my_old_coordinate, &old_quorum)?;
        let w = lambda.mul(&key_share.private_key_share().to_scalar::<C>()?);

        let new_committee = self.input.new_committee().to_vec();
        let coordinates = new_committee
            .iter()
            .map(|&pid| self.new_coordinate(pid))
            .collect::<Result<Vec<_>>>()?;
        let (vss_commitments, shares) =
            vss::share::<C, _>(rng, self.input.new_threshold(), &w, &coordinates)?;

        let shares_for_new = new_committee.into_iter().zip(shares).collect::<Vec<_>>();
        self.local_storage
            .store::<storage::SharesForNew<C>>(self.id(), shares_for_new);

        let decommit = ReshareDecommit::new(rng, &self.sid(), &self.id(), &vss_commitments);
        let commit = decommit.commit()?;
        self.local_storage
            .store::<storage::Commit>(self.id(), commit);
        self.local_storage
            .store::<storage::Decommit<C>>(self.id(), decommit);

        self.broadcast_for_other_participants(
            MessageType::Reshare(ReshareMessageType::R1Commit),
            commit,
        )
    }

    /// Broadcast this new member's fresh auxiliary parameters with their
    /// proofs.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_two_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round two reshare messages.");

        let pre_params = self.input.pre_params()?;
        let params = pre_params.ring_pedersen.clone();
        let witness = pre_params.ring_pedersen_witness.clone();
        let paillier_pk = pre_params.paillier_dk.encryption_key();
        let context = self.retrieve_context();

        let dln_proof_forward = PiPrmProof::prove(
            piprm::CommonInput::new(params.modulus(), params.h1(), params.h2()),
            piprm::ProverSecret::new(witness.alpha(), witness.phi()),
            &context,
            &mut dln_transcript(self.id())?,
            rng,
        )?;
        let dln_proof_reverse = PiPrmProof::prove(
            piprm::CommonInput::new(params.modulus(), params.h2(), params.h1()),
            piprm::ProverSecret::new(witness.beta(), witness.phi()),
            &context,
            &mut dln_transcript(self.id())?,
            rng,
        )?;

        let own_aux = AuxInfoPublic::new(self.id(), paillier_pk.clone(), params.clone());
        self.local_storage
            .store::<storage::AuxInfo>(self.id(), own_aux);

        let payload = ReshareAuxPayload {
            paillier_pk,
            ring_pedersen: params,
            dln_proof_forward,
            dln_proof_reverse,
        };
        self.broadcast_for_other_participants(
            MessageType::Reshare(ReshareMessageType::R2AuxInfo),
            payload,
        )
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_one_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Commit>(message.from())?;
        message.check_broadcast(MessageType::Reshare(ReshareMessageType::R1Commit))?;
        if !self.input.is_old(message.from()) {
            error!("{} dealt a share but is not an old member", message.from());
            Err(ProtocolFault::MessageOutOfOrder(vec![message.from()]))?;
        }
        info!("Handling round one reshare message.");

        let commit: Commitment = deserialize!(&message.unverified_bytes)?;
        self.local_storage
            .store_once::<storage::Commit>(message.from(), commit)?;

        // Commitments unblock any parked decommitments from this dealer.
        let outcomes = self
            .fetch_messages(MessageType::Reshare(ReshareMessageType::R4Decommit))?
            .iter()
            .map(|msg| self.handle_round_four_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;

        Ok(self.maybe_send_shares(rng)?.consolidate(outcomes)?)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_two_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::AuxInfo>(message.from())?;
        message.check_broadcast(MessageType::Reshare(ReshareMessageType::R2AuxInfo))?;
        if !self.input.is_new(message.from()) {
            error!(
                "{} sent auxiliary parameters but is not a new member",
                message.from()
            );
            Err(ProtocolFault::MessageOutOfOrder(vec![message.from()]))?;
        }
        info!("Handling round two reshare message.");

        let payload: ReshareAuxPayload = deserialize!(&message.unverified_bytes)?;
        let aux = AuxInfoPublic::new(message.from(), payload.paillier_pk, payload.ring_pedersen);
        aux.validate(true)?;
        for pid in self.all_participants() {
            if !self.local_storage.contains::<storage::AuxInfo>(pid) {
                continue;
            }
            let other = self.local_storage.retrieve::<storage::AuxInfo>(pid)?;
            if other.ring_pedersen().h1() == aux.ring_pedersen().h1()
                || other.ring_pedersen().h2() == aux.ring_pedersen().h2()
            {
                error!(
                    "{} presented ring-Pedersen generators already used by {pid}",
                    aux.participant()
                );
                Err(ProtocolFault::PaillierParamInvalid(vec![aux.participant()]))?;
            }
        }

        let context = self.retrieve_context();
        let params = aux.ring_pedersen();
        payload
            .dln_proof_forward
            .verify(
                piprm::CommonInput::new(params.modulus(), params.h1(), params.h2()),
                &context,
                &mut dln_transcript(message.from())?,
            )
            .map_err(|_| ProtocolFault::DlnProofInvalid(vec![message.from()]))?;
        payload
            .dln_proof_reverse
            .verify(
                piprm::CommonInput::new(params.modulus(), params.h2(), params.h1()),
                &context,
                &mut dln_transcript(message.from())?,
            )
            .map_err(|_| ProtocolFault::DlnProofInvalid(vec![message.from()]))?;

        self.local_storage
            .store::<storage::AuxInfo>(message.from(), aux);

        self.maybe_send_shares(rng)
    }

    /// Once every old member has committed and every new member has
    /// published parameters, old members distribute the encrypted sub-shares
    /// and open their commitments.
    fn maybe_send_shares<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let commits_done = self
            .local_storage
            .contains_for_all_ids::<storage::Commit>(self.input.old_committee());
        let aux_done = self
            .local_storage
            .contains_for_all_ids::<storage::AuxInfo>(self.input.new_committee());
        if !(commits_done && aux_done) {
            return Ok(ProcessOutcome::Incomplete);
        }

        let messages = if self.is_old() {
            run_only_once!(self.gen_rounds_three_and_four_msgs(rng))?
        } else {
            Vec::new()
        };

        let mut outcomes = self
            .fetch_messages(MessageType::Reshare(ReshareMessageType::R3PrivateShare))?
            .iter()
            .map(|msg| self.handle_round_three_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;
        let decommit_outcomes = self
            .fetch_messages(MessageType::Reshare(ReshareMessageType::R4Decommit))?
            .iter()
            .map(|msg| self.handle_round_four_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;
        outcomes.extend(decommit_outcomes);

        // Distributing our own sub-share may have been the last missing
        // piece for our new-committee role.
        if self.is_new() {
            outcomes.push(self.maybe_finish_new_share(rng)?);
        }

        ProcessOutcome::collect_with_messages(outcomes, messages)
    }

    /// Send each new member its encrypted sub-share and open the round 1
    /// commitment.
    #[instrument(skip_all, err(Debug))]
    fn gen_rounds_three_and_four_msgs<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message>> {
        info!("Generating rounds three and four reshare messages.");

        let shares = self
            .local_storage
            .retrieve::<storage::SharesForNew<C>>(self.id())?
            .clone();
        let mut messages = Vec::new();
        for (pid, share) in shares {
            if pid == self.id() {
                // Our own sub-share stays local.
                self.local_storage
                    .store::<storage::ShareFromOld<C>>(self.id(), share);
                continue;
            }
            let aux = self.local_storage.retrieve::<storage::AuxInfo>(pid)?;
            let encrypted = EncryptedVssShare::encrypt(&share, aux.pk(), rng)?;
            messages.push(Message::new(
                MessageType::Reshare(ReshareMessageType::R3PrivateShare),
                self.sid(),
                self.id(),
                pid,
                &encrypted,
            )?);
        }

        let decommit = self
            .local_storage
            .retrieve::<storage::Decommit<C>>(self.id())?
            .clone();
        messages.extend(self.broadcast_for_other_participants(
            MessageType::Reshare(ReshareMessageType::R4Decommit),
            decommit,
        )?);
        Ok(messages)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_three_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::ShareFromOld<C>>(message.from())?;
        message.check_peer_to_peer(MessageType::Reshare(ReshareMessageType::R3PrivateShare))?;
        if !self.is_new() || !self.input.is_old(message.from()) {
            error!("unexpected sub-share from {}", message.from());
            Err(ProtocolFault::MessageOutOfOrder(vec![message.from()]))?;
        }
        info!("Handling round three reshare message.");

        let encrypted: EncryptedVssShare = deserialize!(&message.unverified_bytes)?;
        let my_coordinate = self.new_coordinate(self.id())?;
        let share = encrypted.decrypt::<C>(
            &self.input.pre_params()?.paillier_dk,
            my_coordinate,
            message.from(),
        )?;
        self.local_storage
            .store_once::<storage::ShareFromOld<C>>(message.from(), share)?;

        self.maybe_finish_new_share(rng)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_four_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Decommit<C>>(message.from())?;

        if !self.local_storage.contains::<storage::Commit>(message.from()) {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round four reshare message.");

        let commit = self
            .local_storage
            .retrieve::<storage::Commit>(message.from())?;
        let decommit = ReshareDecommit::from_message(message, commit)?;
        if decommit.vss_commitments.len() != self.input.new_threshold() + 1 {
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

    /// A new member finishes rounds 3–4: verify every sub-share, check the
    /// public key is preserved, aggregate the fresh share and prove
    /// knowledge of it.
    fn maybe_finish_new_share<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let old_committee = self.input.old_committee().to_vec();
        let decommits_done = self
            .local_storage
            .contains_for_all_ids::<storage::Decommit<C>>(&old_committee);
        let shares_done = self
            .local_storage
            .contains_for_all_ids::<storage::ShareFromOld<C>>(&old_committee);
        if !(decommits_done && shares_done) {
            return Ok(ProcessOutcome::Incomplete);
        }

        let round_five_messages = run_only_once!(self.gen_round_five_msgs(rng))?;

        let outcomes = self
            .fetch_messages(MessageType::Reshare(ReshareMessageType::R5Proof))?
            .iter()
            .map(|msg| self.handle_round_five_msg(msg))
            .collect::<Result<Vec<_>>>()?;

        ProcessOutcome::collect_with_messages(outcomes, round_five_messages)
    }

    #[instrument(skip_all, err(Debug))]
    fn gen_round_five_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round five reshare messages.");

        self.check_aggregate_preserved()?;

        let my_coordinate = self.new_coordinate(self.id())?;
        let mut fresh_share = C::Scalar::zero();
        for pid in self.input.old_committee().to_vec() {
            let decommit = self.local_storage.retrieve::<storage::Decommit<C>>(pid)?;
            let share = self
                .local_storage
                .retrieve::<storage::ShareFromOld<C>>(pid)?;
            if !vss::verify_share(&decommit.vss_commitments, share) {
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

        self.local_storage.store::<storage::FreshShare>(
            self.id(),
            KeySharePrivate::from_bigint(&C::scalar_to_bn(&fresh_share)),
        );
        self.local_storage.store::<storage::ProofOk>(self.id(), ());

        self.broadcast_for_other_participants(
            MessageType::Reshare(ReshareMessageType::R5Proof),
            proof,
        )
    }

    /// An old-only member has nothing to deal once its commitment is open;
    /// it just waits for the new committee's proofs.
    fn maybe_verify_proofs_as_old_member(
        &mut self,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let decommits_done = self
            .local_storage
            .contains_for_all_ids::<storage::Decommit<C>>(self.input.old_committee());
        if !decommits_done {
            return Ok(ProcessOutcome::Incomplete);
        }

        self.check_aggregate_preserved()?;

        let outcomes = self
            .fetch_messages(MessageType::Reshare(ReshareMessageType::R5Proof))?
            .iter()
            .map(|msg| self.handle_round_five_msg(msg))
            .collect::<Result<Vec<_>>>()?;
        ProcessOutcome::collect(outcomes)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_five_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::ProofOk>(message.from())?;
        if !self.input.is_new(message.from()) {
            error!("{} sent a share proof but is not a new member", message.from());
            Err(ProtocolFault::MessageOutOfOrder(vec![message.from()]))?;
        }

        // The statement is computable only once every dealer has opened; a
        // new member additionally finishes its own aggregation first.
        let decommits_done = self
            .local_storage
            .contains_for_all_ids::<storage::Decommit<C>>(self.input.old_committee());
        let own_share_done = !self.is_new()
            || self
                .local_storage
                .contains::<storage::FreshShare>(self.id());
        if !(decommits_done && own_share_done) {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        message.check_broadcast(MessageType::Reshare(ReshareMessageType::R5Proof))?;
        info!("Handling round five reshare message.");

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
            .contains_for_all_ids::<storage::ProofOk>(self.input.new_committee())
        {
            return Ok(ProcessOutcome::Incomplete);
        }

        if !self.is_new() {
            self.status = Status::TerminatedSuccessfully;
            return Ok(ProcessOutcome::Terminated(Output::Retired));
        }

        let mut public_key_shares = Vec::new();
        for pid in self.input.new_committee().to_vec() {
            let coordinate = self.new_coordinate(pid)?;
            let public_share = self.eval_new_public_share(coordinate)?;
            public_key_shares.push(KeySharePublic::new(pid, public_share));
        }

        let mut public_key = C::identity();
        let mut vss_commitments = Vec::new();
        for pid in self.input.old_committee().to_vec() {
            let decommit = self.local_storage.remove::<storage::Decommit<C>>(pid)?;
            public_key = public_key + decommit.vss_commitments[0];
            vss_commitments.push((pid, decommit.vss_commitments));
        }

        let mut aux_info = Vec::new();
        for pid in self.input.new_committee().to_vec() {
            aux_info.push(self.local_storage.remove::<storage::AuxInfo>(pid)?);
        }

        let private_key_share = self.local_storage.remove::<storage::FreshShare>(self.id())?;

        let output = keygen::Output::from_parts(
            self.input.new_threshold(),
            public_key,
            private_key_share,
            public_key_shares,
            vss_commitments,
            aux_info,
            self.input.pre_params()?.clone().into_private(),
        )?;

        self.status = Status::TerminatedSuccessfully;
        Ok(ProcessOutcome::Terminated(Output::NewShare(Box::new(
            output,
        ))))
    }

    /// Evaluate the sum of all dealers' public polynomials at a
    /// new-committee coordinate.
    fn eval_new_public_share(&self, coordinate: usize) -> Result<C> {
        let mut sum = C::identity();
        for pid in self.input.old_committee() {
            let decommit = self.local_storage.retrieve::<storage::Decommit<C>>(*pid)?;
            sum = sum + vss::eval_commitment(&decommit.vss_commitments, coordinate);
        }
        Ok(sum)
    }

    /// The dealt constant terms must still sum to the public key being
    /// reshared. Only members holding the old key material can check this;
    /// a party joining fresh trusts the old quorum's honesty here.
    fn check_aggregate_preserved(&self) -> Result<()> {
        let Ok(key_share) = self.input.key_share() else {
            return Ok(());
        };
        let mut dealt = C::identity();
        for pid in self.input.old_committee() {
            let decommit = self.local_storage.retrieve::<storage::Decommit<C>>(*pid)?;
            dealt = dealt + decommit.vss_commitments[0];
        }
        if dealt != key_share.public_key_point() {
            error!("resharing would change the aggregate public key; aborting");
            Err(ProtocolFault::ShareInconsistent(
                self.input.old_committee().to_vec(),
            ))?;
        }
        Ok(())
    }
}

/// The transcript for a new member's ring-Pedersen parameter proofs.
fn dln_transcript(sender: ParticipantIdentifier) -> Result<Transcript> {
    let mut transcript = Transcript::new(b"reshare ring-pedersen");
    transcript.append_message(b"sender", &serialize!(&sender)?);
    Ok(transcript)
}

/// The transcript for a new member's Schnorr proof of its fresh share.
fn schnorr_transcript(sender: ParticipantIdentifier) -> Result<Transcript> {
    let mut transcript = Transcript::new(b"reshare schnorr");
    transcript.append_message(b"sender", &serialize!(&sender)?);
    Ok(transcript)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::{EcdsaCurveTrait, TestCurve},
        keygen::{
            participant::tests::{deliver_all, run_keygen},
            PreParams,
        },
        sign,
        utils::testing::init_testing,
    };
    use rand::{CryptoRng, Rng, RngCore};
    use sha2::{Digest, Sha256};
    use std::collections::HashMap;

    type TestReshareParticipant = ReshareParticipant<TestCurve>;

    /// Reshare a (1, 3) key to a new committee of four with threshold 2.
    /// Two old members stay on; two members join fresh.
    fn run_resharing() -> Result<(
        TestCurve,
        Vec<(ParticipantIdentifier, keygen::Output<TestCurve>)>,
    )> {
        let mut rng = init_testing();
        let keygen_sid = Identifier::random(&mut rng);
        let old_outputs = run_keygen(keygen_sid, 1, 3, &mut rng)?;
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
                let pre_params = if new_committee.contains(&pid) {
                    Some(PreParams::simulate(&mut rng)?)
                } else {
                    None
                };
                let input = Input::new(
                    new_threshold,
                    old_committee.clone(),
                    new_committee.clone(),
                    key_share,
                    pre_params,
                );
                let other_ids = union
                    .iter()
                    .filter(|&&other| other != pid)
                    .copied()
                    .collect::<Vec<_>>();
                TestReshareParticipant::new(reshare_sid, pid, other_ids, input)
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
            let Some((index, message)) = pick_message(&mut quorum, &mut inboxes, &mut rng) else {
                continue;
            };
            let id = quorum[index].id();
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

        // Old-only members retire; new members leave with a fresh share.
        let mut new_shares = Vec::new();
        for pid in &union {
            let output = outputs.remove(pid).unwrap();
            if new_committee.contains(pid) {
                new_shares.push((*pid, output.into_new_share().unwrap()));
            } else {
                assert!(output.new_share().is_none());
            }
        }
        Ok((public_key, new_shares))
    }

    fn pick_message<R: RngCore + CryptoRng>(
        quorum: &mut [TestReshareParticipant],
        inboxes: &mut HashMap<ParticipantIdentifier, Vec<Message>>,
        rng: &mut R,
    ) -> Option<(usize, Message)> {
        let index = rng.gen_range(0..quorum.len());
        let id = quorum[index].id();
        let inbox = inboxes.get_mut(&id).unwrap();
        if inbox.is_empty() {
            return None;
        }
        let message = inbox.remove(rng.gen_range(0..inbox.len()));
        Some((index, message))
    }

    #[test]
    fn resharing_preserves_the_public_key() -> Result<()> {
        let (public_key, new_shares) = run_resharing()?;

        assert_eq!(new_shares.len(), 4);
        for (_, output) in &new_shares {
            assert_eq!(output.public_key_point(), public_key);
            assert_eq!(output.threshold(), 2);
            assert_eq!(output.public_key_shares().len(), 4);
        }
        Ok(())
    }

    #[test]
    fn new_committee_quorum_signs_under_the_old_key() -> Result<()> {
        let mut rng = init_testing();
        let (public_key, mut new_shares) = run_resharing()?;

        // Any t' + 1 = 3 of the new committee can sign.
        new_shares.truncate(3);
        let signer_ids = new_shares.iter().map(|(pid, _)| *pid).collect::<Vec<_>>();

        let message = b"signed after resharing";
        let digest: [u8; 32] = Sha256::digest(message).into();
        let sign_sid = Identifier::random(&mut rng);
        let mut signers = new_shares
            .into_iter()
            .map(|(pid, output)| {
                let other_ids = signer_ids
                    .iter()
                    .filter(|&&other| other != pid)
                    .copied()
                    .collect::<Vec<_>>();
                sign::SignParticipant::<TestCurve>::new(
                    sign_sid,
                    pid,
                    other_ids,
                    sign::Input::new(digest, output),
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

        let mut signatures = HashMap::new();
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
            let message = inbox.remove(rng.gen_range(0..inbox.len()));
            match signers[index].process_message(&mut rng, &message)? {
                ProcessOutcome::Incomplete => {}
                ProcessOutcome::Processed(messages) => deliver_all(&messages, &mut inboxes),
                ProcessOutcome::Terminated(output) => {
                    assert!(signatures.insert(id, output).is_none())
                }
                ProcessOutcome::TerminatedForThisParticipant(output, messages) => {
                    deliver_all(&messages, &mut inboxes);
                    assert!(signatures.insert(id, output).is_none());
                }
            }
        }

        // The signature verifies under the unchanged public key.
        use crate::curve::VerifyingKeyTrait;
        let signature = signatures.into_values().next().unwrap();
        let verifying_key =
            <TestCurve as EcdsaCurveTrait>::VerifyingKey::from_point(public_key)?;
        assert!(verifying_key
            .verify_prehashed(&digest, signature.signature())
            .is_ok());
        Ok(())
    }
}
