//! Types and functions related to the threshold signing sub-protocol.
//!
//! Any `t + 1` shareholders jointly produce an ECDSA signature without
//! reconstructing the key:
//!
//! - **Round 1.** Each signer samples a nonce share `k_i` and a mask share
//!   `γ_i`, broadcasts a commitment to `Γ_i = γ_i·G`, and sends each peer
//!   `Enc_i(k_i)` with a range proof.
//! - **Round 2.** Each pair of signers runs two multiplicative-to-additive
//!   conversions, turning `k_i·γ_j` and `k_i·w_j` into additive shares
//!   (`w_j` being the Lagrange-scaled key share, whose public point makes
//!   the second conversion checkable).
//! - **Round 3.** Each signer reveals `δ_i = k_i·γ_i + Σα + Σβ`; the sum is
//!   `k·γ`.
//! - **Round 4.** Commitments to `Γ_i` are opened; `R = (ΣΓ_j)·(kγ)⁻¹`
//!   yields `r = R.x mod q`.
//! - **Round 5.** Each signer reveals `s_i = m·k_i + r·σ_i`; the sum is the
//!   signature scalar `s`.
//!
//! The participant verifies the assembled `(r, s)` against the aggregate
//! public key before releasing it; a signature that does not verify aborts
//! the run instead.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    commitment::Commitment,
    curve::{CurveTrait, EcdsaCurveTrait, ScalarTrait, SignatureTrait, VerifyingKeyTrait},
    errors::{InternalError, ProtocolFault, Result},
    local_storage::{LocalStorage, TypeTag},
    messages::{Message, MessageType, SignMessageType},
    mta,
    mta::{ProofBob, ProofBobWC, RangeProofAlice},
    paillier::Ciphertext,
    participant::{InnerProtocolParticipant, ProcessOutcome, ProtocolParticipant, Status},
    protocol::{Identifier, ParticipantConfig, ParticipantIdentifier, ProtocolType, SharedContext},
    sign::{commit::SignDecommit, input::Input, signature::SignatureData},
    vss,
};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use zeroize::ZeroizeOnDrop;

/// This signer's round 1 secrets.
#[derive(ZeroizeOnDrop)]
struct NonceSecrets {
    k: BigNumber,
    gamma: BigNumber,
}

/// A secret additive share produced by an MtA conversion.
#[derive(ZeroizeOnDrop)]
struct SecretShare(BigNumber);

/// The encrypted nonce share and its range proof, sent peer-to-peer in
/// round 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MtaInitPayload {
    ciphertext: Ciphertext,
    proof: RangeProofAlice,
}

/// The responder's halves of both MtA conversions, sent peer-to-peer in
/// round 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
struct MtaResponsePayload<C: CurveTrait> {
    gamma_ciphertext: Ciphertext,
    gamma_proof: ProofBob,
    w_ciphertext: Ciphertext,
    w_proof: ProofBobWC<C>,
}

/// The x-projection data fixed in round 4.
struct RProjection {
    r: BigNumber,
    recovery_id: u8,
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
        type Value = SignDecommit<C>;
    }
    pub(super) struct MtaInit;
    impl TypeTag for MtaInit {
        type Value = MtaInitPayload;
    }
    pub(super) struct Nonces;
    impl TypeTag for Nonces {
        type Value = NonceSecrets;
    }
    pub(super) struct OwnCiphertext;
    impl TypeTag for OwnCiphertext {
        type Value = Ciphertext;
    }
    pub(super) struct Beta;
    impl TypeTag for Beta {
        type Value = SecretShare;
    }
    pub(super) struct Nu;
    impl TypeTag for Nu {
        type Value = SecretShare;
    }
    pub(super) struct Alpha;
    impl TypeTag for Alpha {
        type Value = SecretShare;
    }
    pub(super) struct Mu;
    impl TypeTag for Mu {
        type Value = SecretShare;
    }
    pub(super) struct Delta;
    impl TypeTag for Delta {
        type Value = BigNumber;
    }
    pub(super) struct DeltaInverse;
    impl TypeTag for DeltaInverse {
        type Value = BigNumber;
    }
    pub(super) struct Sigma;
    impl TypeTag for Sigma {
        type Value = SecretShare;
    }
    pub(super) struct XProj;
    impl TypeTag for XProj {
        type Value = RProjection;
    }
    pub(super) struct SigShare;
    impl TypeTag for SigShare {
        type Value = BigNumber;
    }
}

/// A [`ProtocolParticipant`] that runs the threshold signing protocol.
///
/// # Protocol input
/// The 32-byte message digest and the saved key material; see [`Input`]. The
/// participants of the run form the signing quorum and must number at least
/// `threshold + 1`.
///
/// # Protocol output
/// Upon successful completion, the participant outputs a [`SignatureData`]:
/// the verified signature, its recovery byte and the signed digest.
#[derive(Debug)]
pub struct SignParticipant<C: EcdsaCurveTrait> {
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

impl<C: EcdsaCurveTrait> ProtocolParticipant for SignParticipant<C> {
    type Input = Input<C>;
    type Output = SignatureData<C>;

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
        MessageType::Sign(SignMessageType::Ready)
    }

    fn protocol_type() -> ProtocolType {
        ProtocolType::Sign
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
            "SIGN: player {}: received {:?} from {}",
            self.id(),
            message.message_type(),
            message.from()
        );

        if !self.check_can_process(message)? {
            return Ok(ProcessOutcome::Incomplete);
        }

        match message.message_type() {
            MessageType::Sign(SignMessageType::Ready) => self.handle_ready_msg(rng, message),
            MessageType::Sign(SignMessageType::R1Commit) => {
                self.handle_round_one_commit(rng, message)
            }
            MessageType::Sign(SignMessageType::R1MtaInit) => {
                self.handle_round_one_mta(rng, message)
            }
            MessageType::Sign(SignMessageType::R2MtaResponse) => {
                self.handle_round_two_msg(message)
            }
            MessageType::Sign(SignMessageType::R3Delta) => self.handle_round_three_msg(message),
            MessageType::Sign(SignMessageType::R4Decommit) => self.handle_round_four_msg(message),
            MessageType::Sign(SignMessageType::R5SigShare) => self.handle_round_five_msg(message),
            message_type => {
                error!("incorrect message type given to SignParticipant: {message_type:?}");
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

impl<C: EcdsaCurveTrait> InnerProtocolParticipant for SignParticipant<C> {
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

impl<C: EcdsaCurveTrait> SignParticipant<C> {
    #[instrument(skip_all, err(Debug))]
    fn handle_ready_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        info!("Handling ready sign message.");

        let ready_outcome = self.process_ready_message(rng, message)?;
        if !self.is_ready() {
            return Ok(ready_outcome);
        }
        let round_one_messages = run_only_once!(self.gen_round_one_msgs(rng))?;

        let mut outcomes = self
            .fetch_messages(MessageType::Sign(SignMessageType::R1Commit))?
            .iter()
            .map(|msg| self.handle_round_one_commit(rng, msg))
            .collect::<Result<Vec<_>>>()?;
        let mta_outcomes = self
            .fetch_messages(MessageType::Sign(SignMessageType::R1MtaInit))?
            .iter()
            .map(|msg| self.handle_round_one_mta(rng, msg))
            .collect::<Result<Vec<_>>>()?;
        outcomes.extend(mta_outcomes);

        ready_outcome
            .with_messages(round_one_messages)
            .consolidate(outcomes)
    }

    /// Generate the round 1 messages: the commitment to `Γ_i` (broadcast)
    /// and the encrypted nonce share with a range proof per peer
    /// (point-to-point).
    #[instrument(skip_all, err(Debug))]
    fn gen_round_one_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round one sign messages.");

        let order = C::order();
        let k = BigNumber::from_rng(&order, rng);
        let gamma = BigNumber::from_rng(&order, rng);

        let gamma_point = C::scale_generator(&gamma)?;
        let decommit = SignDecommit::new(rng, &self.sid(), &self.id(), gamma_point);
        let commit = decommit.commit()?;
        self.local_storage
            .store::<storage::Commit>(self.id(), commit);
        self.local_storage
            .store::<storage::Decommit<C>>(self.id(), decommit);

        let own_aux = self.input.key_share().find_aux_info(self.id())?;
        let (ciphertext, nonce) = own_aux
            .pk()
            .encrypt(rng, &k)
            .map_err(InternalError::PaillierError)?;
        self.local_storage
            .store::<storage::OwnCiphertext>(self.id(), ciphertext.clone());

        let context = self.retrieve_context();
        let mut messages = self
            .broadcast_for_other_participants(MessageType::Sign(SignMessageType::R1Commit), commit)?;
        for pid in self.other_ids().to_vec() {
            let their_aux = self.input.key_share().find_aux_info(pid)?;
            let proof = mta::alice_init(
                own_aux.pk(),
                &k,
                &ciphertext,
                &nonce,
                their_aux.ring_pedersen(),
                &order,
                &context,
                rng,
            )?;
            messages.push(Message::new(
                MessageType::Sign(SignMessageType::R1MtaInit),
                self.sid(),
                self.id(),
                pid,
                &MtaInitPayload {
                    ciphertext: ciphertext.clone(),
                    proof,
                },
            )?);
        }

        self.local_storage
            .store::<storage::Nonces>(self.id(), NonceSecrets { k, gamma });
        Ok(messages)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_one_commit<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Commit>(message.from())?;
        message.check_broadcast(MessageType::Sign(SignMessageType::R1Commit))?;
        info!("Handling round one sign commitment.");

        let commit: Commitment = deserialize!(&message.unverified_bytes)?;
        self.local_storage
            .store_once::<storage::Commit>(message.from(), commit)?;

        self.maybe_gen_round_two(rng)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_one_mta<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::MtaInit>(message.from())?;
        message.check_peer_to_peer(MessageType::Sign(SignMessageType::R1MtaInit))?;
        info!("Handling round one sign MtA opener.");

        let payload: MtaInitPayload = deserialize!(&message.unverified_bytes)?;
        self.local_storage
            .store_once::<storage::MtaInit>(message.from(), payload)?;

        self.maybe_gen_round_two(rng)
    }

    /// Once every peer's commitment and MtA opener are in, respond to all
    /// the conversions.
    fn maybe_gen_round_two<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let others = self.other_ids().to_vec();
        let commits_done = self
            .local_storage
            .contains_for_all_ids::<storage::Commit>(&self.all_participants());
        let mta_done = self
            .local_storage
            .contains_for_all_ids::<storage::MtaInit>(&others);
        if !(commits_done && mta_done) {
            return Ok(ProcessOutcome::Incomplete);
        }

        let round_two_messages = run_only_once!(self.gen_round_two_msgs(rng))?;

        let outcomes = self
            .fetch_messages(MessageType::Sign(SignMessageType::R2MtaResponse))?
            .iter()
            .map(|msg| self.handle_round_two_msg(msg))
            .collect::<Result<Vec<_>>>()?;

        ProcessOutcome::collect_with_messages(outcomes, round_two_messages)
    }

    /// Generate the round 2 messages: for each peer, respond to both of its
    /// MtA conversions — plainly for the mask pairing `k_j·γ_i`, and bound
    /// to the public point `W_i` for the key pairing `k_j·w_i`.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_two_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round two sign messages.");

        let context = self.retrieve_context();
        let own_aux = self.input.key_share().find_aux_info(self.id())?.clone();
        let gamma = self
            .local_storage
            .retrieve::<storage::Nonces>(self.id())?
            .gamma
            .clone();
        let w = self.own_lagrange_scaled_share()?;
        let w_point = self.lagrange_scaled_point(self.id())?;

        let mut messages = Vec::new();
        for pid in self.other_ids().to_vec() {
            let their_aux = self.input.key_share().find_aux_info(pid)?;
            let init = self.local_storage.retrieve::<storage::MtaInit>(pid)?;

            let (beta, gamma_ciphertext, _, gamma_proof) = mta::bob_mid::<C, _>(
                rng,
                their_aux.pk(),
                &init.proof,
                &gamma,
                &init.ciphertext,
                their_aux.ring_pedersen(),
                own_aux.ring_pedersen(),
                &context,
            )
            .map_err(|err| match err {
                InternalError::FailedToVerifyProof => {
                    error!("range proof from {pid} failed to verify");
                    ProtocolFault::RangeProofInvalid(vec![pid]).into()
                }
                other => other,
            })?;

            let (nu, w_ciphertext, _, w_proof) = mta::bob_mid_wc::<C, _>(
                rng,
                their_aux.pk(),
                &init.proof,
                &w,
                &init.ciphertext,
                their_aux.ring_pedersen(),
                own_aux.ring_pedersen(),
                &w_point,
                &context,
            )
            .map_err(|err| match err {
                InternalError::FailedToVerifyProof => {
                    error!("range proof from {pid} failed to verify");
                    ProtocolFault::RangeProofInvalid(vec![pid]).into()
                }
                other => other,
            })?;

            self.local_storage
                .store::<storage::Beta>(pid, SecretShare(beta));
            self.local_storage
                .store::<storage::Nu>(pid, SecretShare(nu));

            messages.push(Message::new(
                MessageType::Sign(SignMessageType::R2MtaResponse),
                self.sid(),
                self.id(),
                pid,
                &MtaResponsePayload {
                    gamma_ciphertext,
                    gamma_proof,
                    w_ciphertext,
                    w_proof,
                },
            )?);
        }
        Ok(messages)
    }

    /// Handle a round 2 message: finish both MtA conversions as the
    /// initiator, recovering this signer's `α` and `μ` shares.
    #[instrument(skip_all, err(Debug))]
    fn handle_round_two_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Alpha>(message.from())?;
        message.check_peer_to_peer(MessageType::Sign(SignMessageType::R2MtaResponse))?;

        // We can only finish a conversion we started.
        if !self
            .local_storage
            .contains::<storage::OwnCiphertext>(self.id())
        {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round two sign message.");

        let payload: MtaResponsePayload<C> = deserialize!(&message.unverified_bytes)?;
        let context = self.retrieve_context();
        let own_aux = self.input.key_share().find_aux_info(self.id())?;
        let own_ciphertext = self
            .local_storage
            .retrieve::<storage::OwnCiphertext>(self.id())?;
        let dk = self.input.key_share().private_aux().decryption_key();

        let alpha = mta::alice_end::<C>(
            own_aux.pk(),
            &payload.gamma_proof,
            own_aux.ring_pedersen(),
            own_ciphertext,
            &payload.gamma_ciphertext,
            dk,
            &context,
        )
        .map_err(|err| match err {
            InternalError::FailedToVerifyProof => {
                error!("MtA response proof from {} failed to verify", message.from());
                ProtocolFault::BobProofInvalid(vec![message.from()]).into()
            }
            other => other,
        })?;

        let their_w_point = self.lagrange_scaled_point(message.from())?;
        let (mu, _raw, _nonce) = mta::alice_end_wc::<C>(
            own_aux.pk(),
            &payload.w_proof,
            &their_w_point,
            own_ciphertext,
            &payload.w_ciphertext,
            own_aux.ring_pedersen(),
            dk,
            &context,
        )
        .map_err(|err| match err {
            InternalError::FailedToVerifyProof => {
                error!(
                    "MtA point-bound response proof from {} failed to verify",
                    message.from()
                );
                ProtocolFault::BobProofInvalid(vec![message.from()]).into()
            }
            other => other,
        })?;

        self.local_storage
            .store_once::<storage::Alpha>(message.from(), SecretShare(alpha))?;
        self.local_storage
            .store::<storage::Mu>(message.from(), SecretShare(mu));

        self.maybe_finish_round_two()
    }

    /// Once both conversions with every peer are complete, assemble
    /// `δ_i` and `σ_i` and reveal `δ_i`.
    fn maybe_finish_round_two(
        &mut self,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let others = self.other_ids().to_vec();
        let alphas_done = self
            .local_storage
            .contains_for_all_ids::<storage::Alpha>(&others);
        let betas_done = self
            .local_storage
            .contains_for_all_ids::<storage::Beta>(&others);
        if !(alphas_done && betas_done) {
            return Ok(ProcessOutcome::Incomplete);
        }

        let round_three_messages = run_only_once!(self.gen_round_three_msgs())?;

        let outcomes = self
            .fetch_messages(MessageType::Sign(SignMessageType::R3Delta))?
            .iter()
            .map(|msg| self.handle_round_three_msg(msg))
            .collect::<Result<Vec<_>>>()?;

        ProcessOutcome::collect_with_messages(outcomes, round_three_messages)
    }

    #[instrument(skip_all, err(Debug))]
    fn gen_round_three_msgs(&mut self) -> Result<Vec<Message>> {
        info!("Generating round three sign messages.");

        let order = C::order();
        let nonces = self.local_storage.retrieve::<storage::Nonces>(self.id())?;
        let k = nonces.k.clone();
        let gamma = nonces.gamma.clone();
        let w = self.own_lagrange_scaled_share()?;

        let mut delta = k.modmul(&gamma, &order);
        let mut sigma = k.modmul(&w, &order);
        for pid in self.other_ids().to_vec() {
            let alpha = self.local_storage.retrieve::<storage::Alpha>(pid)?;
            let beta = self.local_storage.retrieve::<storage::Beta>(pid)?;
            delta = delta.modadd(&alpha.0, &order).modadd(&beta.0, &order);

            let mu = self.local_storage.retrieve::<storage::Mu>(pid)?;
            let nu = self.local_storage.retrieve::<storage::Nu>(pid)?;
            sigma = sigma.modadd(&mu.0, &order).modadd(&nu.0, &order);
        }

        self.local_storage
            .store::<storage::Sigma>(self.id(), SecretShare(sigma));
        self.local_storage
            .store::<storage::Delta>(self.id(), delta.clone());

        self.broadcast_for_other_participants(MessageType::Sign(SignMessageType::R3Delta), delta)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_three_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Delta>(message.from())?;

        // Completion is only detectable once our own reveal is fixed, so
        // park peer reveals until then.
        if !self.local_storage.contains::<storage::Delta>(self.id()) {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        message.check_broadcast(MessageType::Sign(SignMessageType::R3Delta))?;
        info!("Handling round three sign message.");

        let delta: BigNumber = deserialize!(&message.unverified_bytes)?;
        self.local_storage
            .store_once::<storage::Delta>(message.from(), delta)?;

        if !self
            .local_storage
            .contains_for_all_ids::<storage::Delta>(&self.all_participants())
        {
            return Ok(ProcessOutcome::Incomplete);
        }

        let round_four_messages = run_only_once!(self.gen_round_four_msgs())?;

        let outcomes = self
            .fetch_messages(MessageType::Sign(SignMessageType::R4Decommit))?
            .iter()
            .map(|msg| self.handle_round_four_msg(msg))
            .collect::<Result<Vec<_>>>()?;

        ProcessOutcome::collect_with_messages(outcomes, round_four_messages)
    }

    /// Invert the revealed `k·γ` and open our commitment to `Γ_i`.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_four_msgs(&mut self) -> Result<Vec<Message>> {
        info!("Generating round four sign messages.");

        let order = C::order();
        let mut delta = BigNumber::zero();
        for pid in self.all_participants() {
            delta = delta.modadd(self.local_storage.retrieve::<storage::Delta>(pid)?, &order);
        }
        let delta_inverse = delta.invert(&order).ok_or_else(|| {
            error!("the revealed nonce-mask product is not invertible");
            ProtocolFault::ShareInconsistent(self.other_ids().to_vec())
        })?;
        self.local_storage
            .store::<storage::DeltaInverse>(self.id(), delta_inverse);

        let decommit = self
            .local_storage
            .retrieve::<storage::Decommit<C>>(self.id())?
            .clone();
        self.broadcast_for_other_participants(
            MessageType::Sign(SignMessageType::R4Decommit),
            decommit,
        )
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_four_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Decommit<C>>(message.from())?;

        // The nonce point only makes sense once k·γ is fixed.
        if !self
            .local_storage
            .contains::<storage::DeltaInverse>(self.id())
        {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round four sign message.");

        let commit = self
            .local_storage
            .retrieve::<storage::Commit>(message.from())?;
        let decommit = SignDecommit::from_message(message, commit)?;
        self.local_storage
            .store_once::<storage::Decommit<C>>(message.from(), decommit)?;

        if !self
            .local_storage
            .contains_for_all_ids::<storage::Decommit<C>>(&self.all_participants())
        {
            return Ok(ProcessOutcome::Incomplete);
        }

        let round_five_messages = run_only_once!(self.gen_round_five_msgs())?;

        let outcomes = self
            .fetch_messages(MessageType::Sign(SignMessageType::R5SigShare))?
            .iter()
            .map(|msg| self.handle_round_five_msg(msg))
            .collect::<Result<Vec<_>>>()?;

        ProcessOutcome::collect_with_messages(outcomes, round_five_messages)
    }

    /// Fix `R` and `r`, then reveal this signer's signature share.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_five_msgs(&mut self) -> Result<Vec<Message>> {
        info!("Generating round five sign messages.");

        let order = C::order();
        let mut gamma_sum = C::identity();
        for pid in self.all_participants() {
            let decommit = self.local_storage.retrieve::<storage::Decommit<C>>(pid)?;
            gamma_sum = gamma_sum + decommit.gamma_point;
        }
        let delta_inverse = self
            .local_storage
            .retrieve::<storage::DeltaInverse>(self.id())?;
        let nonce_point = gamma_sum.multiply_by_bignum(delta_inverse)?;

        let r_scalar = nonce_point.x_projection()?;
        let r = C::scalar_to_bn(&r_scalar);
        if r == BigNumber::zero() {
            error!("the nonce point has a zero x-projection");
            return Err(InternalError::InternalInvariantFailed);
        }
        let recovery_id = nonce_point.y_parity();
        self.local_storage.store::<storage::XProj>(
            self.id(),
            RProjection {
                r: r.clone(),
                recovery_id,
            },
        );

        let m = BigNumber::from_slice(self.input.digest()).nmod(&order);
        let k = self
            .local_storage
            .retrieve::<storage::Nonces>(self.id())?
            .k
            .clone();
        let sigma = self.local_storage.retrieve::<storage::Sigma>(self.id())?;
        let share = m.modmul(&k, &order).modadd(&r.modmul(&sigma.0, &order), &order);

        self.local_storage
            .store::<storage::SigShare>(self.id(), share.clone());
        self.broadcast_for_other_participants(MessageType::Sign(SignMessageType::R5SigShare), share)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_five_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::SigShare>(message.from())?;
        message.check_broadcast(MessageType::Sign(SignMessageType::R5SigShare))?;

        if !self.local_storage.contains::<storage::XProj>(self.id()) {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round five sign message.");

        let share: BigNumber = deserialize!(&message.unverified_bytes)?;
        self.local_storage
            .store_once::<storage::SigShare>(message.from(), share)?;

        if !self
            .local_storage
            .contains_for_all_ids::<storage::SigShare>(&self.all_participants())
        {
            return Ok(ProcessOutcome::Incomplete);
        }

        self.compute_output()
    }

    /// Aggregate the signature shares, normalize, and verify the signature
    /// before releasing it.
    fn compute_output(&mut self) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let order = C::order();
        let mut s = BigNumber::zero();
        for pid in self.all_participants() {
            s = s.modadd(self.local_storage.retrieve::<storage::SigShare>(pid)?, &order);
        }

        let projection = self.local_storage.remove::<storage::XProj>(self.id())?;
        let mut recovery_id = projection.recovery_id;

        // Normalize to the low-s form; the nonce parity flips with it.
        let s_scalar = C::bn_to_scalar(&s)?;
        if C::is_high(&s_scalar) {
            s = (&order - s).nmod(&order);
            recovery_id ^= 1;
        }

        let signature = C::Signature::from_scalars(&projection.r, &s)?;
        let public_key = self.input.key_share().public_key()?;
        public_key
            .verify_prehashed(self.input.digest(), &signature)
            .map_err(|_| {
                error!("assembled signature failed verification; not releasing it");
                ProtocolFault::SignatureVerifyFail
            })?;

        // Drop the secret scratch now rather than at participant drop.
        let _ = self.local_storage.remove::<storage::Nonces>(self.id())?;
        let _ = self.local_storage.remove::<storage::Sigma>(self.id())?;

        let output = SignatureData::new(signature, recovery_id, *self.input.digest());
        self.status = Status::TerminatedSuccessfully;
        Ok(ProcessOutcome::Terminated(output))
    }

    /// The quorum's share coordinates in the keygen coordinate system.
    fn quorum_coordinates(&self) -> Result<Vec<usize>> {
        self.all_participants()
            .iter()
            .map(|&pid| self.input.key_share().share_coordinate(pid))
            .collect()
    }

    /// The Lagrange coefficient at zero for `pid` within this quorum.
    fn lagrange_coefficient(&self, pid: ParticipantIdentifier) -> Result<C::Scalar> {
        let coordinate = self.input.key_share().share_coordinate(pid)?;
        vss::lagrange_coefficient_at_zero::<C>(coordinate, &self.quorum_coordinates()?)
    }

    /// This signer's additive key share `w_i = λ_i·x_i`, as an integer.
    fn own_lagrange_scaled_share(&self) -> Result<BigNumber> {
        let lambda = self.lagrange_coefficient(self.id())?;
        let x = self
            .input
            .key_share()
            .private_key_share()
            .to_scalar::<C>()?;
        Ok(C::scalar_to_bn(&lambda.mul(&x)))
    }

    /// The public point `W_j = λ_j·X_j` of a quorum member's additive key
    /// share.
    fn lagrange_scaled_point(&self, pid: ParticipantIdentifier) -> Result<C> {
        let lambda = self.lagrange_coefficient(pid)?;
        let share = self.input.key_share().find_public_share(pid)?;
        Ok(share.as_ref().multiply_by_scalar(&lambda))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve,
        keygen::participant::tests::{deliver_all, run_keygen},
        utils::testing::init_testing,
    };
    use k256::ecdsa::{RecoveryId, VerifyingKey};
    use rand::{CryptoRng, Rng, RngCore};
    use sha2::{Digest, Sha256};
    use sha3::Keccak256;
    use std::collections::HashMap;

    type TestSignParticipant = SignParticipant<TestCurve>;

    /// Run keygen for `quorum_size` parties, then have the first
    /// `signer_count` of them sign `message`. Optionally corrupt one byte
    /// of every round 1 message a chosen signer sends.
    #[allow(clippy::type_complexity)]
    fn run_signing(
        threshold: usize,
        quorum_size: usize,
        signer_count: usize,
        message: &[u8],
        corrupt_sender: Option<usize>,
    ) -> Result<(
        std::result::Result<Vec<SignatureData<TestCurve>>, InternalError>,
        VerifyingKey,
    )> {
        let digest: [u8; 32] = Sha256::digest(message).into();
        run_signing_with_digest(threshold, quorum_size, signer_count, digest, corrupt_sender)
    }

    #[allow(clippy::type_complexity)]
    fn run_signing_with_digest(
        threshold: usize,
        quorum_size: usize,
        signer_count: usize,
        digest: [u8; 32],
        corrupt_sender: Option<usize>,
    ) -> Result<(
        std::result::Result<Vec<SignatureData<TestCurve>>, InternalError>,
        VerifyingKey,
    )> {
        let mut rng = init_testing();
        let keygen_sid = Identifier::random(&mut rng);
        let mut outputs = run_keygen(keygen_sid, threshold, quorum_size, &mut rng)?;
        let public_key = outputs[0].1.public_key()?;
        outputs.truncate(signer_count);

        let sign_sid = Identifier::random(&mut rng);

        let signer_ids = outputs.iter().map(|(pid, _)| *pid).collect::<Vec<_>>();
        let corrupt_id = corrupt_sender.map(|index| signer_ids[index]);
        let mut quorum = outputs
            .into_iter()
            .map(|(pid, output)| {
                let other_ids = signer_ids
                    .iter()
                    .filter(|&&other| other != pid)
                    .copied()
                    .collect::<Vec<_>>();
                TestSignParticipant::new(sign_sid, pid, other_ids, Input::new(digest, output))
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

        let mut signatures = HashMap::new();
        loop {
            let all_done = quorum
                .iter()
                .all(|p| *p.status() == Status::TerminatedSuccessfully);
            if all_done {
                break;
            }

            let Some((index, message)) = pick_message(&mut quorum, &mut inboxes, &mut rng) else {
                continue;
            };
            let id = quorum[index].id();
            match quorum[index].process_message(&mut rng, &message) {
                Err(err) => return Ok((Err(err), public_key)),
                Ok(outcome) => match outcome {
                    ProcessOutcome::Incomplete => {}
                    ProcessOutcome::Processed(messages) => {
                        let messages = maybe_corrupt(messages, corrupt_id);
                        deliver_all(&messages, &mut inboxes)
                    }
                    ProcessOutcome::Terminated(output) => {
                        assert!(signatures.insert(id, output).is_none())
                    }
                    ProcessOutcome::TerminatedForThisParticipant(output, messages) => {
                        let messages = maybe_corrupt(messages, corrupt_id);
                        deliver_all(&messages, &mut inboxes);
                        assert!(signatures.insert(id, output).is_none());
                    }
                },
            }
        }

        let ordered = quorum
            .iter()
            .map(|p| signatures.remove(&p.id()).unwrap())
            .collect();
        Ok((Ok(ordered), public_key))
    }

    fn pick_message<R: RngCore + CryptoRng>(
        quorum: &mut [TestSignParticipant],
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

    /// Corrupt one byte of the designated signer's round 1 traffic.
    fn maybe_corrupt(
        mut messages: Vec<Message>,
        corrupt_id: Option<ParticipantIdentifier>,
    ) -> Vec<Message> {
        let Some(corrupt_id) = corrupt_id else {
            return messages;
        };
        for message in messages.iter_mut() {
            let is_round_one = matches!(
                message.message_type(),
                MessageType::Sign(SignMessageType::R1Commit)
                    | MessageType::Sign(SignMessageType::R1MtaInit)
            );
            if message.from() == corrupt_id && is_round_one {
                // Flip a byte of the commitment hash, or of the tail of the
                // range proof; both stay within well-formed encodings.
                let index = match message.message_type() {
                    MessageType::Sign(SignMessageType::R1Commit) => 0,
                    _ => message.unverified_bytes.len() - 1,
                };
                message.unverified_bytes[index] ^= 1;
            }
        }
        messages
    }

    #[test]
    fn signing_produces_a_verifiable_signature() -> Result<()> {
        let message = b"hello";
        let (result, public_key) = run_signing(1, 3, 2, message, None)?;
        let signatures = result.unwrap();

        // Everyone agrees on the signature.
        assert!(signatures
            .windows(2)
            .all(|pair| pair[0].signature() == pair[1].signature()));

        let signature = &signatures[0];
        let digest: [u8; 32] = Sha256::digest(message).into();
        assert_eq!(signature.message_digest(), &digest);

        // The signature verifies under the aggregate public key.
        use k256::ecdsa::signature::hazmat::PrehashVerifier;
        assert!(public_key
            .verify_prehash(&digest, &signature.signature().0)
            .is_ok());

        // The recovery byte identifies the public key.
        let recovery = RecoveryId::from_byte(signature.recovery_id()).unwrap();
        let recovered =
            VerifyingKey::recover_from_prehash(&digest, &signature.signature().0, recovery)
                .unwrap();
        assert_eq!(recovered, public_key);
        Ok(())
    }

    #[test]
    fn full_quorum_can_sign_a_keccak_digest() -> Result<()> {
        // An Ethereum-style prehash works the same way.
        let digest: [u8; 32] = Keccak256::digest(b"all hands").into();
        let (result, public_key) = run_signing_with_digest(1, 3, 3, digest, None)?;
        let signatures = result.unwrap();
        assert_eq!(signatures.len(), 3);

        use k256::ecdsa::signature::hazmat::PrehashVerifier;
        assert!(public_key
            .verify_prehash(&digest, &signatures[0].signature().0)
            .is_ok());
        Ok(())
    }

    #[test]
    fn corrupted_round_one_traffic_names_the_culprit() -> Result<()> {
        // With two signers, index 1 corrupts its round 1 messages; the
        // honest signer must abort naming it, and no signature may be
        // produced.
        let (result, _) = run_signing(1, 3, 2, b"hello", Some(1))?;
        let err = result.expect_err("signing must abort");
        match err {
            InternalError::ProtocolError(fault) => {
                assert!(matches!(
                    fault,
                    ProtocolFault::RangeProofInvalid(_) | ProtocolFault::ShareInconsistent(_)
                ));
                assert_eq!(fault.culprits().len(), 1);
            }
            other => panic!("expected a protocol fault, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn too_few_signers_are_rejected() -> Result<()> {
        let mut rng = init_testing();
        let keygen_sid = Identifier::random(&mut rng);
        // threshold 2 requires at least 3 signers.
        let outputs = run_keygen(keygen_sid, 2, 4, &mut rng)?;

        let digest: [u8; 32] = Sha256::digest(b"too few").into();
        let sign_sid = Identifier::random(&mut rng);
        let (first_pid, first_output) = &outputs[0];
        let (second_pid, _) = &outputs[1];

        let result = TestSignParticipant::new(
            sign_sid,
            *first_pid,
            vec![*second_pid],
            Input::new(digest, first_output.clone()),
        );
        assert!(result.is_err());
        Ok(())
    }
}
