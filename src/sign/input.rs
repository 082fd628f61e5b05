// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::CurveTrait,
    errors::{CallerError, Result},
    keygen,
    protocol::ParticipantConfig,
};
use tracing::error;

/// Input for the threshold signing protocol.
///
/// The participants of the signing run form the quorum; there must be at
/// least `threshold + 1` of them and every one must be a shareholder of the
/// key.
#[derive(Debug)]
pub struct Input<C: CurveTrait> {
    digest: [u8; 32],
    key_share: keygen::Output<C>,
}

impl<C: CurveTrait> Input<C> {
    /// Construct a new signing input from the 32-byte digest of the message
    /// to sign and this party's saved key material.
    pub fn new(digest: [u8; 32], key_share: keygen::Output<C>) -> Self {
        Self { digest, key_share }
    }

    /// The digest to sign.
    pub(crate) fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    pub(crate) fn key_share(&self) -> &keygen::Output<C> {
        &self.key_share
    }

    pub(crate) fn check_participant_config(&self, config: &ParticipantConfig) -> Result<()> {
        if config.count() < self.key_share.threshold() + 1 {
            error!(
                "signing requires at least {} participants, got {}",
                self.key_share.threshold() + 1,
                config.count()
            );
            Err(CallerError::BadInput)?;
        }
        let shareholders = self.key_share.participants();
        for pid in config.all_participants() {
            if !shareholders.contains(&pid) {
                error!("{pid} is not a shareholder of this key");
                Err(CallerError::BadInput)?;
            }
        }
        Ok(())
    }
}
