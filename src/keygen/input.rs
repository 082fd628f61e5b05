// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    errors::{CallerError, Result},
    keygen::keyshare::PreParams,
    protocol::ParticipantConfig,
};
use tracing::{error, warn};

/// Input for the key generation protocol.
#[derive(Debug, Clone)]
pub struct Input {
    threshold: usize,
    pre_params: PreParams,
    ignore_h1h2_dupes: bool,
}

impl Input {
    /// Create a new input with signing threshold `threshold` (any
    /// `threshold + 1` shareholders can later sign) and pre-generated
    /// Paillier and ring-Pedersen material.
    pub fn new(threshold: usize, pre_params: PreParams) -> Self {
        Self {
            threshold,
            pre_params,
            ignore_h1h2_dupes: false,
        }
    }

    /// Skip the duplicate ring-Pedersen generator checks during keygen.
    ///
    /// This exists so benchmark setups can reuse pre-parameters across
    /// parties. Shares produced with the check disabled must never be used
    /// in production.
    pub fn unsafe_ignore_h1h2_dupes(mut self) -> Self {
        warn!(
            "duplicate ring-Pedersen generator checks are DISABLED; \
             do not use the resulting shares in production"
        );
        self.ignore_h1h2_dupes = true;
        self
    }

    pub(crate) fn threshold(&self) -> usize {
        self.threshold
    }

    pub(crate) fn pre_params(&self) -> &PreParams {
        &self.pre_params
    }

    pub(crate) fn ignores_h1h2_dupes(&self) -> bool {
        self.ignore_h1h2_dupes
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
