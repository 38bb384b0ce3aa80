// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::message::AckToken;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct AckState {
    tokens: Vec<AckToken>,
    seen: HashSet<AckToken>,
}

/// Tokens of the messages a batch delivered successfully. Shared by all
/// workers of one batch and read once they have all finished.
#[derive(Debug, Default)]
pub struct AckBatch {
    state: Mutex<AckState>,
}

#[allow(clippy::expect_used)]
impl AckBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a delivered message. Returns false if the token was already
    /// recorded.
    pub fn record(&self, token: AckToken) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        if !state.seen.insert(token.clone()) {
            return false;
        }
        state.tokens.push(token);
        true
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("lock poisoned").tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves every recorded token into a new batch, leaving this one empty.
    pub fn take(&self) -> AckBatch {
        let state = std::mem::take(&mut *self.state.lock().expect("lock poisoned"));
        AckBatch {
            state: Mutex::new(state),
        }
    }

    /// Tokens in the order they were recorded.
    pub fn into_tokens(self) -> Vec<AckToken> {
        self.state.into_inner().expect("lock poisoned").tokens
    }
}
