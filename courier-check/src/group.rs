//! Running a set of checks as one.
//!
//! Every stage call fans out to all children at once under a fresh child of
//! the caller's cancellation token. The first child error to complete wins:
//! the scope is cancelled so the remaining children can stop early, the group
//! still waits for all of them, and then returns that one error unchanged.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use courier_common::{MessageBody, MsgMetadata, SharedHeader, internal};
use futures_util::{StreamExt, stream::FuturesUnordered};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    Check, CheckConfig, CheckError, CheckRegistry, CheckResult, CheckState, RegistryError, Stage,
};

/// An ordered collection of checks presented as a single [`Check`].
#[derive(Debug, Clone, Default)]
pub struct CheckGroup {
    checks: Vec<Arc<dyn Check>>,
}

impl CheckGroup {
    #[must_use]
    pub const fn new(checks: Vec<Arc<dyn Check>>) -> Self {
        Self { checks }
    }

    /// Build every configured check through the registry, keeping order.
    ///
    /// # Errors
    /// If a name is not registered or a factory rejects its arguments
    pub fn from_config(
        registry: &CheckRegistry,
        configs: &[CheckConfig],
    ) -> Result<Self, RegistryError> {
        configs
            .iter()
            .map(|config| registry.build(config))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Initialise one state per child, in order.
    ///
    /// If a child fails, the states already created for earlier children are
    /// closed before the error is returned, so a failed initialisation leaves
    /// nothing behind for the caller to clean up.
    ///
    /// # Errors
    /// The first child initialisation error, unchanged
    pub async fn start(&self, meta: &Arc<MsgMetadata>) -> Result<CheckGroupState, CheckError> {
        let mut states = Vec::with_capacity(self.checks.len());

        for check in &self.checks {
            match check.new_message(meta).await {
                Ok(state) => states.push(state),
                Err(err) => {
                    warn!(
                        message_id = %meta.id,
                        check = check.name(),
                        error = %err,
                        "Check initialisation failed, releasing {} earlier state(s)",
                        states.len()
                    );
                    close_all(&meta.id, &mut states).await;
                    return Err(err);
                }
            }
        }

        internal!(message_id = %meta.id, checks = states.len(), "Check group initialised");

        Ok(CheckGroupState {
            meta: Arc::clone(meta),
            states,
        })
    }
}

#[async_trait]
impl Check for CheckGroup {
    fn name(&self) -> &str {
        "check_group"
    }

    async fn new_message(
        &self,
        meta: &Arc<MsgMetadata>,
    ) -> Result<Box<dyn CheckState>, CheckError> {
        Ok(Box::new(self.start(meta).await?))
    }
}

/// Per-message state of a [`CheckGroup`]: one child state per check.
///
/// Stages may be skipped by the caller, but [`CheckState::close`] must be the
/// last call made on it.
pub struct CheckGroupState {
    meta: Arc<MsgMetadata>,
    states: Vec<Box<dyn CheckState>>,
}

impl CheckGroupState {
    async fn fan_out<'s, F, Fut>(
        &'s self,
        parent: &CancellationToken,
        stage: Stage,
        call: F,
    ) -> CheckResult
    where
        F: Fn(&'s dyn CheckState, CancellationToken) -> Fut,
        Fut: Future<Output = CheckResult>,
    {
        let scope = parent.child_token();

        let mut pending = self
            .states
            .iter()
            .map(|state| call(state.as_ref(), scope.clone()))
            .collect::<FuturesUnordered<_>>();

        let mut first_error = None;
        while let Some(result) = pending.next().await {
            let Err(err) = result else { continue };

            if first_error.is_none() {
                debug!(
                    message_id = %self.meta.id,
                    %stage,
                    error = %err,
                    "Check failed, cancelling sibling checks"
                );
                scope.cancel();
                first_error = Some(err);
            } else {
                internal!(
                    message_id = %self.meta.id,
                    %stage,
                    error = %err,
                    "Suppressing subsequent check error"
                );
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl CheckState for CheckGroupState {
    async fn check_connection(&self, cancel: &CancellationToken) -> CheckResult {
        self.fan_out(cancel, Stage::Connection, move |state, scope| async move {
            state.check_connection(&scope).await
        })
        .await
    }

    async fn check_sender(&self, cancel: &CancellationToken, from: &str) -> CheckResult {
        self.fan_out(cancel, Stage::Sender, move |state, scope| async move {
            state.check_sender(&scope, from).await
        })
        .await
    }

    async fn check_rcpt(&self, cancel: &CancellationToken, to: &str) -> CheckResult {
        self.fan_out(cancel, Stage::Rcpt, move |state, scope| async move {
            state.check_rcpt(&scope, to).await
        })
        .await
    }

    async fn check_body(
        &self,
        cancel: &CancellationToken,
        header: &SharedHeader,
        body: &MessageBody,
    ) -> CheckResult {
        self.fan_out(cancel, Stage::Body, move |state, scope| async move {
            state.check_body(&scope, header, body).await
        })
        .await
    }

    /// Close every child, best effort.
    ///
    /// Child close errors are logged and dropped; this always succeeds.
    async fn close(&mut self) -> CheckResult {
        close_all(&self.meta.id, &mut self.states).await;
        Ok(())
    }
}

impl Drop for CheckGroupState {
    fn drop(&mut self) {
        if !self.states.is_empty() {
            warn!(
                message_id = %self.meta.id,
                states = self.states.len(),
                "Check group state dropped without being closed"
            );
        }
    }
}

async fn close_all(message_id: &str, states: &mut Vec<Box<dyn CheckState>>) {
    for mut state in states.drain(..) {
        if let Err(err) = state.close().await {
            warn!(message_id, error = %err, "Failed to close check state");
        }
    }
}
