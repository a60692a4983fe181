//! Errors surfaced by [`crate::coordinator::FunnelCoordinator::process_turn`].
//!
//! Provider failures, conflicting candidates and budget exhaustion are
//! not errors: they resolve to one of the terminal decision statuses.

use thiserror::Error;

use crate::coordinator::FunnelTransitionError;
use crate::dialog::{ContextError, StoreError, TransitionError};

#[derive(Debug, Error)]
pub enum FunnelError {
    /// Reference data unreachable. The turn was counted but no decision
    /// was made; the caller should ask the user to try again.
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Conversation store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Funnel(#[from] FunnelTransitionError),
}

impl FunnelError {
    /// Whether resubmitting the same turn later may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::CatalogUnavailable(_) | Self::Store(StoreError::VersionConflict { .. })
        )
    }
}
