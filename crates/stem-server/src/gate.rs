//! Authentication gate.
//!
//! Every inbound frame re-resolves the connection's credentials before it is
//! handled. A failure, or a token that now belongs to someone else, closes
//! the connection with [`CLOSE_UNAUTHORIZED`] and the frame is discarded.

use stem_auth::{AuthError, Credentials, IdentityProvider};
use stem_core::UserId;

/// WebSocket close code sent when the gate rejects a connection.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// Why the gate refused a frame.
#[derive(Debug, thiserror::Error)]
pub enum GateRejection {
    /// Credentials no longer resolve.
    #[error("credentials no longer valid: {0}")]
    Auth(#[from] AuthError),

    /// Credentials resolve to a different user than at connect time.
    #[error("credentials now resolve to {actual}, connection is bound to {bound}")]
    UserChanged {
        /// User bound at connect time.
        bound: UserId,
        /// User the credentials resolve to now.
        actual: UserId,
    },
}

/// Re-check `credentials` against the user the connection is bound to.
pub async fn check(
    provider: &dyn IdentityProvider,
    credentials: &Credentials,
    bound: &UserId,
) -> Result<(), GateRejection> {
    let identity = provider.resolve(credentials).await?;
    if identity.user_id != *bound {
        return Err(GateRejection::UserChanged {
            bound: bound.clone(),
            actual: identity.user_id,
        });
    }
    Ok(())
}

/// Connection auth state. There is no way out of `Closed`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgraded, snapshot not yet delivered.
    #[default]
    Pending,
    /// Frames are accepted (subject to the gate).
    Authenticated,
    /// No further frames are handled.
    Closed,
}

impl ConnectionState {
    /// `Pending → Authenticated`. Returns whether the transition happened.
    pub fn authenticate(&mut self) -> bool {
        if *self == Self::Pending {
            *self = Self::Authenticated;
            true
        } else {
            false
        }
    }

    /// Any state → `Closed`.
    pub fn close(&mut self) {
        *self = Self::Closed;
    }

    /// Whether frames may still be handled.
    pub fn is_authenticated(self) -> bool {
        self == Self::Authenticated
    }
}
