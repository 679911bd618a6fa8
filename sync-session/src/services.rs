//! Services a session controller calls out to.

use std::sync::Arc;

use async_trait::async_trait;
use p2psync_types::{
    AuthorizationDecision, AuthorizationDetails, EndpointId, PeerDevice, PeerIdentity,
    ReceiveHistory,
};

use crate::auth::Authenticator;

/// Business-level acceptance of a peer.
#[async_trait]
pub trait AuthorizationService: Send + Sync {
    /// Details describing this device, sent by the initiator.
    async fn authorization_details(&self) -> AuthorizationDetails;

    /// Decide whether `peer`, which declared `details`, may sync with us.
    async fn authorize(
        &self,
        peer: &PeerDevice,
        details: &AuthorizationDetails,
    ) -> AuthorizationDecision;
}

/// The sync-record layer.
#[async_trait]
pub trait SyncDataHandler: Send + Sync {
    /// What we already received from `peer`. Empty if nothing is known.
    async fn receive_history(&self, peer: &PeerIdentity) -> ReceiveHistory;

    /// Apply record bytes received from `peer`.
    async fn apply_records(&self, peer: &PeerIdentity, bytes: Vec<u8>);

    /// Start sending `peer` the records it does not have yet.
    async fn start_transfer(
        &self,
        endpoint_id: &EndpointId,
        peer: &PeerIdentity,
        history: &ReceiveHistory,
    );
}

/// Asks the operator whether to skip the token step.
#[async_trait]
pub trait SkipPrompt: Send + Sync {
    /// Return true to skip the token step for `endpoint_name`.
    async fn confirm_skip(&self, endpoint_name: &str) -> bool;
}

/// Everything a controller needs besides its transport.
#[derive(Clone)]
pub struct SessionServices {
    /// Role-specific authenticator.
    pub authenticator: Arc<dyn Authenticator>,
    /// Authorization service.
    pub authorization: Arc<dyn AuthorizationService>,
    /// Sync-record layer.
    pub data: Arc<dyn SyncDataHandler>,
    /// Skip-confirmation prompt.
    pub skip_prompt: Arc<dyn SkipPrompt>,
}

impl std::fmt::Debug for SessionServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionServices").finish_non_exhaustive()
    }
}

/// Skip prompt that always declines.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSkip;

#[async_trait]
impl SkipPrompt for NeverSkip {
    async fn confirm_skip(&self, _endpoint_name: &str) -> bool {
        false
    }
}
