use std::sync::Arc;

use tracing::{error, warn};

use super::transport::{ApiRequest, ApiResponse, Transport};
use super::ApiError;
use crate::auth::{SessionState, SessionView};

/// Every privileged call goes through here.
///
/// Before sending, the session is re-validated against the store; with no
/// valid session the call is cancelled and never reaches the transport.
/// Afterwards a 401 forces a logout, whatever the caller does with the error.
#[derive(Clone)]
pub struct RequestGate {
    session: Arc<SessionState>,
    transport: Arc<dyn Transport>,
}

impl RequestGate {
    pub fn new(session: Arc<SessionState>, transport: Arc<dyn Transport>) -> Self {
        Self { session, transport }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Send a privileged call with the current bearer token attached.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        // Heartbeat: an expired token logs out here, before anything is sent.
        self.session.refresh_from_storage();

        let token = match self.session.token() {
            Some(token) if self.session.is_authenticated() => token,
            _ => {
                warn!(path = %request.path, "Request cancelled because the session is no longer valid");
                return Err(ApiError::PreflightCancelled);
            }
        };
        request.bearer = Some(token);

        let path = request.path.clone();
        let response = self.transport.execute(request).await?;

        if response.status == 401 {
            error!(path = %path, "Received 401 Unauthorized, forcing logout");
            self.session.logout();
            return Err(ApiError::Unauthorized);
        }
        Self::check(response)
    }

    /// Send a call that needs no session (login, register). No heartbeat, no
    /// bearer header, and a 401 only means the credentials were wrong.
    pub async fn send_public(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        request.bearer = None;
        let response = self.transport.execute(request).await?;
        if response.status == 401 {
            return Err(ApiError::InvalidCredentials);
        }
        Self::check(response)
    }

    fn check(response: ApiResponse) -> Result<ApiResponse, ApiError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.body))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
