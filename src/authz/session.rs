use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::{AccessError, AccessResult};
use crate::models::resource::{Resource, ResourceId};

/// Identity attached to an [`AccessControlContext`](super::AccessControlContext).
///
/// The authenticated resource is who logged in; the session resource is who
/// the session currently acts as. They differ only while impersonating.
#[derive(Debug, Clone, Default, Serialize)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated {
        authenticated: Resource,
        session: Resource,
        authenticated_at: DateTime<Utc>,
    },
}

impl SessionState {
    pub fn authenticated(resource: Resource) -> Self {
        SessionState::Authenticated {
            session: resource.clone(),
            authenticated: resource,
            authenticated_at: Utc::now(),
        }
    }

    /// Same login, acting as `target`.
    pub fn impersonating(&self, target: Resource) -> AccessResult<Self> {
        match self {
            SessionState::Unauthenticated => Err(not_authenticated()),
            SessionState::Authenticated {
                authenticated,
                authenticated_at,
                ..
            } => Ok(SessionState::Authenticated {
                authenticated: authenticated.clone(),
                session: target,
                authenticated_at: *authenticated_at,
            }),
        }
    }

    /// Drop any impersonation; a no-op when not impersonating.
    pub fn unimpersonated(&self) -> Self {
        match self {
            SessionState::Unauthenticated => SessionState::Unauthenticated,
            SessionState::Authenticated {
                authenticated,
                authenticated_at,
                ..
            } => SessionState::Authenticated {
                authenticated: authenticated.clone(),
                session: authenticated.clone(),
                authenticated_at: *authenticated_at,
            },
        }
    }

    pub fn session_resource(&self) -> AccessResult<&Resource> {
        match self {
            SessionState::Unauthenticated => Err(not_authenticated()),
            SessionState::Authenticated { session, .. } => Ok(session),
        }
    }

    pub fn authenticated_resource(&self) -> AccessResult<&Resource> {
        match self {
            SessionState::Unauthenticated => Err(not_authenticated()),
            SessionState::Authenticated { authenticated, .. } => Ok(authenticated),
        }
    }

    pub fn session_id(&self) -> AccessResult<ResourceId> {
        self.session_resource()?
            .id()
            .ok_or_else(|| AccessError::internal("session resource without id"))
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }

    pub fn is_impersonating(&self) -> bool {
        match self {
            SessionState::Unauthenticated => false,
            SessionState::Authenticated {
                authenticated,
                session,
                ..
            } => authenticated != session,
        }
    }
}

fn not_authenticated() -> AccessError {
    AccessError::not_authenticated("session not authenticated")
}
