//! Current-user identity.
//!
//! Units that need a signed-in user read it through [`IdentityProvider`];
//! when nobody is signed in they degrade to disabled instead of failing.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of the signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Seller,
    Expert,
    Admin,
}

/// The signed-in user as seen by the cache layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub role: Role,
}

impl CurrentUser {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self {
            id,
            email: None,
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Read-only view of the session.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<CurrentUser>;

    /// Convenience for the common `enabled: !!user.id` gate.
    fn current_user_id(&self) -> Option<Uuid> {
        self.current_user().map(|u| u.id)
    }
}

/// In-process session holder, updated on sign in and sign out.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    user: RwLock<Option<CurrentUser>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user: CurrentUser) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn sign_in(&self, user: CurrentUser) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_user(&self) -> Option<CurrentUser> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
