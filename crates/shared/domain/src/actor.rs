//! Acting identity and roles.

use serde::{Deserialize, Serialize};

use crate::constants::{ROLE_ADMIN, ROLE_USER};
use crate::error::DomainError;

/// Actor roles enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    /// Check if this role has admin privileges
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Check if this role may act on resources owned by someone else
    pub fn is_elevated(&self) -> bool {
        self.is_admin()
    }
}

impl std::str::FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ROLE_ADMIN => Ok(Role::Admin),
            ROLE_USER => Ok(Role::User),
            other => Err(DomainError::validation(format!("unknown role '{}'", other))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "{}", ROLE_ADMIN),
            Role::User => write!(f, "{}", ROLE_USER),
        }
    }
}

/// The identity a request acts as.
///
/// The id is kept as the hex string form of the store identity so the
/// domain crate stays free of driver types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    /// Create an actor with the default role
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
        }
    }

    /// Create an actor with admin privileges
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Admin,
        }
    }

    /// Check if actor has admin role
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}
