//! Who is making a request, resolved by the caller and passed in explicitly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::archive::PersistenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Owner,
    Contractor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Owner => "owner",
            Role::Contractor => "contractor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            "contractor" => Ok(Role::Contractor),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub actor_id: String,
    pub role: Role,
}

impl RequestContext {
    pub fn new(actor_id: impl Into<String>, role: Role) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
        }
    }

    pub fn admin(actor_id: impl Into<String>) -> Self {
        Self::new(actor_id, Role::Admin)
    }

    pub fn can_publish(&self) -> bool {
        self.role == Role::Admin
    }

    /// Fails with a permission-kind error unless the actor may publish reports.
    pub fn require_publisher(&self, operation: &'static str) -> Result<(), PersistenceError> {
        if self.can_publish() {
            Ok(())
        } else {
            Err(PersistenceError::permission(
                operation,
                format!("{} ({}) may not publish reports", self.actor_id, self.role),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FailureKind;

    #[test]
    fn only_admins_publish() {
        assert!(RequestContext::admin("a").require_publisher("save_ledger").is_ok());
        let err = RequestContext::new("o", Role::Owner)
            .require_publisher("save_ledger")
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Permission);
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!(" Admin ".parse::<Role>(), Ok(Role::Admin));
        assert!("root".parse::<Role>().is_err());
    }
}
