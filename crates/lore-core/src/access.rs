//! Access policy and lifecycle state of knowledge bases.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What a grant allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    /// Sync implies read.
    Sync,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::Sync => "sync",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "read" => Some(AccessMode::Read),
            "sync" => Some(AccessMode::Sync),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub principal: String,
    pub mode: AccessMode,
}

/// Who may read or sync a knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub owner: String,
    pub grants: Vec<Grant>,
    pub public: bool,
}

impl AccessPolicy {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            grants: Vec::new(),
            public: false,
        }
    }

    pub fn is_owner(&self, principal: &str) -> bool {
        self.owner == principal
    }

    pub fn mode_for(&self, principal: &str) -> Option<AccessMode> {
        self.grants
            .iter()
            .find(|g| g.principal == principal)
            .map(|g| g.mode)
    }

    pub fn can_read(&self, principal: &str) -> bool {
        self.public || self.is_owner(principal) || self.mode_for(principal).is_some()
    }

    pub fn can_sync(&self, principal: &str) -> bool {
        self.is_owner(principal) || self.mode_for(principal) == Some(AccessMode::Sync)
    }

    /// Add or replace the grant for a principal.
    pub fn grant(&mut self, principal: impl Into<String>, mode: AccessMode) {
        let principal = principal.into();
        match self.grants.iter_mut().find(|g| g.principal == principal) {
            Some(existing) => existing.mode = mode,
            None => self.grants.push(Grant { principal, mode }),
        }
    }

    /// Remove a principal's grant. Returns whether one existed.
    pub fn revoke(&mut self, principal: &str) -> bool {
        let before = self.grants.len();
        self.grants.retain(|g| g.principal != principal);
        before != self.grants.len()
    }
}

/// Lifecycle of a knowledge base.
///
/// `Empty -> Syncing -> Ready -> Syncing -> ...`, with `Deleted` reachable from
/// any state and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeBaseState {
    Empty,
    Syncing,
    Ready,
    Deleted,
}

impl KnowledgeBaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeBaseState::Empty => "empty",
            KnowledgeBaseState::Syncing => "syncing",
            KnowledgeBaseState::Ready => "ready",
            KnowledgeBaseState::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "empty" => Some(KnowledgeBaseState::Empty),
            "syncing" => Some(KnowledgeBaseState::Syncing),
            "ready" => Some(KnowledgeBaseState::Ready),
            "deleted" => Some(KnowledgeBaseState::Deleted),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: KnowledgeBaseState) -> bool {
        use KnowledgeBaseState::*;
        matches!(
            (self, next),
            (Empty, Syncing)
                | (Ready, Syncing)
                | (Syncing, Ready)
                | (Syncing, Empty)
                | (Empty, Deleted)
                | (Syncing, Deleted)
                | (Ready, Deleted)
        )
    }

    /// Validate and return the next state.
    pub fn transition(&self, next: KnowledgeBaseState) -> Result<KnowledgeBaseState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidState(format!(
                "cannot move knowledge base from {} to {}",
                self, next
            )))
        }
    }
}

impl std::fmt::Display for KnowledgeBaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_can_read_and_sync() {
        let policy = AccessPolicy::new("alice");
        assert!(policy.can_read("alice"));
        assert!(policy.can_sync("alice"));
        assert!(!policy.can_read("bob"));
        assert!(!policy.can_sync("bob"));
    }

    #[test]
    fn test_grants() {
        let mut policy = AccessPolicy::new("alice");
        policy.grant("bob", AccessMode::Read);
        assert!(policy.can_read("bob"));
        assert!(!policy.can_sync("bob"));

        policy.grant("bob", AccessMode::Sync);
        assert_eq!(policy.grants.len(), 1);
        assert!(policy.can_sync("bob"));

        assert!(policy.revoke("bob"));
        assert!(!policy.revoke("bob"));
        assert!(!policy.can_read("bob"));
    }

    #[test]
    fn test_public_allows_read_only() {
        let mut policy = AccessPolicy::new("alice");
        policy.public = true;
        assert!(policy.can_read("anyone"));
        assert!(!policy.can_sync("anyone"));
    }

    #[test]
    fn test_state_machine() {
        use KnowledgeBaseState::*;
        assert_eq!(Empty.transition(Syncing).unwrap(), Syncing);
        assert_eq!(Syncing.transition(Ready).unwrap(), Ready);
        assert_eq!(Ready.transition(Syncing).unwrap(), Syncing);
        assert!(Ready.transition(Deleted).is_ok());

        assert!(Empty.transition(Ready).is_err());
        assert!(Deleted.transition(Syncing).is_err());
        assert!(Deleted.transition(Ready).is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(AccessMode::from_str("READ"), Some(AccessMode::Read));
        assert_eq!(AccessMode::from_str("sync"), Some(AccessMode::Sync));
        assert_eq!(AccessMode::from_str("admin"), None);
    }
}
