//! Knowledge base registry.

use lore_core::{AccessMode, Error, KnowledgeBase, KnowledgeBaseState, Result};
use lore_db::Database;
use tracing::info;

const MAX_NAME_LEN: usize = 64;

/// Named knowledge bases with their access policies and lifecycle.
#[derive(Clone)]
pub struct KnowledgeBaseRegistry {
    db: Database,
}

impl KnowledgeBaseRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create an empty knowledge base owned by `owner`.
    pub fn create(&self, name: &str, owner: &str) -> Result<KnowledgeBase> {
        let name = name.trim();
        validate_name(name)?;
        if owner.trim().is_empty() {
            return Err(Error::InvalidInput("owner must not be empty".to_string()));
        }

        let kb = KnowledgeBase::new(name, owner);
        self.db.create_knowledge_base(&kb)?;
        info!("Created knowledge base '{}' ({}) for {}", kb.name, kb.id, owner);
        Ok(kb)
    }

    /// Look a knowledge base up by ID or name. Deleted bases are not found.
    pub fn resolve(&self, name_or_id: &str) -> Result<KnowledgeBase> {
        let kb = match self.db.find_knowledge_base(name_or_id)? {
            Some(kb) => kb,
            None => self.db.get_knowledge_base(name_or_id)?,
        };
        if kb.state == KnowledgeBaseState::Deleted {
            return Err(Error::NotFound(format!("Knowledge base not found: {}", name_or_id)));
        }
        Ok(kb)
    }

    /// All live knowledge bases, ordered by name.
    pub fn list(&self) -> Result<Vec<KnowledgeBase>> {
        Ok(self.db.list_knowledge_bases()?)
    }

    pub fn grant(&self, id: &str, principal: &str, mode: AccessMode) -> Result<()> {
        if principal.trim().is_empty() {
            return Err(Error::InvalidInput("principal must not be empty".to_string()));
        }
        self.db.upsert_grant(id, principal, mode)?;
        Ok(())
    }

    /// Remove a principal's grant. Returns whether one existed.
    pub fn revoke(&self, id: &str, principal: &str) -> Result<bool> {
        Ok(self.db.delete_grant(id, principal)?)
    }

    pub fn set_public(&self, id: &str, public: bool) -> Result<()> {
        self.db.set_knowledge_base_public(id, public)?;
        Ok(())
    }

    /// Move a knowledge base to `next`, validating the transition.
    ///
    /// The write only applies if the state is still the one validated, so of
    /// two concurrent callers at most one wins.
    pub fn transition(&self, id: &str, next: KnowledgeBaseState) -> Result<KnowledgeBaseState> {
        let current = self.db.get_knowledge_base(id)?.state;
        let next = current.transition(next)?;
        if !self.db.compare_and_set_knowledge_base_state(id, current, next)? {
            let now = self.db.get_knowledge_base(id)?.state;
            return Err(Error::InvalidState(format!(
                "knowledge base {} moved from {} to {} concurrently",
                id, current, now
            )));
        }
        Ok(current)
    }

    /// Put a knowledge base back into the state it had before a pass began.
    ///
    /// A base deleted in the meantime stays deleted.
    pub fn restore(&self, id: &str, prior: KnowledgeBaseState) -> Result<()> {
        self.db
            .compare_and_set_knowledge_base_state(id, KnowledgeBaseState::Syncing, prior)?;
        Ok(())
    }

    /// Remove a knowledge base and everything it owns.
    pub fn purge(&self, id: &str) -> Result<()> {
        self.db.purge_knowledge_base(id)?;
        Ok(())
    }
}

/// Names are 1 to 64 characters of letters, digits, space, `-`, `_` and `.`.
pub fn validate_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "knowledge base name must be 1 to {} characters",
            MAX_NAME_LEN
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.')))
    {
        return Err(Error::InvalidInput(format!(
            "knowledge base name contains '{}'",
            c
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> KnowledgeBaseRegistry {
        KnowledgeBaseRegistry::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_create_and_resolve() {
        let registry = registry();
        let kb = registry.create("  Team Handbook ", "alice").unwrap();
        assert_eq!(kb.name, "Team Handbook");
        assert_eq!(kb.state, KnowledgeBaseState::Empty);

        assert_eq!(registry.resolve("Team Handbook").unwrap().id, kb.id);
        assert_eq!(registry.resolve(&kb.id).unwrap().name, "Team Handbook");
        assert!(matches!(registry.resolve("other"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let registry = registry();
        registry.create("docs", "alice").unwrap();
        assert!(matches!(
            registry.create("docs", "bob"),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("Отдел продаж 2024").is_ok());
        assert!(validate_name("v1.2_notes-final").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_grants() {
        let registry = registry();
        let kb = registry.create("docs", "alice").unwrap();
        registry.grant(&kb.id, "bob", AccessMode::Read).unwrap();
        assert!(registry.resolve("docs").unwrap().policy.can_read("bob"));
        assert!(registry.revoke(&kb.id, "bob").unwrap());
        assert!(!registry.revoke(&kb.id, "bob").unwrap());
        assert!(!registry.resolve("docs").unwrap().policy.can_read("bob"));
    }

    #[test]
    fn test_state_machine() {
        let registry = registry();
        let kb = registry.create("docs", "alice").unwrap();
        assert_eq!(
            registry.transition(&kb.id, KnowledgeBaseState::Syncing).unwrap(),
            KnowledgeBaseState::Empty
        );
        assert!(registry.transition(&kb.id, KnowledgeBaseState::Syncing).is_err());
        registry.restore(&kb.id, KnowledgeBaseState::Empty).unwrap();
        assert_eq!(registry.resolve("docs").unwrap().state, KnowledgeBaseState::Empty);

        registry.transition(&kb.id, KnowledgeBaseState::Deleted).unwrap();
        assert!(matches!(registry.resolve("docs"), Err(Error::NotFound(_))));
        assert!(registry.transition(&kb.id, KnowledgeBaseState::Syncing).is_err());
        registry.restore(&kb.id, KnowledgeBaseState::Ready).unwrap();
        assert!(registry.resolve(&kb.id).is_err());
    }

    #[test]
    fn test_concurrent_transitions_have_one_winner() {
        let registry = registry();
        let kb = registry.create("docs", "alice").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let id = kb.id.clone();
                std::thread::spawn(move || registry.transition(&id, KnowledgeBaseState::Syncing))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, Error::InvalidState(_))));
        assert_eq!(registry.resolve("docs").unwrap().state, KnowledgeBaseState::Syncing);
    }

    #[test]
    fn test_stale_transition_is_refused() {
        let db = Database::open_in_memory().unwrap();
        let registry = KnowledgeBaseRegistry::new(db.clone());
        let kb = registry.create("docs", "alice").unwrap();

        // Another writer deletes the base after this caller read `empty`
        db.set_knowledge_base_state(&kb.id, KnowledgeBaseState::Deleted).unwrap();
        assert!(!db
            .compare_and_set_knowledge_base_state(&kb.id, KnowledgeBaseState::Empty, KnowledgeBaseState::Syncing)
            .unwrap());
        assert!(registry.transition(&kb.id, KnowledgeBaseState::Syncing).is_err());
        assert_eq!(db.get_knowledge_base(&kb.id).unwrap().state, KnowledgeBaseState::Deleted);
    }
}
