use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{AppError, Result};
use crate::sports::SportModule;

/// Process-wide map of enabled sports. Registration happens once at startup;
/// all later access is read-only and concurrent.
pub struct SportRegistry {
    sports: RwLock<HashMap<&'static str, Arc<SportModule>>>,
}

impl SportRegistry {
    pub fn new() -> Self {
        Self { sports: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, module: SportModule) -> Result<()> {
        let mut sports = self.sports.write().unwrap_or_else(|e| e.into_inner());
        if sports.contains_key(module.sport_key) {
            return Err(AppError::DuplicateSport(module.sport_key.to_string()));
        }
        sports.insert(module.sport_key, Arc::new(module));
        Ok(())
    }

    pub fn get(&self, sport_key: &str) -> Option<Arc<SportModule>> {
        let sports = self.sports.read().unwrap_or_else(|e| e.into_inner());
        sports.get(sport_key).cloned()
    }

    pub fn all(&self) -> Vec<Arc<SportModule>> {
        let sports = self.sports.read().unwrap_or_else(|e| e.into_inner());
        sports.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let sports = self.sports.read().unwrap_or_else(|e| e.into_inner());
        sports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sports::{basketball_nba, football_nfl};

    #[test]
    fn register_and_lookup() {
        let registry = SportRegistry::new();
        registry.register(basketball_nba::module()).unwrap();
        registry.register(football_nfl::module()).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("basketball_nba").is_some());
        assert!(registry.get("hockey_nhl").is_none());
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = SportRegistry::new();
        registry.register(basketball_nba::module()).unwrap();

        let err = registry.register(basketball_nba::module()).unwrap_err();
        assert!(matches!(err, AppError::DuplicateSport(key) if key == "basketball_nba"));
        assert_eq!(registry.len(), 1);
    }
}
