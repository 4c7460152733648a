use std::collections::HashMap;
use std::sync::RwLock;

/// Source of bearer credentials. Lookups are expected to be local and fast;
/// the pipeline calls this right before every request.
pub trait TokenProvider: Send + Sync {
    fn get_token(&self, key: &str) -> Option<String>;
}

/// In-memory token store that can be rotated while uploads are running
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(key: &str, token: &str) -> Self {
        let store = Self::new();
        store.set_token(key, token);
        store
    }

    pub fn set_token(&self, key: &str, token: &str) {
        match self.tokens.write() {
            Ok(mut tokens) => {
                tokens.insert(key.to_string(), token.to_string());
            }
            Err(e) => log::warn!("Failed to store token for {} (non-critical): {}", key, e),
        }
    }

    pub fn remove_token(&self, key: &str) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.remove(key);
        }
    }
}

impl TokenProvider for MemoryTokenStore {
    fn get_token(&self, key: &str) -> Option<String> {
        match self.tokens.read() {
            Ok(tokens) => tokens.get(key).cloned(),
            Err(e) => {
                log::warn!("Failed to read token store (non-critical): {}", e);
                None
            }
        }
    }
}

/// Reads tokens from environment variables, e.g. key `auth_token` → `AUTH_TOKEN`
#[derive(Debug, Default, Clone)]
pub struct EnvTokenProvider {
    prefix: Option<String>,
}

impl EnvTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: Some(prefix.to_string()),
        }
    }

    pub fn variable_name(&self, key: &str) -> String {
        let name = key.to_ascii_uppercase().replace(['-', '.'], "_");
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix.to_ascii_uppercase(), name),
            None => name,
        }
    }
}

impl TokenProvider for EnvTokenProvider {
    fn get_token(&self, key: &str) -> Option<String> {
        std::env::var(self.variable_name(key))
            .ok()
            .filter(|token| !token.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_rotation() {
        let store = MemoryTokenStore::with_token("auth_token", "first");
        assert_eq!(store.get_token("auth_token").as_deref(), Some("first"));

        store.set_token("auth_token", "second");
        assert_eq!(store.get_token("auth_token").as_deref(), Some("second"));

        store.remove_token("auth_token");
        assert!(store.get_token("auth_token").is_none());
    }

    #[test]
    fn test_env_variable_name() {
        assert_eq!(EnvTokenProvider::new().variable_name("auth_token"), "AUTH_TOKEN");
        assert_eq!(
            EnvTokenProvider::with_prefix("media").variable_name("auth-token"),
            "MEDIA_AUTH_TOKEN"
        );
    }
}
