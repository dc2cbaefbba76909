use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::User;
use crate::error::ChatError;

/// Identity/profile collaborator. Lookups never block message persistence.
pub trait UserDirectory: Send + Sync {
    /// Cache-only lookup.
    fn lookup_user(&self, id: &str) -> Option<User>;

    fn cache_user_if_absent(&self, id: &str) -> Result<(), ChatError>;

    fn find_users(&self, ids: &[String]) -> Result<Vec<User>, ChatError>;

    fn all_users(&self) -> Result<Vec<User>, ChatError>;

    fn register_users(&self, users: &[User]);
}

/// Where profiles come from when the cache misses.
pub trait ProfileSource: Send + Sync {
    fn fetch_users(&self, ids: &[String]) -> Result<Vec<User>, ChatError>;

    fn fetch_all(&self) -> Result<Vec<User>, ChatError>;
}

/// Fixed profile list, typically the `users` section of the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticProfiles {
    users: Vec<User>,
}

impl StaticProfiles {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }
}

impl ProfileSource for StaticProfiles {
    fn fetch_users(&self, ids: &[String]) -> Result<Vec<User>, ChatError> {
        Ok(self
            .users
            .iter()
            .filter(|user| ids.contains(&user.id))
            .cloned()
            .collect())
    }

    fn fetch_all(&self) -> Result<Vec<User>, ChatError> {
        Ok(self.users.clone())
    }
}

/// Read-through cache in front of a [`ProfileSource`].
pub struct UserCache<S> {
    source: S,
    cache: RwLock<HashMap<String, User>>,
}

impl<S: ProfileSource> UserCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, User>> {
        self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, User>> {
        self.cache.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: ProfileSource> UserDirectory for UserCache<S> {
    fn lookup_user(&self, id: &str) -> Option<User> {
        self.read().get(id).cloned()
    }

    fn cache_user_if_absent(&self, id: &str) -> Result<(), ChatError> {
        if self.read().contains_key(id) {
            return Ok(());
        }
        let fetched = self.source.fetch_users(&[id.to_string()])?;
        if fetched.is_empty() {
            return Err(ChatError::DirectoryLookup(format!("unknown user {id}")));
        }
        self.register_users(&fetched);
        Ok(())
    }

    fn find_users(&self, ids: &[String]) -> Result<Vec<User>, ChatError> {
        let missing: Vec<String> = {
            let cache = self.read();
            ids.iter()
                .filter(|id| !cache.contains_key(*id))
                .cloned()
                .collect()
        };
        if !missing.is_empty() {
            let fetched = self.source.fetch_users(&missing)?;
            self.register_users(&fetched);
        }
        let cache = self.read();
        Ok(ids.iter().filter_map(|id| cache.get(id).cloned()).collect())
    }

    fn all_users(&self) -> Result<Vec<User>, ChatError> {
        let users = self.source.fetch_all()?;
        self.register_users(&users);
        Ok(users)
    }

    fn register_users(&self, users: &[User]) {
        let mut cache = self.write();
        for user in users {
            cache.insert(user.id.clone(), user.clone());
        }
    }
}
