// src/core/cache.rs

//! Load-once storage for the secret policy.

use crate::core::policy::{PolicyLoadError, SecretPolicy};
use crate::constants::POLICY_FILENAME;
use log::debug;
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

/// A loaded policy and the directory it came from.
#[derive(Debug)]
struct CachedPolicy {
    config_dir: PathBuf,
    policy: Arc<SecretPolicy>,
}

/// Load-once cache for the secret policy, keyed by configuration directory.
///
/// Constructed by the entry point and handed to whoever needs the policy.
/// Asking for a different directory than the cached one drops the old entry
/// and loads the new document.
#[derive(Debug, Default)]
pub struct PolicyCache {
    slot: Mutex<Option<CachedPolicy>>,
}

impl PolicyCache {
    /// An empty cache; the first `load` reads from disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the policy for `config_dir`, loading it on first use.
    ///
    /// # Errors
    /// Any [`PolicyLoadError`]; a failed load leaves the cache empty.
    pub fn load(&self, config_dir: &Path) -> Result<Arc<SecretPolicy>, PolicyLoadError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cached) = slot.as_ref() {
            if cached.config_dir == config_dir {
                debug!("Policy cache hit for '{}'", config_dir.display());
                return Ok(Arc::clone(&cached.policy));
            }
            debug!(
                "Policy cache invalidated: '{}' -> '{}'",
                cached.config_dir.display(),
                config_dir.display()
            );
        }
        *slot = None;

        let policy = Arc::new(SecretPolicy::load(&config_dir.join(POLICY_FILENAME))?);
        *slot = Some(CachedPolicy {
            config_dir: config_dir.to_path_buf(),
            policy: Arc::clone(&policy),
        });
        Ok(policy)
    }
}
