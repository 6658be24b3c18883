//! Yes/no credential gate consulted before a session starts.

use super::{CredentialManager, CredentialRef};
use crate::config::CredentialConfig;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Callback run when the user asks to pick a credential.
pub type SelectionHook = Arc<dyn Fn() + Send + Sync>;

/// External capability the session checks before connecting.
pub trait CredentialGate: Send + Sync {
    /// Whether a usable API key is available right now.
    fn has_credential(&self) -> bool;

    /// Ask the user to select or enter a credential.
    ///
    /// Fire-and-forget: the caller assumes success and does not wait.
    fn request_credential_selection(&self);

    /// The key to authenticate the channel with, if any.
    fn api_key(&self) -> Option<String>;
}

/// Gate over an environment variable and a stored [`CredentialRef`].
///
/// The environment variable wins when it is set and non-empty. Lookups are
/// not cached, so a key stored after startup is picked up by the next check.
pub struct StoredCredentialGate {
    env_var: Option<String>,
    reference: Mutex<CredentialRef>,
    manager: Arc<dyn CredentialManager>,
    on_select: Option<SelectionHook>,
}

impl StoredCredentialGate {
    /// Build a gate from the credential section of the config.
    #[must_use]
    pub fn new(config: &CredentialConfig, manager: Arc<dyn CredentialManager>) -> Self {
        Self {
            env_var: config.env_var.clone().filter(|v| !v.is_empty()),
            reference: Mutex::new(config.api_key.clone()),
            manager,
            on_select: None,
        }
    }

    /// Run `hook` on every credential selection request.
    #[must_use]
    pub fn with_selection_hook(mut self, hook: SelectionHook) -> Self {
        self.on_select = Some(hook);
        self
    }

    /// Replace the stored reference, e.g. after a key was saved to the keyring.
    pub fn set_reference(&self, reference: CredentialRef) {
        let mut guard = match self.reference.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        *guard = reference;
    }

    fn env_key(&self) -> Option<String> {
        let name = self.env_var.as_deref()?;
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }

    fn stored_key(&self) -> Option<String> {
        let reference = match self.reference.lock() {
            Ok(g) => g.clone(),
            Err(p) => p.into_inner().clone(),
        };
        if !reference.is_set() {
            return None;
        }
        match reference.resolve(self.manager.as_ref()) {
            Ok(key) if !key.trim().is_empty() => Some(key),
            Ok(_) => None,
            Err(e) => {
                debug!("stored credential unavailable: {e}");
                None
            }
        }
    }
}

impl CredentialGate for StoredCredentialGate {
    fn has_credential(&self) -> bool {
        self.api_key().is_some()
    }

    fn request_credential_selection(&self) {
        match &self.on_select {
            Some(hook) => hook(),
            None => match &self.env_var {
                Some(var) => warn!("no API key configured; set {var} or run `voxlink key set`"),
                None => warn!("no API key configured; run `voxlink key set`"),
            },
        }
        info!("credential selection requested");
    }

    fn api_key(&self) -> Option<String> {
        self.env_key().or_else(|| self.stored_key())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::credentials::CredentialError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MissingManager;

    impl CredentialManager for MissingManager {
        fn store(&self, _account: &str, _value: &str) -> Result<CredentialRef, CredentialError> {
            Err(CredentialError::Storage("unavailable".to_owned()))
        }

        fn retrieve(&self, _cred_ref: &CredentialRef) -> Result<Option<String>, CredentialError> {
            Err(CredentialError::NotFound)
        }

        fn delete(&self, _cred_ref: &CredentialRef) -> Result<(), CredentialError> {
            Ok(())
        }
    }

    fn config(api_key: CredentialRef, env_var: Option<&str>) -> CredentialConfig {
        CredentialConfig {
            api_key,
            env_var: env_var.map(str::to_owned),
            ..CredentialConfig::default()
        }
    }

    #[test]
    fn no_reference_and_no_env_means_no_credential() {
        let gate = StoredCredentialGate::new(
            &config(CredentialRef::None, None),
            Arc::new(MissingManager),
        );
        assert!(!gate.has_credential());
        assert_eq!(gate.api_key(), None);
    }

    #[test]
    fn plaintext_reference_passes() {
        let gate = StoredCredentialGate::new(
            &config(CredentialRef::Plaintext("key-1".to_owned()), None),
            Arc::new(MissingManager),
        );
        assert!(gate.has_credential());
        assert_eq!(gate.api_key().as_deref(), Some("key-1"));
    }

    #[test]
    fn blank_plaintext_is_not_a_credential() {
        let gate = StoredCredentialGate::new(
            &config(CredentialRef::Plaintext("   ".to_owned()), None),
            Arc::new(MissingManager),
        );
        assert!(!gate.has_credential());
    }

    #[test]
    fn missing_keyring_entry_fails_closed() {
        let gate = StoredCredentialGate::new(
            &config(
                CredentialRef::Keyring {
                    service: "s".to_owned(),
                    account: "a".to_owned(),
                },
                None,
            ),
            Arc::new(MissingManager),
        );
        assert!(!gate.has_credential());
    }

    #[test]
    fn unset_env_var_falls_through_to_reference() {
        let gate = StoredCredentialGate::new(
            &config(
                CredentialRef::Plaintext("from-config".to_owned()),
                Some("VOXLINK_TEST_SURELY_UNSET_VARIABLE"),
            ),
            Arc::new(MissingManager),
        );
        assert_eq!(gate.api_key().as_deref(), Some("from-config"));
    }

    #[test]
    fn set_reference_is_seen_by_next_check() {
        let gate = StoredCredentialGate::new(
            &config(CredentialRef::None, None),
            Arc::new(MissingManager),
        );
        assert!(!gate.has_credential());
        gate.set_reference(CredentialRef::Plaintext("late".to_owned()));
        assert!(gate.has_credential());
    }

    #[test]
    fn selection_runs_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let gate = StoredCredentialGate::new(
            &config(CredentialRef::None, None),
            Arc::new(MissingManager),
        )
        .with_selection_hook(Arc::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        gate.request_credential_selection();
        gate.request_credential_selection();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
