//! API key storage and the credential gate consulted before a session starts.
//!
//! Keys live either in the platform keyring (via the `keyring` crate), in
//! plain text in the config file, or in an environment variable.
//!
//! ```no_run
//! use voxlink::credentials::{CredentialManager, create_manager};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = create_manager();
//! let cred_ref = manager.store("voice.api_key", "AIza...")?;
//! if let Some(value) = manager.retrieve(&cred_ref)? {
//!     println!("stored {} bytes", value.len());
//! }
//! # Ok(())
//! # }
//! ```

mod gate;
mod store;
mod types;

use std::sync::Arc;

pub use gate::{CredentialGate, SelectionHook, StoredCredentialGate};
pub use store::{API_KEY_ACCOUNT, KeyringCredentialManager, SERVICE_NAME};
pub use types::{CredentialError, CredentialRef};

/// Stores and retrieves secrets referenced by [`CredentialRef`].
pub trait CredentialManager: Send + Sync {
    /// Store a secret under `account` and return a reference to it.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Storage`] if the platform storage fails.
    fn store(&self, account: &str, value: &str) -> Result<CredentialRef, CredentialError>;

    /// Retrieve the value behind a reference.
    ///
    /// `None` references yield `Ok(None)`; plaintext references yield their
    /// value.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] if a keyring reference points to
    /// a missing entry, or [`CredentialError::Storage`] on access failure.
    fn retrieve(&self, cred_ref: &CredentialRef) -> Result<Option<String>, CredentialError>;

    /// Delete the secret behind a reference. Deleting a missing entry succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Storage`] if platform storage access fails.
    fn delete(&self, cred_ref: &CredentialRef) -> Result<(), CredentialError>;
}

/// Create the platform keyring-backed credential manager.
#[must_use]
pub fn create_manager() -> Arc<dyn CredentialManager> {
    Arc::new(KeyringCredentialManager::new())
}
