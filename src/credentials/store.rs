//! Platform keyring storage.
//!
//! Backed by the `keyring` crate: Keychain on macOS, Credential Manager on
//! Windows, the kernel keyutils store on Linux.

use super::{CredentialError, CredentialManager, CredentialRef};

/// Keyring service name for every voxlink secret.
pub const SERVICE_NAME: &str = "voxlink-credentials";

/// Keyring account holding the voice-service API key.
pub const API_KEY_ACCOUNT: &str = "voice.api_key";

/// Credential manager over the platform keyring.
#[derive(Debug, Default)]
pub struct KeyringCredentialManager;

impl KeyringCredentialManager {
    /// Create a new keyring credential manager.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn entry(service: &str, account: &str) -> Result<keyring::Entry, CredentialError> {
    keyring::Entry::new(service, account)
        .map_err(|e| CredentialError::Storage(format!("failed to open keyring entry: {e}")))
}

impl CredentialManager for KeyringCredentialManager {
    fn store(&self, account: &str, value: &str) -> Result<CredentialRef, CredentialError> {
        if account.is_empty() {
            return Err(CredentialError::InvalidReference(
                "account must not be empty".to_owned(),
            ));
        }
        entry(SERVICE_NAME, account)?
            .set_password(value)
            .map_err(|e| CredentialError::Storage(format!("failed to store credential: {e}")))?;

        Ok(CredentialRef::Keyring {
            service: SERVICE_NAME.to_owned(),
            account: account.to_owned(),
        })
    }

    fn retrieve(&self, cred_ref: &CredentialRef) -> Result<Option<String>, CredentialError> {
        match cred_ref {
            CredentialRef::None => Ok(None),
            CredentialRef::Plaintext(value) => Ok(Some(value.clone())),
            CredentialRef::Keyring { service, account } => {
                match entry(service, account)?.get_password() {
                    Ok(password) => Ok(Some(password)),
                    Err(keyring::Error::NoEntry) => Err(CredentialError::NotFound),
                    Err(e) => Err(CredentialError::Storage(format!(
                        "failed to retrieve credential: {e}"
                    ))),
                }
            }
        }
    }

    fn delete(&self, cred_ref: &CredentialRef) -> Result<(), CredentialError> {
        let CredentialRef::Keyring { service, account } = cred_ref else {
            return Ok(());
        };
        match entry(service, account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CredentialError::Storage(format!(
                "failed to delete credential: {e}"
            ))),
        }
    }
}
