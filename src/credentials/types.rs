//! Credential reference and error types.

use serde::{Deserialize, Serialize};

/// Where the voice-service API key lives.
///
/// # Serialization
///
/// - `Plaintext("value")` serializes as `"value"` (bare string)
/// - `None` serializes as `""` (empty string, TOML-safe)
/// - `Keyring { service, account }` serializes as `{ service = "...", account = "..." }`
///
/// A bare string in the config file reads back as `Plaintext` (non-empty) or
/// `None` (empty).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "StoredRef", into = "StoredRef")]
pub enum CredentialRef {
    /// Stored in the platform keyring.
    Keyring {
        /// Keyring service name.
        service: String,
        /// Account identifier within the service.
        account: String,
    },
    /// Written directly in the config file.
    Plaintext(String),
    /// No credential configured.
    #[default]
    None,
}

/// On-disk shape: a bare string or a `{ service, account }` table.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StoredRef {
    Inline(String),
    Keyring(KeyringEntry),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyringEntry {
    service: String,
    account: String,
}

impl From<StoredRef> for CredentialRef {
    fn from(stored: StoredRef) -> Self {
        match stored {
            StoredRef::Inline(value) if value.is_empty() => Self::None,
            StoredRef::Inline(value) => Self::Plaintext(value),
            StoredRef::Keyring(KeyringEntry { service, account }) => {
                Self::Keyring { service, account }
            }
        }
    }
}

impl From<CredentialRef> for StoredRef {
    fn from(cred_ref: CredentialRef) -> Self {
        match cred_ref {
            CredentialRef::Keyring { service, account } => {
                Self::Keyring(KeyringEntry { service, account })
            }
            CredentialRef::Plaintext(value) => Self::Inline(value),
            CredentialRef::None => Self::Inline(String::new()),
        }
    }
}

impl CredentialRef {
    /// Whether any credential is configured.
    #[must_use]
    pub fn is_set(&self) -> bool {
        !matches!(self, CredentialRef::None)
    }

    /// Whether the value sits in the config file itself.
    #[must_use]
    pub fn is_plaintext(&self) -> bool {
        matches!(self, CredentialRef::Plaintext(_))
    }

    /// Resolve the reference to the secret value.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] for `None` or a keyring entry
    /// that does not exist, or the manager's storage error.
    pub fn resolve(&self, manager: &dyn super::CredentialManager) -> Result<String, CredentialError> {
        match self {
            CredentialRef::Plaintext(value) => Ok(value.clone()),
            CredentialRef::Keyring { .. } => manager.retrieve(self)?.ok_or(CredentialError::NotFound),
            CredentialRef::None => Err(CredentialError::NotFound),
        }
    }
}

/// Errors that can occur during credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Credential not found in storage.
    #[error("credential not found")]
    NotFound,

    /// Invalid credential reference.
    #[error("invalid credential reference: {0}")]
    InvalidReference(String),

    /// Platform storage failed.
    #[error("credential storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::credentials::CredentialManager;

    struct FixedManager(Option<String>);

    impl CredentialManager for FixedManager {
        fn store(&self, _account: &str, _value: &str) -> Result<CredentialRef, CredentialError> {
            Err(CredentialError::Storage("read-only".to_owned()))
        }

        fn retrieve(&self, _cred_ref: &CredentialRef) -> Result<Option<String>, CredentialError> {
            Ok(self.0.clone())
        }

        fn delete(&self, _cred_ref: &CredentialRef) -> Result<(), CredentialError> {
            Ok(())
        }
    }

    fn keyring_ref() -> CredentialRef {
        CredentialRef::Keyring {
            service: "voxlink-credentials".to_owned(),
            account: "voice.api_key".to_owned(),
        }
    }

    #[test]
    fn keyring_ref_round_trips_through_json() {
        let json = serde_json::to_string(&keyring_ref()).unwrap();
        let parsed: CredentialRef = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, keyring_ref());
    }

    #[test]
    fn plaintext_serializes_as_bare_string() {
        let json = serde_json::to_string(&CredentialRef::Plaintext("k-123".to_owned())).unwrap();
        assert_eq!(json, "\"k-123\"");
    }

    #[test]
    fn empty_string_reads_as_none() {
        let parsed: CredentialRef = serde_json::from_str("\"\"").unwrap();
        assert_eq!(parsed, CredentialRef::None);
        assert_eq!(serde_json::to_string(&CredentialRef::None).unwrap(), "\"\"");
    }

    #[test]
    fn toml_round_trip_for_every_variant() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Wrapper {
            key: CredentialRef,
        }

        for key in [
            CredentialRef::None,
            CredentialRef::Plaintext("k".to_owned()),
            keyring_ref(),
        ] {
            let w = Wrapper { key };
            let text = toml::to_string(&w).unwrap();
            let parsed: Wrapper = toml::from_str(&text).unwrap();
            assert_eq!(parsed, w);
        }
    }

    #[test]
    fn unknown_map_key_is_rejected() {
        let result: Result<CredentialRef, _> =
            serde_json::from_str(r#"{"service":"s","account":"a","extra":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn resolve_reads_each_variant() {
        let manager = FixedManager(Some("from-keyring".to_owned()));
        assert_eq!(
            CredentialRef::Plaintext("inline".to_owned())
                .resolve(&manager)
                .unwrap(),
            "inline"
        );
        assert_eq!(keyring_ref().resolve(&manager).unwrap(), "from-keyring");
        assert!(matches!(
            CredentialRef::None.resolve(&manager),
            Err(CredentialError::NotFound)
        ));
    }

    #[test]
    fn resolve_missing_keyring_entry_is_not_found() {
        let manager = FixedManager(None);
        assert!(matches!(
            keyring_ref().resolve(&manager),
            Err(CredentialError::NotFound)
        ));
    }

    #[test]
    fn is_set_and_is_plaintext() {
        assert!(!CredentialRef::None.is_set());
        assert!(keyring_ref().is_set());
        assert!(!keyring_ref().is_plaintext());
        assert!(CredentialRef::Plaintext("k".to_owned()).is_plaintext());
    }
}
