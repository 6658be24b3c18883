//! User-visible status messages.

/// Shown after any channel failure that is not a credential problem.
pub const NETWORK_ERROR: &str = "Network error. Please check your connection and try again.";

/// Shown when the service rejected the API key.
pub const CREDENTIAL_ERROR: &str =
    "The voice service rejected the API key. Please select a valid key and try again.";

/// Shown when the microphone or speakers could not be acquired.
pub const HARDWARE_ERROR: &str =
    "Could not start the voice session. Ensure microphone access is allowed.";

/// Shown when `start` is refused for lack of a credential.
pub const CREDENTIAL_REQUIRED: &str = "An API key is required before starting a conversation.";
