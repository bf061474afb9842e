//! Capability classification
//!
//! Pure derivation of per-account feature flags from the session descriptor.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::jmap::{CAPABILITY_MAIL, CAPABILITY_SUBMISSION, SessionAccount};

/// Flags derived once at session-open time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityFlags {
    /// Mail capability present (mandatory for a usable account)
    pub is_mail: bool,
    /// Server-reported `isReadOnly`, verbatim
    pub is_read_only: bool,
    /// Submission advertised and the account is writable
    pub has_submission: bool,
}

/// Classify an account from the session capability set and its descriptor
///
/// A capability counts as advertised when the session lists it and, if the
/// account publishes any `accountCapabilities`, the account lists it too.
pub fn classify(capabilities: &BTreeMap<String, Value>, account: &SessionAccount) -> CapabilityFlags {
    let advertised = |uri: &str| {
        capabilities.contains_key(uri)
            && (account.account_capabilities.is_empty()
                || account.account_capabilities.contains_key(uri))
    };
    let is_read_only = account.is_read_only;
    CapabilityFlags {
        is_mail: advertised(CAPABILITY_MAIL),
        is_read_only,
        has_submission: advertised(CAPABILITY_SUBMISSION) && !is_read_only,
    }
}
