//! Code-signing inspection consumed during discovery.
//!
//! The actual certificate routine lives outside this crate; the host only
//! consumes its result to emit one diagnostic event per load attempt.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Result of inspecting the code-signing certificate of a module file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureReport {
    pub subject: String,
    pub thumbprint: String,
    pub verified: bool,
}

/// Pure signature lookup. `None` means the module carries no signature.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, path: &Path) -> Option<SignatureReport>;
}

/// Verifier for hosts that do not enforce signing: everything is unsigned.
#[derive(Debug, Default, Clone)]
pub struct UnsignedVerifier;

impl SignatureVerifier for UnsignedVerifier {
    fn verify(&self, _path: &Path) -> Option<SignatureReport> {
        None
    }
}
