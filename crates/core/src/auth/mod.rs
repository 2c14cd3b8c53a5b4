//! Credential verification for desk users.
//!
//! Login is pluggable behind [`CredentialVerifier`]; [`DirectoryVerifier`]
//! checks credentials against the user store.

mod secret;
mod traits;
mod types;
mod verifier;

pub use secret::*;
pub use traits::*;
pub use types::*;
pub use verifier::*;
