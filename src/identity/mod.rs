pub mod base;
pub mod firebase_provider;
pub mod static_provider;

pub use base::*;
pub use firebase_provider::{FirebaseProvider, FirebaseProviderConfig, SignInCredential};
pub use static_provider::{StaticProvider, StaticProviderConfig, StaticUserEntry};
