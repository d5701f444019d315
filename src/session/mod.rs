pub mod store;
pub mod synchronizer;

pub use store::{AuthState, Session, SessionStore};
pub use synchronizer::{AuthSynchronizer, SynchronizerHandle};
