// Project state, identity and persistence

pub mod fingerprint;
pub mod folders;
pub mod persist;
pub mod state;

pub use fingerprint::Fingerprint;
pub use persist::{PersistError, SCHEMA_VERSION};
pub use state::ProjectState;
