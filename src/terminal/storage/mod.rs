//! Session registry and the collaborator interfaces it depends on.
//!
//! - [`traits`]: host directory, credential vault, audit sink/store, access policy
//! - [`TerminalRegistry`]: live terminal sessions keyed by id
//! - [`MemoryAuditStore`]: `DashMap`-backed audit store

mod audit;
mod registry;
mod traits;

pub use audit::MemoryAuditStore;
pub use registry::{TerminalRegistry, TerminalSession};
pub use traits::{AccessPolicy, AuditSink, AuditStore, CredentialVault, HostDirectory};
