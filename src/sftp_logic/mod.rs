//! Discovery, path mapping and transfer of settled remote files

#[cfg(test)]
pub mod fake;
mod local;
mod remote;
mod transfer;
pub mod types;

pub use local::map_to_local;
pub use remote::list_settled_files;
pub use transfer::{pull, TransferOutcome};
pub use types::{Connector, EntryKind, RemoteEntry, RemoteFileHandle, RemoteSession};
