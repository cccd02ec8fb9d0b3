//! Offline-first synchronization for the member registry.
//!
//! This crate reconciles the in-memory [`WorkingSet`](registry_model::WorkingSet)
//! with a remote multi-collection document store, falling back to a local
//! key-value cache whenever the remote store cannot be reached.
//!
//! # Modules
//!
//! - `remote`: the document-store contract (`RemoteStore`), field sentinels and write batches
//! - `memory_remote`: in-memory `RemoteStore` for tests and local development
//! - `file_remote`: directory-backed `RemoteStore` used by the desktop binary
//! - `cache`: the `LocalCache` contract, memory and file caches, and snapshot mirroring
//! - `connectivity`: network reachability flag with edge-triggered events
//! - `documents`: mapping between records and remote documents
//! - `status`: sync phase tracking and status text for display
//! - `engine`: the `SyncEngine` itself
//!
//! # Example
//!
//! ```
//! use registry_model::Role;
//! use registry_sync::{Connectivity, MemoryCache, MemoryRemoteStore, PushOutcome, SyncEngine};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let engine = SyncEngine::new(
//!     MemoryRemoteStore::new(),
//!     MemoryCache::new(),
//!     Connectivity::new(false),
//!     Role::Admin,
//! );
//!
//! // Offline: nothing reaches the remote store, the cache gets a copy
//! let outcome = engine.save_all().await.unwrap();
//! assert!(matches!(outcome, PushOutcome::SavedLocally { .. }));
//! # });
//! ```

pub mod cache;
pub mod connectivity;
pub mod documents;
pub mod engine;
pub mod error;
pub mod file_remote;
pub mod memory_remote;
pub mod remote;
pub mod status;

pub use cache::{
    has_pending, load_snapshot, save_snapshot, set_pending, CacheError, CacheResult,
    CachedSnapshot, FileCache, LocalCache, MemoryCache,
};
pub use connectivity::{Connectivity, ConnectivityEvent};
pub use engine::{
    FallbackReason, InitSource, NewMember, PhoneEditOutcome, PhoneEditRequest, PullOutcome,
    PushOutcome, StagedImport, StatusUpdateOutcome, StatusUpdateRequest, SyncEngine, WriteOutcome,
};
pub use error::{SyncError, SyncResult};
pub use file_remote::FileRemoteStore;
pub use memory_remote::MemoryRemoteStore;
pub use remote::{
    DocumentData, DocumentRef, DocumentSnapshot, FieldValue, Fields, RemoteError, RemoteResult,
    RemoteStore, SetMode, WriteBatch, WriteOp,
};
pub use status::{SyncPhase, SyncStatusInfo};
