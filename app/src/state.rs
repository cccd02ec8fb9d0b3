//! Application state management

use crate::settings::AppSettings;
use member_import::ImportReconciler;
use registry_model::Role;
use registry_sync::{Connectivity, FileCache, FileRemoteStore, SyncEngine, SyncResult};
use std::path::{Path, PathBuf};

/// Engine wired to the on-disk remote store and cache
pub type Engine = SyncEngine<FileRemoteStore, FileCache>;

/// Per-session overrides taken from the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOverrides {
    pub role: Option<Role>,
    pub offline: bool,
}

/// Global application state
pub struct AppState {
    pub engine: Engine,
    pub reconciler: ImportReconciler,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Open the stores named by `settings` under `data_dir`
    pub async fn open(
        data_dir: &Path,
        settings: &AppSettings,
        overrides: SessionOverrides,
    ) -> SyncResult<Self> {
        let remote = FileRemoteStore::open(settings.storage.remote_path(data_dir)).await?;
        let cache = FileCache::open(settings.storage.cache_path(data_dir))?;

        let role = overrides.role.unwrap_or(settings.session.role);
        let online = settings.session.start_online && !overrides.offline;
        tracing::info!(%role, online, data_dir = %data_dir.display(), "opening registry");

        let engine = SyncEngine::new(remote, cache, Connectivity::new(online), role);
        let reconciler = ImportReconciler::new()
            .with_duplicate_policy(settings.import.duplicate_policy)
            .with_chunk_size(settings.import.chunk_size);

        Ok(Self {
            engine,
            reconciler,
            data_dir: data_dir.to_path_buf(),
        })
    }
}
