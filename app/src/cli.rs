use clap::{Parser, Subcommand, ValueEnum};
use member_import::{ExportKind, ImportKind};
use registry_model::{Collection, Role};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cwac-registry")]
#[command(about = "Offline-first CWAC member registry")]
pub struct Cli {
    /// Directory holding settings, the remote store and the local cache
    #[arg(long, env = "CWAC_DATA_DIR", default_value = "cwac-data")]
    pub data_dir: PathBuf,

    /// Override the session role from settings
    #[arg(long)]
    pub role: Option<Role>,

    /// Treat the remote store as unreachable for this session
    #[arg(long)]
    pub offline: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Pull every collection from the remote store
    Load,
    /// Push the whole working set
    Save,
    /// Push if reachable, otherwise save to the local cache
    Sync,
    /// Go online and push whatever was saved while offline
    Reconnect,
    /// Connectivity and last sync time
    Status,
    /// Record counts per collection
    Stats,
    List {
        #[arg(value_enum)]
        collection: CollectionArg,
        #[arg(long)]
        area: Option<String>,
        /// ALIVE or DECEASED (status collection only)
        #[arg(long)]
        status: Option<String>,
    },
    Search {
        term: String,
    },
    /// Correct the call number of an unpaid member
    EditPhone {
        area: String,
        index: usize,
        number: String,
    },
    /// Mark a member ALIVE or DECEASED
    SetStatus {
        area: String,
        index: usize,
        status: String,
    },
    Add {
        #[arg(value_enum)]
        collection: CollectionArg,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        id: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        area: String,
        #[arg(long)]
        status: Option<String>,
    },
    Delete {
        #[arg(value_enum)]
        collection: CollectionArg,
        area: String,
        index: usize,
    },
    /// Replace collections from a CSV file
    Import {
        #[arg(value_enum)]
        kind: ImportKindArg,
        path: PathBuf,
    },
    Export {
        #[arg(value_enum)]
        kind: ExportKindArg,
        /// Defaults to the data directory
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    Settings {
        #[command(subcommand)]
        cmd: SettingsCmd,
    },
}

#[derive(Subcommand)]
pub enum SettingsCmd {
    Show,
    Reset,
    /// Persist the default session role
    SetRole { role: Role },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CollectionArg {
    Paid,
    Unpaid,
    Status,
}

impl From<CollectionArg> for Collection {
    fn from(arg: CollectionArg) -> Self {
        match arg {
            CollectionArg::Paid => Collection::Paid,
            CollectionArg::Unpaid => Collection::Unpaid,
            CollectionArg::Status => Collection::Status,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ImportKindArg {
    /// Paid and unpaid members
    Dues,
    /// Alive/deceased status
    Status,
}

impl From<ImportKindArg> for ImportKind {
    fn from(arg: ImportKindArg) -> Self {
        match arg {
            ImportKindArg::Dues => ImportKind::Dues,
            ImportKindArg::Status => ImportKind::LifeStatus,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ExportKindArg {
    Paid,
    Unpaid,
    UpdatedUnpaid,
    Status,
}

impl From<ExportKindArg> for ExportKind {
    fn from(arg: ExportKindArg) -> Self {
        match arg {
            ExportKindArg::Paid => ExportKind::Paid,
            ExportKindArg::Unpaid => ExportKind::Unpaid,
            ExportKindArg::UpdatedUnpaid => ExportKind::UpdatedUnpaid,
            ExportKindArg::Status => ExportKind::Status,
        }
    }
}
