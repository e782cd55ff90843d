pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod fuse;
pub mod hash;
pub mod inodes;
pub mod journal;
pub mod mount;
pub mod path;
pub mod privhelper;
pub mod server;
pub mod store;

pub use clock::{Clock, FakeClock, UnixClock};

pub use config::get_clients_dir;
pub use config::get_config_path;
pub use config::load_config;
pub use config::save_config;
pub use config::CheckoutConfig;
pub use config::Config;
pub use config::OwnerConfig;
pub use config::ParentCommits;

pub use error::{GroveError, Result};

pub use hash::Hash;

pub use inodes::{InodeNumber, InodePtr, SetAttr};

pub use journal::{Journal, JournalDelta};

pub use mount::{Mount, MountHandle, MountState, ShutdownResult};

pub use privhelper::{FuseChannel, PrivHelper};

pub use server::ServerState;
