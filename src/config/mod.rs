pub mod checkout;
pub mod paths;
pub mod persistence;
pub mod schema;

pub use checkout::*;
pub use paths::*;
pub use persistence::*;
pub use schema::*;

fn default_clients_dir() -> String {
    "~/.local/share/grovefs/clients".to_string()
}

fn default_fuse_ttl_secs() -> u64 {
    1
}

fn default_fs_name() -> String {
    "grovefs".to_string()
}
