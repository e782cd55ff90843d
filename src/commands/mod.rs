pub mod checkout;
pub mod config;
pub mod ensure_dir;
pub mod inspect;
pub mod mount;
pub mod parents;

pub use checkout::{close_checkout, open_checkout};
pub use config::handle_config_command;
pub use ensure_dir::ensure_dir;
pub use inspect::{resolve_path, stat_path};
pub use mount::mount_checkout;
pub use parents::{print_parents, reset_parent};
