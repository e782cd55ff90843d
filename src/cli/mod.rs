pub mod args;
pub mod validation;

pub use args::{Args, CheckoutArgs, Commands, ConfigAction};
pub use validation::validate_checkout_name;
