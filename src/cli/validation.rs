use crate::error::{GroveError, Result};

/// Check a name used for a client directory. The name becomes a single
/// path component under the clients directory.
pub fn validate_checkout_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GroveError::Config(
            "Checkout name cannot be empty".to_string(),
        ));
    }

    if name.starts_with('-') || name.starts_with('.') {
        return Err(GroveError::Config(format!(
            "Checkout name '{}' cannot start with '-' or '.'",
            name
        )));
    }

    for byte in name.bytes() {
        if byte < 32 || byte == 127 {
            return Err(GroveError::Config(
                "Checkout name contains control characters".to_string(),
            ));
        }
    }

    let disallowed_patterns = ["/", "\\", ":", "*", "?"];
    for pattern in &disallowed_patterns {
        if name.contains(pattern) {
            return Err(GroveError::Config(format!(
                "Checkout name cannot contain '{}'",
                pattern
            )));
        }
    }

    Ok(())
}
