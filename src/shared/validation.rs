//! Channel Name Validation

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 128;

/// Validate a channel name.
///
/// Channel names must be non-empty printable ASCII without control
/// characters. Names starting with `$` are reserved for internal use.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("channel name too long");
    }
    if name.starts_with('$') {
        return Err("channel names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control() && c != ' ') {
        return Err("channel name contains invalid characters");
    }
    Ok(())
}
