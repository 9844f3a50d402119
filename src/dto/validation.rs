//! Validation helpers for client-supplied DTO fields.

use validator::ValidationError;

/// Room codes are exactly six uppercase alphanumeric characters.
pub const ROOM_CODE_LEN: usize = 6;

/// Longest display name a player may register with.
pub const MAX_PLAYER_NAME_LEN: usize = 32;

/// Validates a player display name.
///
/// Empty names are allowed (the server substitutes a generated one); anything
/// longer than [`MAX_PLAYER_NAME_LEN`] characters or containing control
/// characters is rejected.
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    if name.chars().count() > MAX_PLAYER_NAME_LEN {
        let mut err = ValidationError::new("player_name_length");
        err.message =
            Some(format!("Player name must be at most {MAX_PLAYER_NAME_LEN} characters").into());
        return Err(err);
    }

    if name.chars().any(char::is_control) {
        let mut err = ValidationError::new("player_name_format");
        err.message = Some("Player name must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a room code is six uppercase A–Z / 0–9 characters.
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != ROOM_CODE_LEN
        || !code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code must be six uppercase alphanumeric characters".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_name_accepts_empty_and_reasonable_names() {
        assert!(validate_player_name("").is_ok());
        assert!(validate_player_name("Alice").is_ok());
        assert!(validate_player_name(&"x".repeat(MAX_PLAYER_NAME_LEN)).is_ok());
    }

    #[test]
    fn player_name_rejects_oversized_and_control_characters() {
        assert!(validate_player_name(&"x".repeat(MAX_PLAYER_NAME_LEN + 1)).is_err());
        assert!(validate_player_name("new\nline").is_err());
        assert!(validate_player_name("bell\u{7}").is_err());
    }

    #[test]
    fn room_code_shape() {
        assert!(validate_room_code("A1B2C3").is_ok());
        assert!(validate_room_code("ABCDEF").is_ok());
        assert!(validate_room_code("abcdef").is_err()); // lowercase
        assert!(validate_room_code("A1B2C").is_err()); // too short
        assert!(validate_room_code("A1B2C34").is_err()); // too long
        assert!(validate_room_code("A1B2C!").is_err()); // punctuation
    }
}
