//! Validation helpers for caller-supplied input.

use validator::ValidationError;

/// Longest accepted player name, in characters.
pub const MAX_NAME_CHARS: usize = 24;

/// Validates that a player name is non-blank and at most [`MAX_NAME_CHARS`] long.
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("player_name_empty");
        err.message = Some("Player name must not be empty".into());
        return Err(err);
    }

    let len = trimmed.chars().count();
    if len > MAX_NAME_CHARS {
        let mut err = ValidationError::new("player_name_length");
        err.message = Some(
            format!("Player name must be at most {MAX_NAME_CHARS} characters (got {len})").into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Validates that a color is a `#rrggbb` hex string.
///
/// # Examples
///
/// ```ignore
/// validate_color("#1e88e5") // Ok
/// validate_color("1e88e5")  // Err - missing hash
/// validate_color("#1e88e")  // Err - too short
/// ```
pub fn validate_color(color: &str) -> Result<(), ValidationError> {
    let Some(hex) = color.strip_prefix('#') else {
        let mut err = ValidationError::new("color_format");
        err.message = Some("Color must start with `#`".into());
        return Err(err);
    };

    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        let mut err = ValidationError::new("color_format");
        err.message = Some("Color must be six hexadecimal digits".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a word is not blank. Anything else is up to the word validator.
pub fn validate_word(word: &str) -> Result<(), ValidationError> {
    if word.trim().is_empty() {
        let mut err = ValidationError::new("word_empty");
        err.message = Some("Word must not be empty".into());
        return Err(err);
    }
    Ok(())
}
