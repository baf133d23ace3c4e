use serde::Deserialize;
use validator::{Validate, ValidationErrors};

use crate::dto::validation::{validate_color, validate_player_name};

/// Roster entry supplied when (re)configuring the players of a match.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerInput {
    /// Display name.
    pub name: String,
    /// Optional `#rrggbb` color. If omitted (or already taken), the palette
    /// color of the slot is used.
    #[serde(default)]
    pub color: Option<String>,
}

impl PlayerInput {
    /// Entry with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
        }
    }
}

impl Validate for PlayerInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_player_name(&self.name) {
            errors.add("name", e);
        }

        if let Some(ref color) = self.color {
            if let Err(e) = validate_color(color) {
                errors.add("color", e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
