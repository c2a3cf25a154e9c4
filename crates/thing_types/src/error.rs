use crate::PropertyType;

/// Result type alias
pub type ThingResult<T> = Result<T, ThingError>;

/// Errors raised by the thing model
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThingError {
    /// A name was registered twice within the same scope. Fatal at startup.
    #[error("Duplicate name '{name}' in {scope}")]
    DuplicateName { scope: String, name: String },

    /// A write targeted a read-only property or was refused by its value.
    #[error("Write rejected for property '{property}': {reason}")]
    WriteRejected { property: String, reason: String },

    /// A written value fell outside the declared schema bounds.
    #[error("Invalid value for property '{property}': {reason}")]
    PropertyValidation { property: String, reason: String },

    /// A property built for one thing was registered on another.
    #[error("Property '{property}' belongs to thing '{owner}', not '{thing}'")]
    ForeignProperty {
        property: String,
        owner: String,
        thing: String,
    },

    /// A sensor channel writes a value that does not back the property it names.
    #[error("Channel for '{thing}/{property}' does not feed that property's value")]
    ChannelMismatch { thing: String, property: String },

    #[error("Invalid schema for property '{property}': {reason}")]
    InvalidSchema { property: String, reason: String },

    #[error("Type mismatch for property '{property}': expected {expected}, got {found}")]
    TypeMismatch {
        property: String,
        expected: PropertyType,
        found: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ThingError {
    /// Whether this error is a rejected write (as opposed to a setup error)
    pub fn is_write_rejected(&self) -> bool {
        matches!(self, ThingError::WriteRejected { .. })
    }
}
