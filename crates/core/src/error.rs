use crate::mode::GenerationMode;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed for `{field}`: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Unknown generation mode: {0} (expected t2v, i2v or i2i)")]
    UnknownMode(String),

    #[error("Invalid graph template: {0}")]
    InvalidTemplate(String),

    #[error("The {mode} template has no location for `{role}`")]
    MissingLocation { mode: GenerationMode, role: String },

    #[error("Unresolved placeholders after binding: {}", .0.join(", "))]
    UnresolvedPlaceholders(Vec<String>),
}

impl CoreError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}
