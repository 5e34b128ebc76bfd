use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors produced while parsing a cron expression.
///
/// `position` is the byte offset of the offending field within the
/// original expression string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid cron expression at position {position}: {message}")]
    Invalid { position: usize, message: String },

    /// A special marker (`L`, `LW`, `W`, `#`) was combined with other terms,
    /// or `?` was used in both day fields at once.
    #[error("unsupported combination at position {position}: {message}")]
    UnsupportedCombination { position: usize, message: String },
}

impl ParseError {
    pub(crate) fn invalid(position: usize, message: impl Into<String>) -> Self {
        Self::Invalid {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(position: usize, message: impl Into<String>) -> Self {
        Self::UnsupportedCombination {
            position,
            message: message.into(),
        }
    }

    /// Byte offset of the offending field in the source expression.
    pub fn position(&self) -> usize {
        match self {
            Self::Invalid { position, .. } | Self::UnsupportedCombination { position, .. } => {
                *position
            }
        }
    }
}
