use thiserror::Error;

/// Core error types for secrules
#[derive(Debug, Error)]
pub enum Error {
    /// Rule text could not be tokenized or a token was malformed
    #[error("Syntax error at '{token}': {reason}")]
    Syntax { token: String, reason: String },

    /// Rule parsed but one of its fields is out of range or inconsistent
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Boundary arithmetic would wrap past the edge of its domain
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Rule set already holds the maximum number of rules
    #[error("Rule limit reached: at most {limit} rules per set")]
    RuleLimit { limit: usize },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn syntax(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Syntax {
            token: token.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns a user-facing explanation with suggestions for fixing the input.
    pub fn translate(&self) -> ErrorTranslation {
        match self {
            Error::Syntax { token, reason } => {
                ErrorTranslation::new(format!("Could not read rule near '{token}': {reason}"))
                    .with_suggestion("Rules look like: in:allow 10.0.0.0/8 tcp 22,443")
                    .with_suggestion("Direction is 'in' or 'out', action is 'allow' or 'deny'")
                    .with_suggestion("Port ranges use a single dash: 1000-2000")
            }
            Error::Validation { field, message } => {
                let translation = ErrorTranslation::new(format!("Invalid {field}: {message}"));
                match field.as_str() {
                    "ports" => translation
                        .with_suggestion("Port numbers must be between 1 and 65535")
                        .with_suggestion("ICMP rules cannot restrict ports"),
                    "priority" => {
                        translation.with_suggestion("Priority must be between 1 and 100")
                    }
                    "protocol" => translation.with_suggestion("Protocol is one of tcp, udp, icmp or any"),
                    "address" => translation
                        .with_suggestion("Use 192.168.1.0/24 or 2001:db8::/32 notation")
                        .with_suggestion("Mask length is at most 32 for IPv4 and 128 for IPv6"),
                    _ => translation,
                }
            }
            Error::RuleLimit { limit } => {
                ErrorTranslation::new(format!("Too many rules (limit is {limit})"))
                    .with_suggestion("Merge rules with identical protocol and ports")
                    .with_suggestion("Split the input by direction into separate files")
            }
            Error::Io(e) => ErrorTranslation::new(format!("Could not access file: {e}"))
                .with_suggestion("Check that the path exists and is readable"),
            Error::Serialization(e) => ErrorTranslation::new(format!("Malformed JSON: {e}"))
                .with_suggestion("Rule files ending in .json must hold an array of rule records"),
            Error::InvariantViolation(msg) => {
                ErrorTranslation::new(format!("Internal error: {msg}"))
            }
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

pub type Result<T> = std::result::Result<T, Error>;
