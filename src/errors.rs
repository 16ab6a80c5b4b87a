use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

/// Stable result-level error codes surfaced to transport callers.
pub const CODE_QUERY_EMPTY: &str = "query_empty";
pub const CODE_MESSAGES_EMPTY: &str = "messages_empty";
pub const CODE_METHOD_NOT_FOUND: &str = "method_not_found";
pub const CODE_PARAMS_INVALID: &str = "params_invalid";
pub const CODE_FONTS_UNAVAILABLE: &str = "fonts_unavailable";
pub const CODE_FFMPEG_UNAVAILABLE: &str = "ffmpeg_unavailable";
pub const CODE_TEMP_UNWRITABLE: &str = "temp_unwritable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    Usage,
    Validation,
    Dependency,
    Io,
}

impl CodedErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Usage => 2,
            Self::Validation => 3,
            Self::Dependency => 4,
            Self::Io => 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Usage,
        }
    }

    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Validation,
        }
    }

    pub fn dependency(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Dependency,
        }
    }

    pub fn io(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Io,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Walks an anyhow chain looking for the first typed error, so the CLI
/// boundary can map arbitrary failures back to codes and exit statuses.
pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}
