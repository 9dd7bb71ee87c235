//! Processor error types
//!
//! A processor reports failure as a `ProcessorError`, which carries a stable
//! code recorded on the asset and a flag telling the queue whether another
//! attempt can succeed. Permanent failures skip the remaining attempts.

use std::fmt;

/// Code used when a processor fails without naming a more specific one.
pub const PROCESSING_FAILED: &str = "PROCESSING_FAILED";

#[derive(Debug)]
pub struct ProcessorError {
    inner: anyhow::Error,
    code: &'static str,
    retryable: bool,
}

impl ProcessorError {
    /// A failure that will not go away on retry: unsupported or corrupt
    /// content, a missing original, a size that disagrees with the record.
    pub fn permanent(code: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            code,
            retryable: false,
        }
    }

    /// A failure worth another attempt: storage timeouts, a busy tool.
    pub fn transient(code: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            code,
            retryable: true,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for ProcessorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for ProcessorError {
    /// Untyped failures are treated as transient.
    fn from(err: anyhow::Error) -> Self {
        Self::transient(PROCESSING_FAILED, err)
    }
}

/// Extension trait for tagging a result's error as permanent or transient.
pub trait ProcessorResultExt<T> {
    fn permanent(self, code: &'static str) -> Result<T, ProcessorError>;
    fn transient(self, code: &'static str) -> Result<T, ProcessorError>;
}

impl<T, E: Into<anyhow::Error>> ProcessorResultExt<T> for Result<T, E> {
    fn permanent(self, code: &'static str) -> Result<T, ProcessorError> {
        self.map_err(|e| ProcessorError::permanent(code, e))
    }

    fn transient(self, code: &'static str) -> Result<T, ProcessorError> {
        self.map_err(|e| ProcessorError::transient(code, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_error() {
        let err = ProcessorError::permanent("UNSUPPORTED_MEDIA", anyhow::anyhow!("not an image"));
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "UNSUPPORTED_MEDIA");
        assert!(err.to_string().contains("not an image"));
    }

    #[test]
    fn test_untyped_errors_are_transient() {
        let err: ProcessorError = anyhow::anyhow!("connection reset").into();
        assert!(err.is_retryable());
        assert_eq!(err.code(), PROCESSING_FAILED);
    }

    #[test]
    fn test_result_ext() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "original missing",
        ));
        let err = result.permanent("SOURCE_MISSING").unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "SOURCE_MISSING");
    }
}
