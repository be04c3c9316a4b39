//! Result type definition and extension traits.

use crate::error::Error;

/// The standard Result type for mealnudge operations.
///
/// # Examples
///
/// ```ignore
/// fn operation() -> Result<EngineConfig> {
///     let config = EngineConfig::load("mealnudge.toml")?;
///     Ok(config)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for Results.
pub trait ResultExt<T> {
    /// Run `f` on the error, if any, and hand the Result back unchanged.
    #[must_use]
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_error_sees_failure() {
        let result: Result<i32> = Err(Error::ChannelClosed);
        let mut seen = None;
        let result = result.inspect_error(|e| seen = Some(e.to_string()));
        assert!(result.is_err());
        assert_eq!(seen.as_deref(), Some("channel closed"));
    }

    #[test]
    fn test_inspect_error_skips_success() {
        let result: Result<i32> = Ok(42);
        let mut called = false;
        let result = result.inspect_error(|_| called = true);
        assert!(matches!(result, Ok(42)));
        assert!(!called);
    }
}
