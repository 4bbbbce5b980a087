use std::fmt;

/// A wrapper for credentials such as vendor API keys
///
/// `Secret<T>` redacts the inner value from `Debug` and `Display`, so a
/// config struct holding one can be logged or traced as a whole. It has no
/// `Serialize` impl, which keeps keys out of serialized snapshots.
///
/// # Examples
///
/// ```
/// use crosstalk_core::Secret;
///
/// let api_key = Secret::new("sk-live-123".to_string());
/// assert_eq!(format!("{api_key:?}"), "[REDACTED]");
/// assert_eq!(api_key.expose(), "sk-live-123");
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Secret(value)
    }

    /// Gets a reference to the inner value
    ///
    /// Only the adapters call this, when writing the authentication header.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Reads a secret from the environment, empty when the variable is unset
    pub fn from_env(var: &str) -> Self {
        Secret(std::env::var(var).unwrap_or_default())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Secret(value)
    }
}

impl From<&str> for Secret<String> {
    fn from(value: &str) -> Self {
        Secret(value.to_string())
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("••••••")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug() {
        let secret = Secret::from("api-key-123");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
    }

    #[test]
    fn test_secret_display() {
        let secret = Secret::from("api-key-123");
        assert_eq!(format!("{}", secret), "••••••");
    }

    #[test]
    fn test_secret_expose() {
        let secret = Secret::new("api-key-123");
        assert_eq!(secret.expose(), &"api-key-123");
    }

    #[test]
    fn test_secret_from_missing_env() {
        let secret = Secret::from_env("CROSSTALK_TEST_UNSET_VARIABLE");
        assert!(secret.is_empty());
    }
}
