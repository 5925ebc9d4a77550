use std::fmt;

use crate::status_code::{self, status_code_t, StatusCode};

/// A status value carrying a code and optional message.
///
/// Every fallible engine call reports failure as a `Status`. It is
/// `#[must_use]` so an ignored error shows up as a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Status {
    code: status_code_t,
    message: Option<String>,
}

impl Status {
    /// Create a status with just a code.
    pub fn new(code: status_code_t) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Create a status with a code and a message naming the subject,
    /// usually a path or an identifier.
    pub fn with_message(code: status_code_t, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(msg.into()),
        }
    }

    /// The numeric status code; compare against the `StatusCode` and
    /// `MetaCode` constants.
    pub fn code(&self) -> status_code_t {
        self.code
    }

    /// The optional message.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Whether this status represents success (code == OK).
    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::OK
    }

    /// Errno the protocol layer reports for this status.
    pub fn errno(&self) -> i32 {
        status_code::to_errno(self.code)
    }

    /// Produce a description like `"Meta::NotFound(3000) /a/b"`.
    pub fn describe(&self) -> String {
        let name = status_code::to_string(self.code);
        match &self.message {
            Some(msg) => format!("{}({}) {}", name, self.code, msg),
            None => format!("{}({})", name, self.code),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl std::error::Error for Status {}

impl From<status_code_t> for Status {
    fn from(code: status_code_t) -> Self {
        Self::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_code::MetaCode;

    #[test]
    fn test_status_ok() {
        let s = Status::new(StatusCode::OK);
        assert!(s.is_ok());
        assert_eq!(s.errno(), 0);
        assert_eq!(s.describe(), "OK(0)");
    }

    #[test]
    fn test_status_with_message() {
        let s = Status::with_message(MetaCode::NOT_FOUND, "/a/b");
        assert!(!s.is_ok());
        assert_eq!(s.code(), 3000);
        assert_eq!(s.message(), Some("/a/b"));
        assert_eq!(s.to_string(), "Meta::NotFound(3000) /a/b");
        assert_eq!(s.errno(), libc::ENOENT);
    }

    #[test]
    fn test_status_from_code() {
        let s: Status = MetaCode::LOCK_CONFLICT.into();
        assert_eq!(s.code(), MetaCode::LOCK_CONFLICT);
        let e: &dyn std::error::Error = &s;
        assert!(e.to_string().contains("LockConflict"));
    }
}
