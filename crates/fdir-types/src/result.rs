use crate::status::Status;
use crate::status_code::status_code_t;

/// The result type used throughout fdir, with `Status` as the error.
pub type Result<T> = std::result::Result<T, Status>;

pub fn make_error<T>(code: status_code_t) -> Result<T> {
    Err(Status::new(code))
}

pub fn make_error_msg<T>(code: status_code_t, msg: impl Into<String>) -> Result<T> {
    Err(Status::with_message(code, msg))
}
