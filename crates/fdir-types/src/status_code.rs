/// Numeric status code carried by every `Status`.
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const NOT_IMPLEMENTED: status_code_t = 1;
    pub const INVALID_ARG: status_code_t = 3;
    pub const INVALID_CONFIG: status_code_t = 4;
    pub const NOT_ENOUGH_MEMORY: status_code_t = 26;
    pub const IO_ERROR: status_code_t = 69;
    pub const CONFIG_PARSE_ERROR: status_code_t = 71;
    pub const FOUND_BUG: status_code_t = 998;
    pub const UNKNOWN: status_code_t = 999;
}

/// Namespace, inode index and lock manager status codes (3xxx).
pub mod MetaCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 3000;
    pub const NOT_EMPTY: status_code_t = 3001;
    pub const NOT_DIRECTORY: status_code_t = 3003;
    pub const EXISTS: status_code_t = 3007;
    pub const INVALID_MODE: status_code_t = 3010;
    pub const NAME_TOO_LONG: status_code_t = 3017;
    pub const TOO_MANY_ENTRIES: status_code_t = 3020;
    pub const LOCK_CONFLICT: status_code_t = 3100;
    pub const NO_LOCK: status_code_t = 3101;
    pub const FOUND_BUG: status_code_t = 3999;
}

/// Classification of status code ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum StatusCodeType {
    Invalid = -1,
    Common = 0,
    Meta = 3,
}

/// Determine the category of a status code.
pub fn type_of(code: status_code_t) -> StatusCodeType {
    match code {
        0..=999 => StatusCodeType::Common,
        3000..=3999 => StatusCodeType::Meta,
        _ => StatusCodeType::Invalid,
    }
}

/// Convert a status code to its human-readable name.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::NOT_IMPLEMENTED => "NotImplemented",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::NOT_ENOUGH_MEMORY => "NotEnoughMemory",
        StatusCode::IO_ERROR => "IOError",
        StatusCode::CONFIG_PARSE_ERROR => "ConfigParseError",
        StatusCode::FOUND_BUG => "FoundBug",
        StatusCode::UNKNOWN => "Unknown",

        MetaCode::NOT_FOUND => "Meta::NotFound",
        MetaCode::NOT_EMPTY => "Meta::NotEmpty",
        MetaCode::NOT_DIRECTORY => "Meta::NotDirectory",
        MetaCode::EXISTS => "Meta::Exists",
        MetaCode::INVALID_MODE => "Meta::InvalidMode",
        MetaCode::NAME_TOO_LONG => "Meta::NameTooLong",
        MetaCode::TOO_MANY_ENTRIES => "Meta::TooManyEntries",
        MetaCode::LOCK_CONFLICT => "Meta::LockConflict",
        MetaCode::NO_LOCK => "Meta::NoLock",
        MetaCode::FOUND_BUG => "Meta::FoundBug",

        _ => "UnknownStatusCode",
    }
}

/// Map a status code to the errno reported at the protocol boundary.
pub fn to_errno(code: status_code_t) -> i32 {
    match code {
        StatusCode::OK => 0,
        StatusCode::INVALID_ARG | StatusCode::INVALID_CONFIG => libc::EINVAL,
        StatusCode::NOT_ENOUGH_MEMORY => libc::ENOMEM,
        StatusCode::NOT_IMPLEMENTED => libc::ENOSYS,
        MetaCode::NOT_FOUND | MetaCode::NO_LOCK => libc::ENOENT,
        MetaCode::NOT_EMPTY => libc::ENOTEMPTY,
        MetaCode::NOT_DIRECTORY => libc::ENOTDIR,
        MetaCode::EXISTS => libc::EEXIST,
        MetaCode::INVALID_MODE => libc::EINVAL,
        MetaCode::NAME_TOO_LONG => libc::ENAMETOOLONG,
        MetaCode::TOO_MANY_ENTRIES => libc::ENOSPC,
        MetaCode::LOCK_CONFLICT => libc::EAGAIN,
        _ => libc::EIO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_of() {
        assert_eq!(type_of(StatusCode::OK), StatusCodeType::Common);
        assert_eq!(type_of(StatusCode::NOT_ENOUGH_MEMORY), StatusCodeType::Common);
        assert_eq!(type_of(MetaCode::NOT_FOUND), StatusCodeType::Meta);
        assert_eq!(type_of(MetaCode::LOCK_CONFLICT), StatusCodeType::Meta);
        assert_eq!(type_of(9000), StatusCodeType::Invalid);
    }

    #[test]
    fn test_to_string() {
        assert_eq!(to_string(StatusCode::OK), "OK");
        assert_eq!(to_string(MetaCode::TOO_MANY_ENTRIES), "Meta::TooManyEntries");
        assert_eq!(to_string(12345), "UnknownStatusCode");
    }

    #[test]
    fn test_to_errno() {
        assert_eq!(to_errno(MetaCode::NOT_FOUND), libc::ENOENT);
        assert_eq!(to_errno(MetaCode::EXISTS), libc::EEXIST);
        assert_eq!(to_errno(MetaCode::NOT_EMPTY), libc::ENOTEMPTY);
        assert_eq!(to_errno(MetaCode::TOO_MANY_ENTRIES), libc::ENOSPC);
        assert_eq!(to_errno(MetaCode::LOCK_CONFLICT), libc::EAGAIN);
        assert_eq!(to_errno(StatusCode::NOT_ENOUGH_MEMORY), libc::ENOMEM);
        assert_eq!(to_errno(MetaCode::FOUND_BUG), libc::EIO);
    }

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            MetaCode::NOT_FOUND,
            MetaCode::NOT_EMPTY,
            MetaCode::NOT_DIRECTORY,
            MetaCode::EXISTS,
            MetaCode::INVALID_MODE,
            MetaCode::NAME_TOO_LONG,
            MetaCode::TOO_MANY_ENTRIES,
            MetaCode::LOCK_CONFLICT,
            MetaCode::NO_LOCK,
        ];
        let set: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(set.len(), codes.len());
    }
}
