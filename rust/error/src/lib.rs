// Error codes shared by every hdidx crate. Each module defines its own
// thiserror enum and maps it onto one of these codes, so the binary can
// report a stable category and exit status regardless of where the error
// originated.
use std::error::Error;

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum ErrorCodes {
    // OK is returned on success, we use "Success" since Ok is a keyword in Rust.
    Success = 0,
    // UNKNOWN indicates an unknown error.
    Unknown = 2,
    // INVALID_ARGUMENT indicates the caller supplied an invalid configuration or parameter.
    InvalidArgument = 3,
    // NOT_FOUND means a requested artifact, matrix or file was not found.
    NotFound = 5,
    // ALREADY_EXISTS means an entity that we attempted to create already exists.
    AlreadyExists = 6,
    // PERMISSION_DENIED indicates the process may not read or write the requested location.
    PermissionDenied = 7,
    // FAILED_PRECONDITION indicates the operation was rejected because the system is not in a
    // state required for it.
    FailedPrecondition = 9,
    // OUT_OF_RANGE means an identifier or index fell outside its valid range.
    OutOfRange = 11,
    // UNIMPLEMENTED indicates the requested backend or indexer is not available.
    Unimplemented = 12,
    // INTERNAL errors are internal errors.
    Internal = 13,
    // DATA_LOSS indicates unrecoverable data loss or corruption, e.g. a truncated artifact.
    DataLoss = 15,
}

impl ErrorCodes {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCodes::InvalidArgument => "InvalidArgumentError",
            ErrorCodes::NotFound => "NotFoundError",
            ErrorCodes::FailedPrecondition => "FailedPreconditionError",
            ErrorCodes::Internal => "InternalError",
            ErrorCodes::DataLoss => "DataLossError",
            _ => "HdidxError",
        }
    }

    /// Process exit status for a run that failed with this code.
    pub fn exit_status(&self) -> i32 {
        match self {
            ErrorCodes::Success => 0,
            ErrorCodes::InvalidArgument => 2,
            _ => 1,
        }
    }
}

impl std::fmt::Display for ErrorCodes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub trait HdidxError: Error + Send {
    fn code(&self) -> ErrorCodes;
    fn boxed(self) -> Box<dyn HdidxError>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

impl Error for Box<dyn HdidxError> {}

impl HdidxError for Box<dyn HdidxError> {
    fn code(&self) -> ErrorCodes {
        self.as_ref().code()
    }
}

impl HdidxError for std::io::Error {
    fn code(&self) -> ErrorCodes {
        match self.kind() {
            std::io::ErrorKind::NotFound => ErrorCodes::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorCodes::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => ErrorCodes::AlreadyExists,
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData => {
                ErrorCodes::DataLoss
            }
            _ => ErrorCodes::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_codes() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(err.code(), ErrorCodes::NotFound);
        let err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        assert_eq!(err.code(), ErrorCodes::DataLoss);
    }

    #[test]
    fn test_boxed_error_keeps_code() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope").boxed();
        assert_eq!(err.code(), ErrorCodes::PermissionDenied);
        assert_eq!(err.code().exit_status(), 1);
    }
}
