use thiserror::Error;

/// Errors surfaced by the daemon.
///
/// Every variant maps onto one of the five wire codes via [`VtsError::code`];
/// the `Display` text is what clients see after the code, so messages stay
/// short and never leak internal layout beyond what the command referenced.
#[derive(Error, Debug)]
pub enum VtsError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("No file loaded")]
    NotLoaded,

    #[error("{0}")]
    Internal(String),

    #[error("Discovery Error: {0}")]
    Discovery(String),
}

impl VtsError {
    /// Numeric code carried in `ERROR <code> <message>` responses.
    pub fn code(&self) -> u16 {
        match self {
            VtsError::UnknownCommand(_) => 400,
            VtsError::InvalidArgument(_) => 401,
            VtsError::FileNotFound(_) => 404,
            VtsError::NotLoaded => 501,
            VtsError::Io(_) | VtsError::Internal(_) | VtsError::Discovery(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, VtsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes() {
        assert_eq!(VtsError::UnknownCommand("FOO".into()).code(), 400);
        assert_eq!(VtsError::InvalidArgument("bad".into()).code(), 401);
        assert_eq!(VtsError::FileNotFound("/nope".into()).code(), 404);
        assert_eq!(VtsError::NotLoaded.code(), 501);
        assert_eq!(VtsError::Internal("decode".into()).code(), 500);
    }

    #[test]
    fn file_not_found_message() {
        let e = VtsError::FileNotFound("/nope".into());
        assert_eq!(e.to_string(), "File not found: /nope");
    }
}
