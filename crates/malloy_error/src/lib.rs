pub type Result<T, E = MalloyError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum MalloyError {
    #[error("{0}")]
    String(String),

    /// An invariant of the compilation pass was violated. Always a bug in the
    /// compiler, never a problem with user input.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not yet implemented: {0}")]
    NotImplemented(&'static str),
}

impl MalloyError {
    pub fn new(msg: impl Into<String>) -> Self {
        MalloyError::String(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        MalloyError::Internal(msg.into())
    }
}

pub fn err(msg: impl Into<String>) -> MalloyError {
    MalloyError::new(msg)
}

/// Return early with a `NotImplemented` error.
#[macro_export]
macro_rules! not_implemented {
    ($feat:expr) => {
        return Err($crate::MalloyError::NotImplemented($feat).into())
    };
}
