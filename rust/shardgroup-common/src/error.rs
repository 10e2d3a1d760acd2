use shardgroup_memory::OutOfMemory;
use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

pub type StdErrorBoxed = Box<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn out_of_memory(requested: u64, context: impl Into<String>) -> Error {
        Error(
            ErrorKind::OutOfMemory {
                requested,
                context: context.into(),
            }
            .into(),
        )
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn illegal_state(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::IllegalState {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_regex<E>(pattern: impl Into<String>, source: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error(
            ErrorKind::InvalidRegex {
                pattern: pattern.into(),
                source: Box::new(source),
            }
            .into(),
        )
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self.kind(), ErrorKind::OutOfMemory { .. })
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidArgument { .. })
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self.kind(), ErrorKind::IllegalState { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("not enough memory: failed to claim {requested} bytes ({context})")]
    OutOfMemory { requested: u64, context: String },

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("illegal state: {message}")]
    IllegalState { message: String },

    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        source: StdErrorBoxed,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<OutOfMemory> for Error {
    fn from(e: OutOfMemory) -> Self {
        Error::out_of_memory(e.requested, format!("{} bytes remaining", e.remaining))
    }
}
