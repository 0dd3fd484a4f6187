// crates/mediacut-core/src/error.rs
//
// Failure taxonomy shared by both crates. Background pipeline stages do not
// propagate these across the thread boundary - they terminate the stage and
// record the message on the player (see mediacut-media::player).

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Range/move/change called with bad or overlapping inputs.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// Lookup of an unknown clip/event/overlap id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate event id, or create-new over an existing project directory.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Project load target is not a readable file.
    #[error("file invalid: {0}")]
    FileInvalid(String),

    /// Project JSON did not parse.
    #[error("parse failed: {0}")]
    ParseFailed(String),

    /// Decoder returned something other than AGAIN or EOF.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// Demuxer seek returned a negative code.
    #[error("seek failed: {0}")]
    SeekFailed(String),

    /// API used on a project/player that has not been opened.
    #[error("not opened")]
    NotOpened,

    /// Project content tree is not in a serializable state.
    #[error("timeline invalid: {0}")]
    TimelineInvalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        Self::InvalidArg(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn decode_failed(msg: impl Into<String>) -> Self {
        Self::DecodeFailed(msg.into())
    }

    pub fn seek_failed(msg: impl Into<String>) -> Self {
        Self::SeekFailed(msg.into())
    }
}
