use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("zlib compression failed: {0}")]
    Compression(#[source] std::io::Error),

    #[error("unrecognized telemetry length: {0} bytes")]
    BadResponseSize(usize),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("a channel for host {0} already exists")]
    Duplicate(String),

    #[error("no channel registered for host {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum EffectsError {
    #[error("effect index {0} is out of range")]
    OutOfRange(usize),
}
