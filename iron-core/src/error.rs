use thiserror::Error;

/// Errors that can terminate the data plane or abort startup.
///
/// Most data-plane failures (malformed wire packet, stale QLAM, expired
/// packet, history loop) are *not* represented here: per the error handling
/// design, they are logged and counted in place, and the caller continues.
/// `IronError` is reserved for configuration failures and the handful of
/// conditions the design calls fatal.
#[derive(Error, Debug)]
pub enum IronError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown bin id: {0}")]
    UnknownBin(u8),

    #[error("unknown multicast group: {0:#010x}")]
    UnknownGroup(u32),

    #[error("packet pool exhausted")]
    PoolExhausted,

    #[error("no path controllers configured")]
    NoPathControllers,

    #[error("FEC context not found for port {0}")]
    NoFecContext(u16),

    #[error("buffer too small: need {needed}, have {have}")]
    BufferTooSmall { needed: usize, have: usize },
}

pub type Result<T> = std::result::Result<T, IronError>;
