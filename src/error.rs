#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The database closed its end of the write connection.
    #[error("peer socket {addr} has closed")]
    PeerClosed { addr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("poller error: {0}")]
    Poller(#[from] nix::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
