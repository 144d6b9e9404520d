use std::panic::Location;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("io error: {error}, context {context:?}, at {location}")]
    Io {
        #[source]
        error: std::io::Error,
        context: &'static str,
        location: &'static Location<'static>,
    },
    #[error("failed to parse data: {error}, context {context:?}, at {location}")]
    Json {
        #[source]
        error: serde_json::Error,
        context: &'static str,
        location: &'static Location<'static>,
    },
    #[error("allocations total {total} exceeds the pool of {pool}, at {location}")]
    PoolExceeded {
        total: u64,
        pool: u64,
        location: &'static Location<'static>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Filesystem error.
    #[track_caller]
    pub fn io(context: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        let location = std::panic::Location::caller();

        move |error: std::io::Error| Error::Io {
            context,
            location,
            error,
        }
    }

    /// Error when encoding or decoding a stored JSON document.
    #[track_caller]
    pub fn json(context: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        let location = std::panic::Location::caller();

        move |error: serde_json::Error| Error::Json {
            context,
            location,
            error,
        }
    }
}
