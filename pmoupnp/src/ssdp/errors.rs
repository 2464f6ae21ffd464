use crate::http::HttpError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SsdpError {
    #[error("Malformed SSDP message: {0}")]
    Parse(#[from] HttpError),

    #[error("Search is already in progress")]
    SearchInProgress,

    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),
}
