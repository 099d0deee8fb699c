#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("note not found")]
    NotFound,

    #[error("no reformat to revert")]
    NothingToRevert,

    #[error("malformed import: {0}")]
    MalformedImport(String),

    #[error("classification error: {0}")]
    Classify(#[from] crate::classify::ClassifyError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
