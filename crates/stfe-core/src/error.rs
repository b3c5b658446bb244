use thiserror::Error;

pub type StfeResult<T> = Result<T, StfeError>;

#[derive(Debug, Error)]
pub enum StfeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
