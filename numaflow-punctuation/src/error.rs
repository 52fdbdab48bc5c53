use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid Interval - {0}")]
    InvalidInterval(String),

    #[error("Punctuate Error - {0}")]
    Punctuate(String),

    #[error("Config Error - {0}")]
    Config(String),
}
