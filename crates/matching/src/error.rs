use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Remote matcher transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Remote matcher returned status {0}")]
    Status(u16),
    #[error("Invalid matcher configuration: {0}")]
    Config(String),
}
