pub mod config;
pub mod narration;
pub mod phone;
pub mod statement;

pub use config::{ConfigError, ParserConfig};
pub use narration::NarrationParser;
pub use phone::PhoneNormalizer;
pub use statement::{
    read_statement, StatementColumnMapping, StatementError, StatementProfile, StatementRow,
};
