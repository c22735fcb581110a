//! Library error type.

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

pub use crate::spec::lexer::LexError;
pub use crate::spec::parser::SpecParsingError;
pub use crate::concretize::ConcretizeError;

#[derive(Debug, Error)]
pub enum Error {
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	SerdeJSON(#[from] serde_json::Error),
	#[error("YAML error: {0}")]
	SerdeYAML(#[from] serde_yaml::Error),
	#[error("bincode error: {0}")]
	Bincode(#[from] bincode::Error),
	#[error(transparent)]
	Lex(#[from] LexError),
	#[error(transparent)]
	Parse(#[from] SpecParsingError),
	#[error(transparent)]
	Concretize(#[from] ConcretizeError),
	#[error("validation error: {0}")]
	Validation(String),
}
