pub mod error;
pub use error::Result;
pub use error::Error;

pub mod registry;
pub use registry::Registry;

pub mod config;
pub use config::ResolveOptions;

pub mod platform;
pub mod spec;
pub mod concretize;
