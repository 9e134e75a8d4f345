pub mod archive;
pub mod config;
pub mod deps;
pub mod descriptor;
pub mod entry;
pub mod error;
pub mod expand;
pub mod extract;
pub mod lock;
pub mod paths;

pub use config::ExpandConfig;
pub use error::Error;
