pub mod config;
pub mod error;

pub use config::{load_config, StfeConfig};
pub use error::{StfeError, StfeResult};
