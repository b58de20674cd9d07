pub mod automation;
pub mod config;
pub mod extract;
pub mod items;
pub mod source;
pub mod utils;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
