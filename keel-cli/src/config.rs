//! Configuration module
//!
//! Settings shared by every command. Local runs read the runner settings
//! from `KEEL_*` variables instead.

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the Keel server
    pub server_url: String,
}
