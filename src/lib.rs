//! Hub Client - Main Library
//!
//! Root package of the workspace: re-exports the connection library and hosts
//! the utilities shared by the binaries.
//!
//! ## Architecture
//!
//! - **hubsockets**: persistent connection engine and hub RPC layer (re-exported from workspace)
//! - **bin_common**: configuration lookup and logging setup for binaries
//!
//! ## Usage in Binaries
//!
//! ```rust,no_run
//! use hub_client::bin_common::{init_tracing, load_config_from_env};
//! use hub_client::hubsockets::ClientConfig;
//!
//! let config = ClientConfig::load(load_config_from_env()).unwrap();
//! init_tracing(&config.log_level);
//! ```

// Re-export workspace libraries for convenience
pub use hubsockets;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;
    pub mod logging;

    pub use cli::{load_config_from_env, parse_args, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
    pub use logging::init_tracing;
}
