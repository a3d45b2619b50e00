//! Multiplexer Facades
//!
//! Factory functions for [`IoMultiplexer`] on the platform's default backend.

use adapters_io_mux::{IoMultiplexer, MuxConfig, MuxError};

/// Create a multiplexer with default configuration
pub fn make_muxer() -> Result<IoMultiplexer, MuxError> {
    IoMultiplexer::new()
}

/// Create a multiplexer with custom configuration
pub fn make_muxer_with(config: MuxConfig) -> Result<IoMultiplexer, MuxError> {
    IoMultiplexer::with_config(config)
}
