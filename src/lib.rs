pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod market_data;
pub mod relay;
pub mod telemetry;

pub use error::{RelayError, RelayResult};
pub use relay::RelayState;
