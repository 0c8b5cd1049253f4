pub mod manager;
pub mod proxy;
pub mod receiver;

use std::time::Duration;

/// Default wait of one upstream receive call in the C2D loop
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(20);
