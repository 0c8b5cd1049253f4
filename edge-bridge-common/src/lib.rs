mod logger;
mod settings;

pub use logger::Logger;
pub use settings::{General, IdentityEntry, Inner, Settings, DEFAULT_CONFIG_PATH};
