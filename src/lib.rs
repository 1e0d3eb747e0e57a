pub mod client;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod installation_key;
pub mod proof;
pub mod session;
pub mod storage;
pub mod switch;
mod transport;

pub use client::{ApiRequest, LaMarzoccoClient};
pub use dashboard::{extract_power_from_dashboard, DashboardSnapshot, Widget};
pub use error::{Error, Result};
pub use installation_key::{
    generate_installation_id, generate_installation_key, parse_installation_key, InstallationKey,
    ParsedInstallationKey,
};
pub use session::SessionToken;
pub use switch::PowerSwitch;
pub use transport::DEFAULT_BASE_URL;
