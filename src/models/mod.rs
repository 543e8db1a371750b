pub mod action;
pub mod energy;
pub mod price;
pub mod settings;
pub mod status;

pub use action::{Action, BatteryMode, SolarMode};
pub use energy::EnergyStats;
pub use price::Price;
pub use settings::Settings;
pub use status::{PowerControlConfig, SystemStatus};
