pub mod config_watcher;
pub mod data_sync;
pub mod kill_switch;
pub mod manager;
pub mod risk;
pub mod snapshot;
pub mod supervisor;

pub use manager::SessionManager;
pub use supervisor::{ServiceName, SessionController, SupervisorSettings};
