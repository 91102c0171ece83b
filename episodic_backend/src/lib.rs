pub mod config;
pub mod database;
pub mod manager;
pub mod memory;
pub mod observation;

pub use config::MemoryConfig;
pub use database::{EpisodeDatabase, HistoryFilter};
pub use manager::{CommitOutcome, MemoryManager};
pub use memory::{ActionEntry, ActionResult, InventoryState};
pub use observation::Observation;
