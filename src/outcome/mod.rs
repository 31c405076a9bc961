pub mod entry;
pub mod store;

pub use entry::{Direction, EntryError, Outcome, SimulationEntry, SimulationUpdate};
pub use store::{PruneReport, SimulationOutcomeStore, SymbolHistory};
