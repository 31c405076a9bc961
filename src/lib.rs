pub mod advice;
pub mod engine;
pub mod exchange;
pub mod guard;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod outcome;
pub mod regime;
pub mod reliability;
pub mod risk;
pub mod signal;
pub mod sizing;
pub mod state;
