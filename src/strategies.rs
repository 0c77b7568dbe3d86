pub mod dca;
pub mod exit;
pub mod ladder;
pub mod orchestrator;
pub mod selection;
