// Startup wiring: config -> generators -> registered reconcilers
pub mod engine;

// Tick loop and its handle
pub mod orchestrator;

// Pull and push export strategies
pub mod reconciliation;

// Metrics about the generator itself
pub mod self_metrics;

// Runtime multiplier overrides
pub mod spikes;
