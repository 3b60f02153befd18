// Core value types shared by every layer
pub mod types;

// Label sets, series keys and name validation
pub mod labels;

// Label space expansion and series caps
pub mod cardinality;

// Per-metric value generators
pub mod generators;

// Port interfaces
pub mod ports;

// Domain-specific error types
pub mod errors;
