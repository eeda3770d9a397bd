pub mod engine;
pub mod sizing;

pub use engine::{CircuitBreakerInfo, CorrelatedPosition, PortfolioSnapshot, RiskEngine, RiskState};
pub use sizing::{size_position, SizingInputs, SizingOutcome};
