pub mod analyzer;
pub mod indicators;
pub mod signal;
pub mod support_resistance;
pub mod trade_plan;


pub use analyzer::*;
pub use indicators::*;
pub use signal::*;
pub use support_resistance::*;
pub use trade_plan::*;
