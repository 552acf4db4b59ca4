/// Check engine: classifies gateway responses, probes single terminals under
/// the shared concurrency limiter, and merges two-pass outcomes.
pub mod merge;
pub mod parser;
pub mod prober;
pub mod types;

pub use prober::{HttpProber, ProbeConfig, Prober};
pub use types::{Outcome, TerminalStatus};
