//! Core library: adapters over cooperating fuzzing engines, a scoring strategy for ranking
//! candidates, and the supervisor that pollinates one engine's queue into another's.

pub mod adapter;
pub mod error;
mod layout;
pub mod scorer;
pub mod supervisor;
pub mod testcase;
pub mod timer;
pub mod tracer;

pub use adapter::{Adapter, AssistedAdapter, MutationalAdapter};
pub use error::{ConfigError, StartFailure, TimerError};
pub use scorer::{LengthScorer, Scorer, TraceScorer};
pub use supervisor::{ScorerChoice, Supervisor, SupervisorConfig};
pub use testcase::{FuzzerIdentifier, Testcase};
pub use timer::PeriodicTimer;
pub use tracer::{ConcolicTracer, ProcessTracer, TraceResult, TracerError};
