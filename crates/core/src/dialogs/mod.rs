pub mod builtin;
pub mod engine;
pub mod greeting;
pub mod registry;
pub mod states;

pub use builtin::default_registry;
pub use engine::{DialogEngine, DialogError, EngineSettings, TurnOutput, TurnRoute};
pub use greeting::{Clock, FixedClock, SystemClock};
pub use registry::{DialogDefinition, DialogRegistry, DialogRegistryBuilder, RegistryError};
pub use states::{InterruptDecision, InterruptHandler, Step, StepContext, StepInput, StepOutcome};
