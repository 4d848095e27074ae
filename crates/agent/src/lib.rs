//! Message understanding and turn orchestration for the concierge.
//!
//! Each inbound message flows through three stages before the dialog engine
//! sees it:
//! 1. **Spell correction** (`spell`) - optional, time-boxed, never fatal
//! 2. **Intent classification** (`classifier`, `luis`) - text to intent + entities
//! 3. **Turn execution** (`runtime`) - load the session, run the engine, persist
//!
//! The classifier only labels text. Which dialog runs, and what it says, is
//! decided by the dialog registry in `concierge-core`.

pub mod classifier;
pub mod luis;
pub mod runtime;
pub mod spell;

pub use classifier::{ClassifierError, IntentClassifier, KeywordClassifier};
pub use luis::LuisClassifier;
pub use runtime::AgentRuntime;
pub use spell::{apply_corrections, BingSpellCorrector, SpellCorrection, SpellCorrector, SpellError};
