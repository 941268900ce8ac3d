pub mod arbiter;
pub mod challenge;
pub mod escalation;
pub mod roast;
pub mod session;

pub use arbiter::InterstitialArbiter;
pub use challenge::{Challenge, ChallengeInput, Progress, ARITHMETIC_PAIRS, TYPED_PHRASE};
pub use escalation::EscalationPolicy;
pub use session::{InterstitialConfig, InterstitialSession, Outcome, SessionSnapshot, SessionState};
