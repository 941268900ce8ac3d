pub mod interception;
pub mod tracked_app;

pub use interception::{DailyStat, InterceptionRecord};
pub use tracked_app::{ActiveDays, ChallengeMode, Schedule, TrackedApp};
