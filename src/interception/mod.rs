pub mod allow_list;
pub mod cache;
pub mod classifier;
pub mod controller;
pub mod dispatcher;
pub mod recent_opens;
pub mod schedule;

pub use allow_list::AllowList;
pub use cache::{sync_tracked_app_cache, TrackedAppCache};
pub use classifier::{
    Classification, Decision, DispatchTicket, ForegroundClassifier, ForegroundState, SkipReason,
    SurfaceIdentity, Transition,
};
pub use controller::{FailsafeTiming, ForegroundEvent, InterceptionController, Resolution};
pub use dispatcher::{
    ChannelLauncher, Dispatcher, EscalationFeed, InterstitialLauncher, InterstitialRequest,
    OpenCounts,
};
pub use recent_opens::RecentOpens;
