pub mod interceptions;
pub mod tracked_apps;
