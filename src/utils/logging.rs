//! Logging that a module can silence with one constant.
//!
//! The classifier and dispatcher see every foreground change, so each keeps a
//! local `ENABLE_LOGS` switch:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_info, log_warn};
//!
//! log_debug!("foreground changed to {}", identifier);
//! ```
//!
//! With the flag off the call compiles away.

/// Conditional `log::debug!`. The calling module must define `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Conditional `log::info!`. The calling module must define `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Conditional `log::warn!`. The calling module must define `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}
