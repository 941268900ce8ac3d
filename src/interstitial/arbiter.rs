use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::sync::mpsc;

use crate::db::Database;
use crate::interception::{AllowList, Resolution};

use super::session::InterstitialSession;

/// Turns a concluded session into its side effects: the allow-list grant,
/// the audit-log entry, and the resolution the controller waits for.
#[derive(Clone)]
pub struct InterstitialArbiter {
    allow_list: AllowList,
    db: Option<Database>,
    resolutions: mpsc::UnboundedSender<Resolution>,
}

impl InterstitialArbiter {
    pub fn new(
        allow_list: AllowList,
        db: Option<Database>,
        resolutions: mpsc::UnboundedSender<Resolution>,
    ) -> Self {
        Self {
            allow_list,
            db,
            resolutions,
        }
    }

    pub async fn conclude(&self, session: &InterstitialSession, now: DateTime<Utc>) -> Result<Resolution> {
        let outcome = session
            .outcome()
            .ok_or_else(|| anyhow!("interstitial for {} has not concluded", session.identifier()))?;

        // Grant first: a failed log write must never cost the user their pass.
        if outcome.allowed {
            let expiry = self.allow_list.allow(session.identifier(), now);
            info!(
                "Allowed {} until {} (bypassed={})",
                session.identifier(),
                expiry,
                outcome.bypassed
            );
        }

        if let (Some(db), Some(record)) = (&self.db, session.record()) {
            if let Err(err) = db.insert_interception(&record).await {
                error!("Failed to record interception for {}: {err:?}", record.identifier);
            }
        }

        let resolution = Resolution {
            ticket: session.ticket().clone(),
            allowed: outcome.allowed,
        };
        if self.resolutions.send(resolution.clone()).is_err() {
            warn!("Interception controller is gone; resolution dropped");
        }

        Ok(resolution)
    }
}
