//! Asset activation, one state machine per record:
//! `Requested → Polling → Active | TimedOut | Failed`.
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::client::{PlanetApi, PlanetAsset};
use crate::core::cancel::CancelToken;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivationPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ActivationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug)]
pub enum ActivationState {
    Requested,
    Polling { polls: u32 },
    Active(PlanetAsset),
    TimedOut,
    Failed(String),
}

/// Drive one asset to `active`, honoring the timeout and `cancel`.
/// Timeouts and failures are per-record errors the caller can drop.
pub async fn activate(
    api: &dyn PlanetApi,
    item_type: &str,
    id: &str,
    asset_type: &str,
    policy: ActivationPolicy,
    cancel: &CancelToken,
) -> Result<PlanetAsset> {
    let deadline = Instant::now() + policy.timeout;
    let mut state = ActivationState::Requested;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        state = match state {
            ActivationState::Requested => match api.get_asset(item_type, id, asset_type).await? {
                None => ActivationState::Failed(format!("no {} asset", asset_type)),
                Some(asset) if asset.is_active() => ActivationState::Active(asset),
                Some(asset) => {
                    if asset.is_inactive() {
                        api.activate(&asset).await?;
                    }
                    info!("Activating {}. This could take several minutes.", id);
                    ActivationState::Polling { polls: 0 }
                }
            },
            ActivationState::Polling { polls } => {
                if Instant::now() + policy.poll_interval > deadline {
                    ActivationState::TimedOut
                } else {
                    tokio::select! {
                        _ = sleep(policy.poll_interval) => {}
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                    }
                    match api.get_asset(item_type, id, asset_type).await? {
                        None => ActivationState::Failed(format!("{} asset disappeared", asset_type)),
                        Some(asset) if asset.is_active() => ActivationState::Active(asset),
                        Some(asset) => {
                            debug!("{}: {} after {} polls", id, asset.status, polls + 1);
                            ActivationState::Polling { polls: polls + 1 }
                        }
                    }
                }
            }
            ActivationState::Active(asset) => {
                debug!("{} is active", id);
                return Ok(asset);
            }
            ActivationState::TimedOut => {
                warn!("Activation of {} timed out", id);
                return Err(Error::ActivationTimeout {
                    id: id.to_string(),
                    secs: policy.timeout.as_secs(),
                });
            }
            ActivationState::Failed(message) => {
                warn!("Activation of {} failed: {}", id, message);
                return Err(Error::ActivationFailed {
                    id: id.to_string(),
                    message,
                });
            }
        };
    }
}
