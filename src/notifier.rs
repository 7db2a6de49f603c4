//! Push channel towards the assistant: changed devices of one house are
//! delivered as a single state callback.

use chrono::Utc;
use log::debug;

use crate::config::AliceConfig;
use crate::mappers::device_to_state;
use crate::models::alice::{StateCallback, StatePayload};
use crate::provider::{Device, House};

#[derive(Debug)]
pub enum NotifyError {
    Transport(String),
    Http { status: u16, message: String },
    Json(String),
}

impl core::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NotifyError::Transport(s) => write!(f, "transport error: {}", s),
            NotifyError::Http { status, message } => write!(f, "http {}: {}", status, message),
            NotifyError::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for NotifyError {}

impl From<ureq::Error> for NotifyError {
    fn from(value: ureq::Error) -> Self {
        NotifyError::Transport(value.to_string())
    }
}

/// Best-effort delivery of device changes. Callers log and drop errors.
pub trait Notifier: Send + Sync {
    fn notify_devices_changed(&self, house: &House, devices: &[Device]) -> Result<(), NotifyError>;
}

pub struct AliceNotifier {
    agent: ureq::Agent,
    url: String,
    oauth_token: String,
}

impl AliceNotifier {
    pub fn new(config: &AliceConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build()
            .into();

        AliceNotifier {
            agent,
            url: callback_url(&config.address, &config.skill_id),
            oauth_token: config.oauth_token.clone(),
        }
    }
}

fn callback_url(address: &str, skill_id: &str) -> String {
    format!(
        "{}/api/v1/skills/{}/callback/state",
        address.trim_end_matches('/'),
        skill_id
    )
}

/// Callback body for a batch of changed devices of one user.
pub fn state_callback(user_id: &str, devices: &[Device]) -> StateCallback {
    StateCallback {
        ts: Utc::now().timestamp(),
        payload: StatePayload {
            user_id: user_id.to_string(),
            devices: devices.iter().flat_map(device_to_state).collect(),
        },
    }
}

impl Notifier for AliceNotifier {
    fn notify_devices_changed(&self, house: &House, devices: &[Device]) -> Result<(), NotifyError> {
        if devices.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_value(state_callback(&house.user_id, devices))
            .map_err(|e| NotifyError::Json(e.to_string()))?;
        let mut response = self
            .agent
            .post(&self.url)
            .header("Authorization", &format!("OAuth {}", self.oauth_token))
            .send_json(&body)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.body_mut().read_to_string().unwrap_or_default();
            return Err(NotifyError::Http {
                status: status.as_u16(),
                message,
            });
        }

        debug!(
            "Notified {} changed device(s) in house {} for user {}",
            devices.len(),
            house.id,
            house.user_id
        );
        Ok(())
    }
}
