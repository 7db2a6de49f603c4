//! Blocking HTTP client for the SST cloud API.
//!
//! - One client per upstream account; credentials live with the client.
//! - Token auth (`Authorization: Token <key>`) obtained from `/auth/login/`.
//! - Authenticated calls log in on demand and retry once after a 401.

use http::StatusCode;
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::{Mutex, PoisonError};

use crate::config::SstConfig;
use crate::models::sst::*;

#[derive(Debug)]
pub enum SstClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json(String),
    Auth(String),
}

impl core::fmt::Display for SstClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SstClientError::Transport(s) => write!(f, "transport error: {}", s),
            SstClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            SstClientError::Json(e) => write!(f, "json error: {}", e),
            SstClientError::Auth(e) => write!(f, "auth error: {}", e),
        }
    }
}

impl std::error::Error for SstClientError {}

impl From<ureq::Error> for SstClientError {
    fn from(value: ureq::Error) -> Self {
        SstClientError::Transport(value.to_string())
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    email: String,
    password: String,
}

pub struct SstClient {
    agent: ureq::Agent,
    base_url: String,
    credentials: Credentials,
    token: Mutex<Option<String>>,
}

enum Call<'a> {
    Get,
    Post(&'a serde_json::Value),
}

impl SstClient {
    pub fn new(config: &SstConfig, email: impl Into<String>, password: impl Into<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build()
            .into();

        SstClient {
            agent,
            base_url: config.url.trim_end_matches('/').to_string(),
            credentials: Credentials {
                email: email.into(),
                password: password.into(),
            },
            token: Mutex::new(None),
        }
    }

    pub fn email(&self) -> &str {
        &self.credentials.email
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn current_token(&self) -> Option<String> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Exchange the account credentials for an API token.
    pub fn login(&self) -> Result<(), SstClientError> {
        let request = LoginRequest {
            username: &self.credentials.email,
            password: &self.credentials.password,
            email: &self.credentials.email,
            language: Language::Ru,
        };
        let body = serde_json::to_value(&request).map_err(|e| SstClientError::Json(e.to_string()))?;
        let (status, text) = self.send(&Call::Post(&body), "/auth/login/", None)?;
        if !status.is_success() {
            return Err(SstClientError::Auth(format!("http {}: {}", status.as_u16(), text)));
        }
        let LoginResponse { key } = decode(&text)?;
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(key);
        debug!("SST login succeeded for {}", self.credentials.email);
        Ok(())
    }

    fn send(&self, call: &Call<'_>, path: &str, token: Option<&str>) -> Result<(StatusCode, String), SstClientError> {
        let url = self.url(path);
        let auth = token.map(|t| format!("Token {}", t));
        let response = match call {
            Call::Get => {
                let mut req = self.agent.get(&url).header("Accept", "application/json");
                if let Some(auth) = auth.as_deref() {
                    req = req.header("Authorization", auth);
                }
                req.call()
            }
            Call::Post(body) => {
                let mut req = self.agent.post(&url).header("Accept", "application/json");
                if let Some(auth) = auth.as_deref() {
                    req = req.header("Authorization", auth);
                }
                req.send_json(body)
            }
        };
        let mut response = response?;
        let status = response.status();
        let text = response.body_mut().read_to_string()?;
        Ok((status, text))
    }

    /// Authenticated call: logs in when no token is held, and once more after a 401.
    fn call_authenticated(&self, call: Call<'_>, path: &str) -> Result<String, SstClientError> {
        let token = match self.current_token() {
            Some(t) => t,
            None => {
                self.login()?;
                self.current_token()
                    .ok_or_else(|| SstClientError::Auth("login returned no token".to_string()))?
            }
        };

        let (status, text) = self.send(&call, path, Some(&token))?;
        let (status, text) = if status == StatusCode::UNAUTHORIZED {
            debug!("SST token rejected for {}, logging in again", self.credentials.email);
            self.login()?;
            let token = self
                .current_token()
                .ok_or_else(|| SstClientError::Auth("login returned no token".to_string()))?;
            self.send(&call, path, Some(&token))?
        } else {
            (status, text)
        };

        if status.as_u16() >= 400 {
            return Err(SstClientError::Http {
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(text)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SstClientError> {
        let text = self.call_authenticated(Call::Get, path)?;
        decode(&text)
    }

    fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<(), SstClientError> {
        let body = serde_json::to_value(body).map_err(|e| SstClientError::Json(e.to_string()))?;
        self.call_authenticated(Call::Post(&body), path)?;
        Ok(())
    }

    pub fn houses(&self) -> Result<Vec<House>, SstClientError> {
        self.get_json("/houses/")
    }

    pub fn devices(&self, house_id: HouseId) -> Result<Vec<Device>, SstClientError> {
        let text = self.call_authenticated(Call::Get, &format!("/houses/{}/devices/", house_id.0))?;
        parse_devices(&text)
    }

    pub fn set_power_status(&self, house_id: HouseId, device_id: DeviceId, status: PowerStatus) -> Result<(), SstClientError> {
        self.post(
            &format!("/houses/{}/devices/{}/status/", house_id.0, device_id.0),
            &PowerStatusRequest { status },
        )
    }

    pub fn set_temperature(&self, house_id: HouseId, device_id: DeviceId, temperature: i32) -> Result<(), SstClientError> {
        self.post(
            &format!("/houses/{}/devices/{}/temperature/", house_id.0, device_id.0),
            &TemperatureRequest {
                temperature_manual: temperature,
            },
        )
    }
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, SstClientError> {
    let de = &mut serde_json::Deserializer::from_str(text);
    serde_path_to_error::deserialize(de).map_err(|e| SstClientError::Json(e.to_string()))
}

/// Decode a device listing, including the nested thermostat configuration
/// that the API ships as a JSON string.
pub fn parse_devices(text: &str) -> Result<Vec<Device>, SstClientError> {
    let mut devices: Vec<Device> = decode(text)?;
    for device in devices.iter_mut() {
        if device.device_type != DeviceType::THERMOSTAT || device.parsed_configuration.is_empty() {
            continue;
        }
        let parsed: ThermostatConfiguration = decode(&device.parsed_configuration).map_err(|e| {
            SstClientError::Json(format!("device {} parsed_configuration: {}", device.id.0, e))
        })?;
        device.thermostat = Some(parsed);
    }
    Ok(devices)
}
