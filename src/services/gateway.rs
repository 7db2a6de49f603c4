//! Synchronous side of the assistant integration: device listing, state
//! queries and actions for one user.
//!
//! Listing and actions go upstream through per-user caching providers.
//! Queries are answered from the pollers' in-memory state.

use log::{error, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::checker::CheckerService;
use crate::db::{AuditLog, Link, LinkStorage, StorageError};
use crate::mappers::{MAX_TEMP, MIN_TEMP, device_to_alice, split_sensor_id};
use crate::models::alice::{
    self, ActionCapability, ActionCapabilityResult, ActionRequestDevice, ActionResponseDevice, ActionResult,
    ActionStateResult, CapabilityType, ErrorCode, instance,
};
use crate::provider::caching::CachingFactory;
use crate::provider::{Device, DeviceFactory, DeviceProvider, ProviderError};

#[derive(Debug)]
pub enum GatewayError {
    Storage(StorageError),
    /// Every provider of the user failed.
    AllProvidersFailed(Vec<ProviderError>),
}

impl core::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            GatewayError::Storage(e) => write!(f, "storage error: {}", e),
            GatewayError::AllProvidersFailed(errors) => {
                write!(f, "all {} provider(s) failed", errors.len())?;
                for e in errors {
                    write!(f, "; {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<StorageError> for GatewayError {
    fn from(value: StorageError) -> Self {
        GatewayError::Storage(value)
    }
}

/// A requested capability change, validated.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Command {
    Power(bool),
    Temperature { value: f64, relative: bool },
}

impl Command {
    fn parse(capability: &ActionCapability) -> Result<Command, ActionResult> {
        let state = &capability.state;
        match CapabilityType::parse(&capability.kind) {
            Some(CapabilityType::OnOff) => state.value.as_bool().map(Command::Power).ok_or_else(|| {
                ActionResult::error(ErrorCode::InvalidValue, format!("expected boolean, got {}", state.value))
            }),
            Some(CapabilityType::Range) if state.instance == instance::TEMPERATURE => state
                .value
                .as_f64()
                .map(|value| Command::Temperature {
                    value,
                    relative: state.relative,
                })
                .ok_or_else(|| {
                    ActionResult::error(ErrorCode::InvalidValue, format!("expected number, got {}", state.value))
                }),
            Some(CapabilityType::Range) => Err(ActionResult::error(
                ErrorCode::InvalidAction,
                format!("unknown action {}", state.instance),
            )),
            None => Err(ActionResult::error(
                ErrorCode::InvalidAction,
                format!("unknown action {}", capability.kind),
            )),
        }
    }
}

/// Absolute set-point for a temperature command, within bounds.
fn target_temperature(device: &Device, value: f64, relative: bool) -> Result<i32, ActionResult> {
    // whole degrees; bounds are checked before narrowing to i32
    let value = value.trunc();
    let target = if relative {
        f64::from(device.tempometer.set_degrees_floor.value) + value
    } else {
        value
    };
    if !(f64::from(MIN_TEMP)..=f64::from(MAX_TEMP)).contains(&target) {
        return Err(ActionResult::error(
            ErrorCode::InvalidValue,
            format!("value {} not in range {}-{}", target, MIN_TEMP, MAX_TEMP),
        ));
    }
    Ok(target as i32)
}

struct LinkProvider {
    link: Link,
    provider: Arc<dyn DeviceProvider>,
}

pub struct DeviceGateway {
    storage: Arc<dyn LinkStorage>,
    factory: Arc<dyn DeviceFactory>,
    checker: Arc<CheckerService>,
    providers: Mutex<HashMap<String, Vec<LinkProvider>>>,
}

impl DeviceGateway {
    pub fn new(storage: Arc<dyn LinkStorage>, factory: Arc<dyn DeviceFactory>, checker: Arc<CheckerService>) -> Self {
        DeviceGateway {
            storage,
            factory,
            checker,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Gateway whose providers from `base` are wrapped in audited caching
    /// providers kept for `ttl`.
    pub fn caching(
        storage: Arc<dyn LinkStorage>,
        audit: Arc<dyn AuditLog>,
        base: Arc<dyn DeviceFactory>,
        ttl: Duration,
        checker: Arc<CheckerService>,
    ) -> Self {
        let factory = Arc::new(CachingFactory::new(base, audit, ttl));
        DeviceGateway::new(storage, factory, checker)
    }

    /// Providers for the user's current links, reusing those whose
    /// credentials have not changed.
    fn providers(&self, user_id: &str) -> Result<Vec<Arc<dyn DeviceProvider>>, GatewayError> {
        let links = self.storage.links_for_user(user_id)?;
        let mut cache = self.providers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut previous = cache.remove(user_id).unwrap_or_default();

        let current = links
            .into_iter()
            .map(|link| {
                let reused = previous
                    .iter()
                    .position(|p| p.link.credentials_match(&link))
                    .map(|i| previous.swap_remove(i));
                reused.unwrap_or_else(|| {
                    let provider = self.factory.create(&link.user_id, &link.id, &link.sst_email, &link.sst_password);
                    LinkProvider { link, provider }
                })
            })
            .collect::<Vec<_>>();

        let providers = current.iter().map(|p| p.provider.clone()).collect();
        cache.insert(user_id.to_string(), current);
        Ok(providers)
    }

    fn provider_devices(&self, user_id: &str) -> Result<Vec<(Device, Arc<dyn DeviceProvider>)>, GatewayError> {
        let providers = self.providers(user_id)?;
        let total = providers.len();
        let mut seen = HashSet::new();
        let mut devices = Vec::new();
        let mut errors = Vec::new();

        for provider in providers {
            let listed = provider.houses().and_then(|houses| {
                houses
                    .iter()
                    .map(|h| provider.devices(h))
                    .collect::<Result<Vec<_>, _>>()
            });
            match listed {
                Ok(per_house) => {
                    for device in per_house.into_iter().flatten() {
                        if seen.insert(device.external_id()) {
                            devices.push((device, provider.clone()));
                        }
                    }
                }
                Err(e) => {
                    warn!("user {}: failed to list devices: {}", user_id, e);
                    errors.push(e);
                }
            }
        }

        if total > 0 && errors.len() == total {
            error!("user {}: failed to list devices from all {} provider(s)", user_id, total);
            return Err(GatewayError::AllProvidersFailed(errors));
        }
        Ok(devices)
    }

    /// Every device of the user, fetched upstream.
    pub fn devices(&self, user_id: &str) -> Result<Vec<alice::Device>, GatewayError> {
        Ok(self
            .provider_devices(user_id)?
            .iter()
            .flat_map(|(d, _)| device_to_alice(d))
            .collect())
    }

    /// Current state of the requested devices from the pollers. Unknown ids
    /// are left out.
    pub fn query(&self, user_id: &str, ids: &[String]) -> Vec<alice::Device> {
        let known = self.checker.devices(user_id);
        ids.iter()
            .filter_map(|id| {
                let (parent, _) = split_sensor_id(id);
                let device = known.iter().find(|d| d.external_id() == parent)?;
                device_to_alice(device).into_iter().find(|d| &d.id == id)
            })
            .collect()
    }

    /// Apply each requested capability change and report per-capability results.
    pub fn action(
        &self,
        user_id: &str,
        requests: &[ActionRequestDevice],
    ) -> Result<Vec<ActionResponseDevice>, GatewayError> {
        let devices = self.provider_devices(user_id)?;

        Ok(requests
            .iter()
            .map(|request| {
                let target = devices.iter().find(|(d, _)| d.external_id() == request.id);
                let capabilities = request
                    .capabilities
                    .iter()
                    .map(|capability| {
                        let result = match target {
                            Some((device, provider)) => apply(provider.as_ref(), device, capability),
                            None => ActionResult::error(
                                ErrorCode::DeviceNotFound,
                                format!("device {} not found", request.id),
                            ),
                        };
                        ActionCapabilityResult {
                            kind: capability.kind.clone(),
                            state: ActionStateResult {
                                instance: capability.state.instance.clone(),
                                action_result: result,
                            },
                        }
                    })
                    .collect();
                ActionResponseDevice {
                    id: request.id.clone(),
                    capabilities,
                }
            })
            .collect())
    }
}

fn apply(provider: &dyn DeviceProvider, device: &Device, capability: &ActionCapability) -> ActionResult {
    let outcome = match Command::parse(capability) {
        Ok(Command::Power(on)) => provider.power_status(device, on),
        Ok(Command::Temperature { value, relative }) => match target_temperature(device, value, relative) {
            Ok(target) => provider.set_temperature(device, target),
            Err(invalid) => return invalid,
        },
        Err(invalid) => return invalid,
    };
    match outcome {
        Ok(()) => ActionResult::Done,
        Err(e) => {
            error!("device {}: {} failed: {}", device, capability.kind, e);
            ActionResult::error(ErrorCode::DeviceUnreachable, e.to_string())
        }
    }
}
