//! Caching decorator for providers called from request paths.
//!
//! - The wrapped provider is logged in lazily, once; a failed login is
//!   retried by the next call.
//! - House lists and per-house device lists are cached for a fixed TTL.
//! - Cache misses are serialized behind one lock, so concurrent callers
//!   cause at most one upstream call in flight per decorator.
//! - Every outcome is mirrored to the audit log under the link id.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::cache::TtlCache;
use super::{Device, DeviceFactory, DeviceProvider, House, ProviderError};
use crate::db::{AuditLog, LogLevel};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Houses,
    Devices(i64),
}

#[derive(Clone)]
enum CachedValue {
    Houses(Vec<House>),
    Devices(Vec<Device>),
}

pub struct CachingProvider {
    inner: Arc<dyn DeviceProvider>,
    audit: Arc<dyn AuditLog>,
    link_id: String,
    initialized: Mutex<bool>,
    call_lock: Mutex<()>,
    cache: TtlCache<CacheKey, CachedValue>,
}

impl CachingProvider {
    pub fn new(inner: Arc<dyn DeviceProvider>, audit: Arc<dyn AuditLog>, link_id: &str, ttl: Duration) -> Self {
        CachingProvider {
            inner,
            audit,
            link_id: link_id.to_string(),
            initialized: Mutex::new(false),
            call_lock: Mutex::new(()),
            cache: TtlCache::new(ttl),
        }
    }

    fn audit(&self, level: LogLevel, message: &str) {
        self.audit.log(&self.link_id, level, message);
    }

    fn ensure_init(&self) -> Result<(), ProviderError> {
        let mut initialized = self.initialized.lock().unwrap_or_else(PoisonError::into_inner);
        if *initialized {
            return Ok(());
        }
        if let Err(e) = self.inner.init() {
            self.audit(LogLevel::Error, &e.to_string());
            return Err(e);
        }
        self.audit(LogLevel::Info, "Success connected");
        *initialized = true;
        Ok(())
    }

    fn cached_houses(&self) -> Option<Vec<House>> {
        match self.cache.get(&CacheKey::Houses) {
            Some(CachedValue::Houses(houses)) => Some(houses),
            _ => None,
        }
    }

    fn cached_devices(&self, house_id: i64) -> Option<Vec<Device>> {
        match self.cache.get(&CacheKey::Devices(house_id)) {
            Some(CachedValue::Devices(devices)) => Some(devices),
            _ => None,
        }
    }
}

impl DeviceProvider for CachingProvider {
    fn init(&self) -> Result<(), ProviderError> {
        self.ensure_init()
    }

    fn houses(&self) -> Result<Vec<House>, ProviderError> {
        if let Some(houses) = self.cached_houses() {
            return Ok(houses);
        }

        let _call = self.call_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // filled by the caller we waited for
        if let Some(houses) = self.cached_houses() {
            return Ok(houses);
        }
        self.ensure_init()?;

        let houses = self.inner.houses().inspect_err(|e| {
            self.audit(LogLevel::Error, &format!("Failed get houses: {}", e));
        })?;
        self.cache.insert(CacheKey::Houses, CachedValue::Houses(houses.clone()));
        Ok(houses)
    }

    fn devices(&self, house: &House) -> Result<Vec<Device>, ProviderError> {
        if let Some(devices) = self.cached_devices(house.id) {
            return Ok(devices);
        }

        let _call = self.call_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(devices) = self.cached_devices(house.id) {
            return Ok(devices);
        }
        self.ensure_init()?;

        let devices = self.inner.devices(house).inspect_err(|e| {
            self.audit(LogLevel::Error, &format!("Failed get devices: {}", e));
        })?;
        self.audit(
            LogLevel::Info,
            &format!("Success get devices. Total {}", devices.len()),
        );
        self.cache
            .insert(CacheKey::Devices(house.id), CachedValue::Devices(devices.clone()));
        Ok(devices)
    }

    fn set_temperature(&self, device: &Device, value: i32) -> Result<(), ProviderError> {
        self.ensure_init()?;
        self.inner.set_temperature(device, value).inspect_err(|e| {
            self.audit(LogLevel::Error, &format!("Failed set temp: {}", e));
        })?;
        self.audit(
            LogLevel::Info,
            &format!("Success set temp on device {} to {}", device, value),
        );
        Ok(())
    }

    fn power_status(&self, device: &Device, on: bool) -> Result<(), ProviderError> {
        self.ensure_init()?;
        self.inner.power_status(device, on).inspect_err(|e| {
            self.audit(LogLevel::Error, &format!("Failed set power status: {}", e));
        })?;
        self.audit(
            LogLevel::Info,
            &format!("Success set power status on device {} to {}", device, on),
        );
        Ok(())
    }
}

/// Wraps every provider built by `inner` in a [`CachingProvider`].
pub struct CachingFactory {
    inner: Arc<dyn DeviceFactory>,
    audit: Arc<dyn AuditLog>,
    ttl: Duration,
}

impl CachingFactory {
    pub fn new(inner: Arc<dyn DeviceFactory>, audit: Arc<dyn AuditLog>, ttl: Duration) -> Self {
        CachingFactory { inner, audit, ttl }
    }
}

impl DeviceFactory for CachingFactory {
    fn create(&self, user_id: &str, link_id: &str, email: &str, password: &str) -> Arc<dyn DeviceProvider> {
        let inner = self.inner.create(user_id, link_id, email, password);
        Arc::new(CachingProvider::new(inner, self.audit.clone(), link_id, self.ttl))
    }
}
