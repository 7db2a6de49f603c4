//! Bridge between the SST cloud thermostat API and the Yandex Alice
//! smart-home protocol.
//!
//! Background pollers ([`services::checker::CheckerService`] and below) keep
//! per-house device snapshots and push changes to the assistant; the
//! [`services::gateway::DeviceGateway`] answers synchronous requests.

pub mod client;
pub mod config;
pub mod db;
pub mod env_file;
pub mod mappers;
pub mod models {
    pub mod alice;
    pub mod sst;
}
pub mod notifier;
pub mod provider;
pub mod schema;
pub mod services {
    pub mod checker;
    pub mod gateway;
    pub mod house_worker;
    pub mod link_worker;
    pub mod worker;
}

#[cfg(test)]
mod testing;
