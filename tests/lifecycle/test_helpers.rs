//! Shared fixtures for lifecycle BDD scenarios.

use std::cell::RefCell;
use std::future::Future;

use jovian_csi::appliance::Appliance;
use jovian_csi::test_support::{FAKE_POOL, FakeAppliance};
use jovian_csi::{LifecycleManager, LifecycleSettings, VolumeDesc};
use rstest::fixture;
use thiserror::Error;
use tokio::runtime::Runtime;

pub const MIB: u64 = 1024 * 1024;

/// Manager under test plus what the scenario observed so far.
#[derive(Debug)]
pub struct LifecycleContext {
    pub manager: LifecycleManager<FakeAppliance>,
    pub listed: RefCell<Vec<String>>,
}

impl LifecycleContext {
    pub fn appliance(&self) -> &FakeAppliance {
        self.manager.appliance().transport()
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] jovian_csi::LifecycleError),
    #[error("invalid name: {0}")]
    Ident(#[from] jovian_csi::ident::IdentError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    LifecycleContext {
        manager: LifecycleManager::new(
            Appliance::new(FakeAppliance::new(), FAKE_POOL),
            LifecycleSettings {
                min_volume_size: 16 * MIB,
                iqn_prefix: String::from("iqn.csi.2019-04"),
            },
        ),
        listed: RefCell::new(Vec::new()),
    }
}

/// Drives one async lifecycle call to completion.
pub fn block_on<F: Future>(future: F) -> Result<F::Output, StepError> {
    let runtime = Runtime::new()?;
    Ok(runtime.block_on(future))
}

/// Backend id a caller-visible volume name maps to.
pub fn volume_id(name: &str) -> Result<String, StepError> {
    Ok(VolumeDesc::from_name(name)?.backend_id().to_owned())
}
