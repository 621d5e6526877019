//! BDD step definitions for volume copies, deletion order and listings.

use jovian_csi::{
    CapacityRange, ContentSource, CreateVolumeRequest, ListSnapshotsRequest, LifecycleError,
};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{LifecycleContext, MIB, StepError, block_on, volume_id};

fn plain_request(name: &str, required_bytes: u64) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: name.to_owned(),
        capacity: CapacityRange {
            required_bytes,
            limit_bytes: 0,
        },
        source: None,
    }
}

fn expect_failure(
    result: Result<(), LifecycleError>,
    code: &str,
) -> Result<LifecycleError, StepError> {
    let Err(err) = result else {
        return Err(StepError::Assertion(format!(
            "expected a {code} failure, the call succeeded"
        )));
    };
    if err.code().to_string() != code {
        return Err(StepError::Assertion(format!(
            "expected {code}, got {}: {}",
            err.code(),
            err.message()
        )));
    }
    Ok(err)
}

#[given("an empty appliance pool")]
fn empty_pool(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    if lifecycle_context.appliance().volume_names().is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from("fixture pool is not empty")))
    }
}

#[given("the appliance serves \"{rows}\" rows per page")]
fn page_size(lifecycle_context: &LifecycleContext, rows: usize) {
    lifecycle_context.appliance().set_page_size(rows);
}

#[given("volume \"{name}\" is locked by another request")]
fn volume_locked(lifecycle_context: &LifecycleContext, name: String) -> Result<(), StepError> {
    let id = volume_id(&name)?;
    lifecycle_context
        .manager
        .locks()
        .lock(&id)
        .map_err(|err| StepError::Assertion(err.to_string()))
}

#[when("I create volume \"{name}\" of \"{mib}\" MiB")]
fn create_volume(
    lifecycle_context: &LifecycleContext,
    name: String,
    mib: u64,
) -> Result<(), StepError> {
    let request = plain_request(&name, mib.saturating_mul(MIB));
    block_on(lifecycle_context.manager.create_volume(&request))??;
    Ok(())
}

#[when("I copy volume \"{source}\" into \"{name}\"")]
fn copy_volume(
    lifecycle_context: &LifecycleContext,
    source: String,
    name: String,
) -> Result<(), StepError> {
    let request = CreateVolumeRequest {
        name,
        capacity: CapacityRange::default(),
        source: Some(ContentSource::Volume(volume_id(&source)?)),
    };
    block_on(lifecycle_context.manager.create_volume(&request))??;
    Ok(())
}

#[when("I snapshot volume \"{volume}\" as \"{name}\"")]
fn snapshot_volume(
    lifecycle_context: &LifecycleContext,
    volume: String,
    name: String,
) -> Result<(), StepError> {
    let id = volume_id(&volume)?;
    block_on(lifecycle_context.manager.create_snapshot(&id, &name))??;
    Ok(())
}

#[when("I delete volume \"{name}\"")]
fn delete_volume(lifecycle_context: &LifecycleContext, name: String) -> Result<(), StepError> {
    let id = volume_id(&name)?;
    block_on(lifecycle_context.manager.delete_volume(&id))??;
    Ok(())
}

#[when("I list volumes \"{window}\" at a time")]
fn list_volumes(lifecycle_context: &LifecycleContext, window: i64) -> Result<(), StepError> {
    let mut token = String::new();
    loop {
        let page = block_on(lifecycle_context.manager.list_volumes(window, &token))??;
        lifecycle_context
            .listed
            .borrow_mut()
            .extend(page.entries.into_iter().map(|info| info.volume_id));
        match page.next_token {
            Some(next) => token = next,
            None => return Ok(()),
        }
    }
}

#[then("deleting volume \"{name}\" fails with \"{code}\" naming \"{dependent}\"")]
fn delete_fails_naming(
    lifecycle_context: &LifecycleContext,
    name: String,
    code: String,
    dependent: String,
) -> Result<(), StepError> {
    let id = volume_id(&name)?;
    let result = block_on(lifecycle_context.manager.delete_volume(&id))?;
    let err = expect_failure(result, &code)?;
    if err.message().contains(&dependent) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "message should name {dependent}: {}",
            err.message()
        )))
    }
}

#[then("creating volume \"{name}\" fails with \"{code}\"")]
fn create_fails(
    lifecycle_context: &LifecycleContext,
    name: String,
    code: String,
) -> Result<(), StepError> {
    let request = plain_request(&name, 0);
    let result = block_on(lifecycle_context.manager.create_volume(&request))?;
    expect_failure(result.map(drop), &code)?;
    Ok(())
}

#[then("volume \"{name}\" carries no snapshots")]
fn no_snapshots(lifecycle_context: &LifecycleContext, name: String) -> Result<(), StepError> {
    let id = volume_id(&name)?;
    let remaining = lifecycle_context.appliance().snapshot_names(&id);
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{id} still carries {remaining:?}"
        )))
    }
}

#[then("the pool holds no volumes")]
fn pool_is_empty(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let remaining = lifecycle_context.appliance().volume_names();
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "volumes left behind: {remaining:?}"
        )))
    }
}

#[then("the snapshot listing shows only \"{name}\"")]
fn snapshot_listing(lifecycle_context: &LifecycleContext, name: String) -> Result<(), StepError> {
    let page = block_on(
        lifecycle_context
            .manager
            .list_snapshots(&ListSnapshotsRequest::default()),
    )??;
    let ids: Vec<String> = page
        .entries
        .into_iter()
        .map(|info| info.snapshot_id)
        .collect();
    match ids.as_slice() {
        [only] if only.ends_with(&format!("_sp_{name}")) => Ok(()),
        _ => Err(StepError::Assertion(format!(
            "expected only {name}, listed {ids:?}"
        ))),
    }
}

#[then("every volume is listed exactly once")]
fn listed_once(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let mut listed = lifecycle_context.listed.borrow().clone();
    listed.sort();
    let expected = lifecycle_context.appliance().volume_names();
    if listed == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "listed {listed:?}, pool holds {expected:?}"
        )))
    }
}
