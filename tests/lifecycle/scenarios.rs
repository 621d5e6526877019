//! BDD scenarios for the clone-based volume lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Copy a volume and delete both in dependency order"
)]
fn scenario_copy_and_delete(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Delete a chain of copies from the leaf upwards"
)]
fn scenario_delete_chain(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Hidden snapshots never appear in listings"
)]
fn scenario_hidden_snapshots(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Busy volumes abort concurrent requests"
)]
fn scenario_busy_volume(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Volume listings resume across small pages"
)]
fn scenario_resumable_listing(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}
