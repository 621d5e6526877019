//! Unit tests for the lifecycle manager against the in-memory appliance.

use super::*;
use std::collections::BTreeMap;
use crate::appliance::Method;
use crate::test_support::{FAKE_POOL, FakeAppliance, appliance_error};
use rstest::rstest;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

fn manager_with(fake: FakeAppliance) -> LifecycleManager<FakeAppliance> {
    LifecycleManager::new(
        Appliance::new(fake, FAKE_POOL),
        LifecycleSettings {
            min_volume_size: 16 * MIB,
            iqn_prefix: "iqn.csi.2019-04".to_owned(),
        },
    )
}

fn file_manager() -> LifecycleManager<FakeAppliance> {
    LifecycleManager::new(
        Appliance::new(FakeAppliance::new(), FAKE_POOL).with_kind(VolumeKind::File),
        LifecycleSettings {
            min_volume_size: 16 * MIB,
            iqn_prefix: "iqn.csi.2019-04".to_owned(),
        },
    )
}

fn manager() -> LifecycleManager<FakeAppliance> {
    manager_with(FakeAppliance::new())
}

fn fake(manager: &LifecycleManager<FakeAppliance>) -> &FakeAppliance {
    manager.appliance().transport()
}

fn plain(name: &str, required_bytes: u64) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: name.to_owned(),
        capacity: CapacityRange {
            required_bytes,
            limit_bytes: 0,
        },
        source: None,
    }
}

fn copy_of(name: &str, source: &str) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: name.to_owned(),
        capacity: CapacityRange::default(),
        source: Some(ContentSource::Volume(source.to_owned())),
    }
}

#[tokio::test]
async fn clone_lifecycle_hides_and_collects_the_intermediate_snapshot() {
    let manager = manager();

    let source = manager
        .create_volume(&plain("My Volume!", 20 * MIB))
        .await
        .expect("create source");
    assert_eq!(source.volume_id, "vb_TXkgVm9sdW1lIQ");
    assert_eq!(source.capacity_bytes, 20 * MIB);

    let child = manager
        .create_volume(&copy_of("child", &source.volume_id))
        .await
        .expect("create child");
    assert_eq!(child.volume_id, "vp_child");
    assert_eq!(child.capacity_bytes, 20 * MIB);
    assert_eq!(fake(&manager).snapshot_names("vb_TXkgVm9sdW1lIQ"), ["vp_child"]);

    let snapshots = manager
        .list_snapshots(&ListSnapshotsRequest::default())
        .await
        .expect("list snapshots");
    assert!(snapshots.entries.is_empty(), "intermediate snapshot must stay hidden");

    let err = manager
        .delete_volume(&source.volume_id)
        .await
        .expect_err("source still has a dependent");
    assert_eq!(err.code(), Code::FailedPrecondition);
    assert!(err.message().contains("child"), "message: {}", err.message());

    manager.delete_volume("vp_child").await.expect("delete child");
    assert!(fake(&manager).snapshot_names("vb_TXkgVm9sdW1lIQ").is_empty());

    manager
        .delete_volume(&source.volume_id)
        .await
        .expect("delete source");
    assert!(fake(&manager).volume_names().is_empty());
}

#[tokio::test]
async fn clone_chain_is_removed_from_the_leaf_upwards() {
    let manager = manager();
    manager.create_volume(&plain("a", 0)).await.expect("a");
    manager.create_volume(&copy_of("b", "vp_a")).await.expect("b");
    manager.create_volume(&copy_of("c", "vp_b")).await.expect("c");

    let blocked_a = manager.delete_volume("vp_a").await.expect_err("a is busy");
    assert_eq!(blocked_a.code(), Code::FailedPrecondition);
    assert!(blocked_a.message().ends_with(": b c"), "message: {}", blocked_a.message());
    let blocked_b = manager.delete_volume("vp_b").await.expect_err("b is busy");
    assert!(blocked_b.message().ends_with(": c"), "message: {}", blocked_b.message());

    for volume in ["vp_c", "vp_b", "vp_a"] {
        manager.delete_volume(volume).await.expect("delete in order");
    }

    let appliance = fake(&manager);
    assert!(appliance.volume_names().is_empty());
}

#[tokio::test]
async fn legacy_concealed_chain_is_collected_recursively() {
    let fake = FakeAppliance::new();
    fake.add_volume("vp_base", 32 * MIB);
    assert!(fake.add_snapshot("vp_base", "c_first"));
    assert!(fake.add_clone("vp_base", "c_first", "c_hidden"));
    assert!(fake.add_snapshot("c_hidden", "c_second"));
    assert!(fake.add_clone("c_hidden", "c_second", "vp_leaf"));
    let manager = manager_with(fake);

    manager.delete_volume("vp_leaf").await.expect("delete leaf");

    let appliance = self::fake(&manager);
    assert_eq!(appliance.volume_names(), ["vp_base"]);
    assert!(appliance.snapshot_names("vp_base").is_empty());
}

#[tokio::test]
async fn collection_leaves_intermediates_that_still_have_clones() {
    let fake = FakeAppliance::new();
    fake.add_volume("vp_base", 32 * MIB);
    assert!(fake.add_snapshot("vp_base", "c_shared"));
    assert!(fake.add_clone("vp_base", "c_shared", "vp_one"));
    assert!(fake.add_clone("vp_base", "c_shared", "vp_two"));
    let manager = manager_with(fake);

    manager.delete_volume("vp_one").await.expect("delete one");

    let appliance = self::fake(&manager);
    assert_eq!(appliance.snapshot_names("vp_base"), ["c_shared"]);
    assert_eq!(appliance.clones_of("vp_base", "c_shared"), ["vp_two"]);
}

#[tokio::test]
async fn unused_intermediates_are_reclaimed_before_deleting_the_source() {
    let fake = FakeAppliance::new();
    fake.add_volume("vp_src", 32 * MIB);
    assert!(fake.add_snapshot("vp_src", "vp_gone"));
    let manager = manager_with(fake);

    manager.delete_volume("vp_src").await.expect("delete source");

    assert!(!self::fake(&manager).has_volume("vp_src"));
}

#[tokio::test]
async fn public_snapshots_block_volume_deletion() {
    let manager = manager();
    manager.create_volume(&plain("data", 0)).await.expect("volume");
    manager
        .create_snapshot("vp_data", "nightly")
        .await
        .expect("snapshot");

    let err = manager
        .delete_volume("vp_data")
        .await
        .expect_err("snapshot blocks deletion");

    assert_eq!(err.code(), Code::FailedPrecondition);
    assert!(err.message().contains("nightly"), "message: {}", err.message());
}

#[tokio::test]
async fn deleting_a_missing_volume_succeeds() {
    let manager = manager();

    manager.delete_volume("vp_ghost").await.expect("idempotent delete");
}

#[tokio::test]
async fn deleting_twice_in_a_row_succeeds_both_times() {
    let manager = manager();
    manager.create_volume(&plain("data", 0)).await.expect("volume");

    manager.delete_volume("vp_data").await.expect("first delete");
    manager.delete_volume("vp_data").await.expect("second delete");

    assert!(!fake(&manager).has_volume("vp_data"));
}

#[tokio::test]
async fn volume_vanishing_during_a_busy_delete_counts_as_deleted() {
    let manager = manager();
    manager.create_volume(&plain("data", 0)).await.expect("volume");
    let appliance = fake(&manager);
    appliance.fail_next(
        Method::Delete,
        "volumes/vp_data",
        Ok(appliance_error(
            500,
            Some(1000),
            "cannot destroy 'Pool-0/vp_data': volume has children\nuse '-r' to destroy the following datasets:\nPool-0/vp_data@sp_x",
        )),
    );
    appliance.fail_next(
        Method::Get,
        "vp_data/snapshots",
        Ok(appliance_error(
            500,
            Some(1),
            "Zfs resource: Pool-0/vp_data not found in this collection.",
        )),
    );
    appliance.fail_next(
        Method::Delete,
        "volumes/vp_data",
        Ok(appliance_error(
            500,
            Some(1),
            "Zfs resource: Pool-0/vp_data not found in this collection.",
        )),
    );

    manager
        .delete_volume("vp_data")
        .await
        .expect("a volume gone mid-delete is deleted");
}

#[tokio::test]
async fn delete_volume_rejects_malformed_ids() {
    let manager = manager();

    let err = manager
        .delete_volume("not-an-id")
        .await
        .expect_err("malformed id");

    assert_eq!(err.code(), Code::InvalidArgument);
}

#[rstest]
#[case(0, 0, 16 * MIB)]
#[case(MIB, 0, 16 * MIB)]
#[case(20 * MIB, 0, 20 * MIB)]
#[case(20 * MIB, 30 * MIB, 30 * MIB)]
#[case(0, 24 * MIB, 24 * MIB)]
#[tokio::test]
async fn plain_volumes_follow_the_size_policy(
    #[case] required_bytes: u64,
    #[case] limit_bytes: u64,
    #[case] expected: u64,
) {
    let manager = manager();
    let request = CreateVolumeRequest {
        name: "sized".to_owned(),
        capacity: CapacityRange {
            required_bytes,
            limit_bytes,
        },
        source: None,
    };

    let info = manager.create_volume(&request).await.expect("create");

    assert_eq!(info.capacity_bytes, expected);
    assert_eq!(fake(&manager).volume_size("vp_sized"), Some(expected));
}

#[rstest]
#[case(30 * MIB, 20 * MIB)]
#[case(0, 8 * MIB)]
#[tokio::test]
async fn unsatisfiable_sizes_are_out_of_range(#[case] required_bytes: u64, #[case] limit_bytes: u64) {
    let manager = manager();
    let request = CreateVolumeRequest {
        name: "sized".to_owned(),
        capacity: CapacityRange {
            required_bytes,
            limit_bytes,
        },
        source: None,
    };

    let err = manager.create_volume(&request).await.expect_err("size rejected");

    assert_eq!(err.code(), Code::OutOfRange);
    assert!(!fake(&manager).has_volume("vp_sized"));
}

#[tokio::test]
async fn clones_cannot_grow_beyond_their_source() {
    let manager = manager();
    manager.create_volume(&plain("src", 20 * MIB)).await.expect("src");
    let mut request = copy_of("bigger", "vp_src");
    request.capacity.required_bytes = 40 * MIB;

    let err = manager.create_volume(&request).await.expect_err("too big");

    assert_eq!(err.code(), Code::OutOfRange);
    assert!(fake(&manager).snapshot_names("vp_src").is_empty());
}

#[tokio::test]
async fn repeated_create_returns_the_existing_volume() {
    let manager = manager();
    let first = manager.create_volume(&plain("data", 20 * MIB)).await.expect("first");

    let second = manager.create_volume(&plain("data", 20 * MIB)).await.expect("second");

    assert_eq!(first, second);
}

#[tokio::test]
async fn existing_volume_that_is_too_small_conflicts() {
    let manager = manager();
    manager.create_volume(&plain("data", 20 * MIB)).await.expect("first");

    let err = manager
        .create_volume(&plain("data", GIB))
        .await
        .expect_err("size mismatch");

    assert_eq!(err.code(), Code::AlreadyExists);
}

#[tokio::test]
async fn existing_volume_with_a_different_origin_conflicts() {
    let manager = manager();
    manager.create_volume(&plain("src", 0)).await.expect("src");
    manager.create_volume(&plain("copy", 0)).await.expect("plain copy");

    let err = manager
        .create_volume(&copy_of("copy", "vp_src"))
        .await
        .expect_err("origin mismatch");

    assert_eq!(err.code(), Code::AlreadyExists);
}

#[tokio::test]
async fn repeated_clone_from_volume_is_accepted() {
    let manager = manager();
    manager.create_volume(&plain("src", 0)).await.expect("src");
    let first = manager.create_volume(&copy_of("copy", "vp_src")).await.expect("first");

    let second = manager
        .create_volume(&copy_of("copy", "vp_src"))
        .await
        .expect("second");

    assert_eq!(first, second);
    let fetched = manager.get_volume("vp_copy").await.expect("get");
    assert_eq!(fetched.source, Some(ContentSource::Volume("vp_src".to_owned())));
}

#[tokio::test]
async fn leftover_intermediate_snapshot_is_reused() {
    let fake = FakeAppliance::new();
    fake.add_volume("vp_src", 32 * MIB);
    assert!(fake.add_snapshot("vp_src", "vp_copy"));
    let manager = manager_with(fake);

    let info = manager
        .create_volume(&copy_of("copy", "vp_src"))
        .await
        .expect("create reusing snapshot");

    assert_eq!(info.capacity_bytes, 32 * MIB);
    assert_eq!(self::fake(&manager).clones_of("vp_src", "vp_copy"), ["vp_copy"]);
}

#[tokio::test]
async fn volume_cannot_be_created_from_itself() {
    let manager = manager();

    let err = manager
        .create_volume(&copy_of("loop", "vp_loop"))
        .await
        .expect_err("self copy");

    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn volume_from_snapshot_inherits_its_size_and_source() {
    let manager = manager();
    manager.create_volume(&plain("src", 24 * MIB)).await.expect("src");
    let snapshot = manager
        .create_snapshot("vp_src", "golden")
        .await
        .expect("snapshot");
    let request = CreateVolumeRequest {
        name: "restored".to_owned(),
        capacity: CapacityRange::default(),
        source: Some(ContentSource::Snapshot(snapshot.snapshot_id.clone())),
    };

    let info = manager.create_volume(&request).await.expect("restore");

    assert_eq!(info.capacity_bytes, 24 * MIB);
    let fetched = manager.get_volume("vp_restored").await.expect("get");
    assert_eq!(
        fetched.source,
        Some(ContentSource::Snapshot(snapshot.snapshot_id))
    );
}

#[tokio::test]
async fn volume_from_missing_snapshot_is_not_found() {
    let manager = manager();
    manager.create_volume(&plain("src", 0)).await.expect("src");
    let request = CreateVolumeRequest {
        name: "restored".to_owned(),
        capacity: CapacityRange::default(),
        source: Some(ContentSource::Snapshot("vp_src_sp_missing".to_owned())),
    };

    let err = manager.create_volume(&request).await.expect_err("missing");

    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn busy_volume_aborts_concurrent_operations() {
    let manager = manager();
    manager.create_volume(&plain("data", 0)).await.expect("volume");
    manager.locks().lock("vp_data").expect("hold the lock");

    let err = manager.delete_volume("vp_data").await.expect_err("busy");

    assert_eq!(err.code(), Code::Aborted);
    manager.locks().unlock("vp_data").expect("release");
    manager.delete_volume("vp_data").await.expect("delete once free");
}

#[tokio::test]
async fn locks_are_released_after_failures() {
    let manager = manager();

    let err = manager
        .create_volume(&plain("huge", 200 * GIB))
        .await
        .expect_err("pool too small");

    assert_eq!(err.code(), Code::ResourceExhausted);
    assert!(!manager.locks().is_held("vp_huge"));
}

#[tokio::test]
async fn unreachable_appliance_is_unavailable() {
    let fake = FakeAppliance::new();
    fake.fail_next(
        Method::Get,
        "volumes/vp_data",
        Err(crate::appliance::TransportError::Unreachable {
            address: "192.0.2.1".to_owned(),
            message: "connection refused".to_owned(),
        }),
    );
    let manager = manager_with(fake);

    let err = manager.get_volume("vp_data").await.expect_err("unreachable");

    assert_eq!(err.code(), Code::Unavailable);
}

#[tokio::test]
async fn unexplained_appliance_errors_are_internal() {
    let fake = FakeAppliance::new();
    fake.fail_next(
        Method::Delete,
        "volumes/vp_data",
        Ok(appliance_error(500, Some(42), "disk on fire")),
    );
    fake.add_volume("vp_data", 16 * MIB);
    let manager = manager_with(fake);

    let err = manager.delete_volume("vp_data").await.expect_err("unknown");

    assert_eq!(err.code(), Code::Internal);
    assert!(err.message().contains("disk on fire"));
}

#[tokio::test]
async fn volume_listing_pages_through_everything_and_hides_concealed_volumes() {
    let fake = FakeAppliance::new().with_page_size(2);
    for name in ["vp_a", "vp_b", "c_hidden", "vp_d", "foreign-zvol"] {
        fake.add_volume(name, 16 * MIB);
    }
    let manager = manager_with(fake);

    let mut seen = Vec::new();
    let mut token = String::new();
    loop {
        let page = manager.list_volumes(2, &token).await.expect("page");
        seen.extend(page.entries.into_iter().map(|info| info.volume_id));
        match page.next_token {
            Some(next) => token = next,
            None => break,
        }
    }

    seen.sort();
    assert_eq!(seen, ["vp_a", "vp_b", "vp_d"]);
}

#[tokio::test]
async fn zero_window_lists_everything_at_once() {
    let fake = FakeAppliance::new().with_page_size(2);
    for name in ["vp_a", "vp_b", "vp_c"] {
        fake.add_volume(name, 16 * MIB);
    }
    let manager = manager_with(fake);

    let page = manager.list_volumes(0, "").await.expect("list");

    assert_eq!(page.entries.len(), 3);
    assert_eq!(page.next_token, None);
}

#[rstest]
#[case(-1, "", Code::InvalidArgument)]
#[case(5, "garbage", Code::Aborted)]
#[tokio::test]
async fn bad_listing_arguments_are_rejected(
    #[case] max_entries: i64,
    #[case] token: &str,
    #[case] expected: Code,
) {
    let manager = manager();

    let err = manager
        .list_volumes(max_entries, token)
        .await
        .expect_err("rejected");

    assert_eq!(err.code(), expected);
}

#[tokio::test]
async fn snapshot_lifecycle_round_trip() {
    let manager = manager();
    manager.create_volume(&plain("data", 20 * MIB)).await.expect("volume");

    let created = manager
        .create_snapshot("vp_data", "nightly")
        .await
        .expect("create snapshot");
    assert_eq!(created.snapshot_id, "vp_data_sp_nightly");
    assert_eq!(created.source_volume_id, "vp_data");
    assert_eq!(created.size_bytes, 20 * MIB);
    assert!(created.ready_to_use);
    assert!(created.creation_time.is_some());

    let repeated = manager
        .create_snapshot("vp_data", "nightly")
        .await
        .expect("repeat is idempotent");
    assert_eq!(repeated, created);

    let fetched = manager
        .get_snapshot(&created.snapshot_id)
        .await
        .expect("get snapshot");
    assert_eq!(fetched, created);

    manager
        .delete_snapshot(&created.snapshot_id)
        .await
        .expect("delete snapshot");
    manager
        .delete_snapshot(&created.snapshot_id)
        .await
        .expect("delete is idempotent");
    assert!(fake(&manager).snapshot_names("vp_data").is_empty());
}

#[tokio::test]
async fn snapshot_of_missing_volume_is_not_found() {
    let manager = manager();

    let err = manager
        .create_snapshot("vp_ghost", "nightly")
        .await
        .expect_err("missing volume");

    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn snapshot_with_clones_cannot_be_deleted() {
    let manager = manager();
    manager.create_volume(&plain("src", 0)).await.expect("src");
    let snapshot = manager
        .create_snapshot("vp_src", "golden")
        .await
        .expect("snapshot");
    let request = CreateVolumeRequest {
        name: "restored".to_owned(),
        capacity: CapacityRange::default(),
        source: Some(ContentSource::Snapshot(snapshot.snapshot_id.clone())),
    };
    manager.create_volume(&request).await.expect("restore");

    let err = manager
        .delete_snapshot(&snapshot.snapshot_id)
        .await
        .expect_err("clone blocks deletion");

    assert_eq!(err.code(), Code::FailedPrecondition);
    assert!(err.message().contains("restored"), "message: {}", err.message());
}

#[tokio::test]
async fn snapshot_listings_show_only_public_snapshots() {
    let manager = manager();
    manager.create_volume(&plain("src", 0)).await.expect("src");
    manager.create_snapshot("vp_src", "one").await.expect("one");
    manager.create_snapshot("vp_src", "two").await.expect("two");
    manager.create_volume(&copy_of("copy", "vp_src")).await.expect("copy");

    let per_volume = manager
        .list_snapshots(&ListSnapshotsRequest {
            source_volume_id: Some("vp_src".to_owned()),
            ..ListSnapshotsRequest::default()
        })
        .await
        .expect("per volume");
    let pool_wide = manager
        .list_snapshots(&ListSnapshotsRequest::default())
        .await
        .expect("pool wide");

    let ids = |paged: &Paged<SnapshotInfo>| {
        paged
            .entries
            .iter()
            .map(|info| info.snapshot_id.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&per_volume), ["vp_src_sp_one", "vp_src_sp_two"]);
    assert_eq!(ids(&pool_wide), ["vp_src_sp_one", "vp_src_sp_two"]);
}

#[tokio::test]
async fn snapshot_lookups_by_id_tolerate_missing_snapshots() {
    let manager = manager();
    manager.create_volume(&plain("src", 0)).await.expect("src");
    manager.create_snapshot("vp_src", "one").await.expect("one");

    let found = manager
        .list_snapshots(&ListSnapshotsRequest {
            snapshot_id: Some("vp_src_sp_one".to_owned()),
            ..ListSnapshotsRequest::default()
        })
        .await
        .expect("lookup");
    let missing = manager
        .list_snapshots(&ListSnapshotsRequest {
            snapshot_id: Some("vp_src_sp_other".to_owned()),
            ..ListSnapshotsRequest::default()
        })
        .await
        .expect("lookup");
    let missing_volume = manager
        .list_snapshots(&ListSnapshotsRequest {
            source_volume_id: Some("vp_ghost".to_owned()),
            ..ListSnapshotsRequest::default()
        })
        .await
        .expect("listing");

    assert_eq!(found.entries.len(), 1);
    assert!(missing.entries.is_empty());
    assert!(missing_volume.entries.is_empty());
}

#[rstest]
#[case(false, "wt")]
#[case(true, "ro")]
#[tokio::test]
async fn publish_context_names_the_target(#[case] read_only: bool, #[case] mode: &str) {
    let manager = manager();
    manager.create_volume(&plain("data", 0)).await.expect("volume");

    let context = manager
        .publish_volume("vp_data", read_only)
        .await
        .expect("publish");

    assert_eq!(context.get("protocol_type").map(String::as_str), Some("iSCSI"));
    assert_eq!(context.get("read_only").map(String::as_str), Some(mode));
    assert_eq!(
        context.get("target").map(String::as_str),
        Some("iqn.csi.2019-04:vp_data")
    );
    assert_eq!(context.get("lun").map(String::as_str), Some("0"));
}

#[tokio::test]
async fn file_publish_context_names_the_share() {
    let manager = file_manager();
    manager.create_volume(&plain("data", 0)).await.expect("volume");

    let context = manager.publish_volume("vp_data", true).await.expect("publish");

    assert_eq!(
        context,
        BTreeMap::from([
            ("protocol_type".to_owned(), "NFS".to_owned()),
            ("read_only".to_owned(), "ro".to_owned()),
            ("share_path".to_owned(), "/vp_data".to_owned()),
        ])
    );
}

#[tokio::test]
async fn file_volumes_are_shared_while_they_exist() {
    let manager = file_manager();

    manager.create_volume(&plain("data", 0)).await.expect("create");
    manager
        .create_volume(&plain("data", 0))
        .await
        .expect("repeated create complies");

    let fake = fake(&manager);
    assert_eq!(fake.volume_kind("vp_data"), Some(VolumeKind::File));
    assert_eq!(fake.share_names(), ["vp_data"]);
    assert_eq!(
        fake.share_path("vp_data").as_deref(),
        Some("Pool-0/vp_data/vp_data")
    );

    manager.delete_volume("vp_data").await.expect("delete");
    assert!(!fake.has_volume("vp_data"));
    assert!(fake.share_names().is_empty());
}

#[tokio::test]
async fn file_clones_inherit_the_owner_quota_and_get_their_own_share() {
    let manager = file_manager();
    manager
        .create_volume(&plain("src", 20 * MIB))
        .await
        .expect("source");
    let snapshot = manager
        .create_snapshot("vp_src", "golden")
        .await
        .expect("snapshot");

    let restored = manager
        .create_volume(&CreateVolumeRequest {
            name: "restored".to_owned(),
            capacity: CapacityRange::default(),
            source: Some(ContentSource::Snapshot(snapshot.snapshot_id)),
        })
        .await
        .expect("restore");
    let copy = manager
        .create_volume(&copy_of("copy", "vp_src"))
        .await
        .expect("copy");

    assert_eq!(restored.capacity_bytes, 20 * MIB);
    assert_eq!(copy.capacity_bytes, 20 * MIB);
    let fake = fake(&manager);
    assert_eq!(fake.share_names(), ["vp_copy", "vp_restored", "vp_src"]);

    manager.delete_volume("vp_copy").await.expect("delete copy");
    assert_eq!(fake.share_names(), ["vp_restored", "vp_src"]);
    assert!(!fake.snapshot_names("vp_src").contains(&"vp_copy".to_owned()));
}

#[tokio::test]
async fn publishing_a_missing_volume_is_not_found_but_unpublishing_succeeds() {
    let manager = manager();

    let err = manager
        .publish_volume("vp_ghost", false)
        .await
        .expect_err("missing volume");

    assert_eq!(err.code(), Code::NotFound);
    manager
        .unpublish_volume("vp_ghost")
        .await
        .expect("unpublish is idempotent");
}

#[tokio::test]
async fn capacity_reports_pool_space_and_minimum_size() {
    let manager = manager_with(FakeAppliance::new().with_available(5 * GIB));

    let capacity = manager.get_capacity().await.expect("capacity");

    assert_eq!(
        capacity,
        Capacity {
            available_bytes: 5 * GIB,
            minimum_volume_size: 16 * MIB,
        }
    );
}
