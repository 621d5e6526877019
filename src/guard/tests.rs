use super::*;
use std::sync::Arc;
use std::thread;

#[test]
fn second_lock_on_same_id_fails() {
    let table = LockTable::new();
    table.lock("vp_data").expect("first lock succeeds");

    let err = table.lock("vp_data").expect_err("second lock must fail");

    assert_eq!(err, GuardError::Held { id: "vp_data".to_owned() });
}

#[test]
fn distinct_ids_do_not_contend() {
    let table = LockTable::new();
    table.lock("vp_a").expect("lock a");
    table.lock("vp_b").expect("lock b");

    assert!(table.is_held("vp_a"));
    assert!(table.is_held("vp_b"));
}

#[test]
fn unlock_of_free_id_fails() {
    let table = LockTable::new();

    let err = table.unlock("vp_data").expect_err("unlock must fail");

    assert_eq!(err, GuardError::NotHeld { id: "vp_data".to_owned() });
}

#[test]
fn unlock_makes_id_available_again() {
    let table = LockTable::new();
    table.lock("vp_data").expect("lock");
    table.unlock("vp_data").expect("unlock");

    table.lock("vp_data").expect("relock succeeds");
}

#[test]
fn guard_releases_on_early_return() {
    fn fails_midway(table: &LockTable) -> Result<(), GuardError> {
        let _guard = table.acquire("vp_data")?;
        Err(GuardError::Held { id: "other".to_owned() })
    }

    let table = LockTable::new();
    assert!(fails_midway(&table).is_err());

    assert!(!table.is_held("vp_data"));
}

#[test]
fn only_one_thread_wins_a_contended_id() {
    let table = Arc::new(LockTable::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let table = Arc::clone(&table);
            thread::spawn(move || table.lock("vp_shared").is_ok())
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread should not panic"))
        .filter(|won| *won)
        .count();

    assert_eq!(winners, 1);
}
