mod common;

use common::{at, init_logging, users};
use likers_core::{Checkpoint, Cursor, LikerProfile, PostId};
use likers_engine::{ingest, inspect, inspect_all, SqliteStore, Store, StoreError};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn post() -> PostId {
    PostId::new("1799000000000000001")
}

#[test]
fn first_load_creates_a_fresh_checkpoint() {
    init_logging();
    let store = SqliteStore::open_in_memory().unwrap();

    assert_eq!(store.peek_checkpoint(&post()).unwrap(), None);
    let checkpoint = store.load_checkpoint(&post()).unwrap();
    assert_eq!(checkpoint, Checkpoint::fresh(post()));
    assert_eq!(store.peek_checkpoint(&post()).unwrap(), Some(checkpoint));
}

#[test]
fn checkpoint_survives_reopen() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("state.db");

    let saved = Checkpoint::fresh(post()).advance(Some(Cursor::new("abc")), 100, at(60));
    {
        let store = SqliteStore::open(&db).unwrap();
        store.load_checkpoint(&post()).unwrap();
        store.save_checkpoint(&saved).unwrap();
    }

    let store = SqliteStore::open(&db).unwrap();
    assert_eq!(store.load_checkpoint(&post()).unwrap(), saved);
    assert_eq!(store.checkpoints().unwrap(), vec![saved]);
}

#[test]
fn duplicate_likers_are_ignored() {
    init_logging();
    let store = SqliteStore::open_in_memory().unwrap();
    let page = users(3);

    assert_eq!(store.record_likers(&post(), &page, at(0)).unwrap(), 3);
    assert_eq!(store.record_likers(&post(), &page[1..], at(5)).unwrap(), 0);
    assert_eq!(store.count_likers(&post()).unwrap(), 3);

    // Same user under a different post is a separate record.
    let other = PostId::new("2");
    assert_eq!(store.record_likers(&other, &page[..1], at(0)).unwrap(), 1);
    assert_eq!(store.count_likers(&post()).unwrap(), 3);
}

#[test]
fn username_is_not_refreshed_on_reobservation() {
    init_logging();
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .record_likers(&post(), &[LikerProfile::new("7", "old_name")], at(0))
        .unwrap();
    store
        .record_likers(&post(), &[LikerProfile::new("7", "new_name")], at(10))
        .unwrap();

    let records = store.likers(&post()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].profile.username, "old_name");
    assert_eq!(records[0].fetched_at, at(0));
}

#[test]
fn total_never_decreases() {
    init_logging();
    let store = SqliteStore::open_in_memory().unwrap();
    let ahead = Checkpoint::fresh(post()).advance(Some(Cursor::new("c2")), 200, at(10));
    store.save_checkpoint(&ahead).unwrap();

    let stale = Checkpoint::fresh(post()).advance(Some(Cursor::new("c3")), 50, at(20));
    store.save_checkpoint(&stale).unwrap();

    let loaded = store.load_checkpoint(&post()).unwrap();
    assert_eq!(loaded.total_users_found, 200);
    assert_eq!(loaded.next_cursor, Some(Cursor::new("c3")));
}

#[test]
fn completed_checkpoint_is_sealed() {
    init_logging();
    let store = SqliteStore::open_in_memory().unwrap();
    let done = Checkpoint::fresh(post()).advance(None, 10, at(10));
    store.save_checkpoint(&done).unwrap();

    // Re-saving the same terminal state is allowed.
    store.save_checkpoint(&done).unwrap();

    let reopened = Checkpoint::fresh(post()).advance(Some(Cursor::new("c1")), 0, at(20));
    assert!(matches!(
        store.save_checkpoint(&reopened),
        Err(StoreError::Sealed(id)) if id == post()
    ));
    assert_eq!(store.load_checkpoint(&post()).unwrap(), done);
}

#[test]
fn ingest_collapses_in_page_duplicates_and_skips_blank_ids() {
    init_logging();
    let store = SqliteStore::open_in_memory().unwrap();
    let mut page = users(2);
    page.push(page[0].clone());
    page.push(LikerProfile::new("  ", "ghost"));

    assert_eq!(ingest(&store, &post(), &page, at(0)).unwrap(), 2);
    assert_eq!(ingest(&store, &post(), &page, at(1)).unwrap(), 0);
    assert_eq!(ingest(&store, &post(), &[], at(2)).unwrap(), 0);
    assert_eq!(store.count_likers(&post()).unwrap(), 2);
}

#[test]
fn inspect_reports_progress_without_creating_rows() {
    init_logging();
    let store = SqliteStore::open_in_memory().unwrap();

    let unknown = inspect(&store, &post()).unwrap();
    assert_eq!(unknown.checkpoint, None);
    assert_eq!(unknown.liker_count, 0);
    assert!(store.checkpoints().unwrap().is_empty());

    let checkpoint = Checkpoint::fresh(post()).advance(Some(Cursor::new("c100")), 100, at(5));
    store.save_checkpoint(&checkpoint).unwrap();
    store.record_likers(&post(), &users(100), at(5)).unwrap();

    let all = inspect_all(&store).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].checkpoint, Some(checkpoint));
    assert_eq!(all[0].liker_count, 100);
}

#[test]
fn export_time_only_moves_forward_and_survives_reopen() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("state.db");
    {
        let store = SqliteStore::open(&db).unwrap();
        assert_eq!(store.last_export(&post()).unwrap(), None);
        store.record_export(&post(), at(300)).unwrap();
        store.record_export(&post(), at(120)).unwrap();
        assert_eq!(store.last_export(&post()).unwrap(), Some(at(300)));
    }

    let store = SqliteStore::open(&db).unwrap();
    assert_eq!(store.last_export(&post()).unwrap(), Some(at(300)));
    assert_eq!(store.last_export(&PostId::new("2")).unwrap(), None);
    // Recording an export does not create a checkpoint.
    assert_eq!(store.peek_checkpoint(&post()).unwrap(), None);
}
