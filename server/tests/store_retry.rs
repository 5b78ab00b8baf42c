//! Store-writer behavior: retry with backoff, the drop-after-five
//! policy, and drain-on-shutdown.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use mxo_server::store::{
    CharacterRow, MemoryStore, SaveOp, Store, StoreError, StoreWriter, WorldData,
};
use mxo_shared::Location;

/// Fails the first `failures` character saves, then delegates.
struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(failures),
        }
    }
}

impl Store for FlakyStore {
    fn load_character(&self, character_id: u64) -> Result<CharacterRow, StoreError> {
        self.inner.load_character(character_id)
    }

    fn save_character(&self, row: &CharacterRow) -> Result<(), StoreError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("induced failure"));
        }
        self.inner.save_character(row)
    }

    fn load_world(&self, world_name: &str) -> Result<WorldData, StoreError> {
        self.inner.load_world(world_name)
    }

    fn save_appearance(&self, character_id: u64, blob: &[u8]) -> Result<(), StoreError> {
        self.inner.save_appearance(character_id, blob)
    }

    fn save_position(
        &self,
        character_id: u64,
        district: u8,
        position: &Location,
    ) -> Result<(), StoreError> {
        self.inner.save_position(character_id, district, position)
    }
}

#[test]
fn transient_failures_are_retried_with_backoff() {
    let store = Arc::new(FlakyStore::new(3));
    let writer = StoreWriter::spawn(store.clone());

    let mut row = CharacterRow::sample(42, "Ghost");
    row.experience = 4242;
    writer.handle().enqueue(SaveOp::Character(row));
    writer.shutdown();

    // three failures burn attempts 1-3, attempt 4 lands
    let saved = store.inner.character(42).expect("write eventually applied");
    assert_eq!(saved.experience, 4242);
}

#[test]
fn exhausted_retries_drop_the_write() {
    let store = Arc::new(FlakyStore::new(u32::MAX));
    let writer = StoreWriter::spawn(store.clone());

    writer
        .handle()
        .enqueue(SaveOp::Character(CharacterRow::sample(42, "Ghost")));
    writer.shutdown();

    // the write was abandoned; memory stays authoritative upstream
    assert!(store.inner.character(42).is_none());
}

#[test]
fn queued_writes_drain_in_order_on_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let writer = StoreWriter::spawn(store.clone());
    let handle = writer.handle();

    for experience in [1u64, 2, 3] {
        let mut row = CharacterRow::sample(7, "Seraph");
        row.experience = experience;
        handle.enqueue(SaveOp::Character(row));
    }
    writer.shutdown();

    assert_eq!(store.character(7).unwrap().experience, 3);
}
