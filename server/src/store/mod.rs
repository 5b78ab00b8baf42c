mod mysql;

pub use mysql::MySqlStore;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, warn};
use parking_lot::Mutex;
use smol::channel::{self, Receiver, Sender};
use thiserror::Error;

use mxo_shared::Location;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("character {0} not found")]
    CharacterNotFound(u64),

    #[error("world {0:?} not found")]
    WorldNotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One row of the characters table, with the appearance blob joined in.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterRow {
    pub character_id: u64,
    pub account_id: u32,
    pub handle: String,
    pub first_name: String,
    pub last_name: String,
    pub background: String,
    pub experience: u64,
    pub information: u64,
    pub district: u8,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rotation: f64,
    pub health_current: u16,
    pub health_max: u16,
    pub inner_strength_current: u16,
    pub inner_strength_max: u16,
    pub profession: u32,
    pub level: u8,
    pub alignment: u8,
    pub pvp_flag: bool,
    pub appearance: Vec<u8>,
}

impl CharacterRow {
    /// A plausible default character, used to seed in-memory stores.
    pub fn sample(character_id: u64, handle: &str) -> Self {
        Self {
            character_id,
            account_id: 1,
            handle: handle.to_string(),
            first_name: "Thomas".to_string(),
            last_name: "Anderson".to_string(),
            background: String::new(),
            experience: 0,
            information: 0,
            district: 0x01,
            x: 365.0,
            y: -2.0,
            z: -1524.0,
            rotation: 0.0,
            health_current: 100,
            health_max: 100,
            inner_strength_current: 50,
            inner_strength_max: 50,
            profession: 0,
            level: 1,
            alignment: 0,
            pvp_flag: false,
            appearance: Vec::new(),
        }
    }
}

/// A district row from the worlds tables.
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictRow {
    pub district_id: u8,
    pub name: String,
}

/// A static spawn/hardline marker position.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerRow {
    pub district_id: u8,
    pub kind: MarkerKind,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rotation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Spawn,
    Hardline,
}

/// A static world object row.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldObjectRow {
    pub object_type: u16,
    pub district_id: u8,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rotation: f64,
}

/// Everything loaded for a world at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldData {
    pub districts: Vec<DistrictRow>,
    pub markers: Vec<MarkerRow>,
    pub objects: Vec<WorldObjectRow>,
}

/// The narrow row interface the world core persists through. Reads are
/// blocking; writes go through the [`StoreWriter`] worker.
pub trait Store: Send + Sync {
    fn load_character(&self, character_id: u64) -> Result<CharacterRow, StoreError>;
    fn save_character(&self, row: &CharacterRow) -> Result<(), StoreError>;
    fn load_world(&self, world_name: &str) -> Result<WorldData, StoreError>;
    fn save_appearance(&self, character_id: u64, blob: &[u8]) -> Result<(), StoreError>;
    fn save_position(
        &self,
        character_id: u64,
        district: u8,
        position: &Location,
    ) -> Result<(), StoreError>;
}

/// A queued asynchronous write.
#[derive(Debug, Clone)]
pub enum SaveOp {
    Character(CharacterRow),
    Appearance {
        character_id: u64,
        blob: Vec<u8>,
    },
    Position {
        character_id: u64,
        district: u8,
        position: Location,
    },
}

const SAVE_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Cloneable handle the world thread enqueues writes through; the enqueue
/// never blocks the tick.
#[derive(Clone)]
pub struct StoreWriterHandle {
    sender: Sender<SaveOp>,
}

impl StoreWriterHandle {
    pub fn enqueue(&self, op: SaveOp) {
        if self.sender.try_send(op).is_err() {
            error!("store writer is gone; dropping write");
        }
    }
}

/// The dedicated store-writer thread. Failed writes retry with
/// exponential backoff up to five attempts; the in-memory state stays
/// authoritative, so an exhausted write is logged and dropped. On
/// shutdown the queue drains before the thread joins.
pub struct StoreWriter {
    sender: Sender<SaveOp>,
    handle: Option<JoinHandle<()>>,
}

impl StoreWriter {
    pub fn spawn(store: Arc<dyn Store>) -> Self {
        let (sender, receiver) = channel::unbounded();
        let handle = std::thread::Builder::new()
            .name("mxo-store".to_string())
            .spawn(move || Self::run(store, receiver))
            .expect("failed to spawn store writer thread");
        Self {
            sender,
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> StoreWriterHandle {
        StoreWriterHandle {
            sender: self.sender.clone(),
        }
    }

    fn run(store: Arc<dyn Store>, receiver: Receiver<SaveOp>) {
        // recv drains remaining ops after the last sender drops
        while let Ok(op) = receiver.recv_blocking() {
            Self::apply_with_retry(store.as_ref(), &op);
        }
        debug!("store writer drained and exiting");
    }

    fn apply_with_retry(store: &dyn Store, op: &SaveOp) {
        let mut backoff = BACKOFF_BASE;
        for attempt in 1..=SAVE_ATTEMPTS {
            match Self::apply(store, op) {
                Ok(()) => return,
                Err(e) if attempt < SAVE_ATTEMPTS => {
                    warn!("store write failed (attempt {attempt}/{SAVE_ATTEMPTS}): {e}");
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
                Err(e) => {
                    error!("store write dropped after {SAVE_ATTEMPTS} attempts: {e}");
                }
            }
        }
    }

    fn apply(store: &dyn Store, op: &SaveOp) -> Result<(), StoreError> {
        match op {
            SaveOp::Character(row) => store.save_character(row),
            SaveOp::Appearance { character_id, blob } => {
                store.save_appearance(*character_id, blob)
            }
            SaveOp::Position {
                character_id,
                district,
                position,
            } => store.save_position(*character_id, *district, position),
        }
    }

    /// Closes the queue and joins the worker once it has drained.
    /// Writes already enqueued are still applied; handles enqueueing
    /// afterwards log and drop.
    pub fn shutdown(mut self) {
        self.sender.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// In-memory store used by tests and by development runs without a
/// database.
#[derive(Default)]
pub struct MemoryStore {
    characters: Mutex<HashMap<u64, CharacterRow>>,
    worlds: Mutex<HashMap<String, WorldData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_character(&self, row: CharacterRow) {
        self.characters.lock().insert(row.character_id, row);
    }

    pub fn seed_world(&self, name: &str, data: WorldData) {
        self.worlds.lock().insert(name.to_string(), data);
    }

    pub fn character(&self, character_id: u64) -> Option<CharacterRow> {
        self.characters.lock().get(&character_id).cloned()
    }
}

impl Store for MemoryStore {
    fn load_character(&self, character_id: u64) -> Result<CharacterRow, StoreError> {
        self.characters
            .lock()
            .get(&character_id)
            .cloned()
            .ok_or(StoreError::CharacterNotFound(character_id))
    }

    fn save_character(&self, row: &CharacterRow) -> Result<(), StoreError> {
        self.characters.lock().insert(row.character_id, row.clone());
        Ok(())
    }

    fn load_world(&self, world_name: &str) -> Result<WorldData, StoreError> {
        Ok(self
            .worlds
            .lock()
            .get(world_name)
            .cloned()
            .unwrap_or_default())
    }

    fn save_appearance(&self, character_id: u64, blob: &[u8]) -> Result<(), StoreError> {
        let mut characters = self.characters.lock();
        let row = characters
            .get_mut(&character_id)
            .ok_or(StoreError::CharacterNotFound(character_id))?;
        row.appearance = blob.to_vec();
        Ok(())
    }

    fn save_position(
        &self,
        character_id: u64,
        district: u8,
        position: &Location,
    ) -> Result<(), StoreError> {
        let mut characters = self.characters.lock();
        let row = characters
            .get_mut(&character_id)
            .ok_or(StoreError::CharacterNotFound(character_id))?;
        row.district = district;
        row.x = position.x;
        row.y = position.y;
        row.z = position.z;
        row.rotation = position.o;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips_characters() {
        let store = MemoryStore::new();
        store.seed_character(CharacterRow::sample(42, "Ghost"));

        let row = store.load_character(42).unwrap();
        assert_eq!(row.handle, "Ghost");
        assert!(matches!(
            store.load_character(43),
            Err(StoreError::CharacterNotFound(43))
        ));
    }

    #[test]
    fn writer_drains_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        store.seed_character(CharacterRow::sample(42, "Ghost"));
        let writer = StoreWriter::spawn(store.clone());
        let handle = writer.handle();

        let mut row = CharacterRow::sample(42, "Ghost");
        row.experience = 1234;
        handle.enqueue(SaveOp::Character(row));
        handle.enqueue(SaveOp::Position {
            character_id: 42,
            district: 0x02,
            position: Location::new(1.0, 2.0, 3.0, 0.0),
        });
        drop(handle);
        writer.shutdown();

        let row = store.character(42).unwrap();
        assert_eq!(row.experience, 1234);
        assert_eq!(row.district, 0x02);
        assert_eq!(row.x, 1.0);
    }
}
