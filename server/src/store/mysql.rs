use log::info;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;

use mxo_shared::Location;

use super::{
    CharacterRow, DistrictRow, MarkerKind, MarkerRow, Store, StoreError, WorldData, WorldObjectRow,
};
use crate::config::DatabaseConfig;

/// MySQL-backed store. Every query is parameterized; the schema is
/// consumed by field name and type only.
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = smol::block_on(
            MySqlPoolOptions::new()
                .max_connections(4)
                .connect(&config.url()),
        )?;
        info!(
            "connected to database {} at {}:{}",
            config.name, config.host, config.port
        );
        Ok(Self { pool })
    }

    fn character_from_row(row: &MySqlRow) -> Result<CharacterRow, StoreError> {
        Ok(CharacterRow {
            character_id: row.try_get("character_id")?,
            account_id: row.try_get("account_id")?,
            handle: row.try_get("handle")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            background: row.try_get("background")?,
            experience: row.try_get("experience")?,
            information: row.try_get("information")?,
            district: row.try_get("district")?,
            x: row.try_get("x")?,
            y: row.try_get("y")?,
            z: row.try_get("z")?,
            rotation: row.try_get("rotation")?,
            health_current: row.try_get("health_current")?,
            health_max: row.try_get("health_max")?,
            inner_strength_current: row.try_get("inner_strength_current")?,
            inner_strength_max: row.try_get("inner_strength_max")?,
            profession: row.try_get("profession")?,
            level: row.try_get("level")?,
            alignment: row.try_get("alignment")?,
            pvp_flag: row.try_get("pvp_flag")?,
            appearance: row.try_get::<Option<Vec<u8>>, _>("appearance")?.unwrap_or_default(),
        })
    }
}

impl Store for MySqlStore {
    fn load_character(&self, character_id: u64) -> Result<CharacterRow, StoreError> {
        smol::block_on(async {
            let row = sqlx::query(
                "SELECT c.character_id, c.account_id, c.handle, c.first_name, c.last_name, \
                 c.background, c.experience, c.information, c.district, c.x, c.y, c.z, \
                 c.rotation, c.health_current, c.health_max, c.inner_strength_current, \
                 c.inner_strength_max, c.profession, c.level, c.alignment, c.pvp_flag, \
                 a.blob AS appearance \
                 FROM characters c \
                 LEFT JOIN character_appearance a ON a.character_id = c.character_id \
                 WHERE c.character_id = ?",
            )
            .bind(character_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::CharacterNotFound(character_id))?;
            Self::character_from_row(&row)
        })
    }

    fn save_character(&self, row: &CharacterRow) -> Result<(), StoreError> {
        smol::block_on(async {
            sqlx::query(
                "UPDATE characters SET background = ?, experience = ?, information = ?, \
                 district = ?, x = ?, y = ?, z = ?, rotation = ?, health_current = ?, \
                 health_max = ?, inner_strength_current = ?, inner_strength_max = ?, \
                 profession = ?, level = ?, alignment = ?, pvp_flag = ? \
                 WHERE character_id = ?",
            )
            .bind(&row.background)
            .bind(row.experience)
            .bind(row.information)
            .bind(row.district)
            .bind(row.x)
            .bind(row.y)
            .bind(row.z)
            .bind(row.rotation)
            .bind(row.health_current)
            .bind(row.health_max)
            .bind(row.inner_strength_current)
            .bind(row.inner_strength_max)
            .bind(row.profession)
            .bind(row.level)
            .bind(row.alignment)
            .bind(row.pvp_flag)
            .bind(row.character_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn load_world(&self, world_name: &str) -> Result<WorldData, StoreError> {
        smol::block_on(async {
            let world_id: u32 = sqlx::query("SELECT world_id FROM worlds WHERE name = ?")
                .bind(world_name)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| StoreError::WorldNotFound(world_name.to_string()))?
                .try_get("world_id")?;

            let districts = sqlx::query(
                "SELECT district_id, name FROM world_districts WHERE world_id = ? ORDER BY district_id",
            )
            .bind(world_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| -> Result<DistrictRow, StoreError> {
                Ok(DistrictRow {
                    district_id: row.try_get("district_id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

            let markers = sqlx::query(
                "SELECT district_id, kind, x, y, z, rotation FROM world_markers \
                 WHERE world_id = ? ORDER BY district_id, kind",
            )
            .bind(world_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| -> Result<MarkerRow, StoreError> {
                let kind: u8 = row.try_get("kind")?;
                Ok(MarkerRow {
                    district_id: row.try_get("district_id")?,
                    kind: if kind == 0 {
                        MarkerKind::Spawn
                    } else {
                        MarkerKind::Hardline
                    },
                    x: row.try_get("x")?,
                    y: row.try_get("y")?,
                    z: row.try_get("z")?,
                    rotation: row.try_get("rotation")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

            let objects = sqlx::query(
                "SELECT object_type, district_id, name, x, y, z, rotation \
                 FROM world_objects WHERE world_id = ? ORDER BY object_id",
            )
            .bind(world_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| -> Result<WorldObjectRow, StoreError> {
                Ok(WorldObjectRow {
                    object_type: row.try_get("object_type")?,
                    district_id: row.try_get("district_id")?,
                    name: row.try_get("name")?,
                    x: row.try_get("x")?,
                    y: row.try_get("y")?,
                    z: row.try_get("z")?,
                    rotation: row.try_get("rotation")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

            Ok(WorldData {
                districts,
                markers,
                objects,
            })
        })
    }

    fn save_appearance(&self, character_id: u64, blob: &[u8]) -> Result<(), StoreError> {
        smol::block_on(async {
            sqlx::query(
                "INSERT INTO character_appearance (character_id, blob) VALUES (?, ?) \
                 ON DUPLICATE KEY UPDATE blob = VALUES(blob)",
            )
            .bind(character_id)
            .bind(blob)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn save_position(
        &self,
        character_id: u64,
        district: u8,
        position: &Location,
    ) -> Result<(), StoreError> {
        smol::block_on(async {
            sqlx::query(
                "UPDATE characters SET district = ?, x = ?, y = ?, z = ?, rotation = ? \
                 WHERE character_id = ?",
            )
            .bind(district)
            .bind(position.x)
            .bind(position.y)
            .bind(position.z)
            .bind(position.o)
            .bind(character_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }
}
