use std::collections::HashMap;

use mxo_shared::{District, Location};

/// Static data for one district: spawn points and hardline positions,
/// loaded from the world tables at startup.
#[derive(Debug, Clone)]
pub struct DistrictInfo {
    pub district: District,
    pub name: String,
    pub spawns: Vec<Location>,
    pub hardlines: Vec<Location>,
}

impl DistrictInfo {
    fn empty(district: District) -> Self {
        Self {
            district,
            name: district.name().to_string(),
            spawns: Vec::new(),
            hardlines: Vec::new(),
        }
    }
}

/// The catalog of all twelve districts. Districts absent from the store
/// still exist, just with no configured spawns or hardlines.
pub struct DistrictCatalog {
    map: HashMap<District, DistrictInfo>,
    fallback_spawn: Location,
}

impl DistrictCatalog {
    pub fn new(fallback_spawn: Location) -> Self {
        let mut map = HashMap::new();
        for district in District::ALL {
            map.insert(district, DistrictInfo::empty(district));
        }
        Self {
            map,
            fallback_spawn,
        }
    }

    pub fn info(&self, district: District) -> &DistrictInfo {
        self.map
            .get(&district)
            .expect("catalog holds all districts")
    }

    pub fn add_spawn(&mut self, district: District, position: Location) {
        if let Some(info) = self.map.get_mut(&district) {
            info.spawns.push(position);
        }
    }

    pub fn add_hardline(&mut self, district: District, position: Location) {
        if let Some(info) = self.map.get_mut(&district) {
            info.hardlines.push(position);
        }
    }

    /// A spawn point for the district; the configured world start when
    /// none are loaded.
    pub fn spawn_point(&self, district: District) -> Location {
        self.info(district)
            .spawns
            .first()
            .copied()
            .unwrap_or(self.fallback_spawn)
    }

    /// The indexed hardline position, if configured.
    pub fn hardline(&self, district: District, index: usize) -> Option<Location> {
        self.info(district).hardlines.get(index).copied()
    }
}
