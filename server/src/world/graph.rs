use std::collections::{BTreeSet, HashMap};

use log::debug;
use thiserror::Error;

use mxo_shared::proto::msg;
use mxo_shared::{District, Location, ObjectType};

use super::broadcast::Outbox;
use super::object::{destroy_block_for, GameObject, ObjectId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error("object {0} not found")]
    ObjectNotFound(ObjectId),

    #[error("handle {0:?} already has an object")]
    DuplicateHandle(String),
}

/// The spatial object graph: entities keyed by object id, partitioned by
/// district, with a handle index for player objects.
///
/// Every mutation that changes what a district can see emits the matching
/// lifecycle broadcast into the caller's outbox, so the interest set
/// (all sessions whose player object shares the district) observes
/// exactly one create and one destroy per residency.
pub struct ObjectGraph {
    objects: HashMap<ObjectId, GameObject>,
    districts: HashMap<District, BTreeSet<ObjectId>>,
    handles: HashMap<String, ObjectId>,
    next_id: ObjectId,
}

impl Default for ObjectGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            districts: HashMap::new(),
            handles: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, id: ObjectId) -> Option<&GameObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut GameObject> {
        self.objects.get_mut(&id)
    }

    pub fn object_id_by_handle(&self, handle: &str) -> Option<ObjectId> {
        self.handles.get(handle).copied()
    }

    /// Inserts an object, allocating its id, and announces it to its
    /// district.
    pub fn create(
        &mut self,
        mut object: GameObject,
        outbox: &mut Outbox,
    ) -> Result<ObjectId, WorldError> {
        if let Some(handle) = object.handle() {
            if self.handles.contains_key(handle) {
                return Err(WorldError::DuplicateHandle(handle.to_string()));
            }
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        object.id = id;

        if let Some(handle) = object.handle() {
            self.handles.insert(handle.to_string(), id);
        }
        self.districts
            .entry(object.district)
            .or_default()
            .insert(id);
        outbox.to_district(
            object.district,
            None,
            msg::OBJECT_CREATE,
            vec![object.create_block()],
            true,
        );
        self.objects.insert(id, object);
        Ok(id)
    }

    /// Re-serializes the object's mutable state to its district.
    pub fn update(&mut self, id: ObjectId, outbox: &mut Outbox) -> Result<(), WorldError> {
        let object = self.objects.get(&id).ok_or(WorldError::ObjectNotFound(id))?;
        outbox.to_district(
            object.district,
            None,
            msg::OBJECT_UPDATE,
            vec![object.update_block()],
            true,
        );
        Ok(())
    }

    /// Removes the object from every index and broadcasts the destroy to
    /// its last district.
    pub fn destroy(&mut self, id: ObjectId, outbox: &mut Outbox) -> Result<GameObject, WorldError> {
        let object = self
            .objects
            .remove(&id)
            .ok_or(WorldError::ObjectNotFound(id))?;
        if let Some(handle) = object.handle() {
            self.handles.remove(handle);
        }
        if let Some(set) = self.districts.get_mut(&object.district) {
            set.remove(&id);
        }
        outbox.to_district(
            object.district,
            None,
            msg::OBJECT_DESTROY,
            vec![destroy_block_for(id)],
            true,
        );
        debug!("object {id} destroyed in {}", object.district);
        Ok(object)
    }

    /// Moves an object, handling a district transfer as a destroy in the
    /// old district and a create in the new one.
    pub fn move_object(
        &mut self,
        id: ObjectId,
        position: Location,
        district: District,
        outbox: &mut Outbox,
    ) -> Result<(), WorldError> {
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(WorldError::ObjectNotFound(id))?;
        let old_district = object.district;
        object.position = position;

        if old_district == district {
            outbox.to_district(
                district,
                None,
                msg::OBJECT_UPDATE,
                vec![object.update_block()],
                true,
            );
            return Ok(());
        }

        object.district = district;
        let create = object.create_block();
        if let Some(set) = self.districts.get_mut(&old_district) {
            set.remove(&id);
        }
        self.districts.entry(district).or_default().insert(id);
        outbox.to_district(
            old_district,
            None,
            msg::OBJECT_DESTROY,
            vec![destroy_block_for(id)],
            true,
        );
        outbox.to_district(district, None, msg::OBJECT_CREATE, vec![create], true);
        Ok(())
    }

    /// All object ids in a district, in stable (id) order.
    pub fn objects_in_district(&self, district: District) -> Vec<ObjectId> {
        self.districts
            .get(&district)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Objects within `radius` of a position, scanning the district.
    /// Results are in id order, stable for a given tick snapshot.
    pub fn in_range(&self, position: &Location, district: District, radius: f64) -> Vec<ObjectId> {
        let radius_sq = radius * radius;
        self.objects_in_district(district)
            .into_iter()
            .filter(|id| {
                self.objects
                    .get(id)
                    .is_some_and(|o| o.position.distance_sq(position) <= radius_sq)
            })
            .collect()
    }

    /// The nearest object of a type within `radius`, if any.
    pub fn nearest(
        &self,
        position: &Location,
        district: District,
        object_type: ObjectType,
        radius: f64,
    ) -> Option<ObjectId> {
        let radius_sq = radius * radius;
        let mut best: Option<(ObjectId, f64)> = None;
        for id in self.objects_in_district(district) {
            let Some(object) = self.objects.get(&id) else {
                continue;
            };
            if object.object_type != object_type {
                continue;
            }
            let dist_sq = object.position.distance_sq(position);
            if dist_sq > radius_sq {
                continue;
            }
            if best.map_or(true, |(_, best_sq)| dist_sq < best_sq) {
                best = Some((id, dist_sq));
            }
        }
        best.map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::broadcast::Outgoing;
    use crate::world::object::ObjectBody;

    fn hardline(x: f64, district: District) -> GameObject {
        GameObject::new(
            ObjectType::Hardline,
            Location::new(x, 0.0, 0.0, 0.0),
            district,
            "hardline".to_string(),
            ObjectBody::Interactive { interaction_id: 1 },
        )
    }

    fn broadcast_types(outbox: &mut Outbox) -> Vec<u16> {
        outbox
            .drain()
            .into_iter()
            .map(|o| match o {
                Outgoing::ToDistrict { message_type, .. } => message_type,
                _ => panic!("graph broadcasts are district-scoped"),
            })
            .collect()
    }

    #[test]
    fn create_allocates_monotonic_ids_and_broadcasts() {
        let mut graph = ObjectGraph::new();
        let mut outbox = Outbox::new();
        let a = graph.create(hardline(0.0, District::Richland), &mut outbox).unwrap();
        let b = graph.create(hardline(1.0, District::Richland), &mut outbox).unwrap();
        assert!(b > a);
        assert_eq!(
            broadcast_types(&mut outbox),
            vec![msg::OBJECT_CREATE, msg::OBJECT_CREATE]
        );
    }

    #[test]
    fn at_most_one_object_per_id() {
        let mut graph = ObjectGraph::new();
        let mut outbox = Outbox::new();
        let id = graph.create(hardline(0.0, District::Ueno), &mut outbox).unwrap();
        graph.destroy(id, &mut outbox).unwrap();
        assert_eq!(graph.get(id), None);
        assert_eq!(
            graph.destroy(id, &mut outbox),
            Err(WorldError::ObjectNotFound(id))
        );
    }

    #[test]
    fn destroy_broadcasts_to_last_district() {
        let mut graph = ObjectGraph::new();
        let mut outbox = Outbox::new();
        let id = graph.create(hardline(0.0, District::Ueno), &mut outbox).unwrap();
        let _ = outbox.drain();

        graph.destroy(id, &mut outbox).unwrap();
        match outbox.drain().as_slice() {
            [Outgoing::ToDistrict {
                district,
                message_type,
                ..
            }] => {
                assert_eq!(*district, District::Ueno);
                assert_eq!(*message_type, msg::OBJECT_DESTROY);
            }
            other => panic!("unexpected broadcasts: {other:?}"),
        }
        assert!(graph.objects_in_district(District::Ueno).is_empty());
    }

    #[test]
    fn district_transfer_pairs_destroy_with_create() {
        let mut graph = ObjectGraph::new();
        let mut outbox = Outbox::new();
        let id = graph.create(hardline(0.0, District::Ueno), &mut outbox).unwrap();
        let _ = outbox.drain();

        graph
            .move_object(id, Location::default(), District::Tabor, &mut outbox)
            .unwrap();
        let kinds: Vec<(District, u16)> = outbox
            .drain()
            .into_iter()
            .map(|o| match o {
                Outgoing::ToDistrict {
                    district,
                    message_type,
                    ..
                } => (district, message_type),
                other => panic!("unexpected outgoing: {other:?}"),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                (District::Ueno, msg::OBJECT_DESTROY),
                (District::Tabor, msg::OBJECT_CREATE)
            ]
        );
        assert_eq!(graph.objects_in_district(District::Ueno), Vec::<u32>::new());
        assert_eq!(graph.objects_in_district(District::Tabor), vec![id]);
    }

    #[test]
    fn in_range_scans_one_district_with_stable_order() {
        let mut graph = ObjectGraph::new();
        let mut outbox = Outbox::new();
        let near = graph.create(hardline(1.0, District::Center), &mut outbox).unwrap();
        let far = graph.create(hardline(500.0, District::Center), &mut outbox).unwrap();
        let other = graph.create(hardline(1.0, District::Gracy), &mut outbox).unwrap();

        let origin = Location::default();
        let found = graph.in_range(&origin, District::Center, 10.0);
        assert_eq!(found, vec![near]);
        assert!(!found.contains(&far));
        assert!(!found.contains(&other));
    }

    #[test]
    fn nearest_filters_by_type_and_radius() {
        let mut graph = ObjectGraph::new();
        let mut outbox = Outbox::new();
        let _npc = graph
            .create(
                GameObject::new(
                    ObjectType::Npc,
                    Location::new(2.0, 0.0, 0.0, 0.0),
                    District::Center,
                    "agent".to_string(),
                    ObjectBody::Npc { template_id: 1 },
                ),
                &mut outbox,
            )
            .unwrap();
        let close_hardline = graph.create(hardline(5.0, District::Center), &mut outbox).unwrap();
        let _far_hardline = graph.create(hardline(9.0, District::Center), &mut outbox).unwrap();

        let origin = Location::default();
        assert_eq!(
            graph.nearest(&origin, District::Center, ObjectType::Hardline, 100.0),
            Some(close_hardline)
        );
        assert_eq!(
            graph.nearest(&origin, District::Center, ObjectType::Hardline, 1.0),
            None
        );
    }
}
