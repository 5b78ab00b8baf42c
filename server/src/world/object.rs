use std::collections::HashMap;

use mxo_shared::proto::msg;
use mxo_shared::{Block, ByteBuffer, District, Location, ObjectType};

pub type ObjectId = u32;

/// Type-specific payload of a game object. The wire object type maps onto
/// one of these categories; create/update serialization dispatches on the
/// variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectBody {
    Player {
        character_id: u64,
        handle: String,
        level: u8,
        profession: u32,
        alignment: u8,
        pvp: bool,
        current_animation: u8,
        current_mood: u8,
        health_current: u16,
        health_max: u16,
        inner_strength_current: u16,
        inner_strength_max: u16,
        appearance: Vec<u8>,
    },
    Npc {
        template_id: u32,
    },
    Item {
        item_id: u32,
    },
    Interactive {
        interaction_id: u16,
    },
    Environment,
}

impl ObjectBody {
    /// The body category a wire object type lands in.
    pub fn category_for(object_type: ObjectType) -> &'static str {
        match object_type {
            ObjectType::Player => "player",
            ObjectType::Npc | ObjectType::MissionGiver | ObjectType::Vendor | ObjectType::Trainer => {
                "npc"
            }
            ObjectType::Item | ObjectType::Container => "item",
            ObjectType::Hardline
            | ObjectType::Door
            | ObjectType::Computer
            | ObjectType::Interactive
            | ObjectType::Elevator
            | ObjectType::Portal => "interactive",
            ObjectType::None => "environment",
        }
    }
}

/// An entity in the object graph: uniform metadata plus a tagged body.
///
/// The graph exclusively owns every object; sessions refer to their player
/// object by id only.
#[derive(Debug, Clone, PartialEq)]
pub struct GameObject {
    pub id: ObjectId,
    pub object_type: ObjectType,
    pub position: Location,
    pub district: District,
    pub name: String,
    pub visible: bool,
    pub state_flags: u32,
    pub scale: f32,
    pub properties: HashMap<String, String>,
    pub body: ObjectBody,
}

impl GameObject {
    pub fn new(
        object_type: ObjectType,
        position: Location,
        district: District,
        name: String,
        body: ObjectBody,
    ) -> Self {
        Self {
            id: 0,
            object_type,
            position,
            district,
            name,
            visible: true,
            state_flags: 0,
            scale: 1.0,
            properties: HashMap::new(),
            body,
        }
    }

    pub fn handle(&self) -> Option<&str> {
        match &self.body {
            ObjectBody::Player { handle, .. } => Some(handle),
            _ => None,
        }
    }

    pub fn character_id(&self) -> Option<u64> {
        match &self.body {
            ObjectBody::Player { character_id, .. } => Some(*character_id),
            _ => None,
        }
    }

    pub fn set_property(&mut self, key: &str, value: &str) {
        self.properties.insert(key.to_string(), value.to_string());
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The `OBJECT_CREATE` block announcing this object to its district.
    pub fn create_block(&self) -> Block {
        Block::build(msg::OBJECT_CREATE, |body| {
            body.write_u32(self.id);
            body.write_u16(self.object_type.tag());
            body.write_u8(self.district.id());
            self.position.write(body);
            body.write_cstring(&self.name);
            body.write_bool(self.visible);
            body.write_u32(self.state_flags);
            body.write_f32(self.scale);
            self.write_body(body);
        })
    }

    /// The `OBJECT_UPDATE` block for the object's mutable state.
    pub fn update_block(&self) -> Block {
        Block::build(msg::OBJECT_UPDATE, |body| {
            body.write_u32(self.id);
            self.position.write(body);
            body.write_u32(self.state_flags);
            if let ObjectBody::Player {
                current_animation,
                current_mood,
                health_current,
                inner_strength_current,
                ..
            } = &self.body
            {
                body.write_u8(*current_animation);
                body.write_u8(*current_mood);
                body.write_u16(*health_current);
                body.write_u16(*inner_strength_current);
            }
        })
    }

    /// The `OBJECT_DESTROY` block. Kept on the object so every lifecycle
    /// message dispatches the same way.
    pub fn destroy_block(&self) -> Block {
        destroy_block_for(self.id)
    }

    fn write_body(&self, body: &mut ByteBuffer) {
        match &self.body {
            ObjectBody::Player {
                character_id,
                handle,
                level,
                profession,
                alignment,
                pvp,
                current_animation,
                current_mood,
                health_current,
                health_max,
                inner_strength_current,
                inner_strength_max,
                appearance,
            } => {
                body.write_u64(*character_id);
                body.write_cstring(handle);
                body.write_u8(*level);
                body.write_u32(*profession);
                body.write_u8(*alignment);
                body.write_bool(*pvp);
                body.write_u8(*current_animation);
                body.write_u8(*current_mood);
                body.write_u16(*health_current);
                body.write_u16(*health_max);
                body.write_u16(*inner_strength_current);
                body.write_u16(*inner_strength_max);
                body.write_u16(appearance.len() as u16);
                body.append(appearance);
            }
            ObjectBody::Npc { template_id } => body.write_u32(*template_id),
            ObjectBody::Item { item_id } => body.write_u32(*item_id),
            ObjectBody::Interactive { interaction_id } => body.write_u16(*interaction_id),
            ObjectBody::Environment => {}
        }
    }
}

/// A destroy block for an object that may already be gone from the graph.
pub fn destroy_block_for(id: ObjectId) -> Block {
    Block::build(msg::OBJECT_DESTROY, |body| {
        body.write_u32(id);
    })
}
