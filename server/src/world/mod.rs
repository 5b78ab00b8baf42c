mod broadcast;
mod district;
mod graph;
mod object;

pub use broadcast::{Outbox, Outgoing};
pub use district::{DistrictCatalog, DistrictInfo};
pub use graph::{ObjectGraph, WorldError};
pub use object::{destroy_block_for, GameObject, ObjectBody, ObjectId};
