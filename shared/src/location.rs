use crate::byte_buffer::{ByteBuffer, CodecError};

/// A position (x, y, z) and orientation (o, radians) in the game world.
///
/// Used as a plain value type throughout; equality is exact bitwise on all
/// four fields.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub o: f64,
}

impl Location {
    pub const fn new(x: f64, y: f64, z: f64, o: f64) -> Self {
        Self { x, y, z, o }
    }

    pub fn distance(&self, other: &Location) -> f64 {
        self.distance_sq(other).sqrt()
    }

    pub fn distance_sq(&self, other: &Location) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Distance ignoring the z axis.
    pub fn distance_2d(&self, other: &Location) -> f64 {
        self.distance_2d_sq(other).sqrt()
    }

    pub fn distance_2d_sq(&self, other: &Location) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx * dx + dy * dy
    }

    /// Angle from this point to another, in radians.
    pub fn angle_to(&self, other: &Location) -> f64 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    pub fn move_by(&mut self, dx: f64, dy: f64, dz: f64) {
        self.x += dx;
        self.y += dy;
        self.z += dz;
    }

    /// Advances the position along the current orientation.
    pub fn move_forward(&mut self, distance: f64) {
        self.x += distance * self.o.cos();
        self.y += distance * self.o.sin();
    }

    pub fn write(&self, buffer: &mut ByteBuffer) {
        buffer.write_f64(self.x);
        buffer.write_f64(self.y);
        buffer.write_f64(self.z);
        buffer.write_f64(self.o);
    }

    pub fn read(buffer: &mut ByteBuffer) -> Result<Self, CodecError> {
        Ok(Self {
            x: buffer.read_f64()?,
            y: buffer.read_f64()?,
            z: buffer.read_f64()?,
            o: buffer.read_f64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Location;
    use crate::byte_buffer::ByteBuffer;

    #[test]
    fn distance_is_euclidean() {
        let a = Location::new(0.0, 0.0, 0.0, 0.0);
        let b = Location::new(3.0, 4.0, 0.0, 0.0);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(a.distance_sq(&b), 25.0);
    }

    #[test]
    fn distance_2d_ignores_z() {
        let a = Location::new(0.0, 0.0, 100.0, 0.0);
        let b = Location::new(3.0, 4.0, -50.0, 0.0);
        assert_eq!(a.distance_2d(&b), 5.0);
    }

    #[test]
    fn angle_to_is_atan2() {
        let a = Location::new(0.0, 0.0, 0.0, 0.0);
        let b = Location::new(0.0, 1.0, 0.0, 0.0);
        assert_eq!(a.angle_to(&b), std::f64::consts::FRAC_PI_2);
    }

    #[test]
    fn move_forward_follows_orientation() {
        let mut loc = Location::new(1.0, 1.0, 5.0, 0.0);
        loc.move_forward(2.0);
        assert_eq!(loc.x, 3.0);
        assert_eq!(loc.y, 1.0);
        assert_eq!(loc.z, 5.0);
    }

    #[test]
    fn equality_is_exact() {
        let a = Location::new(0.1 + 0.2, 0.0, 0.0, 0.0);
        let b = Location::new(0.3, 0.0, 0.0, 0.0);
        assert_ne!(a, b);
    }

    #[test]
    fn wire_round_trip() {
        let loc = Location::new(-12.5, 880.25, 3.0, 1.5);
        let mut buffer = ByteBuffer::new();
        loc.write(&mut buffer);
        assert_eq!(Location::read(&mut buffer).unwrap(), loc);
    }
}
