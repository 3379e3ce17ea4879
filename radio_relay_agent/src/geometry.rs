// Neighbor bearings in the fixed world-aligned frame.
//
// Agents have no orientation here, so a bearing is measured against the world
// axes: azimuth is the heading in the x/y plane with +y mapping to negative
// angles, elevation is the angle above the x/y plane. Both are in degrees.
//
// A neighbor directly on the y axis (dx == 0) gets an exact ±90° azimuth
// rather than whatever atan2 returns for a signed zero. dy == 0 counts as
// positive, so a coincident neighbor reports -90°.

use radio_relay_protocol::Position;

/// Where a neighbor is, relative to this agent.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bearing {
    pub distance: f32,
    /// Degrees in (-180, 180].
    pub azimuth: f32,
    /// Degrees in [-90, 90].
    pub elevation: f32,
}

/// Bearing of `other` as seen from `own`.
pub fn bearing(own: Position, other: Position) -> Bearing {
    let dx = other.x - own.x;
    let dy = other.y - own.y;
    let dz = other.z - own.z;

    let azimuth = if dx == 0.0 {
        if dy >= 0.0 { -90.0 } else { 90.0 }
    } else {
        (-dy).atan2(dx).to_degrees()
    };
    let planar = dx.hypot(dy);

    Bearing {
        distance: planar.hypot(dz),
        azimuth,
        elevation: dz.atan2(planar).to_degrees(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: Position = Position::new(0.0, 0.0, 0.0);

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn positive_y_axis_is_minus_ninety() {
        let b = bearing(ORIGIN, Position::new(0.0, 2.0, 0.0));
        assert_eq!(b.azimuth, -90.0);
        assert!(close(b.distance, 2.0));
        assert_eq!(b.elevation, 0.0);
    }

    #[test]
    fn negative_y_axis_is_plus_ninety() {
        let b = bearing(ORIGIN, Position::new(0.0, -2.0, 0.0));
        assert_eq!(b.azimuth, 90.0);
    }

    #[test]
    fn coincident_neighbor_counts_dy_as_positive() {
        let b = bearing(Position::new(1.0, 1.0, 1.0), Position::new(1.0, 1.0, 1.0));
        assert_eq!(b.azimuth, -90.0);
        assert_eq!(b.distance, 0.0);
    }

    #[test]
    fn off_axis_uses_atan2_of_negated_dy() {
        assert!(close(bearing(ORIGIN, Position::new(1.0, 0.0, 0.0)).azimuth, 0.0));
        assert!(close(bearing(ORIGIN, Position::new(1.0, 1.0, 0.0)).azimuth, -45.0));
        assert!(close(bearing(ORIGIN, Position::new(1.0, -1.0, 0.0)).azimuth, 45.0));
        assert!(close(bearing(ORIGIN, Position::new(-1.0, -1.0, 0.0)).azimuth, 135.0));
    }

    #[test]
    fn elevation_is_angle_above_the_plane() {
        let b = bearing(ORIGIN, Position::new(3.0, 4.0, 5.0));
        assert!(close(b.elevation, 45.0));
        assert!(close(b.distance, 50.0f32.sqrt()));
        let below = bearing(ORIGIN, Position::new(0.0, 0.0, -1.0));
        assert!(close(below.elevation, -90.0));
    }

    #[test]
    fn relative_to_own_position() {
        let b = bearing(Position::new(5.0, 5.0, 0.0), Position::new(5.0, 7.0, 0.0));
        assert_eq!(b.azimuth, -90.0);
        assert!(close(b.distance, 2.0));
    }
}
