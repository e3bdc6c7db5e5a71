use crate::simulator::vehicle::{VehicleGeometry, VehicleState};

/// A circular obstacle, static or moving at constant velocity.
///
/// Obstacles belong to the caller; the simulator only reads them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    /// Centre in meters.
    pub position: [f64; 2],
    /// Radius in meters.
    pub radius: f64,
    /// Velocity in m/s for moving agents.
    pub velocity: Option<[f64; 2]>,
}

impl Obstacle {
    pub fn fixed(position: [f64; 2], radius: f64) -> Self {
        Self {
            position,
            radius,
            velocity: None,
        }
    }

    pub fn moving(position: [f64; 2], radius: f64, velocity: [f64; 2]) -> Self {
        Self {
            position,
            radius,
            velocity: Some(velocity),
        }
    }

    /// The obstacle `dt` seconds later. Static obstacles are returned as is.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use drift_gym::simulator::obstacle::Obstacle;
    ///
    /// let agent = Obstacle::moving([0.0, 0.0], 0.2, [1.0, -0.5]);
    /// assert_eq!(agent.advanced(2.0).position, [2.0, -1.0]);
    /// ```
    pub fn advanced(&self, dt: f64) -> Self {
        match self.velocity {
            Some([vx, vy]) => Self {
                position: [self.position[0] + vx * dt, self.position[1] + vy * dt],
                ..*self
            },
            None => *self,
        }
    }

    /// Gap between the obstacle and the vehicle's bounding circle.
    /// Negative when they overlap.
    pub fn clearance(&self, vehicle: &VehicleState, geometry: &VehicleGeometry) -> f64 {
        let distance = (vehicle.x - self.position[0]).hypot(vehicle.y - self.position[1]);
        distance - self.radius - geometry.bounding_radius()
    }

    pub fn collides(&self, vehicle: &VehicleState, geometry: &VehicleGeometry) -> bool {
        self.clearance(vehicle, geometry) <= 0.0
    }
}
