use serde::{Deserialize, Serialize};

pub const GRAVITY: f32 = 980.0;
pub const RUN_SPEED: f32 = 300.0;
pub const JUMP_VELOCITY: f32 = -420.0;
pub const FLOOR_Y: f32 = 550.0;
pub const CEILING_Y: f32 = 50.0;
pub const WORLD_LENGTH: f32 = 3200.0;
pub const WORLD_HEIGHT: f32 = 600.0;
pub const PLAYER_SIZE: f32 = 32.0;

pub const DEFAULT_RELIABLE_PORT: u16 = 54555;
pub const DEFAULT_DATAGRAM_PORT: u16 = 54777;

// Upper bound on a single encoded frame, enforced by the reliable-channel
// reader before allocating the body buffer.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

pub type ConnId = u32;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Message {
    Login {
        name: String,
    },
    PlayerJoinLeave {
        id: ConnId,
        name: String,
        joined: bool,
    },
    MovementState {
        id: ConnId,
        position: (f32, f32),
        linear_velocity: (f32, f32),
    },
}

/// Transport envelope. `Register` carries the server-assigned connection id:
/// the server sends it over the reliable channel right after accept, and the
/// client echoes it as its first datagram so the server learns the client's
/// datagram address.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Frame {
    Register { conn: ConnId },
    App(Message),
}

pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(frame)
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame, bincode::Error> {
    bincode::deserialize(bytes)
}

/// Initial placement for a player, derived from its connection id so both
/// sides agree on it without an extra message. Players start on the floor,
/// staggered along the strip.
pub fn spawn_position(id: ConnId) -> (f32, f32) {
    let x = 100.0 + (id as f32 * 60.0) % (WORLD_LENGTH - 200.0);
    (x, FLOOR_Y - PLAYER_SIZE / 2.0)
}

/// Axis-aligned static box. `x`/`y` is the center of the box.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct Obstacle {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Obstacle {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns (left, top, right, bottom).
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        (
            self.x - self.width / 2.0,
            self.y - self.height / 2.0,
            self.x + self.width / 2.0,
            self.y + self.height / 2.0,
        )
    }

    pub fn overlaps_box(&self, center: (f32, f32), half_w: f32, half_h: f32) -> bool {
        let (left, top, right, bottom) = self.bounds();
        !(center.0 + half_w <= left
            || center.0 - half_w >= right
            || center.1 + half_h <= top
            || center.1 - half_h >= bottom)
    }
}

#[derive(Debug, Clone)]
pub struct MapLayout {
    pub obstacles: Vec<Obstacle>,
}

impl MapLayout {
    /// The fixed course: a floor and a ceiling running the whole length,
    /// with platform blocks punctuating the corridor between them.
    pub fn standard() -> Self {
        let mut obstacles = vec![
            Obstacle::new(
                WORLD_LENGTH / 2.0,
                FLOOR_Y + (WORLD_HEIGHT - FLOOR_Y) / 2.0,
                WORLD_LENGTH,
                WORLD_HEIGHT - FLOOR_Y,
            ),
            Obstacle::new(WORLD_LENGTH / 2.0, CEILING_Y / 2.0, WORLD_LENGTH, CEILING_Y),
        ];

        let mut x = 600.0;
        while x < WORLD_LENGTH - 200.0 {
            obstacles.push(Obstacle::new(x, FLOOR_Y - PLAYER_SIZE, 48.0, 64.0));
            x += 500.0;
        }

        Self { obstacles }
    }

    /// First platform whose horizontal span intersects `[x, x + lookahead]`,
    /// ignoring the floor and ceiling slabs.
    pub fn obstacle_ahead(&self, x: f32, lookahead: f32) -> Option<&Obstacle> {
        self.obstacles
            .iter()
            .skip(2)
            .filter(|o| {
                let (left, _, right, _) = o.bounds();
                right > x && left < x + lookahead
            })
            .min_by(|a, b| a.x.total_cmp(&b.x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_login_frame_roundtrip() {
        let frame = Frame::App(Message::Login {
            name: "ninja".to_string(),
        });
        let bytes = encode_frame(&frame).unwrap();
        let decoded = decode_frame(&bytes).unwrap();

        match decoded {
            Frame::App(Message::Login { name }) => assert_eq!(name, "ninja"),
            _ => panic!("Wrong frame after decode"),
        }
    }

    #[test]
    fn test_join_leave_frame_roundtrip() {
        let frame = Frame::App(Message::PlayerJoinLeave {
            id: 7,
            name: "pirate".to_string(),
            joined: true,
        });
        let bytes = encode_frame(&frame).unwrap();
        let decoded = decode_frame(&bytes).unwrap();

        match decoded {
            Frame::App(Message::PlayerJoinLeave { id, name, joined }) => {
                assert_eq!(id, 7);
                assert_eq!(name, "pirate");
                assert!(joined);
            }
            _ => panic!("Wrong frame after decode"),
        }
    }

    #[test]
    fn test_movement_frame_roundtrip() {
        let frame = Frame::App(Message::MovementState {
            id: 3,
            position: (120.5, 480.25),
            linear_velocity: (300.0, -42.5),
        });
        let bytes = encode_frame(&frame).unwrap();
        let decoded = decode_frame(&bytes).unwrap();

        match decoded {
            Frame::App(Message::MovementState {
                id,
                position,
                linear_velocity,
            }) => {
                assert_eq!(id, 3);
                assert_approx_eq!(position.0, 120.5, 0.001);
                assert_approx_eq!(position.1, 480.25, 0.001);
                assert_approx_eq!(linear_velocity.0, 300.0, 0.001);
                assert_approx_eq!(linear_velocity.1, -42.5, 0.001);
            }
            _ => panic!("Wrong frame after decode"),
        }
    }

    #[test]
    fn test_register_frame_roundtrip() {
        let bytes = encode_frame(&Frame::Register { conn: 12 }).unwrap();
        match decode_frame(&bytes).unwrap() {
            Frame::Register { conn } => assert_eq!(conn, 12),
            _ => panic!("Wrong frame after decode"),
        }
    }

    #[test]
    fn test_decode_rejects_truncated_frame() {
        let bytes = encode_frame(&Frame::App(Message::Login {
            name: "truncated".to_string(),
        }))
        .unwrap();
        assert!(decode_frame(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_spawn_positions_stay_on_floor() {
        for id in [1, 2, 17, 900] {
            let (x, y) = spawn_position(id);
            assert!(x >= 100.0 && x < WORLD_LENGTH - 100.0);
            assert_approx_eq!(y, FLOOR_Y - PLAYER_SIZE / 2.0);
        }
    }

    #[test]
    fn test_spawn_positions_are_staggered() {
        assert_ne!(spawn_position(1).0, spawn_position(2).0);
    }

    #[test]
    fn test_obstacle_bounds() {
        let obstacle = Obstacle::new(100.0, 50.0, 40.0, 20.0);
        let (left, top, right, bottom) = obstacle.bounds();
        assert_approx_eq!(left, 80.0);
        assert_approx_eq!(top, 40.0);
        assert_approx_eq!(right, 120.0);
        assert_approx_eq!(bottom, 60.0);
    }

    #[test]
    fn test_obstacle_overlap() {
        let obstacle = Obstacle::new(100.0, 50.0, 40.0, 20.0);
        assert!(obstacle.overlaps_box((110.0, 55.0), 16.0, 16.0));
        assert!(!obstacle.overlaps_box((200.0, 55.0), 16.0, 16.0));
        // Touching edges do not count as overlap.
        assert!(!obstacle.overlaps_box((136.0, 50.0), 16.0, 16.0));
    }

    #[test]
    fn test_standard_map_has_floor_and_ceiling() {
        let map = MapLayout::standard();
        assert!(map.obstacles.len() > 2);

        let floor = &map.obstacles[0];
        let ceiling = &map.obstacles[1];
        assert_approx_eq!(floor.width, WORLD_LENGTH);
        assert_approx_eq!(ceiling.width, WORLD_LENGTH);
        // Floor sits below the corridor, ceiling above it.
        let (_, floor_top, _, _) = floor.bounds();
        let (_, _, _, ceiling_bottom) = ceiling.bounds();
        assert_approx_eq!(floor_top, FLOOR_Y);
        assert_approx_eq!(ceiling_bottom, CEILING_Y);
    }

    #[test]
    fn test_obstacle_ahead_skips_floor_and_ceiling() {
        let map = MapLayout::standard();

        // The course opens with a clear stretch.
        assert!(map.obstacle_ahead(0.0, 100.0).is_none());

        let first = map.obstacle_ahead(0.0, WORLD_LENGTH).unwrap();
        assert_approx_eq!(first.x, 600.0);

        // Looking past the first platform finds the next one.
        let next = map.obstacle_ahead(700.0, WORLD_LENGTH).unwrap();
        assert!(next.x > 700.0);
    }
}
