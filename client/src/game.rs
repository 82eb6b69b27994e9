use log::{debug, info};
use rand::Rng;
use shared::{
    spawn_position, ConnId, MapLayout, Message, CEILING_Y, FLOOR_Y, GRAVITY, JUMP_VELOCITY,
    PLAYER_SIZE, RUN_SPEED, WORLD_LENGTH,
};
use std::collections::HashMap;

/// How far ahead of the player the autopilot scans for obstacles
const HOP_LOOKAHEAD: f32 = 180.0;

#[derive(Debug, Clone)]
pub struct RemotePlayer {
    pub id: ConnId,
    pub name: String,
    pub position: (f32, f32),
    pub linear_velocity: (f32, f32),
}

/// Client-side view of the session roster, fed entirely by server events
#[derive(Debug, Default)]
pub struct LocalWorld {
    pub players: HashMap<ConnId, RemotePlayer>,
}

impl LocalWorld {
    pub fn new() -> Self {
        Self {
            players: HashMap::new(),
        }
    }

    pub fn apply(&mut self, message: &Message) {
        match message {
            Message::PlayerJoinLeave { id, name, joined } => {
                if *joined {
                    info!("{} joined the session", name);
                    self.players.insert(
                        *id,
                        RemotePlayer {
                            id: *id,
                            name: name.clone(),
                            position: spawn_position(*id),
                            linear_velocity: (0.0, 0.0),
                        },
                    );
                } else if let Some(player) = self.players.remove(id) {
                    info!("{} left the session", player.name);
                }
            }
            Message::MovementState {
                id,
                position,
                linear_velocity,
            } => {
                // Movement can outrun the join event on the other channel;
                // updates for a player we have not met yet are dropped.
                match self.players.get_mut(id) {
                    Some(player) => {
                        player.position = *position;
                        player.linear_velocity = *linear_velocity;
                    }
                    None => debug!("Movement for unknown player {}", id),
                }
            }
            Message::Login { .. } => {
                debug!("Ignoring login message from server");
            }
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}

/// The locally simulated player the autopilot drives
#[derive(Debug, Clone)]
pub struct LocalPlayer {
    pub position: (f32, f32),
    pub linear_velocity: (f32, f32),
    pub on_ground: bool,
}

impl LocalPlayer {
    pub fn spawn(id: ConnId) -> Self {
        Self {
            position: spawn_position(id),
            linear_velocity: (RUN_SPEED, 0.0),
            on_ground: true,
        }
    }

    pub fn hop(&mut self) {
        if self.on_ground {
            self.linear_velocity.1 = JUMP_VELOCITY;
            self.on_ground = false;
        }
    }

    /// Decides whether to jump this frame: almost always when something is
    /// coming up ahead, and once in a while just because.
    pub fn wants_hop<R: Rng>(&self, map: &MapLayout, rng: &mut R) -> bool {
        if !self.on_ground {
            return false;
        }

        match map.obstacle_ahead(self.position.0, HOP_LOOKAHEAD) {
            Some(_) => rng.gen_bool(0.9),
            None => rng.gen_bool(0.02),
        }
    }

    pub fn step(&mut self, dt: f32) {
        if !self.on_ground {
            self.linear_velocity.1 += GRAVITY * dt;
        }

        self.position.0 += self.linear_velocity.0 * dt;
        self.position.1 += self.linear_velocity.1 * dt;

        // The strip loops; running off the end restarts it.
        if self.position.0 > WORLD_LENGTH {
            self.position.0 = 0.0;
        }

        let floor = FLOOR_Y - PLAYER_SIZE / 2.0;
        if self.position.1 >= floor {
            self.position.1 = floor;
            self.linear_velocity.1 = 0.0;
            self.on_ground = true;
        }

        let ceiling = CEILING_Y + PLAYER_SIZE / 2.0;
        if self.position.1 < ceiling {
            self.position.1 = ceiling;
            self.linear_velocity.1 = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn join(id: ConnId, name: &str) -> Message {
        Message::PlayerJoinLeave {
            id,
            name: name.to_string(),
            joined: true,
        }
    }

    #[test]
    fn test_roster_follows_join_and_leave() {
        let mut world = LocalWorld::new();

        world.apply(&join(1, "ninja"));
        world.apply(&join(2, "pirate"));
        assert_eq!(world.player_count(), 2);
        assert_eq!(world.players[&1].name, "ninja");

        world.apply(&Message::PlayerJoinLeave {
            id: 1,
            name: "ninja".to_string(),
            joined: false,
        });
        assert_eq!(world.player_count(), 1);
        assert!(!world.players.contains_key(&1));
    }

    #[test]
    fn test_movement_updates_known_player() {
        let mut world = LocalWorld::new();
        world.apply(&join(1, "ninja"));

        world.apply(&Message::MovementState {
            id: 1,
            position: (640.0, 500.0),
            linear_velocity: (300.0, -20.0),
        });

        let player = &world.players[&1];
        assert_approx_eq!(player.position.0, 640.0);
        assert_approx_eq!(player.linear_velocity.1, -20.0);
    }

    #[test]
    fn test_movement_before_join_is_dropped() {
        let mut world = LocalWorld::new();

        world.apply(&Message::MovementState {
            id: 9,
            position: (640.0, 500.0),
            linear_velocity: (0.0, 0.0),
        });

        assert_eq!(world.player_count(), 0);
    }

    #[test]
    fn test_hop_arc_returns_to_floor() {
        let mut player = LocalPlayer::spawn(1);
        let floor_y = player.position.1;

        player.hop();
        assert!(!player.on_ground);

        player.step(1.0 / 60.0);
        assert!(player.position.1 < floor_y, "should rise after a hop");

        // Two seconds of simulation is more than one full arc.
        for _ in 0..120 {
            player.step(1.0 / 60.0);
        }
        assert!(player.on_ground);
        assert_approx_eq!(player.position.1, floor_y);
    }

    #[test]
    fn test_hop_midair_does_nothing() {
        let mut player = LocalPlayer::spawn(1);
        player.hop();
        player.step(1.0 / 60.0);

        let vel_before = player.linear_velocity.1;
        player.hop();
        assert_approx_eq!(player.linear_velocity.1, vel_before);
    }

    #[test]
    fn test_running_off_the_end_loops() {
        let mut player = LocalPlayer::spawn(1);
        player.position.0 = WORLD_LENGTH - 1.0;

        player.step(1.0);

        assert!(player.position.0 < WORLD_LENGTH / 2.0);
    }

    #[test]
    fn test_autopilot_hops_at_obstacles_not_in_the_open() {
        let map = MapLayout::standard();
        let mut rng = StdRng::seed_from_u64(7);

        let mut near = LocalPlayer::spawn(1);
        near.position.0 = 500.0; // first platform sits at x=600

        let mut open = LocalPlayer::spawn(1);
        open.position.0 = 100.0;

        let near_hops = (0..100).filter(|_| near.wants_hop(&map, &mut rng)).count();
        let open_hops = (0..100).filter(|_| open.wants_hop(&map, &mut rng)).count();

        assert!(near_hops > 60, "hopped {} times near a platform", near_hops);
        assert!(open_hops < 30, "hopped {} times in the open", open_hops);
    }
}
