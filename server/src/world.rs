use log::{debug, info};
use shared::{spawn_position, ConnId, MapLayout};
use std::collections::HashMap;

use crate::registry::PlayerIdentity;

/// Last-received movement state for one active player.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub identity: PlayerIdentity,
    pub position: (f32, f32),
    pub linear_velocity: (f32, f32),
}

/// Server-authoritative world state: the fixed obstacle course plus the
/// movement state most recently received from each player's own connection.
/// Movement is client-owned; the world records it, it does not simulate it.
pub struct GameWorld {
    map: MapLayout,
    players: HashMap<ConnId, PlayerState>,
    elapsed: f32,
    tick: u64,
}

impl GameWorld {
    pub fn new(map: MapLayout) -> Self {
        Self {
            map,
            players: HashMap::new(),
            elapsed: 0.0,
            tick: 0,
        }
    }

    /// The obstacle layout, fixed at construction.
    pub fn map(&self) -> &MapLayout {
        &self.map
    }

    pub fn add_player(&mut self, identity: PlayerIdentity) {
        let spawn = spawn_position(identity.id);

        info!(
            "Spawned player {} (\"{}\") at ({}, {})",
            identity.id, identity.name, spawn.0, spawn.1
        );
        self.players.insert(
            identity.id,
            PlayerState {
                identity,
                position: spawn,
                linear_velocity: (0.0, 0.0),
            },
        );
    }

    /// Overwrites the stored state for `id`. Unknown ids are a silent no-op;
    /// the sender was either never active or already removed.
    pub fn update_movement(&mut self, id: ConnId, position: (f32, f32), velocity: (f32, f32)) {
        match self.players.get_mut(&id) {
            Some(state) => {
                state.position = position;
                state.linear_velocity = velocity;
            }
            None => debug!("Dropped movement update for unknown player {}", id),
        }
    }

    /// Snapshot of every player except `exclude`, used to bring a late
    /// joiner's view up to date.
    pub fn snapshot_for(&self, exclude: ConnId) -> Vec<PlayerState> {
        self.players
            .values()
            .filter(|state| state.identity.id != exclude)
            .cloned()
            .collect()
    }

    pub fn remove_player(&mut self, id: ConnId) {
        if self.players.remove(&id).is_some() {
            info!("Removed player {} from the world", id);
        }
    }

    pub fn player(&self, id: ConnId) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Advances the world clock. Called once per server tick.
    pub fn update(&mut self, delta: f32) {
        self.elapsed += delta;
        self.tick += 1;
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }
}
