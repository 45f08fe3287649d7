use std::collections::HashMap;
use std::time::Instant;

use rand::Rng;
use tracing::info;

use crate::actor::{RoomHandle, spawn_room};
use crate::connection::ConnectionHandle;
use crate::constants::{ROOM_CODE_ATTEMPTS, ROOM_CODE_LENGTH};
use crate::error::RegistryError;
use crate::room::{Room, RoomConfig};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Draws a code not rejected by `taken`, giving up after
/// `ROOM_CODE_ATTEMPTS` collisions.
pub fn generate_room_code<R: Rng>(
    rng: &mut R,
    taken: impl Fn(&str) -> bool,
) -> Result<String, RegistryError> {
    for _ in 0..ROOM_CODE_ATTEMPTS {
        let code: String = (0..ROOM_CODE_LENGTH)
            .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
            .collect();
        if !taken(&code) {
            return Ok(code);
        }
    }
    Err(RegistryError::CodesExhausted(ROOM_CODE_ATTEMPTS))
}

/// Live rooms by code. Owned by the server entrypoint and shared with the
/// connection tasks.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, RoomHandle>,
    config: RoomConfig,
}

impl RoomRegistry {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            rooms: HashMap::new(),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    // Rooms whose task has exited free their code.
    fn prune(&mut self) {
        self.rooms.retain(|code, handle| {
            let live = !handle.is_closed();
            if !live {
                info!(room = %code, "room released");
            }
            live
        });
    }

    /// Opens a room with `display` as its primary display and starts its
    /// task. Must be called inside a tokio runtime.
    pub fn create(&mut self, display: ConnectionHandle, now: Instant) -> Result<RoomHandle, RegistryError> {
        self.prune();
        let code = generate_room_code(&mut rand::thread_rng(), |c| self.rooms.contains_key(c))?;
        let room = Room::new(code.clone(), display, self.config.clone(), now);
        let (handle, _task) = spawn_room(room);
        self.rooms.insert(code, handle.clone());
        Ok(handle)
    }

    /// Codes are matched case-insensitively.
    pub fn lookup(&mut self, code: &str) -> Option<RoomHandle> {
        self.prune();
        self.rooms.get(&code.trim().to_ascii_uppercase()).cloned()
    }

    pub fn destroy(&mut self, code: &str) -> bool {
        match self.rooms.remove(&code.trim().to_ascii_uppercase()) {
            Some(handle) => {
                handle.destroy();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionId;
    use rand::rngs::mock::StepRng;

    #[test]
    fn codes_are_four_uppercase_letters() {
        let code = generate_room_code(&mut rand::thread_rng(), |_| false).unwrap();
        assert_eq!(code.len(), ROOM_CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn collisions_are_retried_then_give_up() {
        // a constant source always yields the same code
        let mut rng = StepRng::new(0, 0);
        let first = generate_room_code(&mut rng, |_| false).unwrap();
        let err = generate_room_code(&mut rng, |c| c == first).unwrap_err();
        assert_eq!(err, RegistryError::CodesExhausted(ROOM_CODE_ATTEMPTS));
    }

    #[tokio::test(start_paused = true)]
    async fn create_lookup_destroy() {
        let mut registry = RoomRegistry::default();
        let (display, _rx) = ConnectionHandle::channel(ConnectionId(1));
        let handle = registry.create(display, crate::actor::now()).unwrap();
        let code = handle.code().to_string();

        assert!(registry.lookup(&code.to_ascii_lowercase()).is_some());
        assert!(registry.lookup("ZZZZZ").is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry.destroy(&code));
        assert!(registry.lookup(&code).is_none());
        assert!(!registry.destroy(&code));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_rooms_are_pruned() {
        let mut registry = RoomRegistry::default();
        let (display, _rx) = ConnectionHandle::channel(ConnectionId(1));
        let handle = registry.create(display.clone(), crate::actor::now()).unwrap();
        handle.closed(display.id());
        while !handle.is_closed() {
            tokio::task::yield_now().await;
        }
        assert!(registry.lookup(handle.code()).is_none());
        assert!(registry.is_empty());
    }
}
