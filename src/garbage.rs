use std::collections::BTreeMap;

use rand::{Rng as _, SeedableRng as _};
use rand_pcg::Pcg32;
use serde::Serialize;

use crate::PlayerId;
use crate::board::{GarbageEntry, GarbageInbox, PlayerBoard};
use crate::constants::{BOARD_WIDTH, COMBO_GARBAGE, GARBAGE_TABLE, TSPIN_GARBAGE_MULTIPLIER};
use crate::scoring::Spin;

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GarbageSent {
    pub from: PlayerId,
    pub to: Vec<PlayerId>,
    pub lines: u32,
    pub gap_column: usize,
}

/// Every registered opponent of the attacker receives the full amount. Queued
/// garbage is handed to boards by [`GarbageManager::take_incoming`], once per
/// logic tick.
#[derive(Debug)]
pub struct GarbageManager {
    queues: BTreeMap<PlayerId, GarbageInbox>,
    rng: Pcg32,
}

impl GarbageManager {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => Pcg32::seed_from_u64(seed),
            None => Pcg32::from_entropy(),
        };
        Self {
            queues: BTreeMap::new(),
            rng,
        }
    }

    pub fn add_player(&mut self, id: PlayerId) {
        self.queues.entry(id).or_default();
    }

    /// Deregisters a knocked-out player; undelivered garbage is dropped.
    pub fn remove_player(&mut self, id: PlayerId) {
        self.queues.remove(&id);
    }

    pub fn is_registered(&self, id: PlayerId) -> bool {
        self.queues.contains_key(&id)
    }

    pub fn queued(&self, id: PlayerId) -> u32 {
        self.queues.get(&id).map_or(0, GarbageInbox::total)
    }

    pub fn attack_for(lines: u32, spin: Spin, combo: u32) -> u32 {
        let base = match spin {
            Spin::Full => lines * TSPIN_GARBAGE_MULTIPLIER,
            _ => GARBAGE_TABLE
                .get(lines as usize)
                .copied()
                .unwrap_or(GARBAGE_TABLE[GARBAGE_TABLE.len() - 1]),
        };
        let combo_idx = (combo as usize).min(COMBO_GARBAGE.len() - 1);
        base + COMBO_GARBAGE[combo_idx]
    }

    /// The attack first cancels garbage still queued here for the attacker,
    /// then garbage already sitting in the attacker's board inbox. Whatever is
    /// left is queued for every other registered player.
    pub fn process_line_clear(
        &mut self,
        attacker: PlayerId,
        lines: u32,
        spin: Spin,
        combo: u32,
        attacker_board: &mut PlayerBoard,
    ) -> Option<GarbageSent> {
        let mut attack = Self::attack_for(lines, spin, combo);
        if attack == 0 {
            return None;
        }

        if let Some(queue) = self.queues.get_mut(&attacker) {
            attack = queue.cancel(attack);
        }
        attack = attacker_board.counter_pending_garbage(attack);
        if attack == 0 {
            return None;
        }

        let gap_column = self.rng.gen_range(0..BOARD_WIDTH);
        let mut to = Vec::new();
        for (&id, queue) in self.queues.iter_mut().filter(|(id, _)| **id != attacker) {
            queue.push(GarbageEntry {
                lines: attack,
                gap_column,
            });
            to.push(id);
        }
        if to.is_empty() {
            return None;
        }

        Some(GarbageSent {
            from: attacker,
            to,
            lines: attack,
            gap_column,
        })
    }

    /// Drains everything due for `id`. A second call in the same tick
    /// returns nothing.
    pub fn take_incoming(&mut self, id: PlayerId) -> Vec<GarbageEntry> {
        self.queues
            .get_mut(&id)
            .map(GarbageInbox::take_all)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(players: &[PlayerId]) -> GarbageManager {
        let mut m = GarbageManager::new(Some(9));
        for &id in players {
            m.add_player(id);
        }
        m
    }

    #[test]
    fn attack_table() {
        assert_eq!(GarbageManager::attack_for(1, Spin::None, 0), 0);
        assert_eq!(GarbageManager::attack_for(2, Spin::None, 0), 1);
        assert_eq!(GarbageManager::attack_for(3, Spin::None, 0), 2);
        assert_eq!(GarbageManager::attack_for(4, Spin::None, 0), 4);
        assert_eq!(GarbageManager::attack_for(2, Spin::Full, 0), 4);
        assert_eq!(GarbageManager::attack_for(1, Spin::Mini, 0), 0);
        assert_eq!(GarbageManager::attack_for(1, Spin::None, 4), 2);
        assert_eq!(GarbageManager::attack_for(1, Spin::None, 40), 5);
    }

    #[test]
    fn tetris_reaches_every_opponent() {
        let mut m = manager(&[0, 1, 2]);
        let mut board = PlayerBoard::new(Some(1));
        let sent = m.process_line_clear(0, 4, Spin::None, 0, &mut board).unwrap();
        assert_eq!(sent.to, vec![1, 2]);
        assert_eq!(sent.lines, 4);
        assert_eq!(m.queued(1), 4);
        assert_eq!(m.queued(2), 4);
        assert_eq!(m.queued(0), 0);
    }

    #[test]
    fn single_sends_nothing() {
        let mut m = manager(&[0, 1]);
        let mut board = PlayerBoard::new(Some(1));
        assert!(m.process_line_clear(0, 1, Spin::None, 0, &mut board).is_none());
        assert_eq!(m.queued(1), 0);
    }

    #[test]
    fn attack_counters_queued_then_board_garbage() {
        let mut m = manager(&[0, 1]);
        let mut board0 = PlayerBoard::new(Some(1));
        let mut board1 = PlayerBoard::new(Some(1));

        // 1 sends a tetris: 4 queued for 0
        m.process_line_clear(1, 4, Spin::None, 0, &mut board1);
        // 0 already holds 2 undelivered lines on its board
        board0.add_pending_garbage(GarbageEntry { lines: 2, gap_column: 3 });

        // 0 answers with a triple: 2 lines, all absorbed by the queue
        assert!(m.process_line_clear(0, 3, Spin::None, 0, &mut board0).is_none());
        assert_eq!(m.queued(0), 2);
        assert_eq!(board0.pending_garbage(), 2);

        // T-spin triple: 6 lines, 2 + 2 cancelled, 2 go out
        let sent = m.process_line_clear(0, 3, Spin::Full, 0, &mut board0).unwrap();
        assert_eq!(m.queued(0), 0);
        assert_eq!(board0.pending_garbage(), 0);
        assert_eq!(sent.lines, 2);
        assert_eq!(m.queued(1), 2);
    }

    #[test]
    fn incoming_is_delivered_once() {
        let mut m = manager(&[0, 1]);
        let mut board = PlayerBoard::new(Some(1));
        m.process_line_clear(0, 2, Spin::None, 0, &mut board);
        m.process_line_clear(0, 3, Spin::None, 0, &mut board);
        let incoming = m.take_incoming(1);
        assert_eq!(incoming.iter().map(|g| g.lines).sum::<u32>(), 3);
        assert!(m.take_incoming(1).is_empty());
        assert!(m.take_incoming(7).is_empty());
    }

    #[test]
    fn removed_players_stop_receiving() {
        let mut m = manager(&[0, 1, 2]);
        m.remove_player(2);
        assert!(!m.is_registered(2));
        let mut board = PlayerBoard::new(Some(1));
        let sent = m.process_line_clear(0, 4, Spin::None, 0, &mut board).unwrap();
        assert_eq!(sent.to, vec![1]);
    }
}
