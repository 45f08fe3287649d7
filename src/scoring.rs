use serde::Serialize;

use crate::constants::{
    BACK_TO_BACK_DENOMINATOR, BACK_TO_BACK_NUMERATOR, COMBO_TABLE, HARD_DROP_POINTS,
    LINE_CLEAR_SCORES, SOFT_DROP_POINTS, TSPIN_MINI_SCORES, TSPIN_SCORES,
};

/// Spin classification of a placement.
#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Spin {
    #[default]
    None,
    Mini,
    Full,
}

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub points: u64,
    pub lines_added: u32,
    pub combo: u32,
    pub back_to_back: bool,
    pub is_tetris: bool,
    pub is_spin: bool,
}

#[derive(Clone, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScoringState {
    pub score: u64,
    pub level: u32,
    pub lines: u32,
    pub combo: Option<u32>,
    pub back_to_back: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Scoring {
    score: u64,
    lines: u32,
    combo: Option<u32>,
    back_to_back: bool,
}

impl Scoring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn lines(&self) -> u32 {
        self.lines
    }

    pub fn level(&self) -> u32 {
        self.lines / 10 + 1
    }

    /// `None` until a scoring clear starts a streak.
    pub fn combo(&self) -> Option<u32> {
        self.combo
    }

    pub fn back_to_back(&self) -> bool {
        self.back_to_back
    }

    /// Scores one placement. Returns `None` when nothing qualifies: no lines
    /// and no spin. Spins score even on zero lines.
    pub fn add_line_clear(&mut self, lines_cleared: u32, spin: Spin) -> Option<ScoreResult> {
        if lines_cleared == 0 && spin == Spin::None {
            return None;
        }

        let combo = self.combo.map_or(0, |c| c + 1);
        self.combo = Some(combo);

        let level = u64::from(self.level());
        let is_tetris = lines_cleared == 4;
        let is_difficult = is_tetris || spin == Spin::Full;

        let idx = lines_cleared as usize;
        let base = match spin {
            Spin::Mini => TSPIN_MINI_SCORES.get(idx).copied().unwrap_or(0),
            Spin::Full => TSPIN_SCORES.get(idx).copied().unwrap_or(0),
            Spin::None => LINE_CLEAR_SCORES.get(idx).copied().unwrap_or(0),
        };
        let mut points = base * level;

        if is_difficult {
            if self.back_to_back {
                points = points * BACK_TO_BACK_NUMERATOR / BACK_TO_BACK_DENOMINATOR;
            }
            self.back_to_back = true;
        } else if lines_cleared > 0 {
            self.back_to_back = false;
        }

        let combo_idx = (combo as usize).min(COMBO_TABLE.len() - 1);
        points += COMBO_TABLE[combo_idx] * level;

        self.score += points;
        self.lines += lines_cleared;

        Some(ScoreResult {
            points,
            lines_added: lines_cleared,
            combo,
            back_to_back: self.back_to_back,
            is_tetris,
            is_spin: spin == Spin::Full,
        })
    }

    pub fn reset_combo(&mut self) {
        self.combo = None;
    }

    pub fn add_soft_drop(&mut self, cells: u32) {
        self.score += u64::from(cells) * SOFT_DROP_POINTS;
    }

    pub fn add_hard_drop(&mut self, cells: u32) {
        self.score += u64::from(cells) * HARD_DROP_POINTS;
    }

    pub fn state(&self) -> ScoringState {
        ScoringState {
            score: self.score,
            level: self.level(),
            lines: self.lines,
            combo: self.combo,
            back_to_back: self.back_to_back,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_scores_without_lines_or_spin() {
        let mut s = Scoring::new();
        assert_eq!(s.add_line_clear(0, Spin::None), None);
        assert_eq!(s.score(), 0);
        assert_eq!(s.combo(), None);
    }

    #[test]
    fn single_at_level_one() {
        let mut s = Scoring::new();
        let r = s.add_line_clear(1, Spin::None).unwrap();
        assert_eq!(r.points, 100);
        assert_eq!(r.combo, 0);
        assert_eq!(s.lines(), 1);
    }

    #[test]
    fn spin_with_zero_lines_scores() {
        let mut s = Scoring::new();
        let r = s.add_line_clear(0, Spin::Full).unwrap();
        assert_eq!(r.points, 400);
        let r = s.add_line_clear(0, Spin::Mini).unwrap();
        // mini: 100 base + combo index 1 bonus of 50
        assert_eq!(r.points, 150);
    }

    #[test]
    fn level_follows_total_lines() {
        let mut s = Scoring::new();
        for _ in 0..3 {
            s.add_line_clear(4, Spin::None);
            s.reset_combo();
        }
        assert_eq!(s.lines(), 12);
        assert_eq!(s.level(), 2);
    }

    #[test]
    fn combo_resets_after_zero_line_placement() {
        let mut s = Scoring::new();
        assert_eq!(s.add_line_clear(1, Spin::None).unwrap().combo, 0);
        assert_eq!(s.add_line_clear(1, Spin::None).unwrap().combo, 1);
        let r = s.add_line_clear(2, Spin::None).unwrap();
        assert_eq!(r.combo, 2);
        assert_eq!(r.points, 300 + 50);
        s.reset_combo();
        assert_eq!(s.combo(), None);
        assert_eq!(s.add_line_clear(1, Spin::None).unwrap().combo, 0);
    }

    #[test]
    fn back_to_back_survives_difficult_clears_and_breaks_on_easy_ones() {
        let mut s = Scoring::new();
        let first = s.add_line_clear(4, Spin::None).unwrap();
        assert_eq!(first.points, 800);
        assert!(first.back_to_back);
        s.reset_combo();

        let second = s.add_line_clear(2, Spin::Full).unwrap();
        assert_eq!(second.points, 1800);
        assert!(second.back_to_back);
        s.reset_combo();

        let easy = s.add_line_clear(1, Spin::None).unwrap();
        assert!(!easy.back_to_back);
        s.reset_combo();

        let after = s.add_line_clear(4, Spin::None).unwrap();
        assert_eq!(after.points, 800);
    }

    #[test]
    fn zero_line_spin_keeps_back_to_back() {
        let mut s = Scoring::new();
        s.add_line_clear(4, Spin::None);
        s.add_line_clear(0, Spin::Mini);
        assert!(s.back_to_back());
    }

    #[test]
    fn drops_award_flat_points() {
        let mut s = Scoring::new();
        s.add_soft_drop(3);
        s.add_hard_drop(10);
        assert_eq!(s.score(), 23);
    }
}
