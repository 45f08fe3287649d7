use serde::{Deserialize, Serialize};

use crate::constants::{SPAWN_X, SPAWN_Y};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum PieceKind {
    I,
    J,
    L,
    O,
    S,
    T,
    Z,
}

impl PieceKind {
    pub const ALL: [PieceKind; 7] = [
        PieceKind::I,
        PieceKind::J,
        PieceKind::L,
        PieceKind::O,
        PieceKind::S,
        PieceKind::T,
        PieceKind::Z,
    ];

    /// Grid cell marker for this kind (1-7; 0 is empty and 8 is garbage).
    pub fn cell_id(self) -> u8 {
        match self {
            PieceKind::I => 1,
            PieceKind::J => 2,
            PieceKind::L => 3,
            PieceKind::O => 4,
            PieceKind::S => 5,
            PieceKind::T => 6,
            PieceKind::Z => 7,
        }
    }

    // Side of the square box the shape rotates inside.
    fn box_size(self) -> i32 {
        match self {
            PieceKind::I | PieceKind::O => 4,
            _ => 3,
        }
    }

    // Spawn-state cells, y growing downwards.
    fn spawn_cells(self) -> [(i32, i32); 4] {
        match self {
            PieceKind::I => [(0, 1), (1, 1), (2, 1), (3, 1)],
            PieceKind::J => [(0, 0), (0, 1), (1, 1), (2, 1)],
            PieceKind::L => [(2, 0), (0, 1), (1, 1), (2, 1)],
            PieceKind::O => [(1, 0), (2, 0), (1, 1), (2, 1)],
            PieceKind::S => [(1, 0), (2, 0), (0, 1), (1, 1)],
            PieceKind::T => [(1, 0), (0, 1), (1, 1), (2, 1)],
            PieceKind::Z => [(0, 0), (1, 0), (1, 1), (2, 1)],
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Rotation {
    Spawn = 0,
    Right = 1,
    Reverse = 2,
    Left = 3,
}

impl Rotation {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn rotate_cw(self) -> Rotation {
        match self {
            Rotation::Spawn => Rotation::Right,
            Rotation::Right => Rotation::Reverse,
            Rotation::Reverse => Rotation::Left,
            Rotation::Left => Rotation::Spawn,
        }
    }

    pub fn rotate_ccw(self) -> Rotation {
        match self {
            Rotation::Spawn => Rotation::Left,
            Rotation::Left => Rotation::Reverse,
            Rotation::Reverse => Rotation::Right,
            Rotation::Right => Rotation::Spawn,
        }
    }
}

fn rotate_cw_in_box((x, y): (i32, i32), size: i32) -> (i32, i32) {
    (size - 1 - y, x)
}

/// Cells of `kind` in `rotation`, relative to the top-left of its bounding box.
pub fn shape_cells(kind: PieceKind, rotation: Rotation) -> [(i32, i32); 4] {
    let mut cells = kind.spawn_cells();
    if kind == PieceKind::O {
        return cells;
    }
    let size = kind.box_size();
    for _ in 0..rotation.index() {
        for cell in cells.iter_mut() {
            *cell = rotate_cw_in_box(*cell, size);
        }
    }
    cells
}

fn transition_index(from: Rotation, to: Rotation) -> Option<usize> {
    let idx = match (from, to) {
        (Rotation::Spawn, Rotation::Right) => 0,
        (Rotation::Right, Rotation::Spawn) => 1,
        (Rotation::Right, Rotation::Reverse) => 2,
        (Rotation::Reverse, Rotation::Right) => 3,
        (Rotation::Reverse, Rotation::Left) => 4,
        (Rotation::Left, Rotation::Reverse) => 5,
        (Rotation::Left, Rotation::Spawn) => 6,
        (Rotation::Spawn, Rotation::Left) => 7,
        _ => return None,
    };
    Some(idx)
}

// Guideline SRS offsets, y up. Callers subtract dy on the y-down grid.
const JLSTZ_KICKS: [[(i32, i32); 5]; 8] = [
    [(0, 0), (-1, 0), (-1, 1), (0, -2), (-1, -2)], // 0->R
    [(0, 0), (1, 0), (1, -1), (0, 2), (1, 2)],     // R->0
    [(0, 0), (1, 0), (1, -1), (0, 2), (1, 2)],     // R->2
    [(0, 0), (-1, 0), (-1, 1), (0, -2), (-1, -2)], // 2->R
    [(0, 0), (1, 0), (1, 1), (0, -2), (1, -2)],    // 2->L
    [(0, 0), (-1, 0), (-1, -1), (0, 2), (-1, 2)],  // L->2
    [(0, 0), (-1, 0), (-1, -1), (0, 2), (-1, 2)],  // L->0
    [(0, 0), (1, 0), (1, 1), (0, -2), (1, -2)],    // 0->L
];

const I_KICKS: [[(i32, i32); 5]; 8] = [
    [(0, 0), (-2, 0), (1, 0), (-2, -1), (1, 2)],  // 0->R
    [(0, 0), (2, 0), (-1, 0), (2, 1), (-1, -2)],  // R->0
    [(0, 0), (-1, 0), (2, 0), (-1, 2), (2, -1)],  // R->2
    [(0, 0), (1, 0), (-2, 0), (1, -2), (-2, 1)],  // 2->R
    [(0, 0), (2, 0), (-1, 0), (2, 1), (-1, -2)],  // 2->L
    [(0, 0), (-2, 0), (1, 0), (-2, -1), (1, 2)],  // L->2
    [(0, 0), (1, 0), (2, 0), (1, -2), (2, -1)],   // L->0
    [(0, 0), (-1, 0), (-2, 0), (-1, 2), (-2, 1)], // 0->L
];

/// One falling piece at one instant. Moving it produces a new value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Piece {
    pub kind: PieceKind,
    pub rotation: Rotation,
    pub x: i32,
    pub y: i32,
}

impl Piece {
    pub fn new(kind: PieceKind) -> Self {
        Self {
            kind,
            rotation: Rotation::Spawn,
            x: SPAWN_X,
            y: SPAWN_Y,
        }
    }

    pub fn shifted(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..self
        }
    }

    pub fn with_rotation(self, rotation: Rotation) -> Self {
        Self { rotation, ..self }
    }

    /// Occupied cells relative to the anchor.
    pub fn cells(&self) -> [(i32, i32); 4] {
        shape_cells(self.kind, self.rotation)
    }

    /// Occupied grid cells as `(column, row)`.
    pub fn absolute_cells(&self) -> [(i32, i32); 4] {
        self.cells().map(|(cx, cy)| (self.x + cx, self.y + cy))
    }

    /// Kick candidates for `from -> to`, tried in order. The square piece
    /// never rotates, so it gets none.
    pub fn kicks(&self, from: Rotation, to: Rotation) -> &'static [(i32, i32)] {
        let Some(idx) = transition_index(from, to) else {
            return &[];
        };
        match self.kind {
            PieceKind::O => &[],
            PieceKind::I => &I_KICKS[idx],
            _ => &JLSTZ_KICKS[idx],
        }
    }

    /// Centre cell of the T piece's 3x3 box.
    pub fn center(&self) -> (i32, i32) {
        (self.x + 1, self.y + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut cells: [(i32, i32); 4]) -> [(i32, i32); 4] {
        cells.sort();
        cells
    }

    #[test]
    fn t_rotations_match_guideline_shapes() {
        assert_eq!(
            sorted(shape_cells(PieceKind::T, Rotation::Right)),
            sorted([(1, 0), (1, 1), (2, 1), (1, 2)])
        );
        assert_eq!(
            sorted(shape_cells(PieceKind::T, Rotation::Reverse)),
            sorted([(0, 1), (1, 1), (2, 1), (1, 2)])
        );
        assert_eq!(
            sorted(shape_cells(PieceKind::T, Rotation::Left)),
            sorted([(1, 0), (0, 1), (1, 1), (1, 2)])
        );
    }

    #[test]
    fn i_piece_rotates_inside_four_wide_box() {
        assert_eq!(
            sorted(shape_cells(PieceKind::I, Rotation::Right)),
            [(2, 0), (2, 1), (2, 2), (2, 3)]
        );
        assert_eq!(
            sorted(shape_cells(PieceKind::I, Rotation::Reverse)),
            [(0, 2), (1, 2), (2, 2), (3, 2)]
        );
    }

    #[test]
    fn four_rotations_return_to_spawn_shape() {
        for kind in PieceKind::ALL {
            let mut rotation = Rotation::Spawn;
            let mut cells = kind.spawn_cells();
            for _ in 0..4 {
                rotation = rotation.rotate_cw();
                cells = cells.map(|c| rotate_cw_in_box(c, kind.box_size()));
            }
            assert_eq!(rotation, Rotation::Spawn);
            if kind != PieceKind::O {
                assert_eq!(cells, kind.spawn_cells());
            }
        }
    }

    #[test]
    fn square_piece_has_no_kicks() {
        let piece = Piece::new(PieceKind::O);
        assert!(piece.kicks(Rotation::Spawn, Rotation::Right).is_empty());
    }

    #[test]
    fn srs_kicks_match_reference_jlstz_and_i() {
        let j = Piece::new(PieceKind::J);
        assert_eq!(
            j.kicks(Rotation::Spawn, Rotation::Right),
            &[(0, 0), (-1, 0), (-1, 1), (0, -2), (-1, -2)]
        );
        let i = Piece::new(PieceKind::I);
        assert_eq!(
            i.kicks(Rotation::Right, Rotation::Spawn),
            &[(0, 0), (2, 0), (-1, 0), (2, 1), (-1, -2)]
        );
        assert!(i.kicks(Rotation::Spawn, Rotation::Reverse).is_empty());
    }

    #[test]
    fn absolute_cells_follow_anchor() {
        let piece = Piece::new(PieceKind::I).shifted(0, 5);
        assert_eq!(piece.absolute_cells(), [(3, 6), (4, 6), (5, 6), (6, 6)]);
    }
}
