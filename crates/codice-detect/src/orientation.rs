//! Orientation cell classification and rotation of the 4x4 data grid.
//!
//! The inner grid is stored as a 16-bit row-major mask: `idx = row * 4 + col`,
//! bit set = light cell.

use serde::{Deserialize, Serialize};

/// Side of the inner data grid in cells.
pub const DATA_GRID: usize = 4;

/// Number of identifier bits carried by the 12 non-corner cells.
pub const DATA_BITS: u32 = 12;

/// Largest identifier a marker can encode.
pub const MAX_MARKER_ID: u32 = (1 << DATA_BITS) - 1;

/// Corner cell indices in TL, TR, BR, BL order.
pub const CORNER_CELLS: [usize; 4] = [
    0,
    DATA_GRID - 1,
    DATA_GRID * DATA_GRID - 1,
    DATA_GRID * (DATA_GRID - 1),
];

/// Clockwise rotation of an observed marker relative to its canonical pose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_quarter_turns(turns: u8) -> Self {
        match turns & 3 {
            0 => Self::Deg0,
            1 => Self::Deg90,
            2 => Self::Deg180,
            _ => Self::Deg270,
        }
    }

    #[inline]
    pub fn quarter_turns(self) -> u8 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 1,
            Self::Deg180 => 2,
            Self::Deg270 => 3,
        }
    }

    #[inline]
    pub fn degrees(self) -> f32 {
        90.0 * self.quarter_turns() as f32
    }
}

/// Outcome of inspecting the four inner corner cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    /// No light corner cell.
    NoOrientation,
    /// Two or more light corner cells.
    Ambiguous,
    /// Exactly one light corner; TL, TR, BR, BL map to 0°, 90°, 180°, 270°.
    Oriented(Rotation),
}

/// Classify corner lightness given in TL, TR, BR, BL order.
pub fn classify_orientation(light: [bool; 4]) -> Orientation {
    let mut found = None;
    for (i, &is_light) in light.iter().enumerate() {
        if !is_light {
            continue;
        }
        if found.is_some() {
            return Orientation::Ambiguous;
        }
        found = Some(i as u8);
    }
    match found {
        Some(i) => Orientation::Oriented(Rotation::from_quarter_turns(i)),
        None => Orientation::NoOrientation,
    }
}

/// Corner lightness of a cell mask in TL, TR, BR, BL order.
pub fn corner_lightness(cells: u16) -> [bool; 4] {
    CORNER_CELLS.map(|idx| (cells >> idx) & 1 == 1)
}

/// Rotate a row-major 4x4 cell mask clockwise by `turns` quarter turns.
pub fn rotate_cells_cw(cells: u16, turns: u8) -> u16 {
    let turns = turns & 3;
    if turns == 0 {
        return cells;
    }

    let n = DATA_GRID;
    let mut out = 0u16;
    for r in 0..n {
        for c in 0..n {
            let (sr, sc) = match turns {
                1 => (n - 1 - c, r),
                2 => (n - 1 - r, n - 1 - c),
                _ => (c, n - 1 - r),
            };
            let bit = (cells >> (sr * n + sc)) & 1;
            out |= bit << (r * n + c);
        }
    }
    out
}

/// Undo an observed rotation so the orientation cell lands top-left.
#[inline]
pub fn canonicalize(cells: u16, rotation: Rotation) -> u16 {
    rotate_cells_cw(cells, (4 - rotation.quarter_turns()) & 3)
}

/// Read the 12 non-corner cells row-major as bits, first cell = bit 0.
pub fn pattern_bits(cells: u16) -> u32 {
    let mut id = 0u32;
    let mut bit = 0u32;
    for idx in 0..DATA_GRID * DATA_GRID {
        if CORNER_CELLS.contains(&idx) {
            continue;
        }
        if (cells >> idx) & 1 == 1 {
            id |= 1 << bit;
        }
        bit += 1;
    }
    id
}

/// Inverse of [`pattern_bits`] for a canonical marker (orientation cell set).
pub fn cells_for_id(id: u32) -> u16 {
    let mut cells = 1u16 << CORNER_CELLS[0];
    let mut bit = 0u32;
    for idx in 0..DATA_GRID * DATA_GRID {
        if CORNER_CELLS.contains(&idx) {
            continue;
        }
        if (id >> bit) & 1 == 1 {
            cells |= 1 << idx;
        }
        bit += 1;
    }
    cells
}
