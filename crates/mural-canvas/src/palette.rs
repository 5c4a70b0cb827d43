//! Palette and nearest-colour quantization
//!
//! A palette is an explicit value handed to the canvas model at
//! construction, populated once per run from the remote configuration
//! handshake. Entries are kept sorted by index so that quantization ties
//! resolve the same way on every run.

use crate::color::Color;
use crate::error::CanvasError;
use serde::{Deserialize, Serialize};

/// One indexed palette colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaletteEntry {
    /// Index the remote service knows this colour by
    pub index: u8,
    /// Colour value
    pub color: Color,
}

/// Reference colours the remote service may activate, by index
const REFERENCE_HEX: [&str; 32] = [
    "#6D001A", // darkest red
    "#BE0039", // dark red
    "#FF4500", // red
    "#FFA800", // orange
    "#FFD635", // yellow
    "#FFF8B8", // light yellow
    "#00A368", // dark green
    "#00CC78", // green
    "#7EED56", // light green
    "#00756F", // dark teal
    "#009EAA", // teal
    "#00CCC0", // light teal
    "#2450A4", // dark blue
    "#3690EA", // blue
    "#51E9F4", // light blue
    "#493AC1", // indigo
    "#6A5CFF", // periwinkle
    "#94B3FF", // lavender
    "#811E9F", // dark purple
    "#B44AC0", // purple
    "#E4ABFF", // light purple
    "#DE107F", // magenta
    "#FF3881", // pink
    "#FF99AA", // light pink
    "#6D482F", // dark brown
    "#9C6926", // brown
    "#FFB470", // beige
    "#000000", // black
    "#515252", // dark gray
    "#898D90", // gray
    "#D4D7D9", // light gray
    "#FFFFFF", // white
];

/// Fixed, ordered set of indexed colours
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    entries: Vec<PaletteEntry>,
}

impl Palette {
    /// Build a palette, ordering entries by index
    ///
    /// # Errors
    /// `CanvasError::DuplicatePaletteIndex` if an index repeats
    pub fn new(entries: impl IntoIterator<Item = PaletteEntry>) -> Result<Self, CanvasError> {
        let mut entries: Vec<PaletteEntry> = entries.into_iter().collect();
        entries.sort_by_key(|e| e.index);

        if let Some(pair) = entries.windows(2).find(|w| w[0].index == w[1].index) {
            return Err(CanvasError::DuplicatePaletteIndex(pair[0].index));
        }

        Ok(Self { entries })
    }

    /// Build from `(index, "#RRGGBB")` pairs as delivered by the handshake
    ///
    /// # Errors
    /// Invalid hex codes or duplicate indices
    pub fn from_hex_entries<'a>(
        entries: impl IntoIterator<Item = (u8, &'a str)>,
    ) -> Result<Self, CanvasError> {
        let parsed = entries
            .into_iter()
            .map(|(index, hex)| Color::from_hex(hex).map(|color| PaletteEntry { index, color }))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(parsed)
    }

    /// The full 32-colour reference palette
    #[must_use]
    pub fn reference() -> Self {
        let entries = REFERENCE_HEX
            .iter()
            .zip(0u8..)
            .filter_map(|(hex, index)| {
                Color::from_hex(hex)
                    .ok()
                    .map(|color| PaletteEntry { index, color })
            })
            .collect();
        Self { entries }
    }

    /// Restrict the reference palette to the indices the service activated
    ///
    /// Unknown indices are skipped with a warning.
    #[must_use]
    pub fn activate(indices: impl IntoIterator<Item = u8>) -> Self {
        let reference = Self::reference();
        let mut active: Vec<PaletteEntry> = indices
            .into_iter()
            .filter_map(|index| {
                let entry = reference.get(index);
                if entry.is_none() {
                    tracing::warn!("Ignoring unknown palette index {}", index);
                }
                entry
            })
            .collect();
        active.sort_by_key(|e| e.index);
        active.dedup_by_key(|e| e.index);
        Self { entries: active }
    }

    /// Entry for an index
    #[must_use]
    pub fn get(&self, index: u8) -> Option<PaletteEntry> {
        self.entries
            .binary_search_by_key(&index, |e| e.index)
            .ok()
            .map(|pos| self.entries[pos])
    }

    /// Index of an exact colour
    #[must_use]
    pub fn index_of(&self, color: Color) -> Option<u8> {
        self.entries
            .iter()
            .find(|e| e.color == color)
            .map(|e| e.index)
    }

    /// Closest palette entry to `color`
    ///
    /// Distance is the squared Euclidean distance in RGB space. Ties go to
    /// the entry with the lowest index.
    ///
    /// # Errors
    /// `CanvasError::EmptyPalette` before the handshake has populated it
    pub fn nearest(&self, color: Color) -> Result<PaletteEntry, CanvasError> {
        let mut best: Option<(u32, PaletteEntry)> = None;

        for entry in &self.entries {
            let distance = entry.color.distance_sq(&color);
            if distance == 0 {
                return Ok(*entry);
            }
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, *entry));
            }
        }

        best.map(|(_, entry)| entry).ok_or(CanvasError::EmptyPalette)
    }

    /// Entries in index order
    pub fn iter(&self) -> impl Iterator<Item = &PaletteEntry> {
        self.entries.iter()
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the palette has no entries
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
