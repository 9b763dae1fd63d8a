use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An RGB triple, serialized as `[r, g, b]`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Largest per-channel difference (Chebyshev distance).
    pub fn distance(self, other: Rgb) -> u8 {
        let dr = self.0.abs_diff(other.0);
        let dg = self.1.abs_diff(other.1);
        let db = self.2.abs_diff(other.2);
        dr.max(dg).max(db)
    }

    /// `true` iff every channel differs by at most `tolerance`.
    pub fn matches(self, other: Rgb, tolerance: u8) -> bool {
        self.distance(other) <= tolerance
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

/// Compare an optional sample against an optional expected color.
/// Missing data on either side never matches.
pub fn color_match(actual: Option<Rgb>, expected: Option<Rgb>, tolerance: u8) -> bool {
    match (actual, expected) {
        (Some(a), Some(e)) => a.matches(e, tolerance),
        _ => false,
    }
}
