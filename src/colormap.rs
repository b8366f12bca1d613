//! Colormap registry collaborator.
//!
//! The core only needs two things from a colormap: whether its name is
//! valid, and whether it pins the display range (label maps, for example).

use std::collections::HashMap;

/// Fixed intensity range declared by a colormap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColormapRange {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl ColormapRange {
    /// A range fixes the display window only when it is non-degenerate.
    pub fn fixes_range(&self) -> bool {
        self.max > self.min
    }
}

/// Lookup of colormaps by name.
pub trait ColormapRegistry: Send + Sync {
    /// Range declared by `name`, `None` when the name is unknown.
    ///
    /// Maps without a fixed range return a degenerate `{0, 0}` range.
    fn lookup(&self, name: &str) -> Option<ColormapRange>;

    /// True if `name` is a valid colormap.
    fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}

/// Colormap names available without configuration. None fixes a range.
pub const BUILTIN_COLORMAPS: &[&str] = &[
    "gray", "hot", "warm", "cool", "winter", "plasma", "viridis", "inferno", "red", "green",
    "blue", "actc", "bone", "copper", "redyell", "bluegrn",
];

/// Registry over [`BUILTIN_COLORMAPS`]. Name matching ignores case.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinColormaps;

impl ColormapRegistry for BuiltinColormaps {
    fn lookup(&self, name: &str) -> Option<ColormapRange> {
        BUILTIN_COLORMAPS
            .iter()
            .any(|c| c.eq_ignore_ascii_case(name))
            .then_some(ColormapRange { min: 0.0, max: 0.0 })
    }
}

/// User-extensible registry.
#[derive(Debug, Clone, Default)]
pub struct ColormapTable {
    entries: HashMap<String, ColormapRange>,
}

impl ColormapTable {
    /// Table seeded with the builtin names.
    pub fn with_builtins() -> Self {
        let mut table = Self::default();
        for name in BUILTIN_COLORMAPS {
            table.insert(name, None);
        }
        table
    }

    /// Register `name`, optionally with a fixed range.
    pub fn insert(&mut self, name: &str, range: Option<(f64, f64)>) {
        let range = range
            .map(|(min, max)| ColormapRange { min, max })
            .unwrap_or(ColormapRange { min: 0.0, max: 0.0 });
        self.entries.insert(name.to_ascii_lowercase(), range);
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no names are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ColormapRegistry for ColormapTable {
    fn lookup(&self, name: &str) -> Option<ColormapRange> {
        self.entries.get(&name.to_ascii_lowercase()).copied()
    }
}
