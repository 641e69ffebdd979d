//! Style resolver: deterministic node colors and stroke widths.
//!
//! Colors are picked by index into [`DEFAULT_PALETTE`], keyed on the node's
//! branch identifier (first two segments of `state.path`), then its content,
//! then its depth. The checksum is a plain sum of UTF-16 code units so the
//! same key maps to the same index whichever side computes it.

use crate::tree::Node;
use serde::Serialize;

/// Default color palette. Order matters: colors are addressed by index.
pub static DEFAULT_PALETTE: [&str; 20] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf", "#aec7e8", "#ffbb78", "#98df8a", "#ff9896", "#c5b0d5", "#c49c94",
    "#f7b6d3", "#c7c7c7", "#dbdb8d", "#9edae5",
];

/// The key a node's color is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorKey<'a> {
    Branch(&'a str),
    Content(&'a str),
    Depth(u32),
}

impl<'a> ColorKey<'a> {
    /// Pick the color key for a node. Empty path or content counts as absent.
    pub fn of(node: &'a Node) -> Self {
        if let Some(path) = node.path().filter(|p| !p.is_empty()) {
            return ColorKey::Branch(branch_id(path));
        }
        if !node.content.is_empty() {
            return ColorKey::Content(&node.content);
        }
        ColorKey::Depth(node.depth)
    }

    pub fn index(&self, palette_len: usize) -> usize {
        if palette_len == 0 {
            return 0;
        }
        match self {
            ColorKey::Branch(s) | ColorKey::Content(s) => (checksum(s) % palette_len as u64) as usize,
            ColorKey::Depth(d) => *d as usize % palette_len,
        }
    }
}

/// First two dot-delimited segments of a path, or the whole path when it
/// has a single segment.
pub fn branch_id(path: &str) -> &str {
    match path.match_indices('.').nth(1) {
        Some((idx, _)) => &path[..idx],
        None => path,
    }
}

/// Sum of UTF-16 code units
pub fn checksum(s: &str) -> u64 {
    s.encode_utf16().map(u64::from).sum()
}

/// Stroke width decaying with depth: `base + delta / k^depth`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineWidth {
    pub base: f64,
    pub delta: f64,
    pub k: f64,
}

impl Default for LineWidth {
    fn default() -> Self {
        Self {
            base: 2.0,
            delta: 2.0,
            k: 1.5,
        }
    }
}

impl LineWidth {
    pub fn at_depth(&self, depth: u32) -> f64 {
        let exp = i32::try_from(depth).unwrap_or(i32::MAX);
        self.base + self.delta / self.k.powi(exp)
    }
}

/// Numeric layout parameters handed to the layout engine as data.
///
/// Field names follow the layout engine's option names.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutOptions {
    pub duration: u32,
    pub max_initial_scale: f64,
    pub spacing_horizontal: u32,
    pub spacing_vertical: u32,
    pub padding_x: u32,
    pub node_min_height: u32,
    /// -1 expands every level
    pub initial_expand_level: i32,
    pub auto_fit: bool,
    pub fit_ratio: f64,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            duration: 0,
            max_initial_scale: 5.0,
            spacing_horizontal: 150,
            spacing_vertical: 10,
            padding_x: 12,
            node_min_height: 20,
            initial_expand_level: -1,
            auto_fit: true,
            fit_ratio: 0.95,
        }
    }
}

/// Style configuration for one render call
#[derive(Debug, Clone)]
pub struct StyleConfig {
    pub palette: &'static [&'static str],
    pub line_width: LineWidth,
    pub layout: LayoutOptions,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            palette: &DEFAULT_PALETTE,
            line_width: LineWidth::default(),
            layout: LayoutOptions::default(),
        }
    }
}

impl StyleConfig {
    pub fn palette_index(&self, node: &Node) -> usize {
        ColorKey::of(node).index(self.palette.len())
    }

    pub fn color(&self, node: &Node) -> &'static str {
        self.palette
            .get(self.palette_index(node))
            .copied()
            .unwrap_or(DEFAULT_PALETTE[0])
    }

    pub fn line_width(&self, node: &Node) -> f64 {
        self.line_width.at_depth(node.depth)
    }

    /// Color used by the document when a node carries no resolved color
    pub fn fallback_color(&self) -> &'static str {
        self.palette.first().copied().unwrap_or(DEFAULT_PALETTE[0])
    }
}
