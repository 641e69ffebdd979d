//! Outline tree model shared by the tree provider, style resolver and
//! document assembler.

use crate::assets::AssetRef;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One entry in the parsed outline tree.
///
/// Nodes are produced by a [`TreeProvider`] and treated as immutable
/// afterwards, except for the payload annotations written by the document
/// assembler right before serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Inline HTML shown for this node
    #[serde(default)]
    pub content: String,
    /// Distance from the root (root is 0)
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub children: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<NodeState>,
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub payload: Payload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// Dot-delimited branch identifier, e.g. `1.2.5`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Per-node values consumed by the layout engine inside the rendering
/// context. Everything here is plain data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_width: Option<f64>,
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        self.fold.is_none() && self.color.is_none() && self.line_width.is_none()
    }
}

impl Node {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.state = Some(NodeState {
            path: Some(path.into()),
        });
        self
    }

    /// The node's `state.path`, if one was assigned
    pub fn path(&self) -> Option<&str> {
        self.state.as_ref().and_then(|s| s.path.as_deref())
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Pre-order visit of this node and all descendants
    pub fn walk<F>(&self, f: &mut F)
    where
        F: FnMut(&Node),
    {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }

    /// Pre-order mutable visit of this node and all descendants
    pub fn walk_mut<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut Node),
    {
        f(self);
        for child in &mut self.children {
            child.walk_mut(f);
        }
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }

    pub fn max_depth(&self) -> u32 {
        let mut max = 0;
        self.walk(&mut |n| max = max.max(n.depth));
        max
    }

    /// Assign `depth` and `state.path` to the whole subtree rooted here.
    ///
    /// Ids are handed out in pre-order starting at 1, and a node's path is
    /// its ancestors' ids joined by `.`, so the first two segments identify
    /// the top-level branch a node belongs to.
    pub fn assign_positions(&mut self) {
        let mut next_id = 0u64;
        assign(self, 0, None, &mut next_id);
    }
}

fn assign(node: &mut Node, depth: u32, parent: Option<&str>, next_id: &mut u64) {
    *next_id += 1;
    let path = match parent {
        Some(p) => format!("{}.{}", p, next_id),
        None => next_id.to_string(),
    };
    node.depth = depth;
    for child in &mut node.children {
        assign(child, depth + 1, Some(&path), next_id);
    }
    node.state = Some(NodeState { path: Some(path) });
}

/// Optional markdown constructs that need extra presentational assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    Checkbox,
    CodeBlock,
}

/// Result of transforming input text
#[derive(Debug, Clone)]
pub struct Outline {
    pub root: Node,
    pub features: BTreeSet<Feature>,
}

/// Turns input text into an outline tree.
///
/// Malformed input must surface as [`crate::Error::TransformError`] rather
/// than panicking. The renderer reports any other error kind returned here
/// as a transform failure too.
pub trait TreeProvider: Send + Sync {
    fn transform(&self, text: &str) -> Result<Outline>;

    /// Static resources the layout engine needs for the given features
    fn assets_for(&self, features: &BTreeSet<Feature>) -> Vec<AssetRef> {
        crate::assets::assets_for(features)
    }
}
