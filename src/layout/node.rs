//! `LayoutNode`: binary tree structure for arbitrary pane nesting.

use crate::ids::PaneId;

/// Direction of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitDirection {
    /// Panes side by side; the divider runs vertically.
    Horizontal,
    /// Panes stacked; the divider runs horizontally.
    Vertical,
}

/// One step of a path into the tree, used to address a specific split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Left/top child.
    First,
    /// Right/bottom child.
    Second,
}

/// Tree node for pane layout.
///
/// The pane tree is a binary tree where:
/// - Leaf nodes reference a native pane by id
/// - Split nodes contain two children with a split direction and ratio
///
/// Operations are persistent: they consume the tree and return the updated
/// one, so a caller always holds a structurally valid layout.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutNode {
    /// A leaf referencing a pane.
    Pane(PaneId),
    /// A split containing two child nodes.
    Split {
        /// Direction of the split.
        direction: SplitDirection,
        /// Split ratio (share of the first child), clamped to `0.1..=0.9`.
        ratio: f32,
        /// First child (left for horizontal, top for vertical).
        first: Box<LayoutNode>,
        /// Second child (right for horizontal, bottom for vertical).
        second: Box<LayoutNode>,
    },
}

/// Clamp a split ratio into the valid range.
///
/// Non-finite input (NaN, infinities) is coerced to an even split.
pub(crate) fn clamp_ratio(ratio: f32) -> f32 {
    if ratio.is_finite() {
        ratio.clamp(0.1, 0.9)
    } else {
        0.5
    }
}

impl LayoutNode {
    /// Create a split node with a clamped ratio.
    pub fn split(direction: SplitDirection, ratio: f32, first: LayoutNode, second: LayoutNode) -> Self {
        LayoutNode::Split {
            direction,
            ratio: clamp_ratio(ratio),
            first: Box::new(first),
            second: Box::new(second),
        }
    }

    /// Check if this is a leaf node.
    pub fn is_leaf(&self) -> bool {
        matches!(self, LayoutNode::Pane(_))
    }

    /// Whether the given pane appears as a leaf of this subtree.
    pub fn contains(&self, id: PaneId) -> bool {
        match self {
            LayoutNode::Pane(pane) => *pane == id,
            LayoutNode::Split { first, second, .. } => first.contains(id) || second.contains(id),
        }
    }

    /// Get all pane IDs in this subtree, in order (first child before second).
    ///
    /// The first element is the "pick next active pane" winner when an
    /// active pane disappears.
    pub fn collect_panes(&self) -> Vec<PaneId> {
        match self {
            LayoutNode::Pane(id) => vec![*id],
            LayoutNode::Split { first, second, .. } => {
                let mut ids = first.collect_panes();
                ids.extend(second.collect_panes());
                ids
            }
        }
    }

    /// Count total number of panes.
    pub fn pane_count(&self) -> usize {
        match self {
            LayoutNode::Pane(_) => 1,
            LayoutNode::Split { first, second, .. } => first.pane_count() + second.pane_count(),
        }
    }

    /// Replace the leaf holding `target` with a split of `target` and
    /// `new_pane`.
    ///
    /// The new split starts at an even ratio. If `target` is absent the
    /// layout is returned unchanged.
    pub fn split_at(self, target: PaneId, direction: SplitDirection, new_pane: PaneId) -> Self {
        match self {
            LayoutNode::Pane(id) if id == target => LayoutNode::split(
                direction,
                0.5,
                LayoutNode::Pane(target),
                LayoutNode::Pane(new_pane),
            ),
            leaf @ LayoutNode::Pane(_) => leaf,
            LayoutNode::Split {
                direction: dir,
                ratio,
                first,
                second,
            } => LayoutNode::Split {
                direction: dir,
                ratio,
                first: Box::new(first.split_at(target, direction, new_pane)),
                second: Box::new(second.split_at(target, direction, new_pane)),
            },
        }
    }

    /// Remove the leaf holding `pane`.
    ///
    /// A split that loses one child collapses to the surviving child (its
    /// ratio is lost). Returns `None` when the whole tree collapses.
    pub fn remove_pane(self, pane: PaneId) -> Option<Self> {
        match self {
            LayoutNode::Pane(id) => {
                if id == pane {
                    None
                } else {
                    Some(LayoutNode::Pane(id))
                }
            }
            LayoutNode::Split {
                direction,
                ratio,
                first,
                second,
            } => match (first.remove_pane(pane), second.remove_pane(pane)) {
                (Some(first), Some(second)) => Some(LayoutNode::Split {
                    direction,
                    ratio,
                    first: Box::new(first),
                    second: Box::new(second),
                }),
                (Some(survivor), None) | (None, Some(survivor)) => Some(survivor),
                (None, None) => None,
            },
        }
    }

    /// Update the ratio of the split addressed by `path`.
    ///
    /// `path` is walked from the root; an empty path targets the root
    /// split. Paths that run into a leaf (or past the tree) are a no-op.
    pub fn update_ratio_at(&mut self, path: &[Branch], ratio: f32) {
        match self {
            LayoutNode::Pane(_) => {}
            LayoutNode::Split {
                ratio: r,
                first,
                second,
                ..
            } => match path.split_first() {
                None => *r = clamp_ratio(ratio),
                Some((Branch::First, rest)) => first.update_ratio_at(rest, ratio),
                Some((Branch::Second, rest)) => second.update_ratio_at(rest, ratio),
            },
        }
    }

    /// Structural merge that keeps user-adjusted ratios across tmux-emitted
    /// layout refreshes.
    ///
    /// For each corresponding node pair: if both are splits with the same
    /// direction, keep `prev`'s ratio and recurse on the children pairwise;
    /// otherwise take `next` wholesale.
    pub fn preserve_ratios(prev: &LayoutNode, next: LayoutNode) -> LayoutNode {
        match (prev, next) {
            (
                LayoutNode::Split {
                    direction: prev_dir,
                    ratio: prev_ratio,
                    first: prev_first,
                    second: prev_second,
                },
                LayoutNode::Split {
                    direction,
                    ratio: _,
                    first,
                    second,
                },
            ) if *prev_dir == direction => LayoutNode::Split {
                direction,
                ratio: *prev_ratio,
                first: Box::new(Self::preserve_ratios(prev_first, *first)),
                second: Box::new(Self::preserve_ratios(prev_second, *second)),
            },
            (_, next) => next,
        }
    }
}
