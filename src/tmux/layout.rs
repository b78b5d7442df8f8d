//! tmux window-layout string parsing.
//!
//! tmux describes a window's pane geometry with a compact string such as
//! `9d2f,120x30,0,0{60x30,0,0,1,60x30,60,0,2}`:
//! - a hex checksum prefix, terminated by the first comma (skipped)
//! - `WxH,X,Y` cell geometry
//! - `,N` for a leaf pane (`%N`)
//! - `{child,child,...}` for a horizontal row (panes side by side)
//! - `[child,child,...]` for a vertical stack (panes stacked)
//!
//! N-ary containers are folded into a left-leaning binary tree. For each
//! fold the ratio is the first child's span over the container's remaining
//! span (width for rows, height for stacks), clamped like every other
//! layout ratio. Malformed layouts never crash: callers fall back to
//! [`TmuxLayout::fallback`], a synthetic single pane.

use crate::layout::{SplitDirection, clamp_ratio};
use crate::tmux::types::TmuxPaneId;

/// A parsed tmux layout, folded to a binary tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TmuxLayout {
    /// Root layout node.
    pub root: TmuxLayoutNode,
}

/// A node in the folded layout tree. Leaves carry tmux pane ids; the
/// controller maps these to native panes while reconciling.
#[derive(Debug, Clone, PartialEq)]
pub enum TmuxLayoutNode {
    /// A leaf pane.
    Pane(TmuxPaneId),
    /// A binary split with the first child's share of the span.
    Split {
        direction: SplitDirection,
        ratio: f32,
        first: Box<TmuxLayoutNode>,
        second: Box<TmuxLayoutNode>,
    },
}

/// Raw parsed cell, before folding. Mirrors the n-ary shape of the wire
/// format; geometry is kept only long enough to derive fold ratios.
#[derive(Debug)]
struct Cell {
    width: u64,
    height: u64,
    body: CellBody,
}

#[derive(Debug)]
enum CellBody {
    Pane(TmuxPaneId),
    /// `{...}`: panes side by side.
    Row(Vec<Cell>),
    /// `[...]`: panes stacked.
    Stack(Vec<Cell>),
}

impl TmuxLayout {
    /// Parse a tmux layout string. Returns `None` on any malformed input.
    pub fn try_parse(layout_str: &str) -> Option<Self> {
        let s = strip_checksum(layout_str.trim());
        if s.is_empty() {
            return None;
        }

        let (cell, rest) = parse_cell(s)?;
        if !rest.is_empty() {
            return None;
        }

        Some(Self { root: fold(cell) })
    }

    /// The synthetic single-pane layout installed when parsing fails.
    pub fn fallback() -> Self {
        Self {
            root: TmuxLayoutNode::Pane(TmuxPaneId(0)),
        }
    }

    /// Get all pane IDs in the layout, in order.
    pub fn pane_ids(&self) -> Vec<TmuxPaneId> {
        let mut ids = Vec::new();
        collect_pane_ids(&self.root, &mut ids);
        ids
    }
}

fn collect_pane_ids(node: &TmuxLayoutNode, ids: &mut Vec<TmuxPaneId>) {
    match node {
        TmuxLayoutNode::Pane(id) => ids.push(*id),
        TmuxLayoutNode::Split { first, second, .. } => {
            collect_pane_ids(first, ids);
            collect_pane_ids(second, ids);
        }
    }
}

/// Skip the leading checksum if present: everything up to the first comma
/// is discarded iff that comma appears before the first `x`.
fn strip_checksum(s: &str) -> &str {
    if let Some(comma) = s.find(',')
        && !s[..comma].contains('x')
    {
        &s[comma + 1..]
    } else {
        s
    }
}

/// Parse one cell: `WxH,X,Y` followed by a pane id, a row, or a stack.
/// Returns the parsed cell and the remaining unparsed string.
fn parse_cell(s: &str) -> Option<(Cell, &str)> {
    let (width, s) = parse_number(s)?;
    let s = s.strip_prefix('x')?;
    let (height, s) = parse_number(s)?;
    let s = s.strip_prefix(',')?;
    let (_x, s) = parse_number(s)?;
    let s = s.strip_prefix(',')?;
    let (_y, s) = parse_number(s)?;

    if let Some(rest) = s.strip_prefix('{') {
        let (children, rest) = parse_children(rest, '}')?;
        Some((
            Cell {
                width,
                height,
                body: CellBody::Row(children),
            },
            rest,
        ))
    } else if let Some(rest) = s.strip_prefix('[') {
        let (children, rest) = parse_children(rest, ']')?;
        Some((
            Cell {
                width,
                height,
                body: CellBody::Stack(children),
            },
            rest,
        ))
    } else if let Some(rest) = s.strip_prefix(',') {
        let (id, rest) = parse_number(rest)?;
        Some((
            Cell {
                width,
                height,
                body: CellBody::Pane(TmuxPaneId(id)),
            },
            rest,
        ))
    } else {
        None
    }
}

/// Parse the comma-separated children of a container up to `end_char`.
fn parse_children(s: &str, end_char: char) -> Option<(Vec<Cell>, &str)> {
    let mut children = Vec::new();
    let mut remaining = s;

    loop {
        let (child, rest) = parse_cell(remaining)?;
        children.push(child);
        remaining = rest;

        if let Some(rest) = remaining.strip_prefix(end_char) {
            return Some((children, rest));
        } else if let Some(rest) = remaining.strip_prefix(',') {
            remaining = rest;
        } else {
            return None;
        }
    }
}

/// Parse a decimal number from the start of the string.
fn parse_number(s: &str) -> Option<(u64, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let num = s[..end].parse().ok()?;
    Some((num, &s[end..]))
}

/// Fold a raw cell into the binary tree.
fn fold(cell: Cell) -> TmuxLayoutNode {
    match cell.body {
        CellBody::Pane(id) => TmuxLayoutNode::Pane(id),
        CellBody::Row(children) => fold_children(children, SplitDirection::Horizontal),
        CellBody::Stack(children) => fold_children(children, SplitDirection::Vertical),
    }
}

/// Left-leaning fold: `[A, B, C]` becomes `Split(A, Split(B, C))`.
///
/// Each fold's ratio is the head's span over the head plus the combined
/// span of the remaining children.
fn fold_children(mut children: Vec<Cell>, direction: SplitDirection) -> TmuxLayoutNode {
    debug_assert!(!children.is_empty());
    if children.len() == 1 {
        return fold(children.remove(0));
    }

    let head = children.remove(0);
    let head_span = span(&head, direction);
    let rest_span: u64 = children.iter().map(|c| span(c, direction)).sum();
    let ratio = if head_span + rest_span > 0 {
        head_span as f32 / (head_span + rest_span) as f32
    } else {
        0.5
    };

    let first = fold(head);
    let second = fold_children(children, direction);

    TmuxLayoutNode::Split {
        direction,
        ratio: clamp_ratio(ratio),
        first: Box::new(first),
        second: Box::new(second),
    }
}

/// The span a child occupies along the container's axis.
fn span(cell: &Cell, direction: SplitDirection) -> u64 {
    match direction {
        SplitDirection::Horizontal => cell.width,
        SplitDirection::Vertical => cell.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_pane() {
        let layout = TmuxLayout::try_parse("80x24,0,0,0").unwrap();
        assert_eq!(layout.root, TmuxLayoutNode::Pane(TmuxPaneId(0)));
    }

    #[test]
    fn test_parse_with_checksum() {
        let layout = TmuxLayout::try_parse("9d2f,120x30,0,0{60x30,0,0,1,60x30,60,0,2}").unwrap();
        assert_eq!(
            layout.root,
            TmuxLayoutNode::Split {
                direction: SplitDirection::Horizontal,
                ratio: 0.5,
                first: Box::new(TmuxLayoutNode::Pane(TmuxPaneId(1))),
                second: Box::new(TmuxLayoutNode::Pane(TmuxPaneId(2))),
            }
        );
    }

    #[test]
    fn test_parse_vertical_stack() {
        let layout = TmuxLayout::try_parse("89x24,0,0[89x12,0,0,1,89x11,0,13,2]").unwrap();
        match layout.root {
            TmuxLayoutNode::Split {
                direction, ratio, ..
            } => {
                assert_eq!(direction, SplitDirection::Vertical);
                // 12 / (12 + 11)
                assert!((ratio - 12.0 / 23.0).abs() < 1e-6);
            }
            _ => panic!("expected split"),
        }
    }

    #[test]
    fn test_parse_nested() {
        let layout =
            TmuxLayout::try_parse("89x24,0,0{44x24,0,0[44x12,0,0,1,44x11,0,13,2],44x24,45,0,3}")
                .unwrap();
        match &layout.root {
            TmuxLayoutNode::Split {
                direction,
                first,
                second,
                ..
            } => {
                assert_eq!(*direction, SplitDirection::Horizontal);
                assert!(matches!(first.as_ref(), TmuxLayoutNode::Split { .. }));
                assert_eq!(second.as_ref(), &TmuxLayoutNode::Pane(TmuxPaneId(3)));
            }
            _ => panic!("expected split"),
        }
        assert_eq!(
            layout.pane_ids(),
            vec![TmuxPaneId(1), TmuxPaneId(2), TmuxPaneId(3)]
        );
    }

    #[test]
    fn test_three_way_fold_is_left_leaning() {
        let layout =
            TmuxLayout::try_parse("181x30,0,0{60x30,0,0,1,60x30,61,0,2,59x30,122,0,3}").unwrap();
        match &layout.root {
            TmuxLayoutNode::Split { first, second, .. } => {
                assert_eq!(first.as_ref(), &TmuxLayoutNode::Pane(TmuxPaneId(1)));
                match second.as_ref() {
                    TmuxLayoutNode::Split { first, second, .. } => {
                        assert_eq!(first.as_ref(), &TmuxLayoutNode::Pane(TmuxPaneId(2)));
                        assert_eq!(second.as_ref(), &TmuxLayoutNode::Pane(TmuxPaneId(3)));
                    }
                    _ => panic!("expected nested split"),
                }
            }
            _ => panic!("expected split"),
        }
    }

    #[test]
    fn test_malformed_inputs_return_none() {
        for input in [
            "",
            "garbage",
            "80x24",
            "80x24,0",
            "80x24,0,0{",
            "80x24,0,0{44x24,0,0,1",
            "80x24,0,0{}",
            "80x24,0,0,1trailing",
        ] {
            assert!(TmuxLayout::try_parse(input).is_none(), "input: {input:?}");
        }
    }

    #[test]
    fn test_fallback_layout() {
        assert_eq!(
            TmuxLayout::fallback().root,
            TmuxLayoutNode::Pane(TmuxPaneId(0))
        );
    }

    #[test]
    fn test_reparse_is_stable() {
        // Parsing the same input twice yields the same tree.
        let input = "cafe,181x50,0,0{90x50,0,0,4,90x50,91,0[90x25,91,0,5,90x24,91,26,6]}";
        assert_eq!(
            TmuxLayout::try_parse(input).unwrap(),
            TmuxLayout::try_parse(input).unwrap()
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn try_parse_never_panics(input in ".*") {
                let _ = TmuxLayout::try_parse(&input);
            }

            #[test]
            fn parsed_ratios_are_clamped(
                widths in proptest::collection::vec(1u64..300, 2..6)
            ) {
                let total: u64 = widths.iter().sum();
                let cells: Vec<String> = widths
                    .iter()
                    .enumerate()
                    .map(|(i, w)| format!("{w}x30,0,0,{i}"))
                    .collect();
                let input = format!("{total}x30,0,0{{{}}}", cells.join(","));
                let layout = TmuxLayout::try_parse(&input).unwrap();
                let mut stack = vec![&layout.root];
                while let Some(node) = stack.pop() {
                    if let TmuxLayoutNode::Split { ratio, first, second, .. } = node {
                        prop_assert!((0.1..=0.9).contains(ratio));
                        stack.push(first);
                        stack.push(second);
                    }
                }
            }
        }
    }
}
