//! An interval tree of timed entities.
//!
//! Nodes are keyed by start offset and hold every item starting there, in
//! insertion order. Each node also tracks the greatest stop offset in its
//! subtree, which lets overlap queries skip subtrees that end too early.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::offset::{Offset, OffsetRange};

/// Something occupying `[start_offset, stop_offset)` on the timeline.
pub trait Timespan: Clone {
    fn start_offset(&self) -> Offset;
    fn stop_offset(&self) -> Offset;
    /// A copy of `self` occupying `[start, stop)` instead.
    fn with_bounds(&self, start: Offset, stop: Offset) -> Self;
}

type Link<T> = Option<Box<TreeNode<T>>>;

#[derive(Debug, Clone)]
struct TreeNode<T> {
    start: Offset,
    items: Vec<T>,
    max_stop: Offset,
    height: i32,
    left: Link<T>,
    right: Link<T>,
}

impl<T: Timespan> TreeNode<T> {
    fn leaf(item: T) -> Box<Self> {
        let start = item.start_offset();
        let stop = item.stop_offset();
        Box::new(TreeNode {
            start,
            items: vec![item],
            max_stop: stop,
            height: 1,
            left: None,
            right: None,
        })
    }

    fn update(&mut self) {
        self.height = 1 + height(&self.left).max(height(&self.right));
        let mut max_stop = self
            .items
            .iter()
            .map(Timespan::stop_offset)
            .max()
            .unwrap_or(self.start);
        for child in [&self.left, &self.right].into_iter().flatten() {
            max_stop = max_stop.max(child.max_stop);
        }
        self.max_stop = max_stop;
    }

    fn balance(&self) -> i32 {
        height(&self.left) - height(&self.right)
    }
}

fn height<T>(link: &Link<T>) -> i32 {
    link.as_ref().map_or(0, |node| node.height)
}

fn rotate_left<T: Timespan>(mut node: Box<TreeNode<T>>) -> Box<TreeNode<T>> {
    let Some(mut pivot) = node.right.take() else {
        return node;
    };
    node.right = pivot.left.take();
    node.update();
    pivot.left = Some(node);
    pivot.update();
    pivot
}

fn rotate_right<T: Timespan>(mut node: Box<TreeNode<T>>) -> Box<TreeNode<T>> {
    let Some(mut pivot) = node.left.take() else {
        return node;
    };
    node.left = pivot.right.take();
    node.update();
    pivot.right = Some(node);
    pivot.update();
    pivot
}

fn rebalance<T: Timespan>(mut node: Box<TreeNode<T>>) -> Box<TreeNode<T>> {
    node.update();
    let balance = node.balance();
    if balance > 1 {
        if node.left.as_ref().is_some_and(|left| left.balance() < 0) {
            node.left = node.left.take().map(rotate_left);
        }
        return rotate_right(node);
    }
    if balance < -1 {
        if node.right.as_ref().is_some_and(|right| right.balance() > 0) {
            node.right = node.right.take().map(rotate_right);
        }
        return rotate_left(node);
    }
    node
}

fn insert_into<T: Timespan>(link: Link<T>, item: T) -> Box<TreeNode<T>> {
    let Some(mut node) = link else {
        return TreeNode::leaf(item);
    };
    match item.start_offset().cmp(&node.start) {
        Ordering::Less => node.left = Some(insert_into(node.left.take(), item)),
        Ordering::Greater => node.right = Some(insert_into(node.right.take(), item)),
        Ordering::Equal => node.items.push(item),
    }
    rebalance(node)
}

fn remove_from<T: Timespan + PartialEq>(link: Link<T>, item: &T, removed: &mut bool) -> Link<T> {
    let mut node = link?;
    match item.start_offset().cmp(&node.start) {
        Ordering::Less => node.left = remove_from(node.left.take(), item, removed),
        Ordering::Greater => node.right = remove_from(node.right.take(), item, removed),
        Ordering::Equal => {
            if let Some(position) = node.items.iter().position(|candidate| candidate == item) {
                node.items.remove(position);
                *removed = true;
            }
            if node.items.is_empty() {
                return unlink(node);
            }
        }
    }
    Some(rebalance(node))
}

/// Removes `node` itself, splicing its children back together.
fn unlink<T: Timespan>(mut node: Box<TreeNode<T>>) -> Link<T> {
    match (node.left.take(), node.right.take()) {
        (None, None) => None,
        (Some(child), None) | (None, Some(child)) => Some(child),
        (Some(left), Some(right)) => {
            let (mut successor, rest) = take_min(right);
            successor.left = Some(left);
            successor.right = rest;
            Some(rebalance(successor))
        }
    }
}

fn take_min<T: Timespan>(mut node: Box<TreeNode<T>>) -> (Box<TreeNode<T>>, Link<T>) {
    match node.left.take() {
        None => {
            let rest = node.right.take();
            (node, rest)
        }
        Some(left) => {
            let (min, rest) = take_min(left);
            node.left = rest;
            (min, Some(rebalance(node)))
        }
    }
}

fn collect_overlaps<'a, T: Timespan>(
    link: &'a Link<T>,
    range: &OffsetRange,
    out: &mut Vec<&'a T>,
) {
    let Some(node) = link else {
        return;
    };
    if node.max_stop <= range.start {
        return;
    }
    collect_overlaps(&node.left, range, out);
    if node.start < range.stop {
        out.extend(
            node.items
                .iter()
                .filter(|item| range.intersects(item.start_offset(), item.stop_offset())),
        );
        collect_overlaps(&node.right, range, out);
    }
}

/// Every point where something starts or stops, with what starts and stops there.
#[derive(Debug)]
pub struct Simultaneity<'a, T> {
    pub offset: Offset,
    pub starting: Vec<&'a T>,
    pub stopping: Vec<&'a T>,
}

/// Balanced interval tree ordered by start offset.
#[derive(Debug, Clone)]
pub struct TimespanCollection<T> {
    root: Link<T>,
    len: usize,
}

impl<T> Default for TimespanCollection<T> {
    fn default() -> Self {
        Self { root: None, len: 0 }
    }
}

impl<T: Timespan> TimespanCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, item: T) {
        self.root = Some(insert_into(self.root.take(), item));
        self.len += 1;
    }

    /// Items in start order; items sharing a start keep insertion order.
    pub fn iter(&self) -> Iter<'_, T> {
        let mut iter = Iter {
            stack: Vec::new(),
            current: Default::default(),
        };
        iter.push_left_spine(&self.root);
        iter
    }

    /// Items whose interval shares at least one instant with `range`, in start order.
    pub fn overlaps(&self, range: &OffsetRange) -> Vec<&T> {
        let mut out = Vec::new();
        collect_overlaps(&self.root, range, &mut out);
        out
    }

    /// Earliest start, if any.
    pub fn start_offset(&self) -> Option<Offset> {
        let mut node = self.root.as_ref()?;
        while let Some(left) = node.left.as_ref() {
            node = left;
        }
        Some(node.start)
    }

    /// Latest stop, if any.
    pub fn stop_offset(&self) -> Option<Offset> {
        self.root.as_ref().map(|node| node.max_stop)
    }

    /// Distinct finite start and stop points in ascending order.
    pub fn simultaneities(&self) -> Vec<Simultaneity<'_, T>> {
        let mut points: BTreeMap<Offset, (Vec<&T>, Vec<&T>)> = BTreeMap::new();
        for item in self.iter() {
            points.entry(item.start_offset()).or_default().0.push(item);
            let stop = item.stop_offset();
            if stop.is_finite() {
                points.entry(stop).or_default().1.push(item);
            }
        }
        points
            .into_iter()
            .map(|(offset, (starting, stopping))| Simultaneity {
                offset,
                starting,
                stopping,
            })
            .collect()
    }

    /// A copy with every interval shifted by `delta` seconds.
    pub fn translated(&self, delta: f64) -> Self {
        let mut out = Self::new();
        for item in self.iter() {
            out.insert(item.with_bounds(
                item.start_offset().shifted(delta),
                item.stop_offset().shifted(delta),
            ));
        }
        out
    }

    /// A copy holding only items that intersect `range`, clipped to it.
    pub fn masked(&self, range: &OffsetRange) -> Self {
        let mut out = Self::new();
        for item in self.overlaps(range) {
            out.insert(item.with_bounds(
                item.start_offset().max(range.start),
                item.stop_offset().min(range.stop),
            ));
        }
        out
    }
}

impl<T: Timespan + PartialEq> TimespanCollection<T> {
    /// Remove one item equal to `item`. Returns whether anything was removed.
    pub fn remove(&mut self, item: &T) -> bool {
        let mut removed = false;
        self.root = remove_from(self.root.take(), item, &mut removed);
        if removed {
            self.len -= 1;
        }
        removed
    }
}

impl<T: Timespan> FromIterator<T> for TimespanCollection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut collection = Self::new();
        for item in iter {
            collection.insert(item);
        }
        collection
    }
}

/// In-order iterator over a [`TimespanCollection`].
pub struct Iter<'a, T> {
    stack: Vec<&'a TreeNode<T>>,
    current: std::slice::Iter<'a, T>,
}

impl<'a, T> Iter<'a, T> {
    fn push_left_spine(&mut self, mut link: &'a Link<T>) {
        while let Some(node) = link {
            self.stack.push(node);
            link = &node.left;
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        loop {
            if let Some(item) = self.current.next() {
                return Some(item);
            }
            let node = self.stack.pop()?;
            self.current = node.items.iter();
            self.push_left_spine(&node.right);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Span {
        name: &'static str,
        start: Offset,
        stop: Offset,
    }

    impl Timespan for Span {
        fn start_offset(&self) -> Offset {
            self.start
        }

        fn stop_offset(&self) -> Offset {
            self.stop
        }

        fn with_bounds(&self, start: Offset, stop: Offset) -> Self {
            Span {
                start,
                stop,
                ..self.clone()
            }
        }
    }

    fn span(name: &'static str, start: f64, stop: f64) -> Span {
        Span {
            name,
            start: Offset::new(start).unwrap(),
            stop: Offset::new(stop).unwrap(),
        }
    }

    fn names<'a>(items: impl IntoIterator<Item = &'a Span>) -> Vec<&'static str> {
        items.into_iter().map(|s| s.name).collect()
    }

    fn range(start: f64, stop: f64) -> OffsetRange {
        OffsetRange::new(start, stop).unwrap()
    }

    fn check_invariants(link: &Link<Span>) -> (i32, Offset) {
        let Some(node) = link else {
            return (0, Offset::ZERO);
        };
        let (left_height, left_stop) = check_invariants(&node.left);
        let (right_height, right_stop) = check_invariants(&node.right);
        assert!((left_height - right_height).abs() <= 1, "unbalanced at {}", node.start);
        if let Some(left) = &node.left {
            assert!(left.start < node.start);
        }
        if let Some(right) = &node.right {
            assert!(right.start > node.start);
        }
        let own = node.items.iter().map(|s| s.stop).max().unwrap();
        assert_eq!(node.max_stop, own.max(left_stop).max(right_stop));
        assert_eq!(node.height, 1 + left_height.max(right_height));
        (node.height, node.max_stop)
    }

    #[test]
    fn iterates_in_start_then_insertion_order() {
        let collection: TimespanCollection<Span> = [
            span("c", 5.0, 6.0),
            span("a", 0.0, 10.0),
            span("d", 5.0, 7.0),
            span("b", 1.0, 2.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(names(collection.iter()), vec!["a", "b", "c", "d"]);
        assert_eq!(collection.len(), 4);
        assert_eq!(collection.start_offset(), Some(Offset::ZERO));
        assert_eq!(collection.stop_offset(), Some(Offset::new(10.0).unwrap()));
    }

    #[test]
    fn stays_balanced_under_inserts_and_removals() {
        let mut collection = TimespanCollection::new();
        let spans: Vec<Span> = (0..64)
            .map(|i| span("x", i as f64, i as f64 + (i % 7) as f64 + 1.0))
            .collect();
        for s in &spans {
            collection.insert(s.clone());
            check_invariants(&collection.root);
        }
        for s in spans.iter().step_by(3) {
            assert!(collection.remove(s));
            check_invariants(&collection.root);
        }
        assert_eq!(collection.len(), 64 - 22);
        assert!(!collection.remove(&span("x", 0.0, 1.0)));
    }

    #[test]
    fn overlap_queries() {
        let collection: TimespanCollection<Span> = [
            span("a", 0.0, 10.0),
            span("b", 5.0, 15.0),
            span("c", 12.0, 20.0),
            span("d", 20.0, 25.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(names(collection.overlaps(&range(10.0, 12.0))), vec!["b"]);
        assert_eq!(names(collection.overlaps(&range(0.0, 5.0))), vec!["a"]);
        assert_eq!(names(collection.overlaps(&range(14.0, 21.0))), vec!["b", "c", "d"]);
        assert!(collection.overlaps(&range(30.0, 40.0)).is_empty());
    }

    #[test]
    fn simultaneities_group_starts_and_stops() {
        let collection: TimespanCollection<Span> = [
            span("a", 0.0, 10.0),
            span("b", 5.0, 15.0),
            span("c", 0.0, 15.0),
            span("open", 5.0, f64::INFINITY),
        ]
        .into_iter()
        .collect();
        let points = collection.simultaneities();
        let offsets: Vec<f64> = points.iter().map(|p| p.offset.seconds()).collect();
        assert_eq!(offsets, vec![0.0, 5.0, 10.0, 15.0]);
        assert_eq!(names(points[0].starting.iter().copied()), vec!["a", "c"]);
        assert_eq!(names(points[1].starting.iter().copied()), vec!["b", "open"]);
        assert_eq!(names(points[2].stopping.iter().copied()), vec!["a"]);
        assert_eq!(names(points[3].stopping.iter().copied()), vec!["c", "b"]);
    }

    #[test]
    fn masking_clips_to_the_window() {
        let collection: TimespanCollection<Span> = [
            span("a", 0.0, 10.0),
            span("b", 5.0, f64::INFINITY),
            span("late", 30.0, 40.0),
        ]
        .into_iter()
        .collect();
        let masked = collection.masked(&range(2.0, 8.0));
        let bounds: Vec<(f64, f64)> = masked
            .iter()
            .map(|s| (s.start.seconds(), s.stop.seconds()))
            .collect();
        assert_eq!(bounds, vec![(2.0, 8.0), (5.0, 8.0)]);

        let open = collection.masked(&OffsetRange::starting_at(6.0).unwrap());
        let stops: Vec<f64> = open.iter().map(|s| s.stop.seconds()).collect();
        assert_eq!(stops, vec![10.0, f64::INFINITY, 40.0]);
    }

    #[test]
    fn translation_shifts_every_bound() {
        let collection: TimespanCollection<Span> =
            [span("a", 2.0, 4.0), span("b", 3.0, f64::INFINITY)].into_iter().collect();
        let shifted = collection.translated(-2.0);
        let bounds: Vec<(f64, f64)> = shifted
            .iter()
            .map(|s| (s.start.seconds(), s.stop.seconds()))
            .collect();
        assert_eq!(bounds, vec![(0.0, 2.0), (1.0, f64::INFINITY)]);
    }
}
