// SPDX-License-Identifier: GPL-3.0-only

//! Declarative size selection
//!
//! A selector maps a list of candidate sizes to a (possibly reordered) subset
//! of it; the first element of the output is the choice. Primitives filter or
//! sort, `and` chains them and `or` falls through to the first non-empty
//! result.

use super::{AspectRatio, Size};
use std::fmt;
use std::sync::Arc;

type SelectFn = dyn Fn(&[Size]) -> Vec<Size> + Send + Sync;

/// Composable size selection strategy
#[derive(Clone)]
pub struct SizeSelector {
    select: Arc<SelectFn>,
    label: String,
}

impl SizeSelector {
    /// Build a selector from an arbitrary function
    pub fn new<F>(label: impl Into<String>, select: F) -> Self
    where
        F: Fn(&[Size]) -> Vec<Size> + Send + Sync + 'static,
    {
        Self {
            select: Arc::new(select),
            label: label.into(),
        }
    }

    /// Keep the sizes accepted by `predicate`
    pub fn with_filter<P>(label: impl Into<String>, predicate: P) -> Self
    where
        P: Fn(&Size) -> bool + Send + Sync + 'static,
    {
        Self::new(label, move |source| {
            source.iter().copied().filter(|s| predicate(s)).collect()
        })
    }

    pub fn min_width(width: i32) -> Self {
        Self::with_filter(format!("width >= {}", width), move |s| s.width >= width)
    }

    pub fn max_width(width: i32) -> Self {
        Self::with_filter(format!("width <= {}", width), move |s| s.width <= width)
    }

    pub fn min_height(height: i32) -> Self {
        Self::with_filter(format!("height >= {}", height), move |s| s.height >= height)
    }

    pub fn max_height(height: i32) -> Self {
        Self::with_filter(format!("height <= {}", height), move |s| s.height <= height)
    }

    pub fn min_area(area: i64) -> Self {
        Self::with_filter(format!("area >= {}", area), move |s| s.area() >= area)
    }

    pub fn max_area(area: i64) -> Self {
        Self::with_filter(format!("area <= {}", area), move |s| s.area() <= area)
    }

    /// Keep sizes whose ratio is within `tolerance` of `ratio`
    pub fn aspect_ratio(ratio: AspectRatio, tolerance: f32) -> Self {
        Self::with_filter(format!("ratio {} ~{}", ratio, tolerance), move |s| {
            ratio.matches(*s, tolerance)
        })
    }

    /// All sizes, largest area first
    pub fn biggest() -> Self {
        Self::new("biggest", |source| {
            let mut sorted = source.to_vec();
            sorted.sort_by_key(|s| std::cmp::Reverse(s.area()));
            sorted
        })
    }

    /// All sizes, smallest area first
    pub fn smallest() -> Self {
        Self::new("smallest", |source| {
            let mut sorted = source.to_vec();
            sorted.sort_by_key(|s| s.area());
            sorted
        })
    }

    /// Apply each selector to the output of the previous one
    pub fn and(selectors: Vec<SizeSelector>) -> Self {
        let label = join_labels(&selectors, " and ");
        Self::new(label, move |source| {
            let mut current = source.to_vec();
            for selector in &selectors {
                current = selector.select(&current);
            }
            current
        })
    }

    /// Output of the first selector that returns anything
    pub fn or(selectors: Vec<SizeSelector>) -> Self {
        let label = join_labels(&selectors, " or ");
        Self::new(label, move |source| {
            selectors
                .iter()
                .map(|selector| selector.select(source))
                .find(|result| !result.is_empty())
                .unwrap_or_default()
        })
    }

    pub fn select(&self, source: &[Size]) -> Vec<Size> {
        (self.select)(source)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

fn join_labels(selectors: &[SizeSelector], separator: &str) -> String {
    let parts: Vec<&str> = selectors.iter().map(|s| s.label()).collect();
    format!("({})", parts.join(separator))
}

impl fmt::Debug for SizeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SizeSelector").field(&self.label).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_sizes() -> Vec<Size> {
        vec![
            Size::new(640, 480),
            Size::new(1920, 1080),
            Size::new(1280, 720),
            Size::new(800, 600),
        ]
    }

    #[test]
    fn test_biggest_and_smallest() {
        let sizes = create_test_sizes();
        assert_eq!(SizeSelector::biggest().select(&sizes)[0], Size::new(1920, 1080));
        assert_eq!(SizeSelector::smallest().select(&sizes)[0], Size::new(640, 480));
        assert_eq!(SizeSelector::biggest().select(&sizes).len(), sizes.len());
    }

    #[test]
    fn test_bounds() {
        let sizes = create_test_sizes();
        let result = SizeSelector::and(vec![
            SizeSelector::max_width(1300),
            SizeSelector::min_height(600),
        ])
        .select(&sizes);
        assert_eq!(result, vec![Size::new(1280, 720), Size::new(800, 600)]);
        assert_eq!(
            SizeSelector::min_area(1_000_000).select(&sizes),
            vec![Size::new(1920, 1080)]
        );
        assert_eq!(SizeSelector::max_area(307_200).select(&sizes), vec![Size::new(640, 480)]);
    }

    #[test]
    fn test_exact_ratio_picks_largest_match() {
        let sizes = vec![Size::new(1920, 1080), Size::new(1280, 720), Size::new(640, 480)];
        let selector = SizeSelector::and(vec![
            SizeSelector::aspect_ratio(AspectRatio::new(16, 9), 0.0),
            SizeSelector::biggest(),
        ]);
        assert_eq!(selector.select(&sizes)[0], Size::new(1920, 1080));
    }

    #[test]
    fn test_or_falls_through_to_first_non_empty() {
        let sizes = create_test_sizes();
        let selector = SizeSelector::or(vec![
            SizeSelector::min_width(4000),
            SizeSelector::and(vec![SizeSelector::max_width(900), SizeSelector::biggest()]),
            SizeSelector::smallest(),
        ]);
        assert_eq!(selector.select(&sizes)[0], Size::new(800, 600));
    }

    #[test]
    fn test_or_of_nothing_is_empty() {
        let selector = SizeSelector::or(vec![SizeSelector::min_width(10_000)]);
        assert!(selector.select(&create_test_sizes()).is_empty());
        assert!(SizeSelector::or(vec![]).select(&create_test_sizes()).is_empty());
    }

    #[test]
    fn test_label() {
        let selector = SizeSelector::and(vec![SizeSelector::min_width(10), SizeSelector::biggest()]);
        assert_eq!(selector.label(), "(width >= 10 and biggest)");
    }
}
