// SPDX-License-Identifier: MPL-2.0

//! Property tests for size selection

use camera_engine::pipelines::photo::compute_crop;
use camera_engine::{AspectRatio, Size, SizeSelector};
use proptest::prelude::*;

fn size() -> impl Strategy<Value = Size> {
    (1..5000i32, 1..5000i32).prop_map(|(w, h)| Size::new(w, h))
}

fn sizes() -> impl Strategy<Value = Vec<Size>> {
    prop::collection::vec(size(), 1..12)
}

proptest! {
    #[test]
    fn selectors_only_return_candidates(candidates in sizes(), min in 1..5000i32) {
        let selector = SizeSelector::or(vec![
            SizeSelector::and(vec![SizeSelector::min_width(min), SizeSelector::smallest()]),
            SizeSelector::biggest(),
        ]);
        let selected = selector.select(&candidates);
        prop_assert!(!selected.is_empty());
        for size in &selected {
            prop_assert!(candidates.contains(size));
        }
    }

    #[test]
    fn biggest_puts_largest_area_first(candidates in sizes()) {
        let selected = SizeSelector::biggest().select(&candidates);
        let max_area = candidates.iter().map(|s| s.area()).max().unwrap();
        prop_assert_eq!(selected[0].area(), max_area);
        prop_assert_eq!(selected.len(), candidates.len());
    }

    #[test]
    fn flip_swaps_the_ratio(size in size()) {
        prop_assert_eq!(size.flip().flip(), size);
        prop_assert_eq!(size.flip().aspect_ratio(), size.aspect_ratio().flip());
    }

    #[test]
    fn crop_stays_inside_the_source(source in size(), ratio in size()) {
        let ratio = AspectRatio::of(ratio);
        let (left, top, cropped) = compute_crop(source, ratio);
        prop_assert!(left >= 0 && top >= 0);
        prop_assert!(left + cropped.width <= source.width);
        prop_assert!(top + cropped.height <= source.height);
        prop_assert!(cropped.width == source.width || cropped.height == source.height);
    }
}

#[test]
fn test_size_parse() {
    assert_eq!("1920x1080".parse::<Size>(), Ok(Size::new(1920, 1080)));
    assert_eq!(" 640 X 480 ".parse::<Size>(), Ok(Size::new(640, 480)));
    assert!("0x480".parse::<Size>().is_err());
    assert!("1920".parse::<Size>().is_err());
}

#[test]
fn test_aspect_ratio_reduced() {
    assert_eq!(AspectRatio::of(Size::new(1920, 1080)), "16:9".parse().unwrap());
    assert_eq!(AspectRatio::of(Size::new(4032, 3024)).to_string(), "4:3");
}
