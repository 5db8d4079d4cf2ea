use harvester_core::{
    pages_for_items, parse_count_label, plan_batches, BatchPlanner, CountLabel, PaginationMode,
};
use pretty_assertions::assert_eq;

#[test]
fn item_range_label_is_parsed() {
    let label = "showing 1 - 15 of 856 constituents";
    assert_eq!(
        parse_count_label(label),
        Some(CountLabel::Items {
            range: Some((1, 15)),
            total: 856
        })
    );
}

#[test]
fn label_with_thousands_separator_and_extra_whitespace() {
    let label = "  Showing\n 1 -   24  of 1,204 ";
    assert_eq!(
        parse_count_label(label),
        Some(CountLabel::Items {
            range: Some((1, 24)),
            total: 1204
        })
    );
}

#[test]
fn page_of_label_wins_over_item_shapes() {
    assert_eq!(
        parse_count_label("Page 1 of 6"),
        Some(CountLabel::Pages {
            current: 1,
            total: 6
        })
    );
}

#[test]
fn total_only_label_has_no_range() {
    assert_eq!(
        parse_count_label("Results: of 37"),
        Some(CountLabel::Items {
            range: None,
            total: 37
        })
    );
}

#[test]
fn label_without_numbers_is_rejected() {
    assert_eq!(parse_count_label("Staff Directory"), None);
    assert_eq!(parse_count_label(""), None);
}

#[test]
fn pages_for_items_rounds_up() {
    assert_eq!(pages_for_items(37, 12), 4);
    assert_eq!(pages_for_items(36, 12), 3);
    assert_eq!(pages_for_items(856, 15), 58);
}

#[test]
fn pages_for_items_never_returns_zero() {
    assert_eq!(pages_for_items(0, 12), 1);
    assert_eq!(pages_for_items(10, 0), 1);
}

#[test]
fn batches_cover_pages_after_the_first() {
    assert_eq!(plan_batches(4, 2), vec![vec![2, 3], vec![4]]);
    assert_eq!(plan_batches(7, 3), vec![vec![2, 3, 4], vec![5, 6, 7]]);
}

#[test]
fn single_page_total_has_no_batches() {
    assert!(plan_batches(1, 3).is_empty());
    assert!(plan_batches(0, 3).is_empty());
}

#[test]
fn zero_batch_size_is_treated_as_one() {
    assert_eq!(plan_batches(3, 0), vec![vec![2], vec![3]]);
}

#[test]
fn planner_shrinks_without_skipping_pages() {
    let mut planner = BatchPlanner::new(10, 4);
    assert_eq!(planner.next_batch(), Some(vec![2, 3, 4, 5]));
    assert_eq!(planner.remaining(), 5);
    assert_eq!(planner.shrink(), 2);
    assert_eq!(planner.next_batch(), Some(vec![6, 7]));
    assert_eq!(planner.shrink(), 1);
    assert_eq!(planner.shrink(), 1);
    assert_eq!(planner.next_batch(), Some(vec![8]));
    assert_eq!(planner.next_batch(), Some(vec![9]));
    assert_eq!(planner.next_batch(), Some(vec![10]));
    assert_eq!(planner.next_batch(), None);
    assert_eq!(planner.remaining(), 0);
}

#[test]
fn pagination_mode_serializes_with_tag() {
    let count = serde_json::to_string(&PaginationMode::Count { total_pages: 4 }).unwrap();
    assert_eq!(count, r#"{"mode":"count","total_pages":4}"#);
    let seq = serde_json::to_string(&PaginationMode::Sequential).unwrap();
    assert_eq!(seq, r#"{"mode":"sequential"}"#);
}
