mod common;

use std::time::Duration;

use harvester_core::{
    DedupeKey, HarvestWarning, PageStatus, PaginationMode, RetryPolicy, Target,
};
use harvester_engine::{
    run_harvest, BatchScheduler, FailureKind, FieldRule, HarvestError, LabelCount,
    SelectorExtractor, SequentialPages,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::{names, page_url, FixedMode, FixtureFetcher, LineExtractor, RecordingSink};

const BASE: &str = "https://example.edu/staff";

fn target() -> Target {
    Target::new("Example School", BASE).unwrap()
}

fn url(index: u32) -> String {
    page_url(BASE, index)
}

/// Pages 1..=n each holding one record named `p{index}`.
fn numbered_pages(n: u32) -> FixtureFetcher {
    (1..=n).fold(FixtureFetcher::new(), |f, i| {
        f.page(url(i), format!("p{i}|Teacher|p{i}@example.edu"))
    })
}

#[tokio::test(start_paused = true)]
async fn output_follows_page_order_not_completion_order() {
    engine_logging::initialize_for_tests();
    let fetcher = (1..=5).fold(FixtureFetcher::new(), |f, i| {
        // Later pages finish first.
        let delay = Duration::from_millis(u64::from(60 - i * 10));
        f.delayed_page(url(i), format!("p{i}a\np{i}b"), delay)
    });
    let target = target().with_concurrency(4).unwrap();

    let result = run_harvest(
        &target,
        &FixedMode(PaginationMode::Count { total_pages: 5 }),
        &fetcher,
        &LineExtractor,
    )
    .await
    .unwrap();

    assert_eq!(
        names(&result.records),
        vec!["p1a", "p1b", "p2a", "p2b", "p3a", "p3b", "p4a", "p4b", "p5a", "p5b"]
    );
    let indices: Vec<u32> = result.summary.pages.iter().map(|p| p.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn one_failing_page_is_contained() {
    let fetcher = numbered_pages(5).failing_page(url(3), FailureKind::HttpStatus(500));

    let result = run_harvest(
        &target(),
        &FixedMode(PaginationMode::Count { total_pages: 5 }),
        &fetcher,
        &LineExtractor,
    )
    .await
    .unwrap();

    assert_eq!(result.summary.pages_attempted, 5);
    assert_eq!(result.summary.pages_failed, 1);
    assert_eq!(names(&result.records), vec!["p1", "p2", "p4", "p5"]);
    let failed = &result.summary.pages[2];
    assert_eq!(failed.status, PageStatus::FetchError);
    assert!(failed.error.as_deref().unwrap().contains("http status 500"));
}

#[tokio::test]
async fn extract_failure_on_later_page_is_contained() {
    let fetcher = numbered_pages(3).page(url(2), "#malformed");

    let result = run_harvest(
        &target(),
        &FixedMode(PaginationMode::Count { total_pages: 3 }),
        &fetcher,
        &LineExtractor,
    )
    .await
    .unwrap();

    assert_eq!(result.summary.pages_failed, 1);
    assert_eq!(result.summary.pages[1].status, PageStatus::ExtractError);
    assert_eq!(names(&result.records), vec!["p1", "p3"]);
}

#[tokio::test]
async fn first_page_fetch_failure_is_fatal() {
    let fetcher = FixtureFetcher::new()
        .failing_page(url(1), FailureKind::Timeout)
        .page(url(2), "p2");

    let err = run_harvest(
        &target(),
        &FixedMode(PaginationMode::Count { total_pages: 2 }),
        &fetcher,
        &LineExtractor,
    )
    .await
    .unwrap_err();

    match err {
        HarvestError::FirstPageFetch { target, source } => {
            assert_eq!(target, "Example School");
            assert_eq!(source.kind, FailureKind::Timeout);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fetcher.requests(), vec![url(1)]);
}

#[tokio::test]
async fn first_page_extract_failure_is_fatal() {
    let fetcher = FixtureFetcher::new().page(url(1), "#malformed");

    let err = run_harvest(&target(), &SequentialPages, &fetcher, &LineExtractor)
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::FirstPageExtract { .. }));
}

#[tokio::test(start_paused = true)]
async fn in_flight_fetches_never_exceed_batch_size() {
    for batch_size in [1usize, 2, 4] {
        let fetcher = (1..=9).fold(FixtureFetcher::new(), |f, i| {
            f.delayed_page(url(i), format!("p{i}"), Duration::from_millis(20))
        });
        let target = target().with_concurrency(batch_size).unwrap();

        let result = run_harvest(
            &target,
            &FixedMode(PaginationMode::Count { total_pages: 9 }),
            &fetcher,
            &LineExtractor,
        )
        .await
        .unwrap();

        assert_eq!(result.records.len(), 9);
        assert_eq!(fetcher.high_water(), batch_size);
    }
}

#[tokio::test]
async fn sequential_mode_stops_at_first_empty_page() {
    let fetcher = FixtureFetcher::new()
        .page(url(1), "a1\na2")
        .page(url(2), "b1")
        .page(url(3), "")
        .page(url(4), "d1");

    let result = run_harvest(&target(), &SequentialPages, &fetcher, &LineExtractor)
        .await
        .unwrap();

    assert_eq!(names(&result.records), vec!["a1", "a2", "b1"]);
    assert_eq!(fetcher.requests(), vec![url(1), url(2), url(3)]);
    assert_eq!(result.summary.pages_attempted, 3);
    assert_eq!(result.summary.pages_empty, 1);
    assert_eq!(result.summary.pagination, PaginationMode::Sequential);
    assert!(result.summary.warnings.is_empty());
}

#[tokio::test]
async fn sequential_single_record_then_empty_page() {
    let fetcher = FixtureFetcher::new()
        .page(url(1), "A|Teacher|")
        .page(url(2), "");

    let result = run_harvest(&target(), &SequentialPages, &fetcher, &LineExtractor)
        .await
        .unwrap();

    assert_eq!(result.records.len(), 1);
    let record = &result.records[0];
    assert_eq!(record.get("name"), Some("A"));
    assert_eq!(record.get("job_title"), Some("Teacher"));
    assert_eq!(record.get("email"), Some(""));
    assert_eq!(result.summary.pages_attempted, 2);
}

#[tokio::test]
async fn sequential_mode_honours_end_of_pagination_signal() {
    let fetcher = FixtureFetcher::new()
        .page(url(1), "a1")
        .page(url(2), "b1\n#last")
        .page(url(3), "c1");

    let result = run_harvest(&target(), &SequentialPages, &fetcher, &LineExtractor)
        .await
        .unwrap();

    assert_eq!(names(&result.records), vec!["a1", "b1"]);
    assert_eq!(fetcher.request_count(&url(3)), 0);
}

#[tokio::test]
async fn sequential_mode_warns_when_a_page_repeats() {
    let fetcher = FixtureFetcher::new()
        .page(url(1), "a1")
        .page(url(2), "b1")
        .page(url(3), "b1");

    let result = run_harvest(&target(), &SequentialPages, &fetcher, &LineExtractor)
        .await
        .unwrap();

    assert_eq!(names(&result.records), vec!["a1", "b1"]);
    assert_eq!(result.summary.pages[2].status, PageStatus::Empty);
    assert!(matches!(
        result.summary.warnings.as_slice(),
        [HarvestWarning::PaginationAmbiguous { stopped_at_page: 3, .. }]
    ));
}

#[tokio::test]
async fn sequential_mode_stops_and_warns_on_failure() {
    let fetcher = FixtureFetcher::new()
        .page(url(1), "a1")
        .failing_page(url(2), FailureKind::HttpStatus(502))
        .page(url(3), "c1");

    let result = run_harvest(&target(), &SequentialPages, &fetcher, &LineExtractor)
        .await
        .unwrap();

    assert_eq!(names(&result.records), vec!["a1"]);
    assert_eq!(result.summary.pages_failed, 1);
    assert_eq!(fetcher.request_count(&url(3)), 0);
    assert!(matches!(
        result.summary.warnings.as_slice(),
        [HarvestWarning::PaginationAmbiguous { stopped_at_page: 2, .. }]
    ));
}

#[tokio::test]
async fn sequential_mode_respects_page_limits() {
    let fetcher = numbered_pages(8);

    let capped = run_harvest(
        &target().with_max_pages(Some(2)).unwrap(),
        &SequentialPages,
        &fetcher,
        &LineExtractor,
    )
    .await
    .unwrap();
    assert_eq!(names(&capped.records), vec!["p1", "p2"]);
    assert_eq!(
        capped.summary.warnings,
        vec![HarvestWarning::PageCapReached {
            cap: 2,
            discovered: None
        }]
    );

    let limited = BatchScheduler::new(&fetcher)
        .with_page_limit(3)
        .run(&target(), &SequentialPages, &LineExtractor)
        .await
        .unwrap();
    assert_eq!(names(&limited.records), vec!["p1", "p2", "p3"]);
    assert!(matches!(
        limited.summary.warnings.as_slice(),
        [HarvestWarning::PaginationAmbiguous { stopped_at_page: 3, .. }]
    ));
}

#[tokio::test]
async fn page_cap_trims_discovered_total() {
    let fetcher = numbered_pages(5);

    let result = run_harvest(
        &target().with_max_pages(Some(2)).unwrap(),
        &FixedMode(PaginationMode::Count { total_pages: 5 }),
        &fetcher,
        &LineExtractor,
    )
    .await
    .unwrap();

    assert_eq!(names(&result.records), vec!["p1", "p2"]);
    assert_eq!(fetcher.requests(), vec![url(1), url(2)]);
    assert_eq!(
        result.summary.warnings,
        vec![HarvestWarning::PageCapReached {
            cap: 2,
            discovered: Some(5)
        }]
    );
}

#[tokio::test]
async fn page_limit_bounds_count_mode_without_a_cap() {
    let fetcher = numbered_pages(10);

    let result = BatchScheduler::new(&fetcher)
        .with_page_limit(4)
        .run(
            &target(),
            &FixedMode(PaginationMode::Count { total_pages: 2024 }),
            &LineExtractor,
        )
        .await
        .unwrap();

    assert_eq!(names(&result.records), vec!["p1", "p2", "p3", "p4"]);
    assert_eq!(fetcher.requests().len(), 4);
    assert_eq!(
        result.summary.warnings,
        vec![HarvestWarning::PageCapReached {
            cap: 4,
            discovered: Some(2024)
        }]
    );
}

fn directory_page(page: u32, people: u32) -> String {
    let items: String = (1..=people)
        .map(|i| {
            format!(
                "<li class='person'><span class='name'>Staff {page}-{i}</span>\
                 <span class='title'>Teacher</span>\
                 <a href='mailto:s{page}{i}@example.edu'>email</a></li>"
            )
        })
        .collect();
    format!(
        "<html><body><p class='count'>Showing 1 - 12 of 37 constituents</p>\
         <ul>{items}</ul></body></html>"
    )
}

#[tokio::test]
async fn thirty_seven_records_twelve_per_page_in_batches_of_two() {
    let fetcher = FixtureFetcher::new()
        .page(url(1), directory_page(1, 12))
        .page(url(2), directory_page(2, 12))
        .page(url(3), directory_page(3, 12))
        .page(url(4), directory_page(4, 1));
    let discoverer = LabelCount::new("p.count").unwrap();
    let extractor = SelectorExtractor::new(
        "li.person",
        vec![
            FieldRule::text("name", "span.name"),
            FieldRule::text("job_title", "span.title"),
            FieldRule::mailto("email"),
        ],
    )
    .unwrap();
    let sink = RecordingSink::default();
    let target = target().with_concurrency(2).unwrap();

    let result = BatchScheduler::new(&fetcher)
        .with_progress(&sink)
        .run(&target, &discoverer, &extractor)
        .await
        .unwrap();

    assert_eq!(
        result.summary.pagination,
        PaginationMode::Count { total_pages: 4 }
    );
    assert_eq!(sink.batches(), vec![vec![2, 3], vec![4]]);
    assert_eq!(result.records.len(), 37);
    assert_eq!(result.records[0].get("name"), Some("Staff 1-1"));
    assert_eq!(result.records[12].get("name"), Some("Staff 2-1"));
    assert_eq!(result.records[36].get("name"), Some("Staff 4-1"));
    assert_eq!(result.records[36].get("email"), Some("s41@example.edu"));
}

#[tokio::test]
async fn cancellation_before_start_is_fatal() {
    let fetcher = numbered_pages(2);
    let token = CancellationToken::new();
    token.cancel();

    let err = BatchScheduler::new(&fetcher)
        .with_cancellation(token)
        .run(&target(), &SequentialPages, &LineExtractor)
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::Cancelled { .. }));
    assert!(fetcher.requests().is_empty());
}

struct CancelAfterFirstBatch {
    token: CancellationToken,
}

impl harvester_engine::ProgressSink for CancelAfterFirstBatch {
    fn emit(&self, event: harvester_engine::HarvestEvent) {
        if let harvester_engine::HarvestEvent::BatchDispatched { .. } = event {
            self.token.cancel();
        }
    }
}

#[tokio::test]
async fn cancellation_stops_dispatching_and_keeps_gathered_pages() {
    let fetcher = numbered_pages(5);
    let token = CancellationToken::new();
    let sink = CancelAfterFirstBatch {
        token: token.clone(),
    };
    let target = target().with_concurrency(2).unwrap();

    let result = BatchScheduler::new(&fetcher)
        .with_progress(&sink)
        .with_cancellation(token)
        .run(
            &target,
            &FixedMode(PaginationMode::Count { total_pages: 5 }),
            &LineExtractor,
        )
        .await
        .unwrap();

    assert_eq!(names(&result.records), vec!["p1", "p2", "p3"]);
    assert_eq!(
        result.summary.warnings,
        vec![HarvestWarning::Cancelled { next_page: 4 }]
    );
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let fetcher = numbered_pages(3).flaky_page(url(2), "p2", 2);
    let target = target().with_retry(RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(100),
    });

    let result = run_harvest(
        &target,
        &FixedMode(PaginationMode::Count { total_pages: 3 }),
        &fetcher,
        &LineExtractor,
    )
    .await
    .unwrap();

    assert_eq!(names(&result.records), vec!["p1", "p2", "p3"]);
    assert_eq!(fetcher.request_count(&url(2)), 3);
    assert_eq!(result.summary.pages_failed, 0);
}

#[tokio::test]
async fn without_retries_a_transient_failure_fails_the_page() {
    let fetcher = numbered_pages(3).flaky_page(url(2), "p2", 1);

    let result = run_harvest(
        &target(),
        &FixedMode(PaginationMode::Count { total_pages: 3 }),
        &fetcher,
        &LineExtractor,
    )
    .await
    .unwrap();

    assert_eq!(result.summary.pages_failed, 1);
    assert_eq!(fetcher.request_count(&url(2)), 1);
    let error = result.summary.pages[1].error.as_deref().unwrap();
    assert!(error.contains("attempt 1"), "{error}");
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let fetcher = numbered_pages(2).failing_page(url(2), FailureKind::HttpStatus(404));
    let target = target().with_retry(RetryPolicy {
        max_attempts: 4,
        backoff: Duration::from_millis(1),
    });

    let result = run_harvest(
        &target,
        &FixedMode(PaginationMode::Count { total_pages: 2 }),
        &fetcher,
        &LineExtractor,
    )
    .await
    .unwrap();

    assert_eq!(result.summary.pages_failed, 1);
    assert_eq!(fetcher.request_count(&url(2)), 1);
}

#[tokio::test]
async fn adaptive_concurrency_halves_batches_after_timeouts() {
    let fetcher = (2..=5).fold(numbered_pages(9), |f, i| {
        f.failing_page(url(i), FailureKind::Timeout)
    });
    let sink = RecordingSink::default();
    let target = target()
        .with_concurrency(4)
        .unwrap()
        .with_adaptive_concurrency(true);

    let result = BatchScheduler::new(&fetcher)
        .with_progress(&sink)
        .run(
            &target,
            &FixedMode(PaginationMode::Count { total_pages: 9 }),
            &LineExtractor,
        )
        .await
        .unwrap();

    assert_eq!(
        sink.batches(),
        vec![vec![2, 3, 4, 5], vec![6, 7], vec![8, 9]]
    );
    assert_eq!(result.summary.pages_failed, 4);
    assert_eq!(names(&result.records), vec!["p1", "p6", "p7", "p8", "p9"]);
}

#[tokio::test]
async fn fixed_concurrency_ignores_timeouts() {
    let fetcher = (2..=5).fold(numbered_pages(9), |f, i| {
        f.failing_page(url(i), FailureKind::Timeout)
    });
    let sink = RecordingSink::default();
    let target = target().with_concurrency(4).unwrap();

    BatchScheduler::new(&fetcher)
        .with_progress(&sink)
        .run(
            &target,
            &FixedMode(PaginationMode::Count { total_pages: 9 }),
            &LineExtractor,
        )
        .await
        .unwrap();

    assert_eq!(sink.batches(), vec![vec![2, 3, 4, 5], vec![6, 7, 8, 9]]);
}

#[tokio::test]
async fn records_without_a_name_are_dropped_and_counted() {
    let fetcher = FixtureFetcher::new().page(url(1), "Ana|Teacher|\n|Counselor|c@example.edu");

    let result = run_harvest(
        &target(),
        &FixedMode(PaginationMode::Single),
        &fetcher,
        &LineExtractor,
    )
    .await
    .unwrap();

    assert_eq!(names(&result.records), vec!["Ana"]);
    assert_eq!(result.summary.records_dropped, 1);
}

#[tokio::test]
async fn duplicates_are_removed_only_when_configured() {
    let fetcher = FixtureFetcher::new()
        .page(url(1), "Ana|Teacher|\nBo|Coach|")
        .page(url(2), "Ana|Teacher|\nAna|Principal|");
    let mode = FixedMode(PaginationMode::Count { total_pages: 2 });

    let plain = run_harvest(&target(), &mode, &fetcher, &LineExtractor)
        .await
        .unwrap();
    assert_eq!(plain.records.len(), 4);

    let deduped = run_harvest(
        &target().with_dedupe(Some(DedupeKey::new(["name", "job_title"]).unwrap())),
        &mode,
        &fetcher,
        &LineExtractor,
    )
    .await
    .unwrap();
    assert_eq!(names(&deduped.records), vec!["Ana", "Bo", "Ana"]);
    assert_eq!(deduped.summary.duplicates_removed, 1);
}

#[tokio::test]
async fn same_fixtures_produce_identical_results() {
    let fetcher = numbered_pages(4);
    let mode = FixedMode(PaginationMode::Count { total_pages: 4 });

    let first = run_harvest(&target(), &mode, &fetcher, &LineExtractor)
        .await
        .unwrap();
    let second = run_harvest(&target(), &mode, &fetcher, &LineExtractor)
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_string_pretty(&first.records).unwrap(),
        serde_json::to_string_pretty(&second.records).unwrap()
    );
}
