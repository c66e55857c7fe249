// Copyright (c) The annotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use annotest_runner::{
    events::{ResultId, RunCriteria},
    pipeline::RunState,
    sink::Conclusion,
};
use std::time::Duration;

const GATE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn emits_never_overlap() {
    const RESULTS: usize = 16;

    let env = TestEnv::new(GATE_TIMEOUT);
    let pipeline = env.pipeline(StubSink::new().with_emit_delay(Duration::from_millis(10)));
    pipeline.on_run_start(&RunCriteria::default());

    // Report results from several host threads at once.
    std::thread::scope(|s| {
        for idx in 0..RESULTS {
            let pipeline = &pipeline;
            s.spawn(move || pipeline.on_result(failed(&format!("t{idx}"))));
        }
    });

    let completion = pipeline.on_run_complete(&statistics(0, RESULTS as u64)).await;

    assert_eq!(completion.conclusion, Conclusion::Failure);
    assert_eq!(pipeline.sink().emitted().len(), RESULTS);
    assert_eq!(pipeline.sink().max_in_flight(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn completion_waits_for_slow_emits() {
    const RESULTS: usize = 8;

    let env = TestEnv::new(GATE_TIMEOUT);
    let pipeline = env.pipeline(StubSink::new().with_emit_delay(Duration::from_millis(50)));
    pipeline.on_run_start(&RunCriteria::default());
    for idx in 0..RESULTS {
        pipeline.on_result(failed(&format!("t{idx}")));
    }
    assert_eq!(pipeline.result_count(), RESULTS);

    // Completion is requested immediately, while every emit is still sleeping.
    pipeline.on_run_complete(&statistics(0, RESULTS as u64)).await;

    let calls = pipeline.sink().calls();
    assert_eq!(pipeline.sink().emitted().len(), RESULTS);
    assert!(matches!(calls.first(), Some(SinkCall::Open(_))), "{calls:?}");
    assert_eq!(calls.last(), Some(&SinkCall::Close(Conclusion::Failure)));
    assert_eq!(pipeline.state(), RunState::Finished);
}

#[tokio::test(flavor = "multi_thread")]
async fn results_before_start_wait_for_open() {
    let env = TestEnv::new(GATE_TIMEOUT);
    let pipeline = env.pipeline(StubSink::new().with_open_delay(Duration::from_millis(200)));

    pipeline.on_result(failed("early"));
    pipeline.on_run_start(&RunCriteria::default());
    pipeline.on_result(failed("late"));
    pipeline.on_run_complete(&statistics(0, 2)).await;

    let calls = pipeline.sink().calls();
    assert_eq!(calls.len(), 4, "{calls:?}");
    assert_eq!(calls[0], SinkCall::Open("test run / unit".to_owned()));
    assert!(matches!(calls[1], SinkCall::Emit(_)));
    assert!(matches!(calls[2], SinkCall::Emit(_)));
    assert_eq!(calls[3], SinkCall::Close(Conclusion::Failure));
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_result_keeps_latest() {
    let env = TestEnv::new(GATE_TIMEOUT);
    let pipeline = env.pipeline(StubSink::new());
    pipeline.on_run_start(&RunCriteria::default());

    let mut first = failed("dup");
    first.display_name = "CartTests.First".to_owned();
    let mut second = failed("dup");
    second.display_name = "CartTests.Second".to_owned();

    let logs = SharedBuffer::default();
    {
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        pipeline.on_result(first);
        pipeline.on_result(second);
    }

    let errors = logs.lines_at("ERROR");
    assert_eq!(errors.len(), 1, "{}", logs.contents());
    assert!(
        errors[0].contains("result `dup` was reported more than once"),
        "{}",
        errors[0]
    );

    assert_eq!(pipeline.result_count(), 1);
    let kept = pipeline.result(&ResultId::new("dup")).unwrap();
    assert_eq!(kept.display_name, "CartTests.Second");

    let completion = pipeline.on_run_complete(&statistics(0, 1)).await;
    // The displaced task still ran to completion before the summary was written.
    assert_eq!(pipeline.sink().emitted().len(), 2);
    assert!(completion.summary.contains("CartTests.Second"));
    assert!(!completion.summary.contains("CartTests.First"));
}

#[tokio::test(flavor = "multi_thread")]
async fn second_start_is_ignored() {
    let env = TestEnv::new(GATE_TIMEOUT);
    let pipeline = env.pipeline(StubSink::new());

    let criteria = RunCriteria {
        filter: Some("Category=Smoke".to_owned()),
        sources: Vec::new(),
    };
    let logs = SharedBuffer::default();
    {
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        pipeline.on_run_start(&criteria);
        pipeline.on_run_start(&criteria);
    }

    let errors = logs.lines_at("ERROR");
    assert_eq!(errors.len(), 1, "{}", logs.contents());
    assert!(errors[0].contains("already started"), "{}", errors[0]);

    pipeline.on_run_complete(&statistics(1, 0)).await;
    assert_eq!(pipeline.sink().opened(), 1);
    assert_eq!(
        pipeline.sink().calls(),
        vec![
            SinkCall::Open("test run --filter:Category=Smoke / unit".to_owned()),
            SinkCall::Close(Conclusion::Success),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_open_times_out_annotations() {
    // The annotation gives up waiting for the open, but completion starts late enough to see it
    // finish.
    let env = TestEnv::new(Duration::from_millis(500));
    let pipeline = env.pipeline(StubSink::new().with_open_delay(Duration::from_millis(700)));
    pipeline.on_run_start(&RunCriteria::default());
    pipeline.on_result(failed("t1"));

    tokio::time::sleep(Duration::from_millis(400)).await;
    let completion = pipeline.on_run_complete(&statistics(0, 1)).await;

    // The annotation was abandoned, but the run still opened and closed.
    assert_eq!(completion.conclusion, Conclusion::Failure);
    assert!(pipeline.sink().emitted().is_empty());
    assert_eq!(
        pipeline.sink().calls(),
        vec![
            SinkCall::Open("test run / unit".to_owned()),
            SinkCall::Close(Conclusion::Failure),
        ]
    );
    assert_eq!(pipeline.state(), RunState::Finished);
}

#[tokio::test(flavor = "multi_thread")]
async fn hung_open_does_not_block_completion() {
    let env = TestEnv::new(Duration::from_millis(100));
    let pipeline = env.pipeline(StubSink::new().with_open_delay(Duration::from_secs(3600)));
    pipeline.on_run_start(&RunCriteria::default());
    pipeline.on_result(failed("t1"));

    let completion = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.on_run_complete(&statistics(0, 1)),
    )
    .await
    .expect("completion is bounded by the gate timeout");

    // The open was cancelled, so there is nothing to close.
    assert_eq!(completion.conclusion, Conclusion::Failure);
    assert!(pipeline.sink().calls().is_empty());
    assert_eq!(pipeline.state(), RunState::Finished);
    let written = std::fs::read_to_string(&env.summary_path).unwrap();
    assert_eq!(written, completion.summary);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_open_still_writes_summary() {
    let env = TestEnv::new(GATE_TIMEOUT);
    let pipeline = env.pipeline(StubSink::new().with_open_error());
    pipeline.on_run_start(&RunCriteria::default());
    pipeline.on_result(passed("t1"));
    pipeline.on_result(failed("t2"));

    // Annotation tasks fail fast instead of waiting out the gate timeout.
    let completion = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.on_run_complete(&statistics(1, 1)),
    )
    .await
    .expect("completion does not wait for the gate timeout");

    assert_eq!(completion.conclusion, Conclusion::Failure);
    assert_eq!(
        pipeline.sink().calls(),
        vec![SinkCall::Open("test run / unit".to_owned())]
    );
    assert_eq!(pipeline.state(), RunState::Finished);

    let written = std::fs::read_to_string(&env.summary_path).unwrap();
    assert_eq!(written, completion.summary);
    assert!(written.contains("passed:1 failed:1 skipped:0 total:2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_emit_keeps_going() {
    const RESULTS: usize = 4;

    let env = TestEnv::new(GATE_TIMEOUT);
    let pipeline = env.pipeline(StubSink::new().with_emit_error(2));
    pipeline.on_run_start(&RunCriteria::default());
    for idx in 0..RESULTS {
        pipeline.on_result(failed(&format!("t{idx}")));
    }

    let completion = pipeline.on_run_complete(&statistics(0, RESULTS as u64)).await;

    // Every emit was attempted, and the failure didn't stop the close.
    assert_eq!(completion.conclusion, Conclusion::Failure);
    assert_eq!(pipeline.sink().emitted().len(), RESULTS);
    assert_eq!(
        pipeline.sink().calls().last(),
        Some(&SinkCall::Close(Conclusion::Failure))
    );
    assert_eq!(pipeline.state(), RunState::Finished);
    for idx in 0..RESULTS {
        assert!(
            completion.summary.contains(&format!("Shop.Tests.t{idx}")),
            "{}",
            completion.summary
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn completion_without_start() {
    let env = TestEnv::new(Duration::from_millis(100));
    let pipeline = env.pipeline(StubSink::new());
    pipeline.on_result(passed("t1"));
    pipeline.on_result(failed("t2"));

    let completion = pipeline.on_run_complete(&statistics(1, 1)).await;

    assert_eq!(completion.conclusion, Conclusion::Failure);
    assert!(pipeline.sink().calls().is_empty());
    assert_eq!(pipeline.state(), RunState::Finished);

    let written = std::fs::read_to_string(&env.summary_path).unwrap();
    assert_eq!(written, completion.summary);
    assert!(written.contains("passed:1 failed:1 skipped:0 total:2"));
}
