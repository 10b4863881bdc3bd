//! Pipeline tests: close propagation, ordering, failure policies, lifecycle, timeouts.

use stagepool::{
    ErrorPolicy, Pipeline, PipelineBuilder, PipelineError, PipelineOpts, PipelineState, Recv,
    StageSpec, run_to_completion,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

fn opts(channel_cap: usize, error_policy: ErrorPolicy) -> PipelineOpts {
    PipelineOpts {
        channel_cap,
        error_policy,
        ..PipelineOpts::default()
    }
}

fn identity_stages(count: usize, workers: usize) -> Vec<StageSpec<u64>> {
    (0..count)
        .map(|i| StageSpec::new(format!("identity-{i}"), workers, |x: u64| Ok(x)))
        .collect()
}

// --- close propagation / no loss ---

#[test]
fn test_close_propagates_through_three_stages() {
    let mut pipeline =
        Pipeline::build(opts(16, ErrorPolicy::Skip), identity_stages(3, 1)).unwrap();
    pipeline.start().unwrap();

    let output = pipeline.output();
    let collector = thread::spawn(move || output.collect::<Vec<u64>>());

    for i in 0..1000 {
        pipeline.submit(i).unwrap();
    }
    let report = pipeline.shutdown_and_wait(None).unwrap();
    let out = collector.join().unwrap();

    assert_eq!(out.len(), 1000);
    let unique: HashSet<u64> = out.iter().copied().collect();
    assert_eq!(unique.len(), 1000);
    assert_eq!(report.submitted, 1000);
    assert_eq!(report.emitted, 1000);
    assert!(report.is_lossless());
    assert!(pipeline.channels().iter().all(|c| c.closed));
}

#[test]
fn test_results_can_be_drained_after_shutdown() {
    let mut pipeline =
        Pipeline::build(opts(8, ErrorPolicy::Skip), identity_stages(3, 1)).unwrap();
    pipeline.start().unwrap();
    for i in 0..1000 {
        pipeline.submit(i).unwrap();
    }
    pipeline.shutdown_and_wait(None).unwrap();

    let out = pipeline.output().drain();
    assert_eq!(out.len(), 1000);
    assert_eq!(pipeline.output().recv(), Recv::EndOfStream);
}

#[test]
fn test_channel_capacity_holds_across_pipeline() {
    const CAP: usize = 3;
    let stages = vec![
        StageSpec::new("fast", 4, |x: u64| Ok(x + 1)),
        StageSpec::new("slow", 1, |x: u64| {
            thread::sleep(Duration::from_micros(200));
            Ok(x)
        }),
    ];
    let pipeline = Pipeline::build(opts(CAP, ErrorPolicy::Skip), stages).unwrap();
    let (out, report) = run_to_completion(pipeline, 0..200, None)
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(out.len(), 200);
    assert!(report.is_lossless());
}

// --- ordering ---

#[test]
fn test_single_worker_stages_preserve_order() {
    let stages = vec![
        StageSpec::new("add", 1, |x: u64| Ok(x + 10)),
        StageSpec::new("mul", 1, |x: u64| Ok(x * 3)),
    ];
    let pipeline = Pipeline::build(opts(4, ErrorPolicy::Skip), stages).unwrap();
    let (out, _) = run_to_completion(pipeline, 0..500, None)
        .unwrap()
        .into_result()
        .unwrap();
    let expected: Vec<u64> = (0..500).map(|x| (x + 10) * 3).collect();
    assert_eq!(out, expected);
}

#[test]
fn test_worker_pool_output_matches_input_multiset() {
    let stages = vec![StageSpec::new("jitter", 3, |x: u64| {
        thread::sleep(Duration::from_millis((x * 7) % 5));
        Ok(x)
    })];
    let pipeline = Pipeline::build(opts(4, ErrorPolicy::Skip), stages).unwrap();
    let (mut out, report) = run_to_completion(pipeline, 1..=10, None)
        .unwrap()
        .into_result()
        .unwrap();
    out.sort_unstable();
    assert_eq!(out, (1..=10).collect::<Vec<u64>>());
    assert_eq!(report.stages[0].workers, 3);
    assert_eq!(report.stages[0].worker_reports.len(), 3);
}

// --- typed stages ---

#[test]
fn test_stages_can_change_item_type() {
    let pipeline = PipelineBuilder::<u32>::new(opts(4, ErrorPolicy::Skip))
        .stage("double", 2, |x: u32| Ok(x * 2))
        .stage("render", 2, |x: u32| Ok(format!("#{x}")))
        .stage("len", 1, |s: String| Ok(s.len()))
        .build()
        .unwrap();
    let (mut out, report) = run_to_completion(pipeline, [1_u32, 50, 500], None)
        .unwrap()
        .into_result()
        .unwrap();
    out.sort_unstable();
    assert_eq!(out, vec![2, 4, 5]); // "#2", "#100", "#1000"
    assert_eq!(report.stages.len(), 3);
    assert_eq!(report.stages[1].name, "render");
}

// --- failure policies ---

#[test]
fn test_skip_policy_counts_failures() {
    let stages = vec![StageSpec::new("odd-only", 1, |x: u64| {
        if x % 2 == 0 {
            anyhow::bail!("even input {x}");
        }
        Ok(x)
    })];
    let pipeline = Pipeline::build(opts(4, ErrorPolicy::Skip), stages).unwrap();
    let (out, report) = run_to_completion(pipeline, [1, 2, 3, 4], None)
        .unwrap()
        .into_result()
        .unwrap();

    let got: HashSet<u64> = out.into_iter().collect();
    assert_eq!(got, HashSet::from([1, 3]));
    assert_eq!(report.total_failed(), 2);
    assert_eq!(report.stages[0].failures.len(), 2);
    assert!(!report.stages[0].degraded);
    assert!(report.is_lossless());
}

#[test]
fn test_panicking_transform_is_counted_as_failure() {
    let stages = vec![StageSpec::new("panics-on-3", 2, |x: u64| {
        if x == 3 {
            panic!("boom");
        }
        Ok(x)
    })];
    let pipeline = Pipeline::build(opts(4, ErrorPolicy::Skip), stages).unwrap();
    let (out, report) = run_to_completion(pipeline, 1..=5, None)
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(out.len(), 4);
    assert_eq!(report.total_failed(), 1);
    assert!(report.stages[0].failures[0].contains("boom"));
}

#[test]
fn test_propagate_returns_first_failure_and_keeps_report() {
    let stages = vec![StageSpec::new("fails-on-13", 2, |x: u64| {
        if x == 13 {
            anyhow::bail!("unlucky");
        }
        Ok(x)
    })];
    let mut pipeline = Pipeline::build(opts(4, ErrorPolicy::Propagate), stages).unwrap();
    pipeline.start().unwrap();
    for i in 0..50 {
        if pipeline.submit(i).is_err() {
            break;
        }
    }
    let err = pipeline.shutdown_and_wait(None).unwrap_err();
    match err {
        PipelineError::Transform { stage, source, .. } => {
            assert_eq!(stage, 0);
            assert!(source.to_string().contains("unlucky"));
        }
        other => panic!("expected transform error, got {other:?}"),
    }

    assert_eq!(pipeline.state(), PipelineState::Finished);
    let report = pipeline.report().unwrap();
    assert!(report.stages[0].degraded);
    assert_eq!(report.degraded_stages().count(), 1);
    assert_eq!(report.total_failed(), 1);
    assert!(report.is_lossless());
    assert_eq!(
        report.stages[0]
            .worker_reports
            .iter()
            .filter(|w| w.halted)
            .count(),
        1
    );
}

#[test]
fn test_fully_halted_stage_abandons_input_without_loss() {
    let mut pipeline = PipelineBuilder::<u64>::new(opts(2, ErrorPolicy::Propagate))
        .stage("pass", 2, |x: u64| Ok(x))
        .stage("always-fails", 1, |_x: u64| -> anyhow::Result<u64> {
            anyhow::bail!("nope")
        })
        .build()
        .unwrap();
    pipeline.start().unwrap();

    let mut refused = false;
    for i in 0..1000 {
        if let Err(e) = pipeline.submit(i) {
            assert!(matches!(e, PipelineError::ClosedChannel));
            refused = true;
            break;
        }
    }

    let err = pipeline.shutdown_and_wait(Some(Duration::from_secs(10)));
    assert!(matches!(err, Err(PipelineError::Transform { stage: 1, .. })));
    let report = pipeline.report().unwrap();
    assert_eq!(report.emitted, 0);
    assert_eq!(report.total_failed(), 1);
    assert!(report.is_lossless(), "report: {report:?}");
    // Either the producer was refused or every item fit before the halt cascaded.
    assert!(refused || report.submitted == 1000);
}

// --- lifecycle ---

#[test]
fn test_submit_after_shutdown_fails_every_time() {
    let mut pipeline =
        Pipeline::build(opts(4, ErrorPolicy::Skip), identity_stages(1, 1)).unwrap();
    pipeline.start().unwrap();
    pipeline.submit(1).unwrap();
    pipeline.shutdown_and_wait(None).unwrap();

    let submitter = pipeline.submitter();
    for i in 0..5 {
        assert!(matches!(
            pipeline.submit(i),
            Err(PipelineError::ClosedChannel)
        ));
        assert!(matches!(
            submitter.submit(i),
            Err(PipelineError::ClosedChannel)
        ));
    }
}

#[test]
fn test_lifecycle_misuse_errors() {
    let mut pipeline =
        Pipeline::build(opts(4, ErrorPolicy::Skip), identity_stages(2, 1)).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Built);
    assert!(matches!(pipeline.submit(1), Err(PipelineError::NotStarted)));
    assert!(matches!(
        pipeline.shutdown_and_wait(None),
        Err(PipelineError::NotStarted)
    ));

    pipeline.start().unwrap();
    assert!(matches!(pipeline.start(), Err(PipelineError::AlreadyStarted)));

    pipeline.shutdown_and_wait(None).unwrap();
    assert!(matches!(pipeline.start(), Err(PipelineError::AlreadyStarted)));
    assert!(matches!(
        pipeline.shutdown_and_wait(None),
        Err(PipelineError::AlreadyFinished)
    ));
}

#[test]
fn test_build_rejects_invalid_shapes() {
    let none: Vec<StageSpec<u64>> = Vec::new();
    assert!(matches!(
        Pipeline::build(PipelineOpts::default(), none),
        Err(PipelineError::NoStages)
    ));
    assert!(matches!(
        Pipeline::build(PipelineOpts::default(), identity_stages(2, 0)),
        Err(PipelineError::ZeroWorkers { stage: 0 })
    ));
    assert!(matches!(
        Pipeline::build(opts(0, ErrorPolicy::Skip), identity_stages(1, 1)),
        Err(PipelineError::ZeroCapacity)
    ));
    let zero_out = PipelineOpts {
        output_cap: Some(0),
        ..PipelineOpts::default()
    };
    assert!(matches!(
        Pipeline::build(zero_out, identity_stages(1, 1)),
        Err(PipelineError::ZeroCapacity)
    ));
}

#[test]
fn test_zero_workers_reports_the_right_stage() {
    let result = PipelineBuilder::<u64>::new(PipelineOpts::default())
        .stage("ok", 1, |x: u64| Ok(x))
        .stage("empty", 0, |x: u64| Ok(x))
        .build();
    assert!(matches!(result, Err(PipelineError::ZeroWorkers { stage: 1 })));
}

// --- timeout ---

#[test]
fn test_shutdown_timeout_is_reported_and_resumable() {
    let gate = Arc::new(AtomicBool::new(false));
    let gate_w = Arc::clone(&gate);
    let stages = vec![StageSpec::new("gated", 1, move |x: u64| {
        while !gate_w.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        Ok(x)
    })];
    let mut pipeline = Pipeline::build(opts(4, ErrorPolicy::Skip), stages).unwrap();
    pipeline.start().unwrap();
    pipeline.submit(42).unwrap();

    let err = pipeline
        .shutdown_and_wait(Some(Duration::from_millis(50)))
        .unwrap_err();
    assert!(matches!(err, PipelineError::ShutdownTimeout { pending: 1, .. }));
    assert_eq!(pipeline.state(), PipelineState::Draining);
    assert!(matches!(pipeline.submit(1), Err(PipelineError::ClosedChannel)));

    gate.store(true, Ordering::SeqCst);
    let report = pipeline.shutdown_and_wait(None).unwrap();
    assert_eq!(report.emitted, 1);
    assert_eq!(pipeline.output().drain(), vec![42]);
}

#[test]
fn test_shutdown_timeout_counts_only_running_workers() {
    let gate = Arc::new(AtomicBool::new(false));
    let gate_w = Arc::clone(&gate);
    let mut pipeline = PipelineBuilder::<u64>::new(opts(4, ErrorPolicy::Skip))
        .stage("free", 1, |x: u64| Ok(x))
        .stage("gated", 1, move |x: u64| {
            while !gate_w.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(x)
        })
        .build()
        .unwrap();
    pipeline.start().unwrap();
    pipeline.submit(7).unwrap();

    // Stage 0 drains and exits; the deadline passes while stage 1 is still draining.
    let err = pipeline
        .shutdown_and_wait(Some(Duration::from_millis(100)))
        .unwrap_err();
    let live: usize = pipeline.stats().iter().map(|s| s.live_workers).sum();
    match err {
        PipelineError::ShutdownTimeout { pending, .. } => {
            assert_eq!(pending, 1);
            assert_eq!(pending, live);
        }
        other => panic!("expected shutdown timeout, got {other:?}"),
    }

    gate.store(true, Ordering::SeqCst);
    let report = pipeline.shutdown_and_wait(None).unwrap();
    assert_eq!(report.emitted, 1);
    assert_eq!(report.stages[0].worker_reports.len(), 1);
    assert_eq!(report.stages[1].worker_reports.len(), 1);
}

// --- run_to_completion ---

#[test]
fn test_run_to_completion_keeps_results_on_propagated_failure() {
    let stages = vec![StageSpec::new("fails-on-2", 1, |x: u64| {
        if x == 2 {
            anyhow::bail!("two");
        }
        Ok(x)
    })];
    let pipeline = Pipeline::build(opts(4, ErrorPolicy::Propagate), stages).unwrap();
    let done = run_to_completion(pipeline, 1..=4, None).unwrap();

    assert_eq!(done.outputs, vec![1]);
    assert!(matches!(
        done.failure,
        Some(PipelineError::Transform { stage: 0, .. })
    ));
    assert_eq!(done.report.total_failed(), 1);
    assert_eq!(done.report.emitted, 1);
    assert!(done.report.is_lossless());
    assert!(done.into_result().is_err());
}

// --- producers / consumers ---

#[test]
fn test_many_producers_and_concurrent_consumer() {
    let stages = vec![
        StageSpec::new("inc", 3, |x: u64| Ok(x + 1)),
        StageSpec::new("dec", 2, |x: u64| Ok(x - 1)),
    ];
    let opts = PipelineOpts {
        channel_cap: 8,
        output_cap: Some(2),
        ..PipelineOpts::default()
    };
    let mut pipeline = Pipeline::build(opts, stages).unwrap();
    pipeline.start().unwrap();

    let output = pipeline.output();
    let consumer = thread::spawn(move || output.collect::<Vec<u64>>());

    let producers: Vec<_> = (0..4_u64)
        .map(|p| {
            let submitter = pipeline.submitter();
            thread::spawn(move || {
                for i in 0..250 {
                    submitter.submit(p * 1000 + i).unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let report = pipeline.shutdown_and_wait(Some(Duration::from_secs(30))).unwrap();
    let mut out = consumer.join().unwrap();
    out.sort_unstable();
    let mut expected: Vec<u64> = (0..4_u64)
        .flat_map(|p| (0..250).map(move |i| p * 1000 + i))
        .collect();
    expected.sort_unstable();
    assert_eq!(out, expected);
    assert_eq!(report.submitted, 1000);

    let sink = pipeline.channels().last().cloned().unwrap();
    assert!(sink.high_water <= 2);
}

#[test]
fn test_worker_reports_add_up_to_stage_totals() {
    let pipeline = Pipeline::build(opts(4, ErrorPolicy::Skip), identity_stages(2, 3)).unwrap();
    let (_, report) = run_to_completion(pipeline, 0..300, None)
        .unwrap()
        .into_result()
        .unwrap();
    for stage in &report.stages {
        let done: u64 = stage.worker_reports.iter().map(|w| w.work_done).sum();
        assert_eq!(done, stage.processed);
        assert_eq!(stage.processed, 300);
        // Each worker polls once more than it takes, for the end of stream.
        for w in &stage.worker_reports {
            assert_eq!(w.polled, w.work_done + 1);
        }
    }
}

#[test]
fn test_dropping_running_pipeline_releases_workers() {
    let mut pipeline =
        Pipeline::build(opts(2, ErrorPolicy::Skip), identity_stages(2, 2)).unwrap();
    pipeline.start().unwrap();
    pipeline.submit(1).unwrap();
    let output = pipeline.output();
    drop(pipeline);
    // Every channel is closed, so the sink ends instead of blocking forever.
    let rest: Vec<u64> = output.collect();
    assert!(rest.len() <= 1);
}

#[test]
fn test_handles_and_accessors_follow_lifecycle() {
    let mut pipeline = Pipeline::<u64, u64>::builder(opts(4, ErrorPolicy::Skip))
        .stage("inc", 2, |x: u64| Ok(x + 1))
        .stage("double", 1, |x: u64| Ok(x * 2))
        .build()
        .unwrap();
    assert_eq!(pipeline.stage_count(), 2);
    assert_eq!(pipeline.opts().channel_cap, 4);
    assert_eq!(pipeline.opts().output_cap, None);
    pipeline.start().unwrap();

    let submitter = pipeline.submitter();
    let output = pipeline.output();
    assert!(!submitter.is_closed());
    submitter.submit(1).unwrap();
    submitter.submit(2).unwrap();
    assert!(matches!(
        output.recv_timeout(Duration::from_secs(5)),
        Some(Recv::Item(_))
    ));
    assert_eq!(pipeline.stats().len(), 2);

    let report = pipeline.shutdown_and_wait(None).unwrap();
    assert!(submitter.is_closed());
    assert_eq!(report.degraded_stages().count(), 0);
    assert!(pipeline.stats().iter().all(|s| s.live_workers == 0));
    assert_eq!(pipeline.stats()[0].processed, 2);

    let snap = output.snapshot();
    assert!(snap.closed);
    assert_eq!(snap.total_put, 2);
    assert_eq!(snap.len, 1);
    assert_eq!(snap.in_flight, 0);
    assert!(matches!(
        output.recv_timeout(Duration::from_millis(10)),
        Some(Recv::Item(_))
    ));
    assert_eq!(
        output.recv_timeout(Duration::from_millis(10)),
        Some(Recv::EndOfStream)
    );
}
