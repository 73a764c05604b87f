use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actor_flow::mock::ProbeTask;
use actor_flow::{
    channel_source, init_tracing, sequence, ActorSource, Behavior, BehaviorDispatcher,
    DispatchConfig, FlowError, ForEach, Graph, Ignore, Receiver, Source, SourceFn, TaskFn,
    ToSlice,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

// --- Test Stages ---

/// Sink recording values and error messages, delivered together as the
/// terminal output.
struct CollectAll<T> {
    values: Mutex<Vec<T>>,
    errors: Mutex<Vec<String>>,
}

impl<T> CollectAll<T> {
    fn new() -> Self {
        Self {
            values: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Receiver for CollectAll<T> {
    type In = T;
    type Output = (Vec<T>, Vec<String>);

    async fn on_push(&self, value: T) {
        self.values.lock().unwrap().push(value);
    }

    async fn on_error(&self, err: FlowError) {
        self.errors.lock().unwrap().push(err.to_string());
    }

    async fn on_complete(&self) -> (Vec<T>, Vec<String>) {
        (
            std::mem::take(&mut *self.values.lock().unwrap()),
            std::mem::take(&mut *self.errors.lock().unwrap()),
        )
    }
}

/// Behavior yielding 0, 1, 2, ... and end-of-stream after `limit` replies,
/// regardless of the payload it is sent.
struct Counting {
    next: AtomicU64,
    limit: u64,
}

impl Counting {
    fn new(limit: u64) -> Self {
        Self {
            next: AtomicU64::new(0),
            limit,
        }
    }
}

#[async_trait]
impl Behavior for Counting {
    type Value = u64;

    async fn handle(&self, _msg: u64) -> Result<u64, FlowError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        if n < self.limit {
            Ok(n)
        } else {
            Err(FlowError::Eof)
        }
    }
}

/// Behavior echoing after a delay, to keep a worker busy.
struct SlowEcho {
    delay: Duration,
}

#[async_trait]
impl Behavior for SlowEcho {
    type Value = u64;

    async fn handle(&self, msg: u64) -> Result<u64, FlowError> {
        tokio::time::sleep(self.delay).await;
        Ok(msg)
    }
}

/// What a [`MeteredSource`] reports to the test observing it.
#[derive(Default)]
struct SourceStats {
    pulls: AtomicU64,
    closes: AtomicU64,
    dropped: AtomicBool,
}

/// Endless numeric source that counts every demand and teardown signal it
/// receives, and flags its own drop.
struct MeteredSource {
    next: AtomicU64,
    stats: Arc<SourceStats>,
}

impl MeteredSource {
    fn new(stats: Arc<SourceStats>) -> Self {
        Self {
            next: AtomicU64::new(0),
            stats,
        }
    }
}

impl Drop for MeteredSource {
    fn drop(&mut self) {
        self.stats.dropped.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Source for MeteredSource {
    type Out = u64;

    async fn on_pull(&self) -> Result<u64, FlowError> {
        self.stats.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }

    async fn on_close(&self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("boom")]
struct Boom;

// --- Tests ---

/// The combinator chain everything else builds on: produce, transform,
/// truncate, collect.
#[tokio::test]
async fn test_sequence_map_take() {
    init_tracing();
    let run = sequence(0, 1).map(|n| n * 2).take(3).to(ToSlice::new()).run().await;
    let values = run.result().await.expect("pipeline dropped its result");
    assert_eq!(values, vec![0, 2, 4]);
}

/// Take of zero cancels on the first unit of demand and completes empty.
#[tokio::test]
async fn test_take_zero_completes_empty() {
    let run = sequence(5, 5).take(0).to(ToSlice::new()).run().await;
    let values = run.result().await.expect("pipeline dropped its result");
    assert!(values.is_empty());
}

/// A channel-backed stream ends when every sender is gone and the queue is
/// drained.
#[tokio::test]
async fn test_channel_source_completes_when_senders_drop() {
    let (feed, stream) = mpsc::channel(8);
    for n in [1u64, 2, 3] {
        feed.send(n).await.unwrap();
    }
    drop(feed);

    let run = channel_source(stream).to(ToSlice::new()).run().await;
    let values = run.result().await.expect("pipeline dropped its result");
    assert_eq!(values, vec![1, 2, 3]);
}

/// Take larger than the stream delivers whatever the stream has.
#[tokio::test]
async fn test_take_beyond_stream_length() {
    let (feed, stream) = mpsc::channel(8);
    feed.send(10u64).await.unwrap();
    feed.send(20).await.unwrap();
    drop(feed);

    let run = channel_source(stream).take(5).to(ToSlice::new()).run().await;
    let values = run.result().await.expect("pipeline dropped its result");
    assert_eq!(values, vec![10, 20]);
}

/// Take asks the source for exactly its count and tears it down exactly
/// once.
#[tokio::test]
async fn test_take_pulls_exactly_count_then_cancels_once() {
    let stats = Arc::new(SourceStats::default());
    let run = Graph::from_source(MeteredSource::new(stats.clone()))
        .take(3)
        .to(ToSlice::new())
        .run()
        .await;

    let values = run.result().await.expect("pipeline dropped its result");
    assert_eq!(values, vec![0, 1, 2]);
    assert_eq!(stats.pulls.load(Ordering::SeqCst), 3);
    assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
}

/// Take of zero cancels before any demand reaches the source.
#[tokio::test]
async fn test_take_zero_cancels_without_pulling() {
    let stats = Arc::new(SourceStats::default());
    let run = Graph::from_source(MeteredSource::new(stats.clone()))
        .take(0)
        .to(ToSlice::new())
        .run()
        .await;

    let values = run.result().await.expect("pipeline dropped its result");
    assert!(values.is_empty());
    assert_eq!(stats.pulls.load(Ordering::SeqCst), 0);
    assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
}

/// Filter drops non-matching values without costing downstream demand.
#[tokio::test]
async fn test_filter_keeps_matching_values() {
    let run = sequence(0, 1)
        .filter(|n| n % 2 == 0)
        .take(3)
        .to(ToSlice::new())
        .run()
        .await;
    let values = run.result().await.expect("pipeline dropped its result");
    assert_eq!(values, vec![0, 2, 4]);
}

/// Map may change the element type between links.
#[tokio::test]
async fn test_map_changes_element_type() {
    let run = sequence(1, 1)
        .map(|n| format!("#{n}"))
        .take(2)
        .to(ToSlice::new())
        .run()
        .await;
    let values = run.result().await.expect("pipeline dropped its result");
    assert_eq!(values, vec!["#1".to_string(), "#2".to_string()]);
}

/// Values arrive at the sink in production order.
#[tokio::test]
async fn test_pipeline_preserves_order() {
    let (feed, stream) = mpsc::channel(8);
    for n in [3u64, 1, 4, 1, 5, 9] {
        feed.send(n).await.unwrap();
    }
    drop(feed);

    let run = channel_source(stream).to(ToSlice::new()).run().await;
    let values = run.result().await.expect("pipeline dropped its result");
    assert_eq!(values, vec![3, 1, 4, 1, 5, 9]);
}

/// A probe stage sees exactly what the sink later receives.
#[tokio::test]
async fn test_probe_observes_passing_values() {
    let (probe, recorder) = ProbeTask::new();
    let run = sequence(0, 1)
        .map(|n| n + 1)
        .via(probe)
        .take(2)
        .to(ToSlice::new())
        .run()
        .await;
    let values = run.result().await.expect("pipeline dropped its result");
    assert_eq!(values, vec![1, 2]);
    assert_eq!(recorder.values(), vec![1, 2]);
}

/// An upstream error costs one value, not the stream. The sink observes it
/// and demand resumes.
#[tokio::test]
async fn test_error_does_not_end_stream() {
    let attempts = Arc::new(AtomicU64::new(0));
    let source = SourceFn::new(move || {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst);
        if attempt == 1 {
            Err(FlowError::handler(Boom))
        } else {
            Ok(attempt)
        }
    });

    let run = Graph::from_source(source).take(3).to(CollectAll::new()).run().await;
    let (values, errors) = run.result().await.expect("pipeline dropped its result");
    assert_eq!(values, vec![0, 2, 3]);
    assert_eq!(errors, vec!["handler error: boom".to_string()]);
}

/// An actor-backed source streams one reply per unit of demand and
/// completes on the end-of-stream reply.
#[tokio::test]
async fn test_actor_source_streams_until_eof() {
    let (dispatcher, handle) =
        BehaviorDispatcher::new(Counting::new(3), DispatchConfig::default()).unwrap();
    tokio::spawn(dispatcher.run());

    let run = Graph::from_source(ActorSource::new(handle.actor_ref(), 0))
        .to(ToSlice::new())
        .run()
        .await;
    let values = run.result().await.expect("pipeline dropped its result");
    assert_eq!(values, vec![0, 1, 2]);

    handle.stop();
}

/// The init payload is dispatched before any demand reaches the actor.
#[tokio::test]
async fn test_actor_source_dispatches_init_first() {
    let (dispatcher, handle) =
        BehaviorDispatcher::new(Counting::new(3), DispatchConfig::default()).unwrap();
    tokio::spawn(dispatcher.run());

    let actor = handle.actor_ref();
    let mut mirror = actor.mirror();

    let run = Graph::from_source(ActorSource::new(actor, 0).with_init(99))
        .to(ToSlice::new())
        .run()
        .await;
    let values = run.result().await.expect("pipeline dropped its result");

    // the init call consumed the first reply; the stream got the rest
    assert_eq!(values, vec![1, 2]);
    assert_eq!(mirror.recv().await.unwrap().unwrap(), 0);

    handle.stop();
}

/// Cancellation tears an actor source down by closing the ref it owns, so
/// a later close through any clone trips the once-only latch.
#[tokio::test]
#[should_panic(expected = "actor closed twice")]
async fn test_actor_source_teardown_closes_its_ref() {
    let (dispatcher, handle) =
        BehaviorDispatcher::new(Counting::new(100), DispatchConfig::default()).unwrap();
    tokio::spawn(dispatcher.run());

    let actor = handle.actor_ref();
    let spare = actor.clone();

    let run = Graph::from_source(ActorSource::new(actor, 0))
        .take(2)
        .to(ToSlice::new())
        .run()
        .await;
    let values = run.result().await.expect("pipeline dropped its result");
    assert_eq!(values, vec![0, 1]);

    // the source already closed the ref during teardown
    spare.close();
}

/// A task may skip values by answering with the end-of-stream marker.
#[tokio::test]
async fn test_task_skip_re_pulls_upstream() {
    let run = sequence(0, 1)
        .via(TaskFn::new(|n: u64| {
            if n % 2 == 1 {
                Err(FlowError::Eof)
            } else {
                Ok(n)
            }
        }))
        .take(2)
        .to(ToSlice::new())
        .run()
        .await;
    let values = run.result().await.expect("pipeline dropped its result");
    assert_eq!(values, vec![0, 2]);
}

/// ForEach applies its closure per value and completes with unit.
#[tokio::test]
async fn test_for_each_applies_side_effect() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    let run = sequence(0, 1)
        .take(3)
        .to(ForEach::new(move |n: u64| {
            sink_seen.lock().unwrap().push(n);
        }))
        .run()
        .await;
    run.result().await.expect("pipeline dropped its result");
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
}

/// Ignore swallows values; only completion matters.
#[tokio::test]
async fn test_ignore_discards_values() {
    let run = sequence(0, 1).take(100).to(Ignore::new()).run().await;
    run.result().await.expect("pipeline dropped its result");
}

/// Closing a running endless pipeline yields the prefix collected so far.
#[tokio::test]
async fn test_close_mid_stream_returns_partial_result() {
    let run = sequence(0, 1).to(ToSlice::new()).run().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    run.close().await;

    let values = run.result().await.expect("pipeline dropped its result");
    let expected: Vec<u64> = (0..values.len() as u64).collect();
    assert_eq!(values, expected, "partial result should be an ordered prefix");
}

/// Close after natural completion is a quiet no-op.
#[tokio::test]
async fn test_close_after_completion_is_noop() {
    let run = sequence(0, 1).take(2).to(ToSlice::new()).run().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    run.close().await;
    run.close().await;

    let values = run.result().await.expect("pipeline dropped its result");
    assert_eq!(values, vec![0, 1]);
}

/// A pipeline that is never run can still be torn down.
#[tokio::test]
async fn test_unrun_pipeline_tears_down() {
    let runnable = sequence(0, 1).take(5).to(ToSlice::new());
    runnable.close().await;
}

/// Dropping a pipeline without running or closing it still cancels the
/// chain, so the loop tasks exit and release their stages.
#[tokio::test]
async fn test_dropped_unrun_pipeline_frees_its_stages() {
    let stats = Arc::new(SourceStats::default());
    let runnable = Graph::from_source(MeteredSource::new(stats.clone()))
        .take(3)
        .to(ToSlice::new());

    drop(runnable);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
    assert!(
        stats.dropped.load(Ordering::SeqCst),
        "loop tasks should release the stages"
    );
}

/// Dropping the handle of a live endless pipeline cancels it upstream
/// instead of letting it compute forever.
#[tokio::test]
async fn test_dropped_run_handle_stops_the_stream() {
    let stats = Arc::new(SourceStats::default());
    let run = Graph::from_source(MeteredSource::new(stats.clone()))
        .map(|n| n + 1)
        .to(Ignore::new())
        .run()
        .await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(run);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
    assert!(
        stats.dropped.load(Ordering::SeqCst),
        "loop tasks should release the stages"
    );
}

/// Closing a pipeline whose source is stuck behind a busy actor returns
/// promptly, while a deadline-bound request against the same pool expires
/// instead of hanging.
#[tokio::test]
async fn test_close_with_busy_actor_source() {
    let behavior = SlowEcho {
        delay: Duration::from_millis(300),
    };
    let (dispatcher, handle) =
        BehaviorDispatcher::new(behavior, DispatchConfig::default()).unwrap();
    tokio::spawn(dispatcher.run());

    let run = Graph::from_source(ActorSource::new(handle.actor_ref(), 1))
        .to(ToSlice::new())
        .run()
        .await;

    // the pool's one worker is busy serving the source's first pull
    let direct = handle.actor_ref();
    let err = direct
        .request_timeout(2, Duration::from_millis(30))
        .await
        .expect_err("deadline should expire while the worker is busy");
    assert!(matches!(err, FlowError::DeadlineExceeded));

    run.close().await;
    let values = run.result().await.expect("pipeline dropped its result");
    assert!(values.len() <= 1, "at most the in-flight value lands");

    handle.stop();
}
