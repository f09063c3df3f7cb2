//! Unit tests for dt-schedule.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dt_time::{Instant, SimDuration, Token};

use crate::{
    CallbackResult, Engine, EngineError, EngineListener, Outcome, Scheduler, SchedulerError,
    SchedulerState,
};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine double driven by hand from the test thread.
///
/// `advance_to` delivers every request at or before the target, earliest
/// instant first and in request order within an instant, publishing each
/// distinct instant once.  Requests added while firing are picked up by the
/// same call.
#[derive(Default)]
struct ManualEngine {
    pending:      Mutex<Vec<(Instant, Token)>>,
    history:      Mutex<Vec<(Instant, Token)>>,
    listener:     Mutex<Option<Arc<dyn EngineListener>>>,
    published:    Mutex<Option<Instant>>,
    refuse_from:  Mutex<Option<Instant>>,
    start_error:  Mutex<Option<EngineError>>,
    running:      AtomicBool,
    starts:       AtomicUsize,
}

impl ManualEngine {
    fn listener(&self) -> Arc<dyn EngineListener> {
        self.listener.lock().unwrap().clone().expect("scheduler attached")
    }

    fn advance_to(&self, to: Instant) {
        loop {
            let (at, tokens) = {
                let mut pending = self.pending.lock().unwrap();
                let Some(at) = pending.iter().map(|(at, _)| *at).filter(|at| *at <= to).min()
                else {
                    break;
                };
                let tokens: Vec<Token> =
                    pending.iter().filter(|(a, _)| *a == at).map(|(_, t)| *t).collect();
                pending.retain(|(a, _)| *a != at);
                (at, tokens)
            };
            let listener = self.listener();
            let fresh = {
                let mut published = self.published.lock().unwrap();
                let fresh = *published != Some(at);
                *published = Some(at);
                fresh
            };
            if fresh {
                listener.on_time_advanced(at);
            }
            for token in tokens {
                listener.on_fire(at, token);
            }
        }
    }

    fn end_run(&self) {
        self.listener().on_end_of_run();
    }

    fn fail(&self, reason: &str) {
        self.listener().on_failure(EngineError::Run(reason.into()));
    }

    fn requests_at(&self, at: Instant) -> usize {
        self.history.lock().unwrap().iter().filter(|(a, _)| *a == at).count()
    }

    fn request_count(&self) -> usize {
        self.history.lock().unwrap().len()
    }
}

impl Engine for ManualEngine {
    fn schedule_once(&self, at: Instant, token: Token) -> Result<(), EngineError> {
        if self.refuse_from.lock().unwrap().is_some_and(|limit| at >= limit) {
            return Err(EngineError::Unsupported { at, reason: "beyond horizon".into() });
        }
        self.pending.lock().unwrap().push((at, token));
        self.history.lock().unwrap().push((at, token));
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn start(&self) -> Result<(), EngineError> {
        if let Some(err) = self.start_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn attach(&self, listener: Arc<dyn EngineListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }
}

fn setup() -> (Arc<ManualEngine>, Scheduler) {
    init_tracing();
    let engine = Arc::new(ManualEngine::default());
    let scheduler = Scheduler::new(Arc::clone(&engine));
    (engine, scheduler)
}

type Log = Arc<Mutex<Vec<(&'static str, Instant)>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Callback that appends `(name, firing instant)` to `log`.
fn record(log: &Log, name: &'static str) -> impl FnOnce(Instant) -> CallbackResult + Send + 'static {
    let log = Arc::clone(log);
    move |at| {
        log.lock().unwrap().push((name, at));
        Ok(())
    }
}

fn names(log: &Log) -> Vec<&'static str> {
    log.lock().unwrap().iter().map(|(n, _)| *n).collect()
}

fn secs(n: u64) -> Instant {
    Instant::seconds(n)
}

// ── Coalescing ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod coalescing {
    use super::*;

    #[test]
    fn same_instant_shares_one_primitive_event() {
        let (engine, scheduler) = setup();
        let log = log();
        scheduler.schedule(secs(10), record(&log, "a")).unwrap();
        scheduler.schedule(secs(10), record(&log, "b")).unwrap();
        scheduler.schedule(secs(20), record(&log, "c")).unwrap();

        engine.advance_to(secs(10));

        assert_eq!(*log.lock().unwrap(), vec![("a", secs(10)), ("b", secs(10))]);
        assert_eq!(engine.requests_at(secs(10)), 1);
        assert_eq!(scheduler.pending_instants(), vec![secs(20)]);
    }

    #[test]
    fn equal_instants_in_different_units_coalesce() {
        let (engine, scheduler) = setup();
        let log = log();
        scheduler.schedule(Instant::seconds(2), record(&log, "s")).unwrap();
        scheduler.schedule(Instant::millis(2_000), record(&log, "ms")).unwrap();
        scheduler
            .schedule(Instant::seconds(1) + SimDuration::millis(1_000), record(&log, "sum"))
            .unwrap();

        assert_eq!(engine.request_count(), 1);
        assert_eq!(scheduler.registry().subscriber_count(), 3);
        engine.advance_to(secs(2));
        assert_eq!(names(&log), vec!["s", "ms", "sum"]);
    }

    #[test]
    fn primitive_requests_track_distinct_instants() {
        let (engine, scheduler) = setup();
        for i in 0..30u64 {
            scheduler.schedule(secs(1 + i % 3), |_| Ok(())).unwrap();
        }
        assert_eq!(scheduler.registry().primitive_requests(), 3);
        assert_eq!(engine.request_count(), 3);
        assert_eq!(scheduler.registry().pending_len(), 3);
    }

    #[test]
    fn every_callback_fires_exactly_once() {
        let (engine, scheduler) = setup();
        let count = Arc::new(AtomicUsize::new(0));
        let expectations: Vec<_> = (0..10)
            .map(|_| {
                let count = Arc::clone(&count);
                scheduler
                    .schedule(secs(5), move |_| {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap()
            })
            .collect();

        engine.advance_to(secs(5));
        engine.advance_to(secs(50));
        engine.end_run();

        assert_eq!(count.load(Ordering::SeqCst), 10);
        for e in &expectations {
            assert_eq!(e.outcome(), Some(Outcome::Fired(secs(5))));
        }
    }
}

// ── Cancellation ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod cancellation {
    use super::*;

    #[test]
    fn cancel_before_fire_never_invokes() {
        let (engine, scheduler) = setup();
        let errors = scheduler.errors();
        let log = log();
        let a = scheduler.schedule(secs(5), record(&log, "a")).unwrap();

        assert!(a.cancel());
        engine.advance_to(secs(5));

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(a.outcome(), Some(Outcome::Cancelled));
        assert!(errors.drain().is_empty());
    }

    #[test]
    fn cancelling_one_leaves_siblings() {
        let (engine, scheduler) = setup();
        let log = log();
        scheduler.schedule(secs(10), record(&log, "a")).unwrap();
        let b = scheduler.schedule(secs(10), record(&log, "b")).unwrap();
        scheduler.schedule(secs(10), record(&log, "c")).unwrap();

        assert!(b.cancel());
        engine.advance_to(secs(10));

        assert_eq!(names(&log), vec!["a", "c"]);
    }

    #[test]
    fn cancelling_all_fires_as_noop() {
        let (engine, scheduler) = setup();
        let errors = scheduler.errors();
        let log = log();
        let a = scheduler.schedule(secs(10), record(&log, "a")).unwrap();
        let b = scheduler.schedule(secs(10), record(&log, "b")).unwrap();
        scheduler.schedule(secs(20), record(&log, "c")).unwrap();

        assert!(a.cancel());
        assert!(b.cancel());
        // The empty entry stays until its primitive event fires.
        assert_eq!(scheduler.pending_instants(), vec![secs(10), secs(20)]);

        engine.advance_to(secs(10));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(scheduler.pending_instants(), vec![secs(20)]);

        engine.advance_to(secs(20));
        assert_eq!(names(&log), vec!["c"]);
        assert!(errors.drain().is_empty());
    }

    #[test]
    fn empty_entry_is_reused_without_new_request() {
        let (engine, scheduler) = setup();
        let log = log();
        let a = scheduler.schedule(secs(10), record(&log, "a")).unwrap();
        a.cancel();
        scheduler.schedule(secs(10), record(&log, "b")).unwrap();

        assert_eq!(engine.requests_at(secs(10)), 1);
        engine.advance_to(secs(10));
        assert_eq!(names(&log), vec!["b"]);
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        let (engine, scheduler) = setup();
        let a = scheduler.schedule(secs(1), |_| Ok(())).unwrap();
        engine.advance_to(secs(1));

        assert!(!a.cancel());
        assert_eq!(a.outcome(), Some(Outcome::Fired(secs(1))));
    }

    #[test]
    fn double_cancel_reports_once() {
        let (_engine, scheduler) = setup();
        let a = scheduler.schedule(secs(1), |_| Ok(())).unwrap();
        let clone = a.clone();
        assert!(a.cancel());
        assert!(!clone.cancel());
        assert_eq!(clone.outcome(), Some(Outcome::Cancelled));
    }

    #[test]
    fn cancel_losing_race_to_fire_is_noop() {
        // `a` tries to cancel its sibling `b` while the batch for t=10 is in
        // flight.  The batch was snapshotted before `a` ran, so `b` still fires.
        let (engine, scheduler) = setup();
        let log = log();
        let slot: Arc<Mutex<Option<crate::Expectation>>> = Arc::new(Mutex::new(None));
        let cancelled = Arc::new(AtomicBool::new(true));

        let (s, c, l) = (Arc::clone(&slot), Arc::clone(&cancelled), Arc::clone(&log));
        scheduler
            .schedule(secs(10), move |at| {
                l.lock().unwrap().push(("a", at));
                let b = s.lock().unwrap().clone().expect("b registered");
                c.store(b.cancel(), Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        let b = scheduler.schedule(secs(10), record(&log, "b")).unwrap();
        *slot.lock().unwrap() = Some(b.clone());

        engine.advance_to(secs(10));

        assert!(!cancelled.load(Ordering::SeqCst));
        assert_eq!(names(&log), vec!["a", "b"]);
        assert_eq!(b.outcome(), Some(Outcome::Fired(secs(10))));
    }

    #[test]
    fn timeout_by_scheduled_cancellation() {
        let (engine, scheduler) = setup();
        let log = log();
        let work = scheduler.schedule(secs(30), record(&log, "work")).unwrap();
        let guard = work.clone();
        scheduler
            .schedule(secs(20), move |_| {
                guard.cancel();
                Ok(())
            })
            .unwrap();

        engine.advance_to(secs(30));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(work.outcome(), Some(Outcome::Cancelled));
    }
}

// ── Re-entrant scheduling ─────────────────────────────────────────────────────

#[cfg(test)]
mod reentrancy {
    use super::*;

    #[test]
    fn now_inside_callback_is_firing_instant() {
        let (engine, scheduler) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for t in [3u64, 7, 7, 12] {
            let (s, seen) = (scheduler.clone(), Arc::clone(&seen));
            scheduler
                .schedule(secs(t), move |at| {
                    seen.lock().unwrap().push((at, s.now()));
                    Ok(())
                })
                .unwrap();
        }
        engine.advance_to(secs(12));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        for (at, now) in seen.iter() {
            assert_eq!(at, now);
        }
    }

    #[test]
    fn callback_schedules_later_instant() {
        let (engine, scheduler) = setup();
        let log = log();
        let (s, l) = (scheduler.clone(), Arc::clone(&log));
        scheduler
            .schedule(secs(10), move |at| {
                l.lock().unwrap().push(("a", at));
                s.schedule(secs(15), record(&l, "b"))?;
                Ok(())
            })
            .unwrap();

        engine.advance_to(secs(10));
        assert_eq!(names(&log), vec!["a"]);
        assert_eq!(scheduler.pending_instants(), vec![secs(15)]);

        engine.advance_to(secs(14));
        assert_eq!(names(&log), vec!["a"]);

        engine.advance_to(secs(15));
        assert_eq!(*log.lock().unwrap(), vec![("a", secs(10)), ("b", secs(15))]);
    }

    #[test]
    fn callback_schedules_its_own_instant() {
        let (engine, scheduler) = setup();
        let times = scheduler.time();
        let log = log();
        let (s, l) = (scheduler.clone(), Arc::clone(&log));
        scheduler
            .schedule(secs(10), move |at| {
                l.lock().unwrap().push(("a", at));
                s.schedule(at, record(&l, "again"))?;
                Ok(())
            })
            .unwrap();
        scheduler.schedule(secs(10), record(&log, "b")).unwrap();

        engine.advance_to(secs(10));

        // The follow-up runs after the whole first batch, in its own event.
        assert_eq!(names(&log), vec!["a", "b", "again"]);
        assert_eq!(engine.requests_at(secs(10)), 2);
        engine.end_run();
        let published: Vec<_> = times.map(|t| t.unwrap()).collect();
        assert_eq!(published, vec![secs(10)]);
    }

    #[test]
    fn schedule_after_is_relative_to_now() {
        let (engine, scheduler) = setup();
        let log = log();
        let (s, l) = (scheduler.clone(), Arc::clone(&log));
        scheduler
            .schedule(secs(4), move |_| {
                let e = s.schedule_after(SimDuration::millis(1_500), record(&l, "later"))?;
                assert_eq!(e.instant(), Instant::millis(5_500));
                Ok(())
            })
            .unwrap();

        engine.advance_to(secs(6));
        assert_eq!(*log.lock().unwrap(), vec![("later", Instant::millis(5_500))]);
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod errors {
    use super::*;

    #[test]
    fn failing_callback_does_not_stop_siblings() {
        let (engine, scheduler) = setup();
        let errors = scheduler.errors();
        let log = log();
        let bad = scheduler.schedule(secs(3), |_| Err("bad input".into())).unwrap();
        scheduler.schedule(secs(3), record(&log, "good")).unwrap();
        scheduler.schedule(secs(4), record(&log, "later")).unwrap();

        engine.advance_to(secs(4));

        assert_eq!(names(&log), vec!["good", "later"]);
        assert_eq!(bad.outcome(), Some(Outcome::Fired(secs(3))));
        let reported = errors.drain();
        assert_eq!(reported.len(), 1);
        match &reported[0] {
            SchedulerError::Callback { at, subscription, source } => {
                assert_eq!(*at, secs(3));
                assert_eq!(*subscription, bad.id());
                assert_eq!(source.message(), "bad input");
                assert!(!source.is_panic());
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(scheduler.state(), SchedulerState::Running);
    }

    #[test]
    fn panicking_callback_is_contained() {
        let (engine, scheduler) = setup();
        let errors = scheduler.errors();
        let log = log();
        scheduler.schedule(secs(1), |_| panic!("kaboom")).unwrap();
        scheduler.schedule(secs(1), record(&log, "after")).unwrap();

        engine.advance_to(secs(1));

        assert_eq!(names(&log), vec!["after"]);
        match errors.try_recv() {
            Some(SchedulerError::Callback { source, .. }) => {
                assert!(source.is_panic());
                assert!(source.message().contains("kaboom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn past_instant_is_rejected() {
        let (engine, scheduler) = setup();
        scheduler.schedule(secs(10), |_| Ok(())).unwrap();
        engine.advance_to(secs(10));

        let err = scheduler.schedule(secs(9), |_| Ok(())).unwrap_err();
        assert_eq!(err, SchedulerError::PastInstant { requested: secs(9), now: secs(10) });
        // Exactly now is allowed.
        assert!(scheduler.schedule(secs(10), |_| Ok(())).is_ok());
    }

    #[test]
    fn engine_refusal_fails_expectation() {
        let (engine, scheduler) = setup();
        *engine.refuse_from.lock().unwrap() = Some(secs(100));
        let errors = scheduler.errors();

        let refused = scheduler.schedule(secs(150), |_| Ok(())).unwrap();
        let accepted = scheduler.schedule(secs(50), |_| Ok(())).unwrap();

        match refused.outcome() {
            Some(Outcome::Failed(SchedulerError::EngineScheduling { at, source })) => {
                assert_eq!(at, secs(150));
                assert!(matches!(source, EngineError::Unsupported { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!refused.cancel());
        assert!(accepted.outcome().is_none());
        assert_eq!(scheduler.pending_instants(), vec![secs(50)]);
        assert_eq!(errors.drain().len(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn engine_failure_is_fatal() {
        let (engine, scheduler) = setup();
        let errors = scheduler.errors();
        let times = scheduler.time();
        let log = log();
        scheduler.schedule(secs(1), record(&log, "a")).unwrap();
        let pending = scheduler.schedule(secs(2), record(&log, "b")).unwrap();

        engine.advance_to(secs(1));
        engine.fail("disk on fire");

        assert_eq!(scheduler.state(), SchedulerState::Failed);
        assert_eq!(names(&log), vec!["a"]);
        let expected = SchedulerError::EngineRun(EngineError::Run("disk on fire".into()));
        assert_eq!(pending.outcome(), Some(Outcome::Failed(expected.clone())));
        assert_eq!(errors.drain(), vec![expected.clone()]);

        let items: Vec<_> = times.collect();
        assert_eq!(items, vec![Ok(secs(1)), Err(expected.clone())]);

        // Late subscribers see the failure too, on both streams.
        let late: Vec<_> = scheduler.time().collect();
        assert_eq!(late, vec![Err(expected.clone())]);
        let late_errors: Vec<_> = scheduler.errors().collect();
        assert_eq!(late_errors, vec![expected]);
        assert!(scheduler.pending_instants().is_empty());
    }

    #[test]
    fn error_stream_ends_with_the_run() {
        let (engine, scheduler) = setup();
        let errors = scheduler.errors();
        scheduler.schedule(secs(1), |_| Err("once".into())).unwrap();

        engine.advance_to(secs(1));
        engine.end_run();

        let reported: Vec<_> = errors.collect();
        assert_eq!(reported.len(), 1);
        assert!(matches!(reported[0], SchedulerError::Callback { .. }));
        assert_eq!(scheduler.errors().count(), 0);
    }

    #[test]
    fn error_stream_iteration_unblocks_on_end_of_run() {
        let (engine, scheduler) = setup();
        let errors = scheduler.errors();
        let reader = std::thread::spawn(move || errors.count());

        engine.end_run();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn scheduling_after_termination_fails() {
        let (engine, scheduler) = setup();
        let errors = scheduler.errors();
        engine.end_run();

        let e = scheduler.schedule(secs(5), |_| Ok(())).unwrap();
        assert_eq!(
            e.outcome(),
            Some(Outcome::Failed(SchedulerError::EngineScheduling {
                at:     secs(5),
                source: EngineError::Terminated,
            }))
        );
        // The error stream closed with the run.
        assert_eq!(errors.count(), 0);
        assert_eq!(engine.request_count(), 0);
    }

    #[test]
    fn start_failure_moves_to_failed() {
        let (engine, scheduler) = setup();
        *engine.start_error.lock().unwrap() = Some(EngineError::Run("no worker".into()));
        let e = scheduler.schedule(secs(1), |_| Ok(())).unwrap();

        let err = scheduler.resume().unwrap_err();
        assert!(matches!(err, SchedulerError::EngineRun(_)));
        assert_eq!(scheduler.state(), SchedulerState::Failed);
        assert!(matches!(e.outcome(), Some(Outcome::Failed(_))));
    }
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod lifecycle {
    use super::*;

    #[test]
    fn idle_until_resumed() {
        let (engine, scheduler) = setup();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.now(), Instant::ZERO);

        scheduler.resume().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.resume().unwrap();
        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn engine_notifications_wake_an_idle_scheduler() {
        let (engine, scheduler) = setup();
        scheduler.schedule(secs(1), |_| Ok(())).unwrap();
        engine.advance_to(secs(1));
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(scheduler.now(), secs(1));
    }

    #[test]
    fn end_of_run_expires_outstanding() {
        let (engine, scheduler) = setup();
        let errors = scheduler.errors();
        let log = log();
        let far = scheduler.schedule(secs(100), record(&log, "far")).unwrap();

        engine.advance_to(secs(50));
        engine.end_run();

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(far.outcome(), Some(Outcome::Expired));
        assert_eq!(far.wait(), Outcome::Expired);
        assert!(errors.drain().is_empty());
        assert_eq!(scheduler.state(), SchedulerState::Completed);
        assert!(scheduler.pending_instants().is_empty());
    }

    #[test]
    fn resume_after_completion_is_an_error() {
        let (engine, scheduler) = setup();
        engine.end_run();
        assert_eq!(
            scheduler.resume().unwrap_err(),
            SchedulerError::Terminated(SchedulerState::Completed)
        );
    }

    #[test]
    fn end_of_run_is_delivered_once() {
        let (engine, scheduler) = setup();
        engine.end_run();
        engine.fail("late failure");
        assert_eq!(scheduler.state(), SchedulerState::Completed);
    }

    #[test]
    fn time_stream_publishes_distinct_instants() {
        let (engine, scheduler) = setup();
        let times = scheduler.time();
        for t in [5u64, 5, 8, 13] {
            scheduler.schedule(secs(t), |_| Ok(())).unwrap();
        }
        engine.advance_to(secs(8));
        assert_eq!(times.try_next(), Some(Ok(secs(5))));
        assert_eq!(times.try_next(), Some(Ok(secs(8))));
        assert_eq!(times.try_next(), None);

        engine.advance_to(secs(20));
        engine.end_run();
        let rest: Vec<_> = times.map(|t| t.unwrap()).collect();
        assert_eq!(rest, vec![secs(13)]);

        // Opened after completion: ends immediately.
        assert_eq!(scheduler.time().count(), 0);
    }

    #[test]
    fn dropping_scheduler_expires_pending() {
        let (engine, scheduler) = setup();
        let log = log();
        let e = scheduler.schedule(secs(1), record(&log, "orphan")).unwrap();
        drop(scheduler);

        assert!(!e.cancel());
        assert_eq!(e.outcome(), Some(Outcome::Expired));
        assert_eq!(e.wait(), Outcome::Expired);

        // The engine outlives the scheduler; its notifications are dropped.
        engine.advance_to(secs(1));
        assert!(log.lock().unwrap().is_empty());
    }
}

// ── Concurrency ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod concurrency {
    use std::thread;
    use std::time::Duration;

    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn concurrent_registration_coalesces() {
        let (engine, scheduler) = setup();
        let fired = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8u64)
            .map(|seed| {
                let (s, fired) = (scheduler.clone(), Arc::clone(&fired));
                thread::spawn(move || {
                    let mut rng = SmallRng::seed_from_u64(seed);
                    (0..100)
                        .map(|_| {
                            let fired = Arc::clone(&fired);
                            s.schedule(secs(rng.gen_range(1..=10)), move |_| {
                                fired.fetch_add(1, Ordering::SeqCst);
                                Ok(())
                            })
                            .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let expectations: Vec<_> =
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect();

        assert!(engine.request_count() <= 10);
        assert_eq!(engine.request_count(), scheduler.registry().pending_len());

        engine.advance_to(secs(10));
        assert_eq!(fired.load(Ordering::SeqCst), 800);
        assert!(expectations.iter().all(|e| e.outcome() == Some(Outcome::Fired(e.instant()))));
    }

    #[test]
    fn registration_races_with_advancing() {
        let (engine, scheduler) = setup();
        let fired = Arc::new(AtomicUsize::new(0));

        let advancer = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for t in 1..=100 {
                    engine.advance_to(secs(t));
                    thread::yield_now();
                }
            })
        };
        let registrants: Vec<_> = (0..4u64)
            .map(|seed| {
                let (s, fired) = (scheduler.clone(), Arc::clone(&fired));
                thread::spawn(move || {
                    let mut rng = SmallRng::seed_from_u64(seed);
                    let mut accepted = Vec::new();
                    for _ in 0..200 {
                        let at = s.now() + SimDuration::seconds(rng.gen_range(0..=20));
                        let fired = Arc::clone(&fired);
                        match s.schedule(at, move |_| {
                            fired.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }) {
                            Ok(e) => accepted.push(e),
                            Err(SchedulerError::PastInstant { .. }) => {}
                            Err(other) => panic!("unexpected {other:?}"),
                        }
                    }
                    accepted
                })
            })
            .collect();

        advancer.join().unwrap();
        let accepted: Vec<_> =
            registrants.into_iter().flat_map(|h| h.join().unwrap()).collect();
        engine.advance_to(secs(1_000));
        engine.end_run();

        assert_eq!(fired.load(Ordering::SeqCst), accepted.len());
        for e in &accepted {
            assert_eq!(e.outcome(), Some(Outcome::Fired(e.instant())));
        }
    }

    #[test]
    fn wait_unblocks_when_fired() {
        let (engine, scheduler) = setup();
        let e = scheduler.schedule(secs(3), |_| Ok(())).unwrap();
        let waiter = {
            let e = e.clone();
            thread::spawn(move || e.wait())
        };
        assert_eq!(e.wait_timeout(Duration::from_millis(10)), None);
        engine.advance_to(secs(3));
        assert_eq!(waiter.join().unwrap(), Outcome::Fired(secs(3)));
    }
}
