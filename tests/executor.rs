#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use ctg::{
    config::Options,
    error::Error,
    signal::CancellationToken,
    task::{Context, TaskSet},
    telemetry::{Clock, OutcomeKind, TelemetryEntry, WaitInterval},
    types::{Outcome, TaskName},
};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};
use tokio::time::{Instant, sleep};

type Tasks = TaskSet<u32, &'static str>;
type Flow = TaskSet<u32, &'static str, &'static str>;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn near(actual: Duration, expected: Duration) -> bool {
    actual.abs_diff(expected) <= ms(1)
}

/// Telemetry timestamps on tokio's (pausable) clock.
struct TokioClock(Instant);

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.0.elapsed()
    }
}

#[tokio::test(start_paused = true)]
async fn dependent_task_sees_dependency_value() {
    let start = Instant::now();
    let resumed = Rc::new(Cell::new(None));
    let resumed_at = resumed.clone();
    let tasks = Tasks::new()
        .task("a", |_| async {
            sleep(ms(20)).await;
            Ok(1)
        })
        .task("b", move |cx| async move {
            let a = cx.get("a").await?;
            resumed_at.set(Some(start.elapsed()));
            Ok(a + 10)
        });

    let values = ctg::run(tasks, Options::default()).await.unwrap();
    let names: Vec<&str> = values.keys().map(TaskName::as_str).collect();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(values["a"], 1);
    assert_eq!(values["b"], 11);
    let resumed = resumed.get().expect("b resumed");
    assert!(resumed >= ms(20), "b resumed after {resumed:?}");
}

#[tokio::test(start_paused = true)]
async fn shared_dependency_runs_once() {
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let tasks = Tasks::new()
        .task("left", |cx| async move { Ok(cx.get("base").await? + 1) })
        .task("base", move |_| async move {
            counter.set(counter.get() + 1);
            sleep(ms(10)).await;
            Ok(5)
        })
        .task("right", |cx| async move {
            let first = cx.get("base").await?;
            let second = cx.get("base").await?;
            assert_eq!(first, second);
            Ok(first * 2)
        });

    let values = ctg::run(tasks, Options::default()).await.unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(values["base"], 5);
    assert_eq!(values["left"], 6);
    assert_eq!(values["right"], 10);
}

#[tokio::test(start_paused = true)]
async fn independent_tasks_overlap() {
    let mut tasks = Tasks::new();
    for name in ["a", "b", "c"] {
        tasks.insert(name, |_| async {
            sleep(ms(50)).await;
            Ok(0)
        });
    }

    let start = Instant::now();
    let values = ctg::run(tasks, Options::default()).await.unwrap();
    assert_eq!(values.len(), 3);
    assert!(start.elapsed() < ms(100), "took {:?}", start.elapsed());
}

#[tokio::test(start_paused = true)]
async fn first_failure_rejects_the_run() {
    let tasks = Tasks::new()
        .task("slow", |_| async {
            sleep(ms(30)).await;
            Err(Error::Task("second"))
        })
        .task("fast", |_| async {
            sleep(ms(10)).await;
            Err(Error::Task("first"))
        })
        .task("fine", |_| async { Ok(3) });

    let error = ctg::run(tasks, Options::default()).await.unwrap_err();
    assert_eq!(error, Error::Task("first"));
    assert_eq!(error.as_task(), Some(&"first"));
}

#[tokio::test(start_paused = true)]
async fn failure_cancels_siblings_with_its_error() {
    let observed = Rc::new(RefCell::new(None));
    let seen = observed.clone();
    let tasks = Tasks::new()
        .task("a", |_| async {
            sleep(ms(10)).await;
            Err(Error::Task("boom"))
        })
        .task("b", move |cx| async move {
            cx.signal().cancelled().await;
            *seen.borrow_mut() = cx.signal().reason();
            Err(Error::Task("aborted"))
        });

    let error = ctg::run(tasks, Options::default()).await.unwrap_err();
    assert_eq!(error, Error::Task("boom"));
    assert_eq!(*observed.borrow(), Some(Error::Task("boom")));
}

#[tokio::test(start_paused = true)]
async fn settle_all_reports_every_outcome_without_cancelling() {
    let tasks = Tasks::new()
        .task("a", |_| async {
            sleep(ms(10)).await;
            Err(Error::Task("boom"))
        })
        .task("b", |cx| async move {
            sleep(ms(30)).await;
            Ok(if cx.signal().is_cancelled() { 0 } else { 2 })
        })
        .task("c", |cx| async move { cx.get("a").await });

    let outcomes = ctg::run_settled(tasks, Options::default()).await;
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes["a"], Outcome::Rejected(Error::Task("boom")));
    assert_eq!(outcomes["b"], Outcome::Fulfilled(2));
    assert_eq!(outcomes["c"], Outcome::Rejected(Error::Task("boom")));
    assert!(outcomes["b"].is_fulfilled());
    assert!(outcomes["c"].is_rejected());
}

#[tokio::test(start_paused = true)]
async fn unknown_dependency_rejects_only_the_requester() {
    let build = || {
        Tasks::new()
            .task("lonely", |cx| async move { cx.get("missing").await })
            .task("fine", |_| async { Ok(1) })
    };

    let outcomes = ctg::run_settled(build(), Options::default()).await;
    assert_eq!(
        outcomes["lonely"],
        Outcome::Rejected(Error::UnknownTask("missing".into()))
    );
    assert_eq!(outcomes["fine"], Outcome::Fulfilled(1));

    let error = ctg::run(build(), Options::default()).await.unwrap_err();
    assert_eq!(error, Error::UnknownTask("missing".into()));
}

#[tokio::test(start_paused = true)]
async fn empty_task_set_resolves_immediately() {
    assert!(ctg::run(Tasks::new(), Options::default()).await.unwrap().is_empty());
    assert!(ctg::run_settled(Tasks::new(), Options::default()).await.is_empty());
    assert_eq!(ctg::run_flow(Flow::new(), Options::default()).await, Ok(None));
}

#[tokio::test(start_paused = true)]
async fn declared_task_is_not_callable() {
    let mut tasks = Tasks::new();
    tasks
        .declare("later")
        .insert("user", |cx| async move { cx.get("later").await });

    let outcomes = ctg::run_settled(tasks, Options::default()).await;
    let expected = Outcome::Rejected(Error::NotCallable("later".into()));
    assert_eq!(outcomes["later"], expected);
    assert_eq!(outcomes["user"], expected);
}

#[tokio::test(start_paused = true)]
async fn self_lookup_is_a_cycle() {
    let tasks = Tasks::new().task("selfish", |cx| async move { cx.get("selfish").await });

    let error = ctg::run(tasks, Options::default()).await.unwrap_err();
    assert_eq!(
        error,
        Error::Cycle {
            task: "selfish".into(),
            dependency: "selfish".into(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn mutual_lookup_fails_instead_of_hanging() {
    let tasks = Tasks::new()
        .task("a", |cx| async move { cx.get("b").await.map(|value| value + 1) })
        .task("b", |cx| async move { cx.get("a").await.map(|value| value + 1) });

    let outcomes = ctg::run_settled(tasks, Options::default()).await;
    // `a` waits first, so `b` is the one closing the cycle.
    let cycle = Error::Cycle {
        task: "b".into(),
        dependency: "a".into(),
    };
    assert_eq!(outcomes["a"], Outcome::Rejected(cycle.clone()));
    assert_eq!(outcomes["b"], Outcome::Rejected(cycle));
}

#[tokio::test(start_paused = true)]
async fn first_end_decides_the_flow() {
    let pending = Rc::new(RefCell::new(None));
    let late = Rc::new(RefCell::new(None));
    let (pending_slot, late_slot) = (pending.clone(), late.clone());
    let tasks = Flow::new()
        .task("slow", |cx| async move {
            sleep(ms(50)).await;
            cx.end("slow")
        })
        .task("fast", |cx| async move {
            sleep(ms(10)).await;
            cx.end("fast")
        })
        .task("waiter", move |cx| async move {
            let result = cx.get("slow").await;
            *pending_slot.borrow_mut() = Some(result.clone());
            result
        })
        .task("latecomer", move |cx| async move {
            sleep(ms(20)).await;
            let result = cx.get("fast").await;
            *late_slot.borrow_mut() = Some(result.clone());
            result
        });

    assert_eq!(ctg::run_flow(tasks, Options::default()).await, Ok(Some("fast")));
    for slot in [&pending, &late] {
        let result = slot.borrow().clone().expect("lookup finished");
        assert!(
            matches!(&result, Err(Error::Flow(signal)) if signal.is_already_ended()),
            "{result:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn ending_task_stops_at_next_suspension() {
    let resumed = Rc::new(Cell::new(false));
    let flag = resumed.clone();
    let tasks = Flow::new().task("quitter", move |cx| async move {
        let _ = cx.end::<()>("quit");
        sleep(ms(5)).await;
        flag.set(true);
        Ok(0)
    });

    assert_eq!(ctg::run_flow(tasks, Options::default()).await, Ok(Some("quit")));
    assert!(!resumed.get());
}

#[tokio::test(start_paused = true)]
async fn flow_without_end_resolves_to_none() {
    let tasks = Flow::new()
        .task("a", |_| async { Ok(1) })
        .task("b", |cx| async move { cx.get("a").await });

    assert_eq!(ctg::run_flow(tasks, Options::default()).await, Ok(None));
}

#[tokio::test(start_paused = true)]
async fn genuine_error_outranks_flow_end() {
    let tasks = Flow::new()
        .task("broken", |_| async { Err(Error::Task("broken")) })
        .task("ender", |cx| async move {
            sleep(ms(10)).await;
            cx.end("done")
        });

    assert_eq!(
        ctg::run_flow(tasks, Options::default()).await,
        Err(Error::Task("broken"))
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_external_signal_reaches_tasks() {
    let signal = CancellationToken::new();
    signal.cancel(Error::Task("stop"));
    let tasks = Tasks::new().task("watch", |cx| async move {
        match cx.signal().reason() {
            Some(reason) => Err(reason),
            None => Ok(1),
        }
    });

    let options = Options::default().signal(signal);
    let error = ctg::run(tasks, options).await.unwrap_err();
    assert_eq!(error, Error::Task("stop"));
}

#[tokio::test(start_paused = true)]
async fn external_signal_is_forwarded_while_running() {
    let signal = CancellationToken::new();
    let trigger = signal.clone();
    let tasks = Tasks::new()
        .task("watch", |cx| async move {
            cx.signal().cancelled().await;
            Err(cx.signal().reason().unwrap_or(Error::Task("no reason")))
        })
        .task("trigger", move |_| async move {
            sleep(ms(10)).await;
            trigger.cancel(Error::Task("stop"));
            Ok(2)
        });

    let outcomes = ctg::run_settled(tasks, Options::default().signal(signal)).await;
    assert_eq!(outcomes["watch"], Outcome::Rejected(Error::Task("stop")));
    assert_eq!(outcomes["trigger"], Outcome::Fulfilled(2));
}

#[tokio::test(start_paused = true)]
async fn task_failure_leaves_external_signal_alone() {
    let signal = CancellationToken::new();
    let tasks = Tasks::new().task("a", |_| async { Err(Error::Task("boom")) });

    let error = ctg::run(tasks, Options::default().signal(signal.clone()))
        .await
        .unwrap_err();
    assert_eq!(error, Error::Task("boom"));
    assert!(!signal.is_cancelled());
    assert!(signal.cancel(Error::Task("later")));
}

#[tokio::test(start_paused = true)]
async fn debug_mode_hands_telemetry_to_the_sink() {
    let captured = Rc::new(RefCell::new(Vec::new()));
    let sink = {
        let captured = captured.clone();
        move |entries: &[TelemetryEntry]| *captured.borrow_mut() = entries.to_vec()
    };
    let options = Options::default()
        .debug(true)
        .clock(TokioClock(Instant::now()))
        .sink(sink);
    let tasks = Tasks::new()
        .task("a", |_| async {
            sleep(ms(100)).await;
            Ok(1)
        })
        .task("b", |cx| async move {
            sleep(ms(50)).await;
            Ok(cx.get("a").await? + cx.get("a").await?)
        });

    let values = ctg::run(tasks, options).await.unwrap();
    assert_eq!(values["b"], 2);

    let entries = captured.borrow();
    assert_eq!(entries.len(), 2);
    let (a, b) = (&entries[0], &entries[1]);

    assert_eq!(a.name.as_str(), "a");
    assert!(near(a.start, Duration::ZERO));
    assert!(near(a.duration(), ms(100)));
    assert_eq!(a.outcome, Some(OutcomeKind::Fulfilled));
    assert!(a.dependencies.is_empty());
    assert!(a.waits.is_empty());

    let dependencies: Vec<&str> = b.dependencies.iter().map(TaskName::as_str).collect();
    assert_eq!(dependencies, ["a"]);
    assert_eq!(b.outcome, Some(OutcomeKind::Fulfilled));
    let [WaitInterval { start, end }] = b.waits[..] else {
        panic!("expected a single wait, got {:?}", b.waits);
    };
    assert!(near(start, ms(50)));
    assert!(near(end, ms(100)));
    assert!(near(b.waited(), ms(50)));
}

#[tokio::test(start_paused = true)]
async fn telemetry_marks_flow_stopped_tasks_aborted() {
    let captured = Rc::new(RefCell::new(Vec::new()));
    let sink = {
        let captured = captured.clone();
        move |entries: &[TelemetryEntry]| *captured.borrow_mut() = entries.to_vec()
    };
    let options = Options::default()
        .debug(true)
        .clock(TokioClock(Instant::now()))
        .sink(sink);
    let tasks = Flow::new()
        .task("ender", |cx| async move {
            sleep(ms(10)).await;
            cx.end("done")
        })
        .task("broken", |_| async { Err(Error::Task("ignored")) })
        .task("plain", |_| async { Ok(1) });

    let result = ctg::run_flow(tasks, options).await;
    assert_eq!(result, Err(Error::Task("ignored")));

    let outcomes: Vec<_> = captured
        .borrow()
        .iter()
        .map(|entry| entry.outcome)
        .collect();
    assert_eq!(
        outcomes,
        [
            Some(OutcomeKind::Aborted),
            Some(OutcomeKind::Rejected),
            Some(OutcomeKind::Fulfilled),
        ]
    );
}

fn quiet_debug<E>() -> Options<E> {
    Options::default()
        .debug(true)
        .clock(TokioClock(Instant::now()))
        .sink(|_: &[TelemetryEntry]| {})
}

fn is_already_ended<T>(result: &Result<T, Error<&'static str>>) -> bool {
    matches!(result, Err(Error::Flow(signal)) if signal.is_already_ended())
}

#[tokio::test(start_paused = true)]
async fn lookups_kept_past_the_run_stay_usable() {
    let kept = Rc::new(RefCell::new(Vec::new()));
    let slot = kept.clone();
    let tasks = Tasks::new()
        .task("a", move |cx| async move {
            for _ in 0..2 {
                let mut lookup = cx.get("b");
                assert!(futures::poll!(&mut lookup).is_pending());
                slot.borrow_mut().push(lookup);
            }
            Ok(1)
        })
        .task("b", |_| async {
            sleep(ms(10)).await;
            Ok(2)
        });

    let values = ctg::run(tasks, quiet_debug()).await.unwrap();
    assert_eq!(values["b"], 2);

    let mut kept = kept.take();
    let dropped = kept.pop().expect("second lookup");
    let awaited = kept.pop().expect("first lookup");
    drop(dropped);
    assert_eq!(awaited.await, Ok(2));
}

#[tokio::test(start_paused = true)]
async fn context_kept_past_the_run_reports_ended() {
    let kept: Rc<RefCell<Option<Context<u32, &'static str, &'static str>>>> =
        Rc::new(RefCell::new(None));
    let slot = kept.clone();
    let tasks = Flow::new()
        .task("a", move |cx| async move {
            *slot.borrow_mut() = Some(cx.clone());
            Ok(1)
        })
        .task("b", |cx| async move { cx.get("a").await });

    assert_eq!(ctg::run_flow(tasks, quiet_debug()).await, Ok(None));

    let cx = kept.take().expect("context kept");
    assert_eq!(cx.name().as_str(), "a");
    assert!(is_already_ended(&cx.get("a").await));
    assert!(is_already_ended(&cx.get("b").await));
    assert_eq!(
        cx.get("missing").await,
        Err(Error::UnknownTask("missing".into()))
    );
    assert!(cx.end::<()>("late").is_err_and(|error| error.is_flow_signal()));
}
