//! Scheduler firing order and timing, on a paused clock.

mod common;

use std::time::Duration;

use common::Recorder;
use weir::{FaultPolicy, Scheduler, SchedulerConfig, SchedulerError};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn scheduler() -> Scheduler {
    Scheduler::new(SchedulerConfig::default()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_offsets_fire_in_due_order() {
    let scheduler = scheduler();
    let fired = Recorder::new();

    let log = fired.clone();
    let handle = scheduler
        .schedule(move |tick| log.push(tick.offset), [ms(30), ms(10), ms(20)])
        .unwrap();
    assert_eq!(handle.remaining(), 3);
    scheduler.start();

    common::within(scheduler.drained()).await.unwrap();
    assert_eq!(fired.events(), vec![ms(10), ms(20), ms(30)]);
    assert_eq!(handle.remaining(), 0);
    assert!(!scheduler.is_armed());
}

#[tokio::test(start_paused = true)]
async fn test_batches_merge_with_earlier_batch_first_on_ties() {
    let scheduler = scheduler();
    let fired = Recorder::new();

    let log = fired.clone();
    scheduler
        .schedule(move |tick| log.push(format!("a{}", tick.due.as_millis())), [ms(10), ms(400)])
        .unwrap();
    let log = fired.clone();
    scheduler
        .schedule(move |tick| log.push(format!("b{}", tick.due.as_millis())), [ms(200), ms(400)])
        .unwrap();
    assert_eq!(scheduler.len(), 4);
    scheduler.start();

    common::within(scheduler.drained()).await.unwrap();
    assert_eq!(fired.events(), vec!["a10", "b200", "a400", "b400"]);
}

#[tokio::test(start_paused = true)]
async fn test_fires_no_earlier_than_due() {
    let scheduler = scheduler();
    let fired = Recorder::new();

    let log = fired.clone();
    let clock = scheduler.downgrade();
    scheduler
        .schedule(
            move |tick| log.push((tick.due, clock.upgrade().unwrap().elapsed())),
            [ms(5), ms(50), ms(250)],
        )
        .unwrap();
    scheduler.start();

    common::within(scheduler.drained()).await.unwrap();
    let events = fired.events();
    assert_eq!(events.len(), 3);
    for (due, elapsed) in events {
        assert!(elapsed >= due, "fired at {elapsed:?}, due {due:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_timer_rearmed_before_callback_runs() {
    let scheduler = scheduler();
    let seen = Recorder::new();

    let log = seen.clone();
    let clock = scheduler.downgrade();
    scheduler
        .schedule(
            move |tick| {
                let clock = clock.upgrade().unwrap();
                log.push((tick.due, clock.next_due(), clock.len()));
            },
            [ms(10), ms(30)],
        )
        .unwrap();
    scheduler.start();
    common::within(scheduler.drained()).await.unwrap();

    let origin = scheduler.starting_time();
    assert_eq!(
        seen.events(),
        vec![(ms(10), Some(origin + ms(30)), 1), (ms(30), None, 0)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reentrant_schedule_from_callback() {
    let scheduler = scheduler();
    let fired = Recorder::new();

    let log = fired.clone();
    let again = scheduler.downgrade();
    scheduler
        .schedule(
            move |tick| {
                log.push(format!("outer{}", tick.due.as_millis()));
                if tick.remaining == 0 {
                    let inner_log = log.clone();
                    again
                        .upgrade()
                        .unwrap()
                        .schedule(
                            move |tick| inner_log.push(format!("inner{}", tick.offset.as_millis())),
                            [ms(15)],
                        )
                        .unwrap();
                }
            },
            [ms(10), ms(20)],
        )
        .unwrap();
    scheduler.start();

    common::within(scheduler.drained()).await.unwrap();
    assert_eq!(fired.events(), vec!["outer10", "outer20", "inner15"]);
}

#[tokio::test(start_paused = true)]
async fn test_zero_offset_from_callback_is_not_reentrant() {
    let scheduler = scheduler();
    let fired = Recorder::new();

    let log = fired.clone();
    let again = scheduler.downgrade();
    scheduler
        .schedule(
            move |_| {
                log.push("outer:start");
                let inner_log = log.clone();
                again
                    .upgrade()
                    .unwrap()
                    .schedule(move |_| inner_log.push("inner"), [Duration::ZERO])
                    .unwrap();
                log.push("outer:end");
            },
            [ms(10)],
        )
        .unwrap();
    scheduler.start();

    common::within(scheduler.drained()).await.unwrap();
    assert_eq!(fired.events(), vec!["outer:start", "outer:end", "inner"]);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_after_start_arms_timer() {
    let scheduler = scheduler();
    scheduler.start();
    assert!(!scheduler.is_armed());

    let handle = scheduler.schedule(|_| {}, [ms(25)]).unwrap();
    assert!(scheduler.is_armed());
    common::within(handle.finished()).await;
    common::within(scheduler.drained()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_overflowing_offset_leaves_scheduler_usable() {
    let scheduler = scheduler();
    scheduler.start();

    let err = scheduler.schedule(|_| {}, [Duration::MAX]).unwrap_err();
    assert_eq!(err, SchedulerError::OffsetOverflow { offset: Duration::MAX });
    assert!(scheduler.is_empty());
    assert!(!scheduler.is_armed());

    let fired = Recorder::new();
    let log = fired.clone();
    scheduler.schedule(move |tick| log.push(tick.offset), [ms(15)]).unwrap();
    common::within(scheduler.drained()).await.unwrap();
    assert_eq!(fired.events(), vec![ms(15)]);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_callback_continues_by_default() {
    common::init();
    let scheduler = scheduler();
    let fired = Recorder::new();

    scheduler.schedule(|_| panic!("first callback failed"), [ms(10)]).unwrap();
    let log = fired.clone();
    scheduler.schedule(move |tick| log.push(tick.offset), [ms(20)]).unwrap();
    scheduler.start();

    common::within(scheduler.drained()).await.unwrap();
    assert_eq!(fired.events(), vec![ms(20)]);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_callback_stops_under_stop_policy() {
    common::init();
    let scheduler = Scheduler::new(SchedulerConfig {
        fault_policy: FaultPolicy::Stop,
    })
    .unwrap();
    let fired = Recorder::new();

    scheduler.schedule(|_| panic!("first callback failed"), [ms(10)]).unwrap();
    let log = fired.clone();
    scheduler.schedule(move |tick| log.push(tick.offset), [ms(20)]).unwrap();
    scheduler.start();

    let err = common::within(scheduler.drained()).await.unwrap_err();
    assert_eq!(
        err,
        SchedulerError::CallbackPanicked {
            message: "first callback failed".into()
        }
    );
    assert!(!scheduler.is_armed());
    assert_eq!(scheduler.len(), 1);

    tokio::time::sleep(ms(100)).await;
    assert!(fired.events().is_empty());
}
