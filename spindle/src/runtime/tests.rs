use crate as spindle;
use crate::cancel::CancelToken;
use crate::runtime::{self, Builder};
use crate::scheduler;
use crate::task::Task;
use static_assertions::assert_impl_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;

assert_impl_all!(runtime::Handle: Send, Sync, Clone);
assert_impl_all!(scheduler::Handle: Send, Sync, Clone);

fn immediate(value: i32) -> Task<i32> {
    Task::new(async move { value })
}

fn delayed(value: i32, delay: Duration) -> Task<i32> {
    Task::new(async move {
        let timer = runtime::current().timer();
        timer
            .sleep_for(delay, CancelToken::default())
            .await
            .expect("sleep failed");
        value
    })
}

async fn compute() -> i32 {
    42
}

async fn add_one(value: i32) -> i32 {
    value + 1
}

#[test]
fn test_block_on_returns_the_root_value() {
    let rt = Builder::new().try_build().unwrap();
    assert_eq!(rt.block_on(async { 7 }), 7);
}

#[test]
fn test_run_drains_posted_jobs_on_stop() {
    let rt = Builder::new().try_build().unwrap();
    let (tx, rx) = mpsc::channel();

    std::thread::scope(|scope| {
        scope.spawn(|| rt.run());

        rt.handle().post(move || tx.send(1).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        rt.stop();
    });
}

#[spindle::test]
async fn test_sequential_chain() {
    assert_eq!(add_one(compute().await).await, 43);
}

#[spindle::test]
#[should_panic(expected = "boom")]
async fn test_task_panic_resumes_in_block_on() {
    let failing: Task<()> = Task::new(async { panic!("boom") });
    failing.await;
}

#[spindle::test]
async fn test_spawned_task_joins_with_its_value() {
    let handle = spindle::spawn(Task::new(async { 5 + 3 }));
    assert_eq!(handle.await.unwrap(), 8);
}

#[spindle::test]
async fn test_join_error_carries_the_panic_payload() {
    let handle = spindle::spawn(Task::<()>::new(async { panic!("kaboom") }));
    let err = handle.await.unwrap_err();

    assert!(err.to_string().contains("panicked"));
    let payload = err.into_panic();
    assert_eq!(payload.downcast_ref::<&str>().copied().unwrap(), "kaboom");
}

#[spindle::test]
async fn test_detached_task_still_runs() {
    let (tx, rx) = mpsc::channel();
    spindle::spawn_detached(Task::new(async move { tx.send("ran").unwrap() }));

    let timer = runtime::current().timer();
    timer
        .sleep_for(Duration::from_millis(20), CancelToken::default())
        .await
        .unwrap();

    assert_eq!(rx.try_recv().unwrap(), "ran");
}

#[spindle::test]
async fn test_schedule_runs_behind_the_existing_queue() {
    let sched = runtime::current().scheduler().clone();
    let marker = Arc::new(AtomicBool::new(false));

    let flag = marker.clone();
    sched.post(move || flag.store(true, Ordering::Release));
    sched.schedule().await;

    assert!(marker.load(Ordering::Acquire));
}

#[spindle::test]
async fn test_repeated_reschedule_neither_loses_nor_doubles_wakeups() {
    let sched = runtime::current().scheduler().clone();
    let mut laps = 0;
    for _ in 0..100 {
        sched.schedule().await;
        laps += 1;
    }
    assert_eq!(laps, 100);
}

#[spindle::test]
async fn test_blocking_work_runs_off_the_scheduler_thread() {
    let pool = runtime::current().pool();
    let scheduler_thread = std::thread::current().id();

    let worker_thread = pool
        .spawn_blocking(move || std::thread::current().id(), CancelToken::default())
        .await
        .unwrap();

    assert_ne!(worker_thread, scheduler_thread);
}

#[spindle::test]
async fn test_when_all_immediate() {
    let sched = runtime::current().scheduler().clone();
    let tup = spindle::when_all!(sched, immediate(10), immediate(20)).await;
    assert_eq!(tup, (10, 20));
}

#[spindle::test]
async fn test_when_all_is_positional_not_completion_ordered() {
    let sched = runtime::current().scheduler().clone();
    let tup = spindle::when_all!(
        sched,
        delayed(1, Duration::from_millis(50)),
        delayed(2, Duration::from_millis(10)),
        delayed(3, Duration::from_millis(30)),
    )
    .await;
    assert_eq!(tup, (1, 2, 3));
}

#[spindle::test]
async fn test_when_all_mixes_void_and_valued_children() {
    let sched = runtime::current().scheduler().clone();
    let unit: Task<()> = Task::new(async {});
    let ((), n) = spindle::when_all!(sched, unit, immediate(9)).await;
    assert_eq!(n, 9);
}

#[spindle::test]
#[should_panic(expected = "early boom")]
async fn test_when_all_rethrows_the_first_panic() {
    let sched = runtime::current().scheduler().clone();

    let early: Task<i32> = Task::new(async {
        let timer = runtime::current().timer();
        let _ = timer
            .sleep_for(Duration::from_millis(10), CancelToken::default())
            .await;
        panic!("early boom")
    });
    let late: Task<i32> = Task::new(async {
        let timer = runtime::current().timer();
        let _ = timer
            .sleep_for(Duration::from_millis(60), CancelToken::default())
            .await;
        panic!("late boom")
    });

    let _ = spindle::when_all!(sched, early, late).await;
}

#[spindle::test]
async fn test_when_any_picks_the_first_completer() {
    let sched = runtime::current().scheduler().clone();
    let (index, values) = spindle::when_any!(
        sched,
        delayed(111, Duration::from_millis(60)),
        delayed(222, Duration::from_millis(10)),
    )
    .await;

    assert_eq!(index, 1);
    assert_eq!(values.1, Some(222));
    assert_eq!(values.0, None);
}

#[spindle::test]
async fn test_when_any_immediate_beats_delayed() {
    let sched = runtime::current().scheduler().clone();
    let (index, values) = spindle::when_any!(
        sched,
        immediate(7),
        delayed(9, Duration::from_millis(30)),
    )
    .await;

    assert_eq!(index, 0);
    assert_eq!(values.0, Some(7));
}

#[spindle::test]
#[should_panic(expected = "winner blew up")]
async fn test_when_any_rethrows_the_winner_panic() {
    let sched = runtime::current().scheduler().clone();
    let loser = delayed(1, Duration::from_millis(80));
    let winner: Task<i32> = Task::new(async { panic!("winner blew up") });

    let _ = spindle::when_any!(sched, winner, loser).await;
}

#[spindle::test]
async fn test_timeout_through_the_runtime_timer() {
    let timer = runtime::current().timer();
    let slow = delayed(1, Duration::from_millis(300));

    let result = timer.timeout(Duration::from_millis(20), slow).await;
    assert_eq!(result.unwrap_err().kind(), crate::ErrorKind::Timeout);
}

#[test]
fn test_runtime_handle_is_available_inside_tasks_only() {
    assert!(runtime::try_current().is_none());

    let rt = Builder::new().try_build().unwrap();
    rt.block_on(async {
        assert!(runtime::try_current().is_some());
    });

    assert!(runtime::try_current().is_none());
}

#[test]
fn test_services_are_lazily_instantiated_and_shut_down() {
    let rt = Builder::new().worker_threads(1).try_build().unwrap();
    let pool = rt.pool();
    let timer = rt.timer();
    drop(rt);

    // After the runtime dropped, both services are stopped: the pool
    // rejects work and the timer accepts nothing new.
    let rejected =
        futures::executor::block_on(pool.spawn_blocking(|| 1, CancelToken::default()));
    assert_eq!(rejected.unwrap_err().kind(), crate::ErrorKind::Rejected);
    assert_eq!(timer.pending(), 0);
}
