use hub_jobs::{CronSchedule, JobManager, PInfo};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recurring_submission_reruns_the_task_on_each_tick() {
    let mgr = JobManager::new(4, 4);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
    let dispatcher = {
        let mgr = mgr.clone();
        tokio::spawn(async move {
            mgr.run(Box::pin(async {
                let _ = stop_rx.await;
            }))
            .await;
        })
    };

    let runs = Arc::new(AtomicUsize::new(0));
    let schedule = CronSchedule::parse("* * * * * *").unwrap();

    {
        let runs = runs.clone();
        mgr.submit(
            PInfo::new("poller", "x", "poll"),
            move || {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            Some(schedule),
        );
    }

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(
        runs.load(Ordering::SeqCst) >= 2,
        "expected the recurring task to run more than once, ran {} times",
        runs.load(Ordering::SeqCst)
    );

    let _ = stop_tx.send(());
    let _ = dispatcher.await;
}
