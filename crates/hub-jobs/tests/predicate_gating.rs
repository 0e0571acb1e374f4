//! Submitting an upload for source `x` while its dumper is still running
//! places the upload task in the pending queue; it dispatches within one
//! dispatcher tick of the dumper's completion.

use hub_jobs::{JobManager, PInfo, Predicate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_waits_for_dumper_then_runs() {
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

    let dumper_running = Arc::new(AtomicBool::new(true));
    let uploader_ran = Arc::new(AtomicBool::new(false));

    // Fake "dumper": stays running until we flip the flag.
    {
        let flag = dumper_running.clone();
        mgr.submit(
            PInfo::new("dumper", "x", "download"),
            move || {
                let flag = flag.clone();
                async move {
                    while flag.load(Ordering::SeqCst) {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    Ok(())
                }
            },
            None,
        );
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Submitting the upload while the dumper predicate fails leaves it
    // parked; nothing runs until the dumper finishes.
    {
        let ran = uploader_ran.clone();
        mgr.submit(
            PInfo::new("uploader", "x", "data").gated_by(Predicate::no_dumper_running("x")),
            move || {
                let ran = ran.clone();
                async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                }
            },
            None,
        );
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        !uploader_ran.load(Ordering::SeqCst),
        "uploader must not run while dumper predicate fails"
    );

    dumper_running.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        uploader_ran.load(Ordering::SeqCst),
        "uploader should dispatch once the dumper predicate passes"
    );

    let _ = stop_tx.send(());
    let _ = dispatcher.await;
}
