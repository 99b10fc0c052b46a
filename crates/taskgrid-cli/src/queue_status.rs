use anyhow::Result;
use std::time::Duration;

use taskgrid_core::config::OrchestratorConfig;
use taskgrid_core::queue::TaskQueue;

/// Builds a fresh queue sized per config, runs a trivial self-test task
/// through it, and reports its capacity. There is no cross-process queue to
/// inspect (spec out-of-scope: durable scheduling across restarts), so this
/// is a local sizing/self-test check rather than a live inspection of a
/// running `serve` instance.
pub async fn run(config: OrchestratorConfig) -> Result<()> {
    let (queue, worker) = TaskQueue::new(config.concurrency.queue_depth);
    let worker_handle = tokio::spawn(worker.run());

    println!("configured capacity: {}", queue.capacity());
    println!("available before self-test: {}", queue.available_capacity());

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    queue.enqueue(Box::new(move |_token| {
        Box::pin(async move {
            let _ = done_tx.send(());
        })
    }))?;
    tokio::time::timeout(Duration::from_secs(5), done_rx).await??;

    println!("self-test: dispatched and drained one task successfully");

    queue.shutdown();
    worker_handle.await?;
    Ok(())
}
