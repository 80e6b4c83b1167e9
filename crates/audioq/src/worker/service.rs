use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

use anyhow::anyhow;
use tokio::sync::Notify;

use crate::common::rpc::{initiate_request, make_rpc_queue, ResponseToken, RpcReceiver, RpcSender};
use crate::store::JobItemStore;
use crate::worker::WorkerPool;

#[derive(Debug)]
pub enum WorkerMessage {
    /// New markers were written, idle workers should look for them.
    Wake,
    /// Run a reconciliation pass now and respond with the number of changed items.
    Reconcile(ResponseToken<usize>),
    Stop,
}

/// Handle of a running worker pool.
pub struct WorkerService {
    sender: RpcSender<WorkerMessage>,
}

impl WorkerService {
    pub fn wake(&self) {
        self.send(WorkerMessage::Wake);
    }

    pub fn reconcile(&self) -> impl Future<Output = anyhow::Result<usize>> {
        let fut = initiate_request(|token| self.sender.send(WorkerMessage::Reconcile(token)));
        async move {
            fut.await
                .map_err(|_| anyhow!("Worker service has already stopped"))
        }
    }

    pub fn stop(&self) {
        self.send(WorkerMessage::Stop);
    }

    fn send(&self, message: WorkerMessage) {
        let _ = self.sender.send(message);
    }
}

/// Main loop of a long running worker pool. Workers process markers until the service is
/// stopped (or every [`WorkerService`] handle is dropped) and reconciliation runs every
/// `reconcile_interval`.
pub async fn worker_process<S: JobItemStore>(
    pool: Rc<WorkerPool<S>>,
    mut receiver: RpcReceiver<WorkerMessage>,
) {
    let wakeup = Notify::new();
    let stop = Cell::new(false);

    let workers = futures::future::join_all(
        (0..pool.config.pool_size.max(1)).map(|index| pool.worker_loop(index, &wakeup, &stop)),
    );
    let control = async {
        let mut reconcile_interval = tokio::time::interval(pool.config.reconcile_interval);
        loop {
            tokio::select! {
                _ = reconcile_interval.tick() => {
                    if pool.reconcile().await > 0 {
                        wakeup.notify_waiters();
                    }
                }
                message = receiver.recv() => match message {
                    Some(WorkerMessage::Wake) => wakeup.notify_waiters(),
                    Some(WorkerMessage::Reconcile(response)) => {
                        response.respond(pool.reconcile().await);
                    }
                    Some(WorkerMessage::Stop) | None => break,
                }
            }
        }
        log::debug!("Stopping workers");
        stop.set(true);
        wakeup.notify_waiters();
    };
    futures::future::join(workers, control).await;
}

pub fn create_worker_service<S: JobItemStore + 'static>(
    pool: Rc<WorkerPool<S>>,
) -> (WorkerService, impl Future<Output = ()>) {
    let (tx, rx) = make_rpc_queue();
    let process = worker_process(pool, rx);
    (WorkerService { sender: tx }, process)
}
