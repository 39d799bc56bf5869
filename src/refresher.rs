//! Background task that keeps the chain physically resident.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::chain::BlockChain;
use crate::error::{FillerError, Result};

/// Default cap on how long `stop` waits for the task to exit.
pub const DEFAULT_STOP_WAIT: Duration = Duration::from_secs(10);

// Handle to the live background task.
struct RefreshTask {
    token: CancellationToken,
    handle: JoinHandle<BlockChain>,
}

/// Periodically rewrites every element of the chain so the OS keeps its
/// pages backed by physical memory.
///
/// The chain moves into the background task on `start` and moves back
/// out through `stop`, so nothing else can touch it while the task is
/// writing, and it cannot be released while the task still runs.
pub struct Refresher {
    delay: Duration,
    stop_wait: Duration,
    task: Option<RefreshTask>,
}

impl Refresher {
    /// Create an idle refresher. `delay` is the pause between element
    /// writes; `stop_wait` caps how long `stop` blocks (default 10s).
    pub fn new(delay: Duration, stop_wait: Option<Duration>) -> Self {
        Self {
            delay,
            stop_wait: stop_wait.unwrap_or(DEFAULT_STOP_WAIT),
            task: None,
        }
    }

    /// Whether a background task currently owns a chain.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Take ownership of the chain and start rewriting it in the
    /// background. Fails if a task is already running.
    pub fn start(&mut self, chain: BlockChain) -> Result<()> {
        if self.task.is_some() {
            return Err(FillerError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(refresh_loop(chain, self.delay, token.clone()));
        self.task = Some(RefreshTask { token, handle });
        Ok(())
    }

    /// Signal the task to stop and wait for it to hand the chain back.
    ///
    /// Returns `None` when no task was running. Surfaces `StopTimeout`
    /// if the task does not exit within the stop wait; the chain then
    /// stays with the stuck task and must not be considered released.
    pub async fn stop(&mut self) -> Result<Option<BlockChain>> {
        let Some(RefreshTask { token, handle }) = self.task.take() else {
            return Ok(None);
        };

        token.cancel();
        match timeout(self.stop_wait, handle).await {
            Ok(Ok(chain)) => {
                debug!("Refresher stopped");
                Ok(Some(chain))
            }
            Ok(Err(err)) => Err(FillerError::RefresherPanic(err)),
            Err(_) => Err(FillerError::StopTimeout {
                waited: self.stop_wait,
            }),
        }
    }
}

/// Rewrite the whole chain with `value`, one element per step, pausing
/// `delay` between steps. The stop token is checked before every write
/// so a stop request is honored within about one step. Returns false
/// when the pass was interrupted by a stop request.
async fn refresh_pass(
    chain: &mut BlockChain,
    value: u64,
    delay: Duration,
    token: &CancellationToken,
) -> bool {
    for block in chain.blocks_mut() {
        block.begin_pass();
        while !block.pass_complete() {
            if token.is_cancelled() {
                return false;
            }
            block.write_next(value);
            sleep(delay).await;
        }
    }
    true
}

async fn refresh_loop(
    mut chain: BlockChain,
    delay: Duration,
    token: CancellationToken,
) -> BlockChain {
    loop {
        // One fresh value per pass, drawn from the full u64 range.
        let value = rand::random::<u64>();
        if !refresh_pass(&mut chain, value, delay, &token).await {
            debug!("Stop requested, refresher exiting");
            return chain;
        }
        trace!("Refresh pass complete with value {value:#018x}");
    }
}
