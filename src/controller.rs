//! Lifecycle orchestration: build the chain, fill it, keep it resident,
//! release it on request.

use std::future::Future;
use std::io;
use std::time::Duration;

use sysinfo::System;
use tracing::{info, warn};

use crate::chain::{BlockChain, ELEMENT_WIDTH};
use crate::error::{FillerError, Result};
use crate::refresher::Refresher;

/// Runtime configuration for one fill session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of blocks to allocate.
    pub units: u64,
    /// Size of a single block in bytes.
    pub block_bytes: u64,
    /// Keep the memory resident from a background task.
    pub refresh: bool,
    /// Pause between element writes while refreshing.
    pub delay: Duration,
}

impl Config {
    /// Reject configurations that could never allocate correctly,
    /// before anything is allocated.
    pub fn validate(&self) -> Result<()> {
        if self.units == 0 {
            return Err(FillerError::Config(
                "size must be a positive number of blocks".into(),
            ));
        }
        if self.block_bytes < ELEMENT_WIDTH as u64 {
            return Err(FillerError::Config(format!(
                "block size must be at least {ELEMENT_WIDTH} bytes"
            )));
        }
        if usize::try_from(self.block_bytes).is_err() {
            return Err(FillerError::Config(
                "block size exceeds this platform's address width".into(),
            ));
        }
        if self.units.checked_mul(self.block_bytes).is_none() {
            return Err(FillerError::Config(
                "total size overflows a 64-bit byte count".into(),
            ));
        }
        Ok(())
    }

    // Only meaningful after validate.
    fn total_bytes(&self) -> u64 {
        self.units * self.block_bytes
    }
}

/// Run one complete fill session: validate → allocate → fill →
/// refresh until `release` resolves → stop the refresher → free.
///
/// `release` is supplied by the caller, so the core stays agnostic of
/// what the trigger is (a keypress, a signal, a test fixture).
pub async fn run<F>(config: Config, release: F) -> Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    config.validate()?;
    report_system_memory(config.total_bytes());

    info!(
        "Allocating {} blocks of {} bytes ({:.1} GiB total)",
        config.units,
        config.block_bytes,
        gib(config.total_bytes())
    );
    let mut chain = BlockChain::build(config.units, config.block_bytes)?;

    info!("Filling up blocks");
    chain.fill_once(rand::random::<u64>());
    info!("Memory filled and resident");

    let mut refresher = Refresher::new(config.delay, None);
    let parked = if config.refresh {
        refresher.start(chain)?;
        info!(
            "Residency refresher started, {}ms between writes",
            config.delay.as_millis()
        );
        None
    } else {
        Some(chain)
    };

    let trigger = release.await;

    // The refresher must be fully stopped before the chain is released,
    // even when the trigger itself failed.
    let chain = match parked {
        Some(chain) => Some(chain),
        None => {
            info!("Waiting for refresher to stop");
            refresher.stop().await?
        }
    };
    trigger?;

    if let Some(chain) = chain {
        info!("Releasing {:.1} GiB of memory", gib(chain.total_bytes()));
        drop(chain);
    }
    info!("Done");
    Ok(())
}

fn report_system_memory(requested: u64) {
    let mut system = System::new();
    system.refresh_memory();
    info!(
        "System memory: {:.1} GiB available of {:.1} GiB total",
        gib(system.available_memory()),
        gib(system.total_memory())
    );
    if requested > system.available_memory() {
        warn!(
            "Requested {:.1} GiB exceeds available memory, the system may swap heavily",
            gib(requested)
        );
    }
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1u64 << 30) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> Config {
        Config {
            units: 2,
            block_bytes: 1024,
            refresh: false,
            delay: Duration::from_millis(1),
        }
    }

    fn ready_release() -> impl Future<Output = io::Result<()>> {
        std::future::ready(Ok(()))
    }

    #[test]
    fn validate_rejects_zero_units() {
        let config = Config {
            units: 0,
            ..small_config()
        };
        assert!(matches!(
            config.validate(),
            Err(FillerError::Config(_))
        ));
    }

    #[test]
    fn validate_rejects_undersized_blocks() {
        let config = Config {
            block_bytes: ELEMENT_WIDTH as u64 - 1,
            ..small_config()
        };
        assert!(matches!(
            config.validate(),
            Err(FillerError::Config(_))
        ));
    }

    #[test]
    fn validate_rejects_a_total_that_overflows() {
        let config = Config {
            units: u64::MAX,
            block_bytes: 16,
            ..small_config()
        };
        assert!(matches!(
            config.validate(),
            Err(FillerError::Config(_))
        ));
    }

    #[test]
    fn validate_accepts_a_sane_config() {
        assert!(small_config().validate().is_ok());
    }

    #[tokio::test]
    async fn runs_to_completion_without_refresh() {
        run(small_config(), ready_release()).await.unwrap();
    }

    #[tokio::test]
    async fn runs_to_completion_with_refresh() {
        let config = Config {
            refresh: true,
            ..small_config()
        };
        let release = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        };
        run(config, release).await.unwrap();
    }

    #[tokio::test]
    async fn config_errors_surface_before_allocation() {
        let config = Config {
            units: 0,
            ..small_config()
        };
        let err = run(config, ready_release()).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn a_failed_trigger_still_stops_the_refresher() {
        let config = Config {
            refresh: true,
            ..small_config()
        };
        let release = async { Err(io::Error::other("stdin went away")) };
        let err = run(config, release).await.unwrap_err();
        assert!(matches!(err, FillerError::Io(_)));
    }
}
