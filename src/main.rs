use std::sync::Arc;

use colored::Colorize;
use jamroom_collab::Collab;
use jamroom_core::BlobStore;
use jamroom_impls::{FileBlobStore, LogBroadcaster, MemoryBlobStore, YtDlpResolver};
use log::{error, info};
use thiserror::Error;
use tokio::runtime::{self, Runtime};

use crate::config::HostConfig;

mod config;
mod logging;

/// Runs the session engine until interrupted.
pub struct Jamroom {
    config: HostConfig,
    runtime: Runtime,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Could not build the async runtime: {0}")]
    Runtime(std::io::Error),

    #[error("Could not listen for the shutdown signal: {0}")]
    Signal(std::io::Error),
}

impl Jamroom {
    fn new(config: HostConfig) -> Result<Self, HostError> {
        info!("Building async runtime...");
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("jamroom-async")
            .build()
            .map_err(HostError::Runtime)?;

        Ok(Self { config, runtime })
    }

    fn run(&self) -> Result<(), HostError> {
        let config = self.config.clone();
        let resolver = YtDlpResolver::new();

        self.runtime.block_on(async move {
            match config.media_dir.clone() {
                Some(dir) => {
                    info!("Storing media in {}", dir.display());
                    let store = FileBlobStore::new(dir, &config.public_url);
                    serve(&config, resolver, store).await
                }
                None => {
                    info!("No media directory set, keeping media in memory");
                    let store = MemoryBlobStore::new(&config.public_url);
                    serve(&config, resolver, store).await
                }
            }
        })
    }
}

async fn serve<S>(config: &HostConfig, resolver: YtDlpResolver, store: S) -> Result<(), HostError>
where
    S: BlobStore,
{
    let collab = Collab::new(config.engine.clone(), resolver, store);

    collab.janitor.on_deletion(|room| {
        info!(
            "Room {} closed with {} tracks queued",
            room.code,
            room.playback.queue().len()
        );
    });

    collab.broadcast_to(Arc::new(LogBroadcaster));

    info!("Ready. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await.map_err(HostError::Signal)?;

    let stats = collab.rooms.room_stats();
    info!(
        "Shutting down with {} rooms and {} members",
        stats.total_rooms, stats.total_members
    );

    collab.shutdown();
    Ok(())
}

impl HostError {
    fn hint(&self) -> String {
        match self {
            HostError::InvalidEnv { name, .. } => format!("Check the value of {} in your environment, or unset it to use the default.", name),
            HostError::Runtime(_) => "The operating system refused to start the worker threads. Check the process limits and try again.".to_string(),
            HostError::Signal(_) => "This error is fatal, and should not happen.".to_string(),
        }
    }
}

fn main() {
    let result = HostConfig::from_env().and_then(|config| {
        logging::init_logger(config.verbose);
        Jamroom::new(config)
    });

    let result = result.and_then(|jamroom| {
        info!("Initialized successfully.");
        jamroom.run()
    });

    if let Err(error) = result {
        // The logger is not set up yet if the config failed to load
        if matches!(error, HostError::InvalidEnv { .. }) {
            logging::init_logger(false);
        }

        error!("{} Read the error below to troubleshoot the issue.", "Jamroom stopped!".bold().red());
        error!("{}", error);
        error!("{}", format!("Hint: {}", error.hint()).dimmed().italic());
    }
}
