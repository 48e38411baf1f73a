//! Port listener daemon
//!
//! Connects to one TCP serial bridge and writes batched bytes under the
//! configured data directory until Ctrl+C.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | PORT_LISTENER_CONFIG | unset | TOML config path (argv[1] wins) |
//! | PORT_LISTENER_SOURCE | port_listener | Source name |
//! | PORT_LISTENER_HOST | 127.0.0.1 | Bridge host |
//! | PORT_LISTENER_PORT | 5000 | Bridge port |
//! | PORT_LISTENER_BATCH_SIZE | 1024 | Bytes per batch |
//! | PORT_LISTENER_BATCHES_PER_FLUSH | 10 | Batches per flush |
//! | PORT_LISTENER_DATA_DIR | ./data | Record files |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use port_listener::observability::init_tracing;
use port_listener::persistence::spawn_persistence_worker;
use port_listener::tap::TapError;
use port_listener::{
    BatchSnapshot, ListenerConfig, LocalFsByteStore, PortListener, TcpConnector, TracingReporter,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

fn load_config() -> Result<ListenerConfig, Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PORT_LISTENER_CONFIG").ok())
        .map(PathBuf::from);

    let mut config = match path {
        Some(path) => ListenerConfig::from_file(&path)?,
        None => ListenerConfig::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = load_config()?;
    let store = LocalFsByteStore::new(&config.data_dir)?;
    let (persistence, persistence_join) = spawn_persistence_worker(store);

    let connector = TcpConnector::new(config.timing.connect_timeout);
    let (listener, handle) = PortListener::new(
        config.clone(),
        connector,
        Arc::new(persistence.clone()),
        Arc::new(TracingReporter),
    )?;
    let join = listener.spawn();

    handle
        .create_tap(
            Box::new(|snapshot: BatchSnapshot, source: &str| -> Result<(), TapError> {
                debug!(source = %source, batches = snapshot.batch_count(), "flushed");
                Ok(())
            }),
            "log",
        )
        .await?;

    println!("Port Listener");
    println!("=============");
    println!();
    println!("Source:   {}", config.source_name);
    println!("Bridge:   {}", config.address());
    println!("Batching: {} x {} bytes", config.batches_per_flush, config.batch_size);
    println!("Data dir: {}", config.data_dir.display());
    println!();
    println!("{}", serde_json::to_string_pretty(&handle.get_status().await?)?);
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    handle.stop();
    join.await?;
    persistence.shutdown().await;
    persistence_join.await?;

    Ok(())
}
