//! Ingestion Loop
//!
//! One task owns the stream, the batch set and the timers. Each iteration:
//!
//! ```text
//! ┌─ drain ≤1 command ──────────────────────────────────────────────┐
//! │ connected?                                                       │
//! │   yes: wait ≤100ms for bytes ─► append ─► full? flush            │
//! │        1s window elapsed? report bytes                            │
//! │        quiet >5s with data pending? stale flush                   │
//! │        read error: close, wait 5s, reconnect                      │
//! │   no:  wait 500ms, reconnect                                      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop never awaits longer than one readiness wait or one sleep, so
//! commands are answered promptly whatever the link is doing. Shutdown is
//! cooperative: `ListenerHandle::stop` clears a flag checked every iteration.

use crate::batch::{BatchSet, BatchSnapshot};
use crate::command::{ListenerCommand, ListenerHandle};
use crate::config::ListenerConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::persistence::{ByteDataSink, TableSchema};
use crate::reporting::{unix_millis, ByteCountReport, Severity, StatusReporter};
use crate::status::{LoopState, StatusBoard};
use crate::tap::TapRegistry;
use crate::transport::{ByteStream, Connector};
use std::io::Error as IoError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Last-byte and reporting-window bookkeeping
#[derive(Debug, Clone, Copy)]
pub struct ActivityClock {
    last_received: Instant,
    window_start: Instant,
    window_bytes: u64,
}

impl ActivityClock {
    pub fn new(now: Instant) -> Self {
        ActivityClock {
            last_received: now,
            window_start: now,
            window_bytes: 0,
        }
    }

    pub fn record(&mut self, bytes: usize, now: Instant) {
        self.window_bytes = self.window_bytes.saturating_add(bytes as u64);
        if bytes > 0 {
            self.last_received = now;
        }
    }

    /// Time since the last byte arrived
    pub fn quiet_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_received)
    }

    pub fn window_due(&self, now: Instant, interval: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= interval
    }

    /// Byte count for the closing window; a new window starts at `now`
    pub fn take_window(&mut self, now: Instant) -> u64 {
        self.window_start = now;
        std::mem::take(&mut self.window_bytes)
    }

    /// Move the window start to `now`. Bytes not yet reported carry over.
    pub fn restart_window(&mut self, now: Instant) {
        self.window_start = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushReason {
    Full,
    Stale,
    Shutdown,
}

pub struct PortListener<C: Connector> {
    config: ListenerConfig,
    batches: BatchSet,
    connection: ConnectionManager<C>,
    taps: Arc<TapRegistry>,
    status: Arc<StatusBoard>,
    sink: Arc<dyn ByteDataSink>,
    reporter: Arc<dyn StatusReporter>,
    rx: mpsc::UnboundedReceiver<ListenerCommand>,
    running: Arc<AtomicBool>,
    clock: ActivityClock,
    read_buf: Vec<u8>,
    flushes: u64,
}

impl<C: Connector> PortListener<C> {
    /// Validate `config`, declare the source's table and build the loop.
    ///
    /// Nothing connects until `run` starts.
    pub fn new(
        config: ListenerConfig,
        connector: C,
        sink: Arc<dyn ByteDataSink>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Result<(Self, ListenerHandle)> {
        config.validate()?;

        let source = config.source_name.clone();
        let target = config.address();
        let lock_timeout = config.timing.lock_timeout;

        let taps = Arc::new(TapRegistry::new(&source, lock_timeout));
        let status = Arc::new(StatusBoard::new(&source, &target, lock_timeout, taps.clone()));
        let connection = ConnectionManager::new(connector, &source, &target, reporter.clone());

        if let Err(e) = sink.create_table(&TableSchema::byte_batches(&source, config.batch_size)) {
            error!(source = %source, "table registration failed: {}", e);
            reporter.print_message(
                &format!("{} -> could not register table: {}", source, e),
                Severity::Error,
            );
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let handle = ListenerHandle::new(tx, running.clone(), status.clone());

        let listener = PortListener {
            batches: BatchSet::new(config.batch_size, config.batches_per_flush),
            read_buf: vec![0u8; config.batch_size],
            config,
            connection,
            taps,
            status,
            sink,
            reporter,
            rx,
            running,
            clock: ActivityClock::new(Instant::now()),
            flushes: 0,
        };

        Ok((listener, handle))
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the handle's `stop` is called
    pub async fn run(mut self) {
        info!(
            source = %self.config.source_name,
            target = %self.config.address(),
            batch_size = self.config.batch_size,
            batches_per_flush = self.config.batches_per_flush,
            "port listener starting"
        );

        self.connect().await;
        self.publish_state(LoopState::Running);

        while self.running.load(Ordering::SeqCst) {
            self.iterate().await;
        }

        if !self.batches.is_empty() {
            self.flush(FlushReason::Shutdown);
        }
        self.connection.close();
        self.publish_link();
        self.publish_state(LoopState::Stopped);
        info!(
            source = %self.config.source_name,
            flushes = self.flushes,
            "port listener stopped"
        );
    }

    async fn iterate(&mut self) {
        if let Ok(cmd) = self.rx.try_recv() {
            self.handle_command(cmd).await;
        }

        if self.connection.is_connected() {
            if let Err(e) = self.poll_connected().await {
                self.recover_from_read_error(e).await;
            }
        } else {
            sleep(self.config.timing.disconnected_poll).await;
            self.connect().await;
        }
    }

    async fn handle_command(&mut self, cmd: ListenerCommand) {
        debug!(source = %self.config.source_name, command = ?cmd, "command");
        match cmd {
            ListenerCommand::Connect { response_tx } => {
                self.connect().await;
                let _ = response_tx.send(());
            }
            ListenerCommand::GetConnected { response_tx } => {
                let _ = response_tx.send(self.connection.is_connected());
            }
            ListenerCommand::GetStatus { response_tx } => {
                let _ = response_tx.send(self.status.snapshot());
            }
            ListenerCommand::CreateTap {
                tap,
                subscriber,
                response_tx,
            } => {
                let _ = response_tx.send(self.taps.add_tap(tap, &subscriber));
            }
        }
    }

    async fn poll_connected(&mut self) -> std::io::Result<()> {
        let wait = self.config.timing.read_wait;
        let Some(stream) = self.connection.stream_mut() else {
            return Ok(());
        };

        let read = stream.read_within(&mut self.read_buf, wait).await?;
        match read {
            None => sleep(self.config.timing.idle_sleep).await,
            Some(n) => self.ingest(n),
        }

        let now = Instant::now();
        self.report_window(now);
        self.check_stale(now);
        Ok(())
    }

    fn ingest(&mut self, n: usize) {
        self.clock.record(n, Instant::now());
        let buf = std::mem::take(&mut self.read_buf);
        let mut rest = &buf[..n];
        while !rest.is_empty() {
            let consumed = self.batches.write_slice(rest);
            rest = &rest[consumed..];
            if self.batches.is_full() {
                self.flush(FlushReason::Full);
            }
        }
        self.read_buf = buf;
    }

    fn report_window(&mut self, now: Instant) {
        if !self.clock.window_due(now, self.config.timing.report_interval) {
            return;
        }
        let byte_count = self.clock.take_window(now);
        self.reporter.report_bytes(ByteCountReport {
            source_name: self.config.source_name.clone(),
            timestamp_ms: unix_millis(),
            byte_count,
        });
    }

    fn check_stale(&mut self, now: Instant) {
        if !self.batches.is_empty() && self.clock.quiet_for(now) > self.config.timing.stale_after {
            self.flush(FlushReason::Stale);
        }
    }

    fn flush(&mut self, reason: FlushReason) {
        let pending = self.batches.pending_bytes();
        let snapshot: BatchSnapshot = self.batches.snapshot_and_clear();
        self.flushes = self.flushes.saturating_add(1);
        debug!(
            source = %self.config.source_name,
            reason = ?reason,
            bytes = pending,
            "flush"
        );

        let source = self.config.source_name.as_str();
        if let Err(e) = self.sink.save_byte_data(source, snapshot.clone(), source) {
            error!(source = %source, "save_byte_data failed: {}", e);
            self.reporter
                .print_message(&format!("{} -> save failed: {}", source, e), Severity::Error);
        }

        match self.taps.fan_out(&snapshot) {
            Ok(stats) if stats.failed > 0 => {
                warn!(source = %source, failed = stats.failed, "some taps failed");
            }
            Ok(_) => {}
            Err(e) => {
                error!(source = %source, "{}", e);
                self.reporter.print_message(&e.to_string(), Severity::Error);
            }
        }
    }

    async fn recover_from_read_error(&mut self, e: IoError) {
        self.connection.close();
        self.publish_link();

        let retry = self.config.timing.retry_delay;
        let message = format!(
            "Failed to read from port at {}, will retry in {} seconds. {} -> Error: {}",
            self.config.address(),
            retry.as_secs_f32(),
            self.config.source_name,
            e
        );
        warn!(source = %self.config.source_name, "{}", message);
        self.reporter.print_message(&message, Severity::Warning);

        sleep(retry).await;
        self.connect().await;
    }

    /// Connect and, on success, start a fresh reporting window
    async fn connect(&mut self) -> bool {
        let connected = self.connection.connect().await;
        if connected {
            self.clock.restart_window(Instant::now());
        }
        self.publish_link();
        connected
    }

    fn publish_link(&self) {
        if let Err(e) = self
            .status
            .record_link(self.connection.is_connected(), self.connection.connections())
        {
            error!(source = %self.config.source_name, "{}", e);
        }
    }

    fn publish_state(&self, state: LoopState) {
        if let Err(e) = self.status.record_state(state) {
            error!(source = %self.config.source_name, "{}", e);
        }
    }
}
