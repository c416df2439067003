//! Serial link with I/O isolated on a worker thread.
//!
//! Blocking port I/O runs on a dedicated worker so the controlling flow stays
//! responsive. The two sides communicate over a pair of one-directional
//! bounded channels (outbound bytes, inbound bytes) plus two flags: `flow`
//! ("port open and serviced") and `error` ("worker failed"). Callers must
//! observe `error` before concluding an operation succeeded.

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TryRecvError, sync_channel};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serialport::{DataBits, FlowControl, Parity, StopBits};
use tracing::{debug, info, warn};

use super::buffer::RecvBuffer;
use super::traits::{BaudLink, DEFAULT_TIMEOUT, Link, LinkError};
use crate::protocol::constants::DEFAULT_BAUDRATE;

const CHANNEL_DEPTH: usize = 32;
const PORT_TIMEOUT: Duration = Duration::from_millis(100);
/// How long each of the two shutdown stages waits for the worker to exit.
const SHUTDOWN_WAIT: Duration = Duration::from_millis(500);

struct Worker {
    outbound: SyncSender<Vec<u8>>,
    inbound: Receiver<Vec<u8>>,
    flow: Arc<AtomicBool>,
    error: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Serial link whose port I/O runs on a worker thread.
pub struct WorkerSerialLink {
    path: String,
    baudrate: u32,
    flow_control: bool,
    worker: Option<Worker>,
    buf: RecvBuffer,
    timeout: Duration,
}

impl WorkerSerialLink {
    pub fn new(path: impl Into<String>, baudrate: Option<u32>, flow_control: bool) -> Self {
        Self {
            path: path.into(),
            baudrate: baudrate.unwrap_or(DEFAULT_BAUDRATE),
            flow_control,
            worker: None,
            buf: RecvBuffer::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    fn worker(&self) -> Result<&Worker, LinkError> {
        self.worker.as_ref().ok_or(LinkError::NotConnected)
    }

    fn check_error(worker: &Worker) -> Result<(), LinkError> {
        if worker.error.load(Ordering::SeqCst) {
            return Err(LinkError::Worker("serial worker reported failure".into()));
        }
        Ok(())
    }

    /// Move everything the worker has queued into the local buffer without
    /// blocking.
    fn drain_inbound(&mut self) -> Result<(), LinkError> {
        let mut chunks = Vec::new();
        {
            let worker = self.worker()?;
            loop {
                match worker.inbound.try_recv() {
                    Ok(chunk) => chunks.push(chunk),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        return Err(LinkError::Worker("serial worker stopped".into()));
                    }
                }
            }
        }
        for chunk in chunks {
            self.buf.extend(&chunk);
        }
        Ok(())
    }

    /// Block for more inbound data until `deadline`.
    fn fill_blocking(&mut self, deadline: Instant) -> Result<(), LinkError> {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or(LinkError::RecvTimeout)?;
        let worker = self.worker()?;
        Self::check_error(worker)?;
        match worker.inbound.recv_timeout(remaining) {
            Ok(chunk) => {
                self.buf.extend(&chunk);
                Ok(())
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Err(LinkError::RecvTimeout),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                Err(LinkError::Worker("serial worker stopped".into()))
            }
        }
    }

    /// Wait up to `wait` for the worker thread to finish.
    fn await_exit(handle: &JoinHandle<()>, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        while Instant::now() < deadline {
            if handle.is_finished() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        handle.is_finished()
    }
}

impl Link for WorkerSerialLink {
    fn connect(&mut self) -> Result<(), LinkError> {
        let (out_tx, out_rx) = sync_channel::<Vec<u8>>(CHANNEL_DEPTH);
        let (in_tx, in_rx) = sync_channel::<Vec<u8>>(CHANNEL_DEPTH);
        let flow = Arc::new(AtomicBool::new(false));
        let error = Arc::new(AtomicBool::new(false));

        let path = self.path.clone();
        let baudrate = self.baudrate;
        let flow_setting = if self.flow_control {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        let w_flow = Arc::clone(&flow);
        let w_error = Arc::clone(&error);

        let handle = std::thread::Builder::new()
            .name("serial-worker".into())
            .spawn(move || {
                let mut port = match serialport::new(&path, baudrate)
                    .data_bits(DataBits::Eight)
                    .parity(Parity::None)
                    .stop_bits(StopBits::One)
                    .flow_control(flow_setting)
                    .timeout(PORT_TIMEOUT)
                    .open()
                {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(path = %path, error = %e, "Serial worker failed to open port");
                        w_error.store(true, Ordering::SeqCst);
                        return;
                    }
                };

                w_flow.store(true, Ordering::SeqCst);
                let mut chunk = [0u8; 4096];
                while w_flow.load(Ordering::SeqCst) && !w_error.load(Ordering::SeqCst) {
                    // Service pending writes first.
                    loop {
                        match out_rx.try_recv() {
                            Ok(data) => {
                                if let Err(e) = port.write_all(&data).and_then(|_| port.flush()) {
                                    warn!(error = %e, "Serial worker write failed");
                                    w_error.store(true, Ordering::SeqCst);
                                    return;
                                }
                            }
                            Err(TryRecvError::Empty) => break,
                            Err(TryRecvError::Disconnected) => return,
                        }
                    }

                    match port.read(&mut chunk) {
                        Ok(0) => {}
                        Ok(n) => {
                            if in_tx.send(chunk[..n].to_vec()).is_err() {
                                return;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) => {
                            warn!(error = %e, "Serial worker read failed");
                            w_error.store(true, Ordering::SeqCst);
                            return;
                        }
                    }
                }
            })
            .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;

        // Wait for the worker to report either readiness or failure.
        let deadline = Instant::now() + self.timeout;
        loop {
            if error.load(Ordering::SeqCst) {
                let _ = handle.join();
                return Err(LinkError::ConnectFailed(format!(
                    "serial worker could not open {}",
                    self.path
                )));
            }
            if flow.load(Ordering::SeqCst) {
                break;
            }
            if Instant::now() >= deadline {
                error.store(true, Ordering::SeqCst);
                let _ = handle.join();
                return Err(LinkError::ConnectFailed("serial worker startup timeout".into()));
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        info!(path = %self.path, baudrate = self.baudrate, "Serial worker running");
        self.worker = Some(Worker {
            outbound: out_tx,
            inbound: in_rx,
            flow,
            error,
            handle,
        });
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        self.buf.clear();
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        // Stage one: ask nicely and wait briefly.
        worker.flow.store(false, Ordering::SeqCst);
        drop(worker.outbound);
        if Self::await_exit(&worker.handle, SHUTDOWN_WAIT) {
            let _ = worker.handle.join();
            debug!(path = %self.path, "Serial worker stopped");
            return Ok(());
        }

        // Stage two: escalate, then give it one more chance.
        warn!(path = %self.path, "Serial worker unresponsive, escalating shutdown");
        worker.error.store(true, Ordering::SeqCst);
        drop(worker.inbound);
        if Self::await_exit(&worker.handle, SHUTDOWN_WAIT) {
            let _ = worker.handle.join();
            return Ok(());
        }
        Err(LinkError::Worker("serial worker did not shut down".into()))
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let worker = self.worker()?;
        Self::check_error(worker)?;
        worker
            .outbound
            .send(data.to_vec())
            .map_err(|_| LinkError::Worker("serial worker stopped".into()))?;
        // The write happens asynchronously; a failure surfaces through the
        // error flag on the next operation.
        Ok(())
    }

    fn recv(&mut self, n: usize) -> Result<Vec<u8>, LinkError> {
        let deadline = Instant::now() + self.timeout;
        self.drain_inbound()?;
        loop {
            if let Some(bytes) = self.buf.take(n) {
                Self::check_error(self.worker()?)?;
                return Ok(bytes);
            }
            self.fill_blocking(deadline)?;
        }
    }

    fn recv_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, LinkError> {
        let deadline = Instant::now() + self.timeout;
        self.drain_inbound()?;
        loop {
            if let Some(bytes) = self.buf.take_until(delimiter) {
                Self::check_error(self.worker()?)?;
                return Ok(bytes);
            }
            self.fill_blocking(deadline)?;
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl BaudLink for WorkerSerialLink {
    fn set_baudrate(&mut self, baudrate: u32) {
        // Takes effect on the next connect; the worker owns the live port.
        self.baudrate = baudrate;
    }

    fn baudrate(&self) -> u32 {
        self.baudrate
    }
}
