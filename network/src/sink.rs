//! Channel byte sinks: the real TCP writer task and the null test double.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;

use crate::channel::{TrafficType, WriteCallback};

/// Per-channel queue budget for generic traffic.
pub const GENERIC_QUEUE_BUDGET: usize = 512;
/// Per-channel queue budget for the bootstrap lane.
pub const BOOTSTRAP_QUEUE_BUDGET: usize = 32;

fn lane_budget(traffic: TrafficType) -> usize {
    match traffic {
        TrafficType::Generic => GENERIC_QUEUE_BUDGET,
        TrafficType::Bootstrap => BOOTSTRAP_QUEUE_BUDGET,
    }
}

/// Where a channel's serialized bytes go. The TCP sink feeds a writer
/// task; the null sink records frames for assertions.
pub trait ChannelSink: Send + Sync {
    /// Queue bytes for writing. The callback fires exactly once with the
    /// write result.
    fn write(&self, traffic: TrafficType, bytes: Vec<u8>, callback: Option<WriteCallback>);

    /// Whether the lane's in-flight queue is at its budget.
    fn is_full(&self, traffic: TrafficType) -> bool;

    fn alive(&self) -> bool;

    fn close(&self);

    /// Run `f` off the caller's stack (the executor for TCP, a thread for
    /// the null sink). Used so drop completions are never reentrant.
    fn post(&self, f: Box<dyn FnOnce() + Send>);
}

struct WriteEntry {
    traffic: TrafficType,
    bytes: Vec<u8>,
    callback: Option<WriteCallback>,
}

/// Sink backed by a tokio writer task over one peer socket.
pub struct TcpSink {
    sender: mpsc::UnboundedSender<WriteEntry>,
    lane_depth: [Arc<AtomicUsize>; 2],
    alive: Arc<AtomicBool>,
}

impl TcpSink {
    /// Spawn the writer task on the current runtime.
    pub fn spawn(mut writer: OwnedWriteHalf) -> Arc<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<WriteEntry>();
        let lane_depth = [Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0))];
        let alive = Arc::new(AtomicBool::new(true));

        let depths = [Arc::clone(&lane_depth[0]), Arc::clone(&lane_depth[1])];
        let task_alive = Arc::clone(&alive);
        tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                depths[entry.traffic as usize].fetch_sub(1, Ordering::Relaxed);
                let result = writer.write_all(&entry.bytes).await;
                match result {
                    Ok(()) => {
                        if let Some(callback) = entry.callback {
                            callback(Ok(entry.bytes.len()));
                        }
                    }
                    Err(error) => {
                        task_alive.store(false, Ordering::SeqCst);
                        if let Some(callback) = entry.callback {
                            callback(Err(error));
                        }
                        break;
                    }
                }
            }
            task_alive.store(false, Ordering::SeqCst);
            // Drain remaining entries with an error so no callback is lost.
            while let Ok(entry) = receiver.try_recv() {
                depths[entry.traffic as usize].fetch_sub(1, Ordering::Relaxed);
                if let Some(callback) = entry.callback {
                    callback(Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed")));
                }
            }
        });

        Arc::new(Self {
            sender,
            lane_depth,
            alive,
        })
    }
}

impl ChannelSink for TcpSink {
    fn write(&self, traffic: TrafficType, bytes: Vec<u8>, callback: Option<WriteCallback>) {
        if !self.alive() {
            if let Some(callback) = callback {
                self.post(Box::new(move || {
                    callback(Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "channel closed",
                    )))
                }));
            }
            return;
        }
        self.lane_depth[traffic as usize].fetch_add(1, Ordering::Relaxed);
        let entry = WriteEntry {
            traffic,
            bytes,
            callback,
        };
        if let Err(mpsc::error::SendError(entry)) = self.sender.send(entry) {
            self.lane_depth[traffic as usize].fetch_sub(1, Ordering::Relaxed);
            if let Some(callback) = entry.callback {
                self.post(Box::new(move || {
                    callback(Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "channel closed",
                    )))
                }));
            }
        }
    }

    fn is_full(&self, traffic: TrafficType) -> bool {
        self.lane_depth[traffic as usize].load(Ordering::Relaxed) >= lane_budget(traffic)
    }

    fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.sender.is_closed()
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn post(&self, f: Box<dyn FnOnce() + Send>) {
        tokio::spawn(async move { f() });
    }
}

/// Recording sink for tests: frames accumulate in memory, lanes can be
/// forced full, and posted closures run on a fresh thread.
pub struct NullSink {
    sent: Mutex<Vec<(TrafficType, Vec<u8>)>>,
    forced_full: [AtomicBool; 2],
    alive: AtomicBool,
}

impl NullSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            forced_full: [AtomicBool::new(false), AtomicBool::new(false)],
            alive: AtomicBool::new(true),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn take_sent(&self) -> Vec<(TrafficType, Vec<u8>)> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }

    pub fn set_full(&self, traffic: TrafficType, full: bool) {
        self.forced_full[traffic as usize].store(full, Ordering::SeqCst);
    }
}

impl ChannelSink for NullSink {
    fn write(&self, traffic: TrafficType, bytes: Vec<u8>, callback: Option<WriteCallback>) {
        let len = bytes.len();
        self.sent.lock().unwrap().push((traffic, bytes));
        if let Some(callback) = callback {
            self.post(Box::new(move || callback(Ok(len))));
        }
    }

    fn is_full(&self, traffic: TrafficType) -> bool {
        self.forced_full[traffic as usize].load(Ordering::SeqCst)
    }

    fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn post(&self, f: Box<dyn FnOnce() + Send>) {
        std::thread::spawn(f);
    }
}
