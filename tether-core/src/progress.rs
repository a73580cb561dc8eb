//! Progress reporting for long-running scans.
//!
//! The CLI uses `IndicatifReporter` for user-visible progress bars. Library
//! callers can use `NoopReporter`, collect structured [`ProgressEvent`]s
//! with `ChannelReporter`, or provide their own implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

/// Structured progress payload emitted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: String,
    pub processed: u64,
    pub total: Option<u64>,
    pub message: Option<String>,
}

/// Trait for reporting progress of scan stages.
pub trait ProgressReporter: Send + Sync {
    /// Begin a new stage with an optional total count.
    fn start(&self, stage: &str, total: Option<u64>);

    /// Advance progress by the given amount.
    fn advance(&self, amount: u64);

    /// Mark the current stage as finished.
    fn finish(&self);

    /// Display an informational message.
    fn message(&self, msg: &str);
}

/// No-op reporter for library callers that don't need progress output.
#[derive(Debug, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn start(&self, _stage: &str, _total: Option<u64>) {}
    fn advance(&self, _amount: u64) {}
    fn finish(&self) {}
    fn message(&self, _msg: &str) {}
}

/// Reporter backed by `indicatif` progress bars for CLI use.
#[derive(Debug)]
pub struct IndicatifReporter {
    bar: ProgressBar,
    completed: AtomicU64,
}

impl Default for IndicatifReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatifReporter {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            completed: AtomicU64::new(0),
        }
    }
}

impl ProgressReporter for IndicatifReporter {
    fn start(&self, stage: &str, total: Option<u64>) {
        self.completed.store(0, Ordering::Relaxed);
        if let Some(total) = total {
            self.bar.set_length(total);
            self.bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap()
                .progress_chars("=> "),
            );
        } else {
            self.bar.set_length(0);
            self.bar.set_style(
                ProgressStyle::with_template("{spinner:.green} {msg} {pos} items").unwrap(),
            );
        }
        self.bar.set_message(stage.to_string());
        self.bar.reset();
    }

    fn advance(&self, amount: u64) {
        self.completed.fetch_add(amount, Ordering::Relaxed);
        self.bar.inc(amount);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn message(&self, msg: &str) {
        self.bar.println(msg);
    }
}

/// Reporter that forwards structured events over a channel, for non-TTY
/// consumers.
pub struct ChannelReporter {
    tx: Sender<ProgressEvent>,
    state: Mutex<(String, u64, Option<u64>)>,
}

impl ChannelReporter {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self {
            tx,
            state: Mutex::new((String::new(), 0, None)),
        }
    }

    fn emit(&self, message: Option<String>) {
        let state = self.state.lock().expect("progress state poisoned");
        let _ = self.tx.send(ProgressEvent {
            stage: state.0.clone(),
            processed: state.1,
            total: state.2,
            message,
        });
    }
}

impl ProgressReporter for ChannelReporter {
    fn start(&self, stage: &str, total: Option<u64>) {
        {
            let mut state = self.state.lock().expect("progress state poisoned");
            *state = (stage.to_string(), 0, total);
        }
        self.emit(None);
    }

    fn advance(&self, amount: u64) {
        {
            let mut state = self.state.lock().expect("progress state poisoned");
            state.1 += amount;
        }
        self.emit(None);
    }

    fn finish(&self) {
        self.emit(Some("done".to_string()));
    }

    fn message(&self, msg: &str) {
        self.emit(Some(msg.to_string()));
    }
}
