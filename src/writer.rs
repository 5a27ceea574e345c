//! Piped integration: feed raw progress bytes into an aggregator running on
//! its own thread.
//!
//! [`ProgressWriter`] is the producer side of a rendezvous pipe. Every
//! `write` blocks until the reader thread has taken the chunk, so a fast
//! producer can never outrun the aggregator. If the aggregator stops on an
//! error, subsequent writes fail with [`io::ErrorKind::BrokenPipe`] carrying
//! that error's message.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::debug;

use crate::aggregator::{Aggregator, ChangePolicy, Clock, ReportSink};
use crate::config::AggregatorConfig;
use crate::report::phases_changed;
use crate::reporter::{pull_reporter, push_reporter};
use crate::{Error, Result};

/// Shared slot holding the message of the error that stopped the reader.
type ReaderFailure = Arc<Mutex<Option<String>>>;

/// Writable end of a progress pipe.
pub struct ProgressWriter {
    tx: Option<SyncSender<Vec<u8>>>,
    failure: ReaderFailure,
    handle: Option<JoinHandle<Result<()>>>,
}

impl ProgressWriter {
    /// Start a reader thread aggregating everything written to the returned
    /// writer.
    pub fn spawn<S, C>(config: AggregatorConfig, sink: S, policy: C) -> Result<Self>
    where
        S: ReportSink + Send + 'static,
        C: ChangePolicy + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(0);
        let failure: ReaderFailure = Arc::default();
        let thread_failure = failure.clone();
        let aggregator = Aggregator::new(config, sink, policy);

        let handle = std::thread::Builder::new()
            .name("imageprogress-reader".into())
            .spawn(move || read_progress(aggregator, PipeReader::new(rx), thread_failure))?;

        Ok(Self {
            tx: Some(tx),
            failure,
            handle: Some(handle),
        })
    }

    /// Writer that prints `Pulled n/m layers, p% complete` lines.
    pub fn pull<F>(config: AggregatorConfig, print: F) -> Result<Self>
    where
        F: FnMut(String) + Send + 'static,
    {
        Self::spawn(config, pull_reporter(print), phases_changed)
    }

    /// Writer that prints `Pushed n/m layers, p% complete` lines.
    pub fn push<F>(config: AggregatorConfig, print: F) -> Result<Self>
    where
        F: FnMut(String) + Send + 'static,
    {
        Self::spawn(config, push_reporter(print), phases_changed)
    }

    /// Close the pipe and wait for the reader to drain it.
    ///
    /// Returns the aggregation result: `Ok(())` if the stream ended cleanly.
    pub fn finish(mut self) -> Result<()> {
        self.tx.take();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Reader("progress reader thread panicked".into()))?,
            None => Ok(()),
        }
    }

    fn broken_pipe(&self) -> io::Error {
        let message = self
            .failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| "progress reader closed".to_string());
        io::Error::new(io::ErrorKind::BrokenPipe, message)
    }
}

impl Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer closed"));
        };
        match tx.send(buf.to_vec()) {
            Ok(()) => Ok(buf.len()),
            Err(_) => Err(self.broken_pipe()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ProgressWriter {
    fn drop(&mut self) {
        // Closing the sender is the reader's EOF; the thread exits on its own.
        self.tx.take();
    }
}

fn read_progress<S, C, K>(
    mut aggregator: Aggregator<S, C, K>,
    mut reader: PipeReader,
    failure: ReaderFailure,
) -> Result<()>
where
    S: ReportSink,
    C: ChangePolicy,
    K: Clock,
{
    let result = aggregator.run(&mut reader);
    if let Err(ref e) = result {
        *failure.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
    }
    // The receiver must outlive the failure record so writers always see it.
    drop(reader);
    debug!(ok = result.is_ok(), "progress reader finished");
    result
}

/// Read end of the pipe: yields chunks in the order they were written and
/// reports EOF once every sender is gone.
struct PipeReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl PipeReader {
    fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            chunk: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Run `aggregator` over a blocking `reader` on the tokio blocking pool.
pub async fn run_detached<S, C, K, R>(mut aggregator: Aggregator<S, C, K>, reader: R) -> Result<()>
where
    S: ReportSink + Send + 'static,
    C: ChangePolicy + Send + 'static,
    K: Clock + Send + 'static,
    R: Read + Send + 'static,
{
    tokio::task::spawn_blocking(move || aggregator.run(reader))
        .await
        .map_err(|e| Error::Reader(format!("aggregation task panicked: {}", e)))?
}
