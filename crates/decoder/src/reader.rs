//! Bitstream feeder.
//!
//! A [`Reader`] runs on its own thread: it takes free buffers from the input
//! pool, fills them from the source stream and pushes them to the engine.
//! At the end of the input it flushes the engine and stops.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, Span};

use vcu_common::{DecodeError, DecodeResult};

use crate::engine::DecodeEngine;
use crate::event::ExitEvent;
use crate::pool::BufPool;

/// Wait between two attempts to get a buffer from a decommitted pool.
const RECOMMIT_POLL: Duration = Duration::from_millis(10);

pub trait Reader: Send {
    /// Open the input file.
    fn set_path(&mut self, path: &Path) -> DecodeResult<()>;

    /// Start the feeding thread. The input must be set.
    fn start(&mut self) -> DecodeResult<()>;

    /// Ask the feeding thread to stop after the current buffer.
    fn stop(&self);

    /// Wait for the feeding thread and return its outcome.
    fn join(&mut self) -> DecodeResult<()>;
}

/// Reader feeding the engine from a file or any byte source.
pub struct FileReader {
    engine: Arc<dyn DecodeEngine>,
    pool: Arc<BufPool>,
    exit: ExitEvent,
    span: Span,
    input: Option<Box<dyn Read + Send>>,
    stopping: Arc<AtomicBool>,
    thread: Option<JoinHandle<DecodeResult<()>>>,
}

impl FileReader {
    pub fn new(engine: Arc<dyn DecodeEngine>, pool: Arc<BufPool>, exit: ExitEvent) -> Self {
        Self {
            engine,
            pool,
            exit,
            span: Span::current(),
            input: None,
            stopping: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Read from an arbitrary byte source instead of a file.
    pub fn set_input(&mut self, input: impl Read + Send + 'static) {
        self.input = Some(Box::new(input));
    }
}

impl Reader for FileReader {
    fn set_path(&mut self, path: &Path) -> DecodeResult<()> {
        let file = File::open(path).map_err(|e| {
            DecodeError::InvalidArgument(format!("cannot open {}: {e}", path.display()))
        })?;
        self.set_input(BufReader::new(file));
        Ok(())
    }

    fn start(&mut self) -> DecodeResult<()> {
        if self.thread.is_some() {
            return Err(DecodeError::InvalidState("reader already started".into()));
        }
        let input = self
            .input
            .take()
            .ok_or_else(|| DecodeError::InvalidArgument("stream input must be opened".into()))?;

        let feeder = Feeder {
            engine: Arc::clone(&self.engine),
            pool: Arc::clone(&self.pool),
            exit: self.exit.clone(),
            stopping: Arc::clone(&self.stopping),
            input,
        };
        let span = self.span.clone();
        let handle = thread::Builder::new()
            .name("FileReader".into())
            .spawn(move || span.in_scope(|| feeder.run()))?;
        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    fn join(&mut self) -> DecodeResult<()> {
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| DecodeError::ReaderFailed("reader thread panicked".into()))?,
            None => Ok(()),
        }
    }
}

impl Drop for FileReader {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.join() {
            debug!(error = %e, "Reader ended with an error");
        }
    }
}

struct Feeder {
    engine: Arc<dyn DecodeEngine>,
    pool: Arc<BufPool>,
    exit: ExitEvent,
    stopping: Arc<AtomicBool>,
    input: Box<dyn Read + Send>,
}

impl Feeder {
    /// Feed until the input ends or the reader is stopped. Any failure also
    /// sets the exit event.
    fn run(mut self) -> DecodeResult<()> {
        let result = self.feed();
        if let Err(e) = &result {
            error!(error = %e, "Reader failed");
            self.exit.set();
        }
        result
    }

    fn feed(&mut self) -> DecodeResult<()> {
        let mut pushed = 0usize;
        while !self.stopping.load(Ordering::SeqCst) {
            let buffer = match self.pool.get() {
                Ok(buffer) => buffer,
                Err(_) => {
                    self.pool.wait_committed(RECOMMIT_POLL);
                    continue;
                }
            };

            let read = {
                let mut bytes = buffer.write();
                read_full(&mut self.input, &mut bytes[..])?
            };
            if read == 0 {
                self.stopping.store(true, Ordering::SeqCst);
                debug!(buffers = pushed, "End of input, flushing decoder");
                self.engine.flush();
                break;
            }

            if !self.engine.push_stream_buffer(buffer, read) {
                debug!(size = read, "Decoder refused the stream buffer");
                return Err(DecodeError::ReaderFailed(
                    "failed to push buffer to decoder".into(),
                ));
            }
            pushed += 1;
        }
        Ok(())
    }
}

/// Fill `buf` from `input`, stopping early only at end of input.
fn read_full(input: &mut dyn Read, buf: &mut [u8]) -> DecodeResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
