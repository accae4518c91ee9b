//! Bounded byte pipe between a producer loop and a consumer loop.
//!
//! The writer pushes chunks; the reader accumulates whatever has arrived into
//! one contiguous buffer and consumes from its front. Flow control is the
//! channel bound: a full pipe suspends the writer until the reader catches up.
//! [`PipeWriter::write_all`] queues its chunks as a single channel item, so a
//! header and its payload are never separated by another writer, whichever
//! thread it runs on.

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

const MIN_DEPTH: usize = 1;

/// One channel item: chunks that must reach the reader back to back.
type Batch = Vec<Bytes>;

/// The reading half is gone; nothing written now will be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PipeClosed;

/// Outcome of waiting on the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadStatus {
    /// New bytes were appended to the buffer.
    Data,
    /// Every writer is gone. Bytes already buffered are still readable.
    Completed,
}

/// Create a pipe holding at most `depth` in-flight chunks, with a reader
/// buffer pre-sized to `capacity` bytes.
pub(crate) fn pipe(depth: usize, capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(depth.max(MIN_DEPTH));
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            buffer: BytesMut::with_capacity(capacity),
            completed: false,
        },
    )
}

#[derive(Debug, Clone)]
pub(crate) struct PipeWriter {
    tx: mpsc::Sender<Batch>,
}

impl PipeWriter {
    /// Queue a chunk, waiting for room when the pipe is full.
    pub(crate) async fn write(&self, chunk: Bytes) -> Result<(), PipeClosed> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx.send(vec![chunk]).await.map_err(|_| PipeClosed)
    }

    /// Queue `chunks` back to back. Either all of them are queued or none is,
    /// even if the returned future is dropped midway.
    pub(crate) async fn write_all(&self, chunks: &[Bytes]) -> Result<(), PipeClosed> {
        let batch: Batch = chunks.iter().filter(|c| !c.is_empty()).cloned().collect();
        if batch.is_empty() {
            return Ok(());
        }
        self.tx.send(batch).await.map_err(|_| PipeClosed)
    }
}

#[derive(Debug)]
pub(crate) struct PipeReader {
    rx: mpsc::Receiver<Batch>,
    buffer: BytesMut,
    completed: bool,
}

impl PipeReader {
    /// Wait for more bytes and append everything currently queued.
    ///
    /// Cancel safe: a read abandoned inside `select!` loses no chunk.
    pub(crate) async fn read(&mut self) -> ReadStatus {
        if self.completed {
            return ReadStatus::Completed;
        }

        match self.rx.recv().await {
            Some(batch) => {
                self.append(batch);
                while let Ok(batch) = self.rx.try_recv() {
                    self.append(batch);
                }
                ReadStatus::Data
            }
            None => {
                self.completed = true;
                ReadStatus::Completed
            }
        }
    }

    fn append(&mut self, batch: Batch) {
        for chunk in batch {
            self.buffer.extend_from_slice(&chunk);
        }
    }

    /// Accumulated, not yet consumed bytes.
    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Stop accepting writes. Queued chunks remain readable.
    pub(crate) fn close(&mut self) {
        self.rx.close();
    }
}
