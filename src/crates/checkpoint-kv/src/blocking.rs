//! Blocking surface for callers outside an async runtime
//!
//! [`BlockingCheckpointStore`] drives any [`CheckpointSaver`] on a private
//! current-thread runtime. Semantics are identical to the async surface.
//! Calling it from inside a tokio runtime panics, as `block_on` does.

use crate::capability::StoreCapabilities;
use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple, MetadataFilter, PendingWriteEntry};
use crate::error::Result;
use crate::traits::{CheckpointSaver, CheckpointStream};
use crate::writes::WriteReceipt;
use futures::StreamExt;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

pub struct BlockingCheckpointStore {
    saver: Arc<dyn CheckpointSaver>,
    runtime: Arc<Runtime>,
}

impl BlockingCheckpointStore {
    pub fn new<C: CheckpointSaver + 'static>(saver: C) -> Result<Self> {
        Self::from_shared(Arc::new(saver))
    }

    pub fn from_shared(saver: Arc<dyn CheckpointSaver>) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            saver,
            runtime: Arc::new(runtime),
        })
    }

    /// The wrapped async saver
    pub fn saver(&self) -> &Arc<dyn CheckpointSaver> {
        &self.saver
    }

    pub fn capabilities(&self) -> StoreCapabilities {
        self.saver.capabilities()
    }

    pub fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        self.runtime.block_on(self.saver.put(config, checkpoint, metadata))
    }

    pub fn get_tuple(&self, config: &CheckpointConfig) -> Result<CheckpointTuple> {
        self.runtime.block_on(self.saver.get_tuple(config))
    }

    pub fn get(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        self.runtime.block_on(self.saver.get(config))
    }

    /// Lazy iterator; each `next` may issue a batched backend fetch
    pub fn list(
        &self,
        config: &CheckpointConfig,
        filter: Option<MetadataFilter>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<BlockingCheckpointIter> {
        let stream = self
            .runtime
            .block_on(self.saver.list(config, filter, before, limit))?;
        Ok(BlockingCheckpointIter {
            stream,
            runtime: Arc::clone(&self.runtime),
        })
    }

    pub fn put_writes(&self, config: &CheckpointConfig, writes: Vec<PendingWriteEntry>) -> Result<WriteReceipt> {
        self.runtime.block_on(self.saver.put_writes(config, writes))
    }

    pub fn delete_thread(&self, config: &CheckpointConfig) -> Result<()> {
        self.runtime.block_on(self.saver.delete_thread(config))
    }
}

impl std::fmt::Debug for BlockingCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingCheckpointStore").finish_non_exhaustive()
    }
}

/// Iterator over a listing, newest first
pub struct BlockingCheckpointIter {
    stream: CheckpointStream,
    runtime: Arc<Runtime>,
}

impl Iterator for BlockingCheckpointIter {
    type Item = Result<CheckpointTuple>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}
