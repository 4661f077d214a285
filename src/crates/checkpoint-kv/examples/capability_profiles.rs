//! Capability profiles and custom backends
//!
//! Shows how a downstream project plugs its own key-value client into the
//! checkpoint store, and how the store reports which operations each backend
//! can serve before any of them is called.
//!
//! Run with `cargo run -p checkpoint-kv --example capability_profiles`.

use async_trait::async_trait;
use checkpoint_kv::{
    BackendCapabilityProfile, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointStore,
    InMemoryBackend, KvBackend, OperationSupport, Result, StoreCapabilities, StoreConfig,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Plain get/set/delete store, the shape of a Memcached client without `gets`/`cas`
#[derive(Default)]
struct PlainKv {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl KvBackend for PlainKv {
    fn name(&self) -> &str {
        "plain-kv"
    }

    fn capabilities(&self) -> BackendCapabilityProfile {
        BackendCapabilityProfile::minimal()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.values.lock().remove(key).is_some())
    }
}

fn describe(support: &OperationSupport) -> String {
    match support {
        OperationSupport::Exact => "exact".to_string(),
        OperationSupport::Relaxed { reason } => format!("relaxed ({})", reason),
        OperationSupport::Unsupported { missing } => {
            let names: Vec<&str> = missing.iter().map(|c| c.as_str()).collect();
            format!("unsupported (needs {})", names.join(" or "))
        }
    }
}

fn print_report(title: &str, caps: &StoreCapabilities) {
    println!("== {} ==", title);
    println!("  put          {}", describe(&caps.put));
    println!("  get by id    {}", describe(&caps.get_by_id));
    println!("  get latest   {}", describe(&caps.get_latest));
    println!("  list         {}", describe(&caps.list));
    println!("  delete       {}", describe(&caps.delete_thread));
    println!("  put_writes   {}", describe(&caps.put_writes));
    println!("  durable      {}", caps.is_durable());
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = StoreConfig::default();

    let redis_like = CheckpointStore::new(InMemoryBackend::new(), config.clone())?;
    print_report("list-capable backend", &redis_like.capabilities());

    let memcached_like = CheckpointStore::new(
        InMemoryBackend::with_profile(BackendCapabilityProfile::key_value()),
        config.clone(),
    )?;
    print_report("key-value backend with CAS", &memcached_like.capabilities());

    let custom = CheckpointStore::new(PlainKv::default(), config.clone())?;
    print_report("custom plain backend", &custom.capabilities());

    let paired = CheckpointStore::new(PlainKv::default(), config)?.with_index_backend(InMemoryBackend::new())?;
    print_report("plain backend + list-capable index", &paired.capabilities());

    // The custom backend still serves lookups by id.
    let thread = CheckpointConfig::new("demo");
    let saved = custom
        .put(&thread, Checkpoint::new("ckpt-1", b"state".to_vec()), CheckpointMetadata::new())
        .await?;
    println!("stored {:?}", saved.checkpoint_id);

    match custom.get_tuple(&thread).await {
        Ok(tuple) => println!("latest: {}", tuple.checkpoint_id()),
        Err(e) => println!("latest lookup refused: {}", e),
    }

    // Paired with an index backend, history comes back.
    for id in ["ckpt-1", "ckpt-2"] {
        paired
            .put(&thread, Checkpoint::new(id, Vec::new()), CheckpointMetadata::new())
            .await?;
    }
    println!("paired latest: {}", paired.get_tuple(&thread).await?.checkpoint_id());

    Ok(())
}
