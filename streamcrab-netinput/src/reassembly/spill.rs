use super::*;

/// Exclusively owned reference to one spill target.
///
/// Not `Clone`: the reassembler that allocated it is its only owner, and
/// [`SpillStorage::release`] consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct SpillHandle {
    id: u64,
    channel: ChannelId,
}

impl SpillHandle {
    pub fn new(id: u64, channel: ChannelId) -> Self {
        Self { id, channel }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel
    }
}

/// Byte store used to park partial records that outgrow the in-memory threshold.
///
/// All calls happen synchronously on the task thread; a slow backend throttles the
/// channel that is spilling.
pub trait SpillStorage: Send + Sync {
    fn allocate_spill_target(&self, channel: ChannelId) -> anyhow::Result<SpillHandle>;
    fn append_bytes(&self, handle: &SpillHandle, bytes: &[u8]) -> anyhow::Result<()>;
    fn read_all(&self, handle: &SpillHandle) -> anyhow::Result<Vec<u8>>;
    fn release(&self, handle: SpillHandle) -> anyhow::Result<()>;
}

/// In-memory spill storage for tests and small local deployments.
#[derive(Default)]
pub struct InMemorySpillStorage {
    next_id: AtomicU64,
    targets: Mutex<AHashMap<u64, Vec<u8>>>,
}

impl InMemorySpillStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocated and not yet released targets.
    pub fn live_targets(&self) -> anyhow::Result<usize> {
        Ok(self
            .targets
            .lock()
            .map_err(|_| anyhow!("spill storage lock poisoned"))?
            .len())
    }
}

impl SpillStorage for InMemorySpillStorage {
    fn allocate_spill_target(&self, channel: ChannelId) -> anyhow::Result<SpillHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.targets
            .lock()
            .map_err(|_| anyhow!("spill storage lock poisoned"))?
            .insert(id, Vec::new());
        Ok(SpillHandle::new(id, channel))
    }

    fn append_bytes(&self, handle: &SpillHandle, bytes: &[u8]) -> anyhow::Result<()> {
        self.targets
            .lock()
            .map_err(|_| anyhow!("spill storage lock poisoned"))?
            .get_mut(&handle.id)
            .ok_or_else(|| anyhow!("spill target {} not found", handle.id))?
            .extend_from_slice(bytes);
        Ok(())
    }

    fn read_all(&self, handle: &SpillHandle) -> anyhow::Result<Vec<u8>> {
        self.targets
            .lock()
            .map_err(|_| anyhow!("spill storage lock poisoned"))?
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| anyhow!("spill target {} not found", handle.id))
    }

    fn release(&self, handle: SpillHandle) -> anyhow::Result<()> {
        self.targets
            .lock()
            .map_err(|_| anyhow!("spill storage lock poisoned"))?
            .remove(&handle.id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("spill target {} released twice", handle.id))
    }
}

/// Directory-backed spill storage: one file per spill target.
pub struct FsSpillStorage {
    base_path: PathBuf,
    next_id: AtomicU64,
}

impl FsSpillStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).with_context(|| {
            format!(
                "failed to create spill directory {}",
                base_path.display()
            )
        })?;
        Ok(Self {
            base_path,
            next_id: AtomicU64::new(0),
        })
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn target_path(&self, handle: &SpillHandle) -> PathBuf {
        self.base_path
            .join(format!("spill-{}-{}.bin", handle.channel.0, handle.id))
    }
}

impl SpillStorage for FsSpillStorage {
    fn allocate_spill_target(&self, channel: ChannelId) -> anyhow::Result<SpillHandle> {
        loop {
            let handle = SpillHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed), channel);
            let path = self.target_path(&handle);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(handle),
                // Left over by another storage instance sharing the directory.
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to create {}", path.display()));
                }
            }
        }
    }

    fn append_bytes(&self, handle: &SpillHandle, bytes: &[u8]) -> anyhow::Result<()> {
        let path = self.target_path(handle);
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("failed to append to {}", path.display()))
    }

    fn read_all(&self, handle: &SpillHandle) -> anyhow::Result<Vec<u8>> {
        let path = self.target_path(handle);
        fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }

    fn release(&self, handle: SpillHandle) -> anyhow::Result<()> {
        let path = self.target_path(&handle);
        fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))
    }
}
