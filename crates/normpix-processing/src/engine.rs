//! Process-wide image engine lifecycle.
//!
//! The engine owns the resources shared by every conversion: a worker pool
//! (a semaphore bounding concurrent pipelines) and a memory-capped cache of
//! decoded images. Initialization runs exactly once per engine no matter how
//! many threads race it, and every caller observes the outcome of that single
//! attempt. Shutdown is likewise idempotent: the first effective call drains
//! in-flight conversions up to a bounded timeout, then releases the caches.

use std::io::Cursor;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once, OnceLock};
use std::time::Duration;

use image::{DynamicImage, ImageFormat, ImageReader};
use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::EngineError;

/// Lifecycle states of the engine. Transitions flow one way:
/// `Uninitialized → Ready → ShuttingDown → Terminated`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Uninitialized = 0,
    Ready = 1,
    ShuttingDown = 2,
    Terminated = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Ready,
            2 => EngineState::ShuttingDown,
            3 => EngineState::Terminated,
            _ => EngineState::Uninitialized,
        }
    }
}

/// Resource ceilings applied at startup.
#[derive(Clone, Copy, Debug)]
pub struct EngineSettings {
    /// Number of conversion pipelines allowed to run at once.
    pub concurrency: usize,
    /// Upper bound on decoded-pixel bytes held in the cache.
    pub max_cache_memory_bytes: u64,
    /// Upper bound on cached decode results. Zero disables the cache.
    pub max_cache_entries: usize,
    /// How long `shutdown` waits for in-flight conversions to finish.
    pub drain_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_cache_memory_bytes: 50 * 1024 * 1024,
            max_cache_entries: 10,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Shared image engine. Applications hold it in an `Arc` and hand clones to
/// the upload path and the shutdown path.
pub struct ImageEngine {
    state: AtomicU8,
    init: Once,
    startup_error: OnceLock<String>,
    inner: OnceLock<EngineInner>,
    in_flight: AtomicUsize,
    live_handles: AtomicUsize,
    startup_attempts: AtomicUsize,
}

impl Default for ImageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageEngine {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(EngineState::Uninitialized as u8),
            init: Once::new(),
            startup_error: OnceLock::new(),
            inner: OnceLock::new(),
            in_flight: AtomicUsize::new(0),
            live_handles: AtomicUsize::new(0),
            startup_attempts: AtomicUsize::new(0),
        }
    }

    /// Start the engine. Safe to call from any number of threads: the first
    /// caller performs the startup and every caller (including later ones)
    /// observes the same outcome. A failed startup is permanent for this
    /// engine instance.
    pub fn initialize(&self, settings: EngineSettings) -> Result<(), EngineError> {
        self.init.call_once(|| {
            self.startup_attempts.fetch_add(1, Ordering::SeqCst);
            match EngineInner::start(settings) {
                Ok(inner) => {
                    let _ = self.inner.set(inner);
                    self.state.store(EngineState::Ready as u8, Ordering::SeqCst);
                    tracing::info!(
                        concurrency = settings.concurrency,
                        max_cache_memory_bytes = settings.max_cache_memory_bytes,
                        max_cache_entries = settings.max_cache_entries,
                        "Image engine initialized"
                    );
                }
                Err(message) => {
                    tracing::error!(error = %message, "Image engine startup failed");
                    let _ = self.startup_error.set(message);
                }
            }
        });

        match self.startup_error.get() {
            Some(message) => Err(EngineError::StartupFailed(message.clone())),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    /// Number of conversions currently holding a ticket.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of decoded-image handles currently alive.
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::SeqCst)
    }

    /// Number of decode results currently cached.
    pub fn cached_decodes(&self) -> usize {
        self.inner.get().map(EngineInner::cache_len).unwrap_or(0)
    }

    /// Admit one conversion. Waits for a worker slot, then hands back a
    /// ticket that keeps the slot and the in-flight count until dropped.
    /// Fails with [`EngineError::NotReady`] outside the `Ready` state.
    pub async fn begin_conversion(self: Arc<Self>) -> Result<ConversionTicket, EngineError> {
        // Counted before the state check so that shutdown, which flips the
        // state first, can never miss a conversion it must drain.
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let workers = match (self.is_ready(), self.inner.get()) {
            (true, Some(inner)) => inner.workers.clone(),
            _ => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Err(EngineError::NotReady);
            }
        };

        let permit = match workers.acquire_owned().await {
            Ok(permit) => permit,
            // The semaphore is closed by shutdown; waiters are turned away.
            Err(_) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Err(EngineError::NotReady);
            }
        };

        if !self.is_ready() {
            drop(permit);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::NotReady);
        }

        Ok(ConversionTicket {
            engine: self,
            _permit: permit,
        })
    }

    /// Stop the engine. Only the first call on a `Ready` engine has any
    /// effect: it moves the state to `ShuttingDown`, refuses new tickets,
    /// waits up to the configured drain timeout for in-flight conversions,
    /// then clears the decode cache and lands in `Terminated`. Every other
    /// call, including on an engine that never started, is a no-op.
    pub async fn shutdown(&self) {
        let transitioned = self
            .state
            .compare_exchange(
                EngineState::Ready as u8,
                EngineState::ShuttingDown as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if !transitioned {
            return;
        }

        let Some(inner) = self.inner.get() else {
            self.state.store(EngineState::Terminated as u8, Ordering::SeqCst);
            return;
        };

        // Pending begin_conversion calls wake up with an error.
        inner.workers.close();

        let deadline = tokio::time::Instant::now() + inner.settings.drain_timeout;
        while self.in_flight.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stranded = self.in_flight.load(Ordering::SeqCst);
        if stranded > 0 {
            tracing::warn!(
                in_flight = stranded,
                "Engine drain timed out with conversions still running"
            );
        }

        inner.clear_cache();
        self.state.store(EngineState::Terminated as u8, Ordering::SeqCst);
        tracing::info!("Image engine shut down");
    }

    /// Decode a source buffer, consulting the cache first. The returned
    /// handle keeps the live-handle count accurate for the pixel data's
    /// lifetime. The sniffed container format rides along for callers that
    /// need to know where metadata may live.
    pub(crate) fn decode(
        self: Arc<Self>,
        data: &[u8],
    ) -> Result<(ImageHandle, Option<ImageFormat>), image::ImageError> {
        let digest: [u8; 32] = Sha256::digest(data).into();

        if let Some(inner) = self.inner.get() {
            if let Some((image, format)) = inner.cache_get(&digest) {
                tracing::debug!(size_bytes = data.len(), "Decode cache hit");
                return Ok((ImageHandle::new(&self, image), format));
            }
        }

        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(image::ImageError::IoError)?;
        let format = reader.format();
        let image = reader.decode()?;

        if let Some(inner) = self.inner.get() {
            inner.cache_put(digest, &image, format);
        }

        Ok((ImageHandle::new(&self, image), format))
    }

    #[cfg(test)]
    pub(crate) fn startup_attempts(&self) -> usize {
        self.startup_attempts.load(Ordering::SeqCst)
    }
}

/// Admission token for one conversion. Holds a worker slot; dropping it
/// releases the slot and decrements the engine's in-flight count.
pub struct ConversionTicket {
    engine: Arc<ImageEngine>,
    _permit: OwnedSemaphorePermit,
}

impl ConversionTicket {
    pub(crate) fn engine(&self) -> &Arc<ImageEngine> {
        &self.engine
    }
}

impl Drop for ConversionTicket {
    fn drop(&mut self) {
        self.engine.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Decoded image whose lifetime is tracked by the engine. Transforms go
/// through [`ImageHandle::map`] so the count stays accurate on every path.
pub struct ImageHandle {
    image: DynamicImage,
    _guard: HandleGuard,
}

impl ImageHandle {
    fn new(engine: &Arc<ImageEngine>, image: DynamicImage) -> Self {
        engine.live_handles.fetch_add(1, Ordering::SeqCst);
        Self {
            image,
            _guard: HandleGuard {
                engine: Arc::clone(engine),
            },
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Replace the pixel data, keeping the same guard. On error the guard
    /// drops and the live-handle count falls back in step.
    pub fn map<E>(
        self,
        f: impl FnOnce(DynamicImage) -> Result<DynamicImage, E>,
    ) -> Result<Self, E> {
        let Self { image, _guard } = self;
        Ok(Self {
            image: f(image)?,
            _guard,
        })
    }
}

struct HandleGuard {
    engine: Arc<ImageEngine>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.engine.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

struct EngineInner {
    workers: Arc<Semaphore>,
    cache: Mutex<DecodeCache>,
    settings: EngineSettings,
}

impl EngineInner {
    fn start(settings: EngineSettings) -> Result<Self, String> {
        if settings.concurrency == 0 {
            return Err("engine concurrency must be at least 1".to_string());
        }
        Ok(Self {
            workers: Arc::new(Semaphore::new(settings.concurrency)),
            cache: Mutex::new(DecodeCache::new(
                settings.max_cache_entries,
                settings.max_cache_memory_bytes,
            )),
            settings,
        })
    }

    fn cache(&self) -> MutexGuard<'_, DecodeCache> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn cache_get(&self, digest: &[u8; 32]) -> Option<(DynamicImage, Option<ImageFormat>)> {
        self.cache().get(digest)
    }

    fn cache_put(&self, digest: [u8; 32], image: &DynamicImage, format: Option<ImageFormat>) {
        self.cache().put(digest, image, format);
    }

    fn cache_len(&self) -> usize {
        self.cache().len()
    }

    fn clear_cache(&self) {
        self.cache().clear();
    }
}

struct CachedDecode {
    image: DynamicImage,
    format: Option<ImageFormat>,
    bytes: u64,
}

/// LRU over decoded images, bounded by entry count and by pixel bytes.
struct DecodeCache {
    entries: Option<LruCache<[u8; 32], CachedDecode>>,
    memory_used: u64,
    memory_limit: u64,
}

impl DecodeCache {
    fn new(max_entries: usize, memory_limit: u64) -> Self {
        Self {
            entries: NonZeroUsize::new(max_entries).map(LruCache::new),
            memory_used: 0,
            memory_limit,
        }
    }

    fn get(&mut self, digest: &[u8; 32]) -> Option<(DynamicImage, Option<ImageFormat>)> {
        self.entries
            .as_mut()?
            .get(digest)
            .map(|cached| (cached.image.clone(), cached.format))
    }

    fn put(&mut self, digest: [u8; 32], image: &DynamicImage, format: Option<ImageFormat>) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };
        let bytes = image.as_bytes().len() as u64;
        if bytes > self.memory_limit {
            return;
        }
        if let Some(replaced) = entries.put(
            digest,
            CachedDecode {
                image: image.clone(),
                format,
                bytes,
            },
        ) {
            self.memory_used -= replaced.bytes;
        }
        self.memory_used += bytes;
        while self.memory_used > self.memory_limit {
            match entries.pop_lru() {
                Some((_, evicted)) => self.memory_used -= evicted.bytes,
                None => break,
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.as_ref().map(LruCache::len).unwrap_or(0)
    }

    fn clear(&mut self) {
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
        self.memory_used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([10, 20, 30, 255]),
        ));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn initialize_runs_startup_exactly_once_across_threads() {
        let engine = Arc::new(ImageEngine::new());
        let mut joins = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            joins.push(std::thread::spawn(move || {
                engine.initialize(EngineSettings::default())
            }));
        }
        for join in joins {
            assert!(join.join().unwrap().is_ok());
        }
        assert_eq!(engine.startup_attempts(), 1);
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[test]
    fn failed_startup_is_observed_by_every_caller() {
        let engine = Arc::new(ImageEngine::new());
        let settings = EngineSettings {
            concurrency: 0,
            ..EngineSettings::default()
        };

        let mut joins = Vec::new();
        for _ in 0..4 {
            let engine = Arc::clone(&engine);
            joins.push(std::thread::spawn(move || engine.initialize(settings)));
        }
        for join in joins {
            match join.join().unwrap() {
                Err(EngineError::StartupFailed(message)) => {
                    assert!(message.contains("concurrency"))
                }
                other => panic!("expected StartupFailed, got {other:?}"),
            }
        }

        assert_eq!(engine.startup_attempts(), 1);
        assert_eq!(engine.state(), EngineState::Uninitialized);
        // A later retry reports the same historical outcome.
        assert!(matches!(
            engine.initialize(EngineSettings::default()),
            Err(EngineError::StartupFailed(_))
        ));
    }

    #[tokio::test]
    async fn conversion_is_rejected_outside_ready() {
        let engine = Arc::new(ImageEngine::new());
        assert!(matches!(
            engine.clone().begin_conversion().await,
            Err(EngineError::NotReady)
        ));

        engine.initialize(EngineSettings::default()).unwrap();
        let ticket = engine.clone().begin_conversion().await.unwrap();
        assert_eq!(engine.in_flight(), 1);
        drop(ticket);
        assert_eq!(engine.in_flight(), 0);

        engine.shutdown().await;
        assert!(matches!(
            engine.clone().begin_conversion().await,
            Err(EngineError::NotReady)
        ));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_noop_before_startup() {
        let never_started = ImageEngine::new();
        never_started.shutdown().await;
        assert_eq!(never_started.state(), EngineState::Uninitialized);

        let engine = Arc::new(ImageEngine::new());
        engine.initialize(EngineSettings::default()).unwrap();
        engine.shutdown().await;
        assert_eq!(engine.state(), EngineState::Terminated);
        engine.shutdown().await;
        assert_eq!(engine.state(), EngineState::Terminated);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_conversions() {
        let engine = Arc::new(ImageEngine::new());
        engine
            .initialize(EngineSettings {
                drain_timeout: Duration::from_millis(500),
                ..EngineSettings::default()
            })
            .unwrap();

        let ticket = engine.clone().begin_conversion().await.unwrap();
        let release = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(ticket);
        };
        tokio::join!(engine.shutdown(), release);

        assert_eq!(engine.state(), EngineState::Terminated);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn repeat_decodes_hit_the_cache() {
        let engine = Arc::new(ImageEngine::new());
        engine.initialize(EngineSettings::default()).unwrap();
        let data = png_bytes(4, 4);

        let (first, format) = engine.clone().decode(&data).unwrap();
        assert_eq!(format, Some(ImageFormat::Png));
        assert_eq!(engine.cached_decodes(), 1);
        assert_eq!(engine.live_handles(), 1);
        drop(first);

        let (second, _) = engine.clone().decode(&data).unwrap();
        assert_eq!(engine.cached_decodes(), 1);
        drop(second);
        assert_eq!(engine.live_handles(), 0);
    }

    #[tokio::test]
    async fn zero_entry_cache_is_disabled() {
        let engine = Arc::new(ImageEngine::new());
        engine
            .initialize(EngineSettings {
                max_cache_entries: 0,
                ..EngineSettings::default()
            })
            .unwrap();
        let data = png_bytes(4, 4);
        let (handle, _) = engine.clone().decode(&data).unwrap();
        drop(handle);
        assert_eq!(engine.cached_decodes(), 0);
    }

    #[test]
    fn cache_evicts_oldest_when_over_memory_limit() {
        // 4x4 RGBA decodes to 64 bytes; cap fits two images, not three.
        let mut cache = DecodeCache::new(10, 128);
        let image = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        cache.put([1; 32], &image, None);
        cache.put([2; 32], &image, None);
        cache.put([3; 32], &image, None);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&[1; 32]).is_none());
        assert!(cache.get(&[3; 32]).is_some());
    }
}
