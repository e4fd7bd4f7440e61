//! Background preview generation
//!
//! Decodes every file in the open folder down to a small grayscale preview,
//! off the interactive path. Previews use a fixed stretch rather than the
//! current slider state, so the strip stays stable while the user tweaks the
//! main view. A generation counter (epoch) ties each run to the folder it
//! was started for; results from a superseded run are dropped at publish
//! time instead of leaking into the new folder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use image::imageops::{self, FilterType};
use image::GrayImage;
use log::warn;
use tokio::sync::mpsc;

use crate::decode;
use crate::render::tonemap::asinh_stretch;
use crate::render::{self, DecodedImage};

/// Previews are downscaled to at most this width, aspect preserved
pub const PREVIEW_MAX_WIDTH: u32 = 400;
/// Fixed asinh stretch for previews, independent of the view sliders
pub const PREVIEW_STRETCH: f32 = 50.0;
/// Fixed gamma for previews
pub const PREVIEW_GAMMA: f32 = 1.2;

/// A small grayscale rendering of one exposure.
#[derive(Debug, Clone)]
pub struct Preview {
    pub raster: GrayImage,
}

/// Decode one file and render its preview.
///
/// Multi-channel images are averaged down to one channel; the strip is
/// grayscale regardless of the source.
pub fn generate(path: &Path) -> crate::Result<Preview> {
    let image = render::normalize(decode::load_image(path)?);
    Ok(render_preview(&image))
}

fn render_preview(image: &DecodedImage) -> Preview {
    let (w, h) = (image.width, image.height);
    let plane = (w * h) as usize;
    let channels = image.channels as usize;
    let samples = image.samples();

    let full = GrayImage::from_fn(w, h, |x, y| {
        let i = (y * w + x) as usize;
        let mut v = 0.0f32;
        for c in 0..channels {
            v += samples[c * plane + i];
        }
        let v = v / channels as f32;
        let v = asinh_stretch(v, PREVIEW_STRETCH).powf(1.0 / PREVIEW_GAMMA);
        image::Luma([(v.clamp(0.0, 1.0) * 255.0) as u8])
    });

    let out_w = PREVIEW_MAX_WIDTH;
    let out_h = ((out_w as u64 * h as u64 / w as u64) as u32).max(1);
    let raster = imageops::resize(&full, out_w, out_h, FilterType::Lanczos3);
    Preview { raster }
}

/// Shared, epoch-guarded store of generated previews.
///
/// Cloning is cheap; all clones see the same entries. The epoch increments
/// on [`clear_all`](Self::clear_all), and a publish carrying a stale epoch
/// is rejected. The check and the insert happen under the same lock, so a
/// concurrent clear can never be interleaved between them.
#[derive(Clone, Default)]
pub struct PreviewStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<PathBuf, Arc<Preview>>>,
    epoch: AtomicU64,
}

impl PreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current generation. Captured when a background run starts.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Drop every preview and advance the generation, invalidating any run
    /// still in flight. Returns the new epoch for the next run.
    pub fn clear_all(&self) -> u64 {
        let mut entries = self.inner.entries.lock().unwrap();
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        entries.clear();
        epoch
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Preview>> {
        self.inner.entries.lock().unwrap().get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.entries.lock().unwrap().contains_key(path)
    }

    pub fn remove(&self, path: &Path) {
        self.inner.entries.lock().unwrap().remove(path);
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored previews, snapshotted. Order is unspecified.
    pub fn snapshot(&self) -> Vec<(PathBuf, Arc<Preview>)> {
        self.inner
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(p, v)| (p.clone(), Arc::clone(v)))
            .collect()
    }

    /// Store a preview if `epoch` is still current. Returns false when the
    /// run that produced it has been superseded.
    pub fn publish(&self, epoch: u64, path: PathBuf, preview: Preview) -> bool {
        let mut entries = self.inner.entries.lock().unwrap();
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        entries.insert(path, Arc::new(preview));
        true
    }
}

/// Progress reported by a background preview run.
#[derive(Debug)]
pub enum ProgressEvent {
    /// One preview landed in the store
    Generated { path: PathBuf, percent: u8 },
    /// One file failed to decode; the run continues
    Failed { path: PathBuf, error: String, percent: u8 },
    /// The run finished (or was superseded)
    Finished { generated: usize, failed: usize },
}

/// Start generating previews for `paths` on a blocking worker thread.
///
/// `epoch` must be the store's current epoch at the time of the call;
/// results are silently dropped once the store is cleared again. Progress
/// arrives on the returned channel, terminated by a single
/// [`ProgressEvent::Finished`].
pub fn start_run(
    store: &PreviewStore,
    epoch: u64,
    paths: Vec<PathBuf>,
) -> mpsc::UnboundedReceiver<ProgressEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let store = store.clone();
    tokio::task::spawn_blocking(move || run_blocking(store, epoch, paths, tx));
    rx
}

fn run_blocking(
    store: PreviewStore,
    epoch: u64,
    paths: Vec<PathBuf>,
    tx: mpsc::UnboundedSender<ProgressEvent>,
) {
    let total = paths.len().max(1);
    let mut generated = 0usize;
    let mut failed = 0usize;

    for (i, path) in paths.into_iter().enumerate() {
        if store.epoch() != epoch {
            // The folder changed under us; stop touching the store.
            break;
        }
        let percent = ((i + 1) * 100 / total) as u8;
        if store.contains(&path) {
            generated += 1;
            let _ = tx.send(ProgressEvent::Generated { path, percent });
            continue;
        }
        match generate(&path) {
            Ok(preview) => {
                if store.publish(epoch, path.clone(), preview) {
                    generated += 1;
                    let _ = tx.send(ProgressEvent::Generated { path, percent });
                } else {
                    break;
                }
            }
            Err(e) => {
                warn!("preview failed for {}: {e}", path.display());
                store.remove(&path);
                failed += 1;
                let _ = tx.send(ProgressEvent::Failed {
                    path,
                    error: e.to_string(),
                    percent,
                });
            }
        }
    }

    let _ = tx.send(ProgressEvent::Finished { generated, failed });
}
