//! The interactive browsing session
//!
//! One [`Session`] per open folder: the sorted file list, the current
//! selection, the active tone-map parameters, and the caches that keep
//! stepping between exposures fast. Everything here runs on the foreground
//! path; the only shared piece is the [`PreviewStore`] handed to background
//! preview runs.

use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use log::info;
use walkdir::WalkDir;

use crate::cache::DecodedCache;
use crate::decode;
use crate::error::{DecodeError, Result};
use crate::render::tonemap::{ToneMapEngine, ToneMapParams};
use crate::render::{self, DecodedImage};
use crate::thumbs::{self, PreviewStore, ProgressEvent};

/// File extensions recognized when scanning a folder (case-insensitive)
pub const EXTENSIONS: [&str; 3] = ["xisf", "xifs", "fits"];

/// One row of the file list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// File size rounded to whole megabytes; `None` if the size could not
    /// be read
    pub size_mb: Option<u64>,
}

/// The browsing state for one open folder.
pub struct Session {
    folder: Option<PathBuf>,
    files: Vec<PathBuf>,
    current: Option<usize>,
    params: ToneMapParams,
    cache: DecodedCache,
    engine: ToneMapEngine,
    previews: PreviewStore,
    epoch: u64,
}

impl Session {
    pub fn new() -> Self {
        let previews = PreviewStore::new();
        let epoch = previews.epoch();
        Session {
            folder: None,
            files: Vec::new(),
            current: None,
            params: ToneMapParams::default(),
            cache: DecodedCache::new(),
            engine: ToneMapEngine::new(),
            previews,
            epoch,
        }
    }

    /// Open a folder: scan it non-recursively for supported files, reset
    /// every cache, and select the first file. Returns the number of files
    /// found.
    pub fn open_folder(&mut self, folder: &Path) -> Result<usize> {
        let files = scan_folder(folder)?;
        info!("opened {} with {} files", folder.display(), files.len());

        self.folder = Some(folder.to_path_buf());
        self.current = if files.is_empty() { None } else { Some(0) };
        self.files = files;
        self.cache.clear();
        self.engine.reset();
        self.epoch = self.previews.clear_all();
        Ok(self.files.len())
    }

    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current.map(|i| self.files[i].as_path())
    }

    /// Step the selection by `delta`, clamped to the list bounds. Returns
    /// the newly selected path, or `None` when the list is empty.
    pub fn navigate(&mut self, delta: i64) -> Option<&Path> {
        let current = self.current?;
        let last = self.files.len() as i64 - 1;
        let next = (current as i64 + delta).clamp(0, last) as usize;
        if next != current {
            self.current = Some(next);
            // The raster cache keys on parameters only, not on the image.
            self.engine.reset();
        }
        self.current_path()
    }

    /// Select a file by index. Out-of-range indices are ignored.
    pub fn select(&mut self, index: usize) {
        if index < self.files.len() && self.current != Some(index) {
            self.current = Some(index);
            self.engine.reset();
        }
    }

    pub fn params(&self) -> &ToneMapParams {
        &self.params
    }

    pub fn set_params(&mut self, params: ToneMapParams) {
        self.params = params;
    }

    /// The decoded image for `path`, decoding and caching on a miss.
    pub fn image(&mut self, path: &Path) -> Result<&DecodedImage> {
        if self.cache.get(path).is_none() {
            let image = render::normalize(decode::load_image(path)?);
            self.cache.put(path.to_path_buf(), image);
        }
        Ok(self.cache.get(path).expect("inserted above"))
    }

    /// The decoded image for the current selection.
    pub fn current_image(&mut self) -> Result<&DecodedImage> {
        let path = self
            .current_path()
            .ok_or(DecodeError::NoImageElement)?
            .to_path_buf();
        self.image(&path)
    }

    /// Tone-map the current selection with the active parameters.
    ///
    /// Decode, normalization, and the raster all come from their caches
    /// when warm; only a parameter change or a selection change pays the
    /// recompute.
    pub fn render_current(&mut self) -> Result<&DynamicImage> {
        let path = self
            .current_path()
            .ok_or(DecodeError::NoImageElement)?
            .to_path_buf();
        if self.cache.get(&path).is_none() {
            let image = render::normalize(decode::load_image(&path)?);
            self.cache.put(path.clone(), image);
        }
        let params = self.params;
        self.engine
            .render(self.cache.get(&path).expect("inserted above"), &params)
    }

    /// Drop every cached artifact for `path`; the next access re-decodes
    /// from disk.
    pub fn invalidate(&mut self, path: &Path) {
        self.cache.invalidate(path);
        self.previews.remove(path);
        self.engine.reset();
    }

    pub fn previews(&self) -> &PreviewStore {
        &self.previews
    }

    /// Kick off a background preview run for the open folder's files.
    pub fn start_preview_run(&self) -> tokio::sync::mpsc::UnboundedReceiver<ProgressEvent> {
        thumbs::start_run(&self.previews, self.epoch, self.files.clone())
    }

    /// The file list with sizes, for display.
    pub fn list_entries(&self) -> Vec<FileEntry> {
        self.files
            .iter()
            .map(|path| FileEntry {
                path: path.clone(),
                size_mb: fs::metadata(path)
                    .ok()
                    .map(|m| (m.len() + 512 * 1024) / (1024 * 1024)),
            })
            .collect()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Scan one folder (no recursion) for supported files, sorted by file name
/// without case sensitivity.
pub fn scan_folder(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = entry.map_err(|e| DecodeError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if supported {
            files.push(path);
        }
    }
    files.sort_by_key(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });
    Ok(files)
}
