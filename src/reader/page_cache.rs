use image::DynamicImage;
use log::{debug, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::context::BookContext;

pub const DEFAULT_MEMORY_PAGES: usize = 50;
pub const DEFAULT_DISK_CACHE_MB: u64 = 500;

/// Decoded page images and load bookkeeping for the open book.
///
/// Everything is keyed by page number within one [`BookContext`]; switching books drops
/// the in-memory state, and results for any other book are ignored.
#[derive(Clone)]
pub struct PageCache {
    inner: Arc<RwLock<PageCacheInner>>,
}

struct PageCacheInner {
    context: Option<BookContext>,
    pages: HashMap<u32, DynamicImage>,
    access_order: VecDeque<u32>,
    pending: HashSet<u32>,
    max_memory_pages: usize,
    max_disk_bytes: u64,
    cache_dir: Option<PathBuf>,
}

impl PageCache {
    /// `cache_dir` of `None` keeps pages in memory only.
    pub fn new(cache_dir: Option<PathBuf>, max_memory_pages: usize, disk_cache_mb: u64) -> Self {
        if let Some(dir) = &cache_dir {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!("Failed to create page cache directory {}: {}", dir.display(), e);
            }
        }

        Self {
            inner: Arc::new(RwLock::new(PageCacheInner {
                context: None,
                pages: HashMap::new(),
                access_order: VecDeque::new(),
                pending: HashSet::new(),
                max_memory_pages: max_memory_pages.max(1),
                max_disk_bytes: disk_cache_mb * 1024 * 1024,
                cache_dir,
            })),
        }
    }

    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("comic-shelf")
            .join("pages")
    }

    pub async fn reset(&self, context: &BookContext) {
        let mut inner = self.inner.write().await;
        if inner.context.as_ref() == Some(context) {
            return;
        }
        debug!(
            "page cache: reset for {} ({} pages dropped)",
            context,
            inner.pages.len()
        );
        inner.context = Some(context.clone());
        inner.pages.clear();
        inner.access_order.clear();
        inner.pending.clear();
    }

    /// Claims `page` for loading. Returns false when it is already known, in flight, or
    /// belongs to a book that is no longer open.
    pub async fn begin_load(&self, context: &BookContext, page: u32) -> bool {
        let mut inner = self.inner.write().await;
        if inner.context.as_ref() != Some(context)
            || inner.pages.contains_key(&page)
            || inner.pending.contains(&page)
        {
            return false;
        }
        inner.pending.insert(page);
        true
    }

    pub async fn get_page(&self, context: &BookContext, page: u32) -> Option<DynamicImage> {
        let mut inner = self.inner.write().await;
        if inner.context.as_ref() != Some(context) {
            return None;
        }

        if let Some(image) = inner.pages.get(&page).cloned() {
            inner.touch(page);
            return Some(image);
        }

        let image = inner.load_from_disk(context, page)?;
        inner.insert_memory(page, image.clone());
        Some(image)
    }

    /// Stores a loaded page. Returns false (and stores nothing) for a stale book.
    pub async fn insert_page(&self, context: &BookContext, page: u32, image: DynamicImage) -> bool {
        let mut inner = self.inner.write().await;
        if inner.context.as_ref() != Some(context) {
            debug!("page cache: dropping stale page {} of {}", page, context);
            return false;
        }
        inner.save_to_disk(context, page, &image);
        inner.insert_memory(page, image);
        inner.pending.remove(&page);
        true
    }

    /// Releases a failed load so the page can be requested again.
    pub async fn mark_failed(&self, context: &BookContext, page: u32, message: &str) {
        let mut inner = self.inner.write().await;
        if inner.context.as_ref() != Some(context) {
            return;
        }
        debug!("page cache: page {} of {} failed: {}", page, context, message);
        inner.pending.remove(&page);
    }
}

impl PageCacheInner {
    fn touch(&mut self, page: u32) {
        self.access_order.retain(|p| *p != page);
        self.access_order.push_back(page);
    }

    fn insert_memory(&mut self, page: u32, image: DynamicImage) {
        if !self.pages.contains_key(&page) && self.pages.len() >= self.max_memory_pages {
            if let Some(oldest) = self.access_order.pop_front() {
                self.pages.remove(&oldest);
            }
        }

        self.touch(page);
        self.pages.insert(page, image);
    }

    fn page_path(&self, context: &BookContext, page: u32) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        Some(dir.join(context.cache_key()).join(format!("{page}.jpg")))
    }

    fn load_from_disk(&self, context: &BookContext, page: u32) -> Option<DynamicImage> {
        let path = self.page_path(context, page)?;
        let bytes = fs::read(&path).ok()?;
        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()?
            .decode()
            .ok()
    }

    fn save_to_disk(&self, context: &BookContext, page: u32, image: &DynamicImage) {
        let Some(path) = self.page_path(context, page) else {
            return;
        };
        if let Some(root) = &self.cache_dir {
            cleanup_old_cache(root, self.max_disk_bytes);
        }
        if let Some(parent) = path.parent() {
            if fs::create_dir_all(parent).is_err() {
                return;
            }
        }

        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        match fs::File::create(&path) {
            Ok(mut file) => {
                if let Err(e) = rgb.write_to(&mut file, image::ImageFormat::Jpeg) {
                    warn!("Failed to cache page {} of {}: {}", page, context, e);
                }
            }
            Err(e) => warn!("Failed to create {}: {}", path.display(), e),
        }
    }
}

/// Trims the on-disk cache to 80% of `max_bytes`, oldest files first.
fn cleanup_old_cache(root: &Path, max_bytes: u64) {
    let entries: Vec<_> = fs::read_dir(root)
        .ok()
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|dir| fs::read_dir(dir.path()).ok())
                .flat_map(|rd| rd.filter_map(|e| e.ok()))
                .filter_map(|e| {
                    let meta = e.metadata().ok()?;
                    let modified = meta.modified().ok()?;
                    Some((e.path(), meta.len(), modified))
                })
                .collect()
        })
        .unwrap_or_default();

    let total_size: u64 = entries.iter().map(|(_, size, _)| size).sum();

    if total_size > max_bytes {
        let mut entries = entries;
        entries.sort_by_key(|(_, _, modified)| *modified);

        let mut current_size = total_size;
        for (path, size, _) in entries {
            if current_size <= max_bytes * 80 / 100 {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                current_size -= size;
            }
        }
    }
}
