use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc::{self, Receiver};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::Error;
use crate::events::CatalogEvent;
use crate::model::{ImageId, ImageRecord, OwnerId};
use crate::subscription::Subscription;

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Source of image records plus live insert/delete notifications.
///
/// Injected into the engine at construction so tests can substitute fakes.
pub trait ImageCatalog: Send + Sync {
    /// Snapshot of every record owned by `owner`, in no particular order.
    fn list_owned(&self, owner: &OwnerId) -> Result<Vec<ImageRecord>, Error>;

    /// Live change stream for `owner`'s records. The returned subscription
    /// releases the underlying listener exactly once when cancelled or
    /// dropped.
    fn subscribe(&self, owner: &OwnerId)
    -> Result<(Receiver<CatalogEvent>, Subscription), Error>;
}

/// Filesystem-backed catalog: one record per image file under a library
/// root, with live updates from a recursive directory watcher.
pub struct DirectoryCatalog {
    root: PathBuf,
    owner: OwnerId,
}

impl DirectoryCatalog {
    pub fn new(root: impl AsRef<Path>, owner: OwnerId) -> Result<Self, Error> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Error::BadLibrary(root.display().to_string()));
        }
        // Canonicalize so scan paths and watcher paths agree on record ids.
        let root = root.canonicalize()?;
        Ok(Self { root, owner })
    }

    fn record_for(&self, path: &Path) -> Option<ImageRecord> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) => {
                debug!(path = %path.display(), "skipping unreadable file: {err}");
                return None;
            }
        };
        let modified = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        let display_name = path
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
            .to_owned();
        Some(ImageRecord {
            id: ImageId(path.to_string_lossy().into_owned()),
            display_name,
            tag_text: String::new(),
            created_at: format_timestamp(modified.into()),
            file_ref: path.to_string_lossy().into_owned(),
            owner: self.owner.clone(),
        })
    }
}

/// Fixed-width backend-style timestamp; lexical order is chronological order.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.3fZ").to_string()
}

#[inline]
fn is_image(p: &Path) -> bool {
    matches!(
        p.extension()
            .and_then(OsStr::to_str)
            .map(|s| s.to_ascii_lowercase()),
        Some(ref e) if ["jpg", "jpeg", "png", "gif", "webp"].contains(&e.as_str())
    )
}

impl ImageCatalog for DirectoryCatalog {
    fn list_owned(&self, owner: &OwnerId) -> Result<Vec<ImageRecord>, Error> {
        if *owner != self.owner {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if is_image(path) {
                records.extend(self.record_for(path));
            }
        }
        debug!(discovered = records.len(), root = %self.root.display(), "library scan complete");
        Ok(records)
    }

    fn subscribe(
        &self,
        owner: &OwnerId,
    ) -> Result<(Receiver<CatalogEvent>, Subscription), Error> {
        let (tx, rx) = mpsc::channel::<CatalogEvent>(EVENT_CHANNEL_CAPACITY);
        if *owner != self.owner {
            // Foreign owner: an open but silent stream keeps the engine's
            // select loop well-behaved.
            return Ok((rx, Subscription::new(move || drop(tx))));
        }

        let catalog = Self {
            root: self.root.clone(),
            owner: self.owner.clone(),
        };
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => forward_event(&catalog, event, &tx),
            Err(err) => warn!("watch error: {err}"),
        })?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        info!(watching = %self.root.display(), "catalog watcher initialized (recursive)");

        let subscription = Subscription::new(move || drop(watcher));
        Ok((rx, subscription))
    }
}

fn forward_event(
    catalog: &DirectoryCatalog,
    event: Event,
    tx: &mpsc::Sender<CatalogEvent>,
) {
    match &event.kind {
        EventKind::Create(CreateKind::File) => {
            for path in event.paths.iter().filter(|p| is_image(p)) {
                if let Some(record) = catalog.record_for(path) {
                    debug!(path = %path.display(), "fs: add (create)");
                    let _ = tx.blocking_send(CatalogEvent::RecordAdded(record));
                }
            }
        }
        EventKind::Remove(RemoveKind::File) => {
            for path in event.paths.iter().filter(|p| is_image(p)) {
                debug!(path = %path.display(), "fs: remove");
                let id = ImageId(path.to_string_lossy().into_owned());
                let _ = tx.blocking_send(CatalogEvent::RecordRemoved(id));
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Moves surface as Name(Any) on some platforms; decide per path.
            for path in event.paths.iter().filter(|p| is_image(p)) {
                if path.exists() {
                    if let Some(record) = catalog.record_for(path) {
                        debug!(path = %path.display(), "fs: add (rename)");
                        let _ = tx.blocking_send(CatalogEvent::RecordAdded(record));
                    }
                } else {
                    debug!(path = %path.display(), "fs: remove (rename)");
                    let id = ImageId(path.to_string_lossy().into_owned());
                    let _ = tx.blocking_send(CatalogEvent::RecordRemoved(id));
                }
            }
        }
        _ => {
            debug!(kind = ?event.kind, "fs: ignored");
        }
    }
}
