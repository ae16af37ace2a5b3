// Hot-reloadable resources
//
// A notify watcher over the asset directory feeds (kind, path) events into a
// channel. Events are drained on the render thread; a written file queues a
// reload tagged with the last submitted frame, and the reload only runs once
// the GPU has completed that frame.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::error::RenderResult;

/// Something that can be rebuilt from the bytes of its file.
pub trait Resource {
    fn reload(&mut self, bytes: &[u8]) -> RenderResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Deleted,
    Written,
}

/// A change to a file, `path` relative to the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
}

pub struct ResourceManager<R: Resource> {
    root: PathBuf,
    resources: HashMap<PathBuf, R>,
    /// Reloads waiting for a frame to complete. `None` means no frame had
    /// been submitted when the change arrived.
    pending: HashMap<PathBuf, Option<u64>>,
    sender: Sender<FileEvent>,
    events: Receiver<FileEvent>,
    _watcher: Option<RecommendedWatcher>,
}

impl<R: Resource> ResourceManager<R> {
    /// Watch `root` recursively for changes.
    pub fn watch(root: impl AsRef<Path>) -> RenderResult<Self> {
        let root = root.as_ref().canonicalize()?;
        let mut manager = Self::unwatched(&root);

        let sender = manager.sender.clone();
        let watch_root = root.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<notify::Event>| match result {
                Ok(event) => {
                    let Some(kind) = event_kind(&event.kind) else {
                        return;
                    };
                    for path in &event.paths {
                        if let Ok(relative) = path.strip_prefix(&watch_root) {
                            let _ = sender.send(FileEvent {
                                kind,
                                path: relative.to_path_buf(),
                            });
                        }
                    }
                }
                Err(e) => log::warn!("File watcher error: {}", e),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        log::info!("Watching {:?} for resource changes", root);
        manager._watcher = Some(watcher);
        Ok(manager)
    }

    /// A manager without a watcher. Events arrive only through `sender`.
    pub fn unwatched(root: impl AsRef<Path>) -> Self {
        let (sender, events) = mpsc::channel();
        Self {
            root: root.as_ref().to_path_buf(),
            resources: HashMap::new(),
            pending: HashMap::new(),
            sender,
            events,
            _watcher: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sender(&self) -> Sender<FileEvent> {
        self.sender.clone()
    }

    /// Read `path` (relative to the root), build the resource from it and
    /// start tracking it.
    pub fn load(&mut self, path: impl AsRef<Path>, mut resource: R) -> RenderResult<&R> {
        let path = path.as_ref().to_path_buf();
        let bytes = fs::read(self.root.join(&path))?;
        resource.reload(&bytes)?;

        log::debug!("Loaded resource {:?}", path);
        self.pending.remove(&path);
        self.resources.insert(path.clone(), resource);
        Ok(&self.resources[&path])
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&R> {
        self.resources.get(path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn pending_reloads(&self) -> usize {
        self.pending.len()
    }

    /// Drain queued file events. `last_submitted` is the most recent frame
    /// handed to the GPU.
    pub fn poll(&mut self, last_submitted: Option<u64>) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event, last_submitted);
        }
    }

    pub fn handle_event(&mut self, event: FileEvent, last_submitted: Option<u64>) {
        match event.kind {
            FileEventKind::Deleted => {
                if self.resources.remove(&event.path).is_some() {
                    log::info!("Resource {:?} deleted", event.path);
                }
                self.pending.remove(&event.path);
            }
            FileEventKind::Created | FileEventKind::Written => {
                if !self.resources.contains_key(&event.path) {
                    log::trace!("Ignoring change to untracked file {:?}", event.path);
                    return;
                }
                log::debug!(
                    "Reload of {:?} queued behind frame {:?}",
                    event.path,
                    last_submitted
                );
                self.pending.insert(event.path, last_submitted);
            }
        }
    }

    /// Run every queued reload whose frame the GPU has finished. Returns the
    /// number of resources reloaded.
    pub fn reload_ready(&mut self, completed: Option<u64>) -> usize {
        let mut ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, frame)| **frame <= completed)
            .map(|(path, _)| path.clone())
            .collect();
        ready.sort();

        let mut reloaded = 0;
        for path in ready {
            self.pending.remove(&path);
            let Some(resource) = self.resources.get_mut(&path) else {
                continue;
            };

            let bytes = match fs::read(self.root.join(&path)) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("Could not read {:?} for reload: {}", path, e);
                    continue;
                }
            };
            match resource.reload(&bytes) {
                Ok(()) => {
                    log::info!("Reloaded {:?}", path);
                    reloaded += 1;
                }
                Err(e) => log::error!("Reload of {:?} failed: {}", path, e),
            }
        }
        reloaded
    }
}

fn event_kind(kind: &EventKind) -> Option<FileEventKind> {
    match kind {
        EventKind::Create(_) => Some(FileEventKind::Created),
        EventKind::Remove(_) => Some(FileEventKind::Deleted),
        EventKind::Modify(_) => Some(FileEventKind::Written),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct TextResource {
        text: String,
        reloads: u32,
    }

    impl Resource for TextResource {
        fn reload(&mut self, bytes: &[u8]) -> RenderResult<()> {
            if bytes.starts_with(b"!") {
                return Err(RenderError::Vulkan {
                    operation: "parse",
                    result: ash::vk::Result::ERROR_INITIALIZATION_FAILED,
                });
            }
            self.text = String::from_utf8_lossy(bytes).into_owned();
            self.reloads += 1;
            Ok(())
        }
    }

    fn setup() -> (TempDir, ResourceManager<TextResource>) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "first").unwrap();
        let mut manager = ResourceManager::unwatched(dir.path());
        manager.load("a.txt", TextResource::default()).unwrap();
        (dir, manager)
    }

    fn written(path: &str) -> FileEvent {
        FileEvent {
            kind: FileEventKind::Written,
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn load_reads_the_file() {
        let (_dir, manager) = setup();
        let resource = manager.get("a.txt").unwrap();
        assert_eq!(resource.text, "first");
        assert_eq!(resource.reloads, 1);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn load_of_missing_file_is_io_error() {
        let (_dir, mut manager) = setup();
        let err = manager.load("missing.txt", TextResource::default()).unwrap_err();
        assert!(matches!(err, RenderError::Io(_)));
        assert!(manager.get("missing.txt").is_none());
    }

    #[test]
    fn reload_waits_for_the_submitted_frame() {
        let (dir, mut manager) = setup();
        fs::write(dir.path().join("a.txt"), "second").unwrap();
        manager.handle_event(written("a.txt"), Some(3));

        assert_eq!(manager.reload_ready(Some(2)), 0);
        assert_eq!(manager.get("a.txt").unwrap().text, "first");
        assert_eq!(manager.pending_reloads(), 1);

        assert_eq!(manager.reload_ready(Some(3)), 1);
        assert_eq!(manager.get("a.txt").unwrap().text, "second");
        assert_eq!(manager.pending_reloads(), 0);
    }

    #[test]
    fn reload_before_any_frame_is_immediate() {
        let (dir, mut manager) = setup();
        fs::write(dir.path().join("a.txt"), "early").unwrap();
        manager.handle_event(written("a.txt"), None);

        assert_eq!(manager.reload_ready(None), 1);
        assert_eq!(manager.get("a.txt").unwrap().text, "early");
    }

    #[test]
    fn delete_drops_resource_and_pending_reload() {
        let (_dir, mut manager) = setup();
        manager.handle_event(written("a.txt"), Some(0));
        manager.handle_event(
            FileEvent {
                kind: FileEventKind::Deleted,
                path: PathBuf::from("a.txt"),
            },
            Some(0),
        );

        assert!(manager.get("a.txt").is_none());
        assert_eq!(manager.pending_reloads(), 0);
        assert_eq!(manager.reload_ready(Some(10)), 0);
    }

    #[test]
    fn untracked_files_are_ignored() {
        let (_dir, mut manager) = setup();
        manager.handle_event(written("b.txt"), Some(0));
        assert_eq!(manager.pending_reloads(), 0);
    }

    #[test]
    fn poll_drains_the_channel() {
        let (dir, mut manager) = setup();
        fs::write(dir.path().join("a.txt"), "polled").unwrap();
        let sender = manager.sender();
        sender.send(written("a.txt")).unwrap();
        sender.send(written("a.txt")).unwrap();

        manager.poll(Some(7));
        assert_eq!(manager.pending_reloads(), 1);
        assert_eq!(manager.reload_ready(Some(7)), 1);
        assert_eq!(manager.get("a.txt").unwrap().reloads, 2);
    }

    #[test]
    fn failed_reload_keeps_previous_contents() {
        let (dir, mut manager) = setup();
        fs::write(dir.path().join("a.txt"), "!broken").unwrap();
        manager.handle_event(written("a.txt"), None);

        assert_eq!(manager.reload_ready(None), 0);
        assert_eq!(manager.get("a.txt").unwrap().text, "first");
        assert_eq!(manager.pending_reloads(), 0);
    }

    #[test]
    fn notify_kinds_map_to_file_events() {
        use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};
        assert_eq!(
            event_kind(&EventKind::Create(CreateKind::File)),
            Some(FileEventKind::Created)
        );
        assert_eq!(
            event_kind(&EventKind::Remove(RemoveKind::File)),
            Some(FileEventKind::Deleted)
        );
        assert_eq!(
            event_kind(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(FileEventKind::Written)
        );
        assert_eq!(event_kind(&EventKind::Any), None);
    }
}
