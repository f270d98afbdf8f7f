// Shader hot reload
//
// A notify watcher on the shader directory forwards changed SPIR-V paths over
// a channel. The renderer drains it once per frame and rebuilds the pipeline
// when anything arrived.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};

pub struct ShaderWatcher {
    // Dropping the watcher stops the notifications
    _watcher: RecommendedWatcher,
    changes: Receiver<PathBuf>,
}

impl ShaderWatcher {
    pub fn new(shader_dir: &Path) -> Result<Self> {
        let (sender, changes) = mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_content_change(&event.kind) => {
                for path in event.paths.into_iter().filter(|path| is_shader_binary(path)) {
                    // Receiver gone means the renderer is shutting down
                    let _ = sender.send(path);
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("Shader watcher error: {}", e),
        })
        .context("Failed to create shader watcher")?;

        watcher
            .watch(shader_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", shader_dir))?;

        log::info!("Watching {:?} for shader changes", shader_dir);

        Ok(Self {
            _watcher: watcher,
            changes,
        })
    }

    /// Drain pending notifications. Returns true when at least one shader
    /// binary changed since the last call.
    pub fn poll(&self) -> bool {
        drain_changes(&self.changes)
    }
}

fn drain_changes(changes: &Receiver<PathBuf>) -> bool {
    let mut dirty = false;
    loop {
        match changes.try_recv() {
            Ok(path) => {
                log::debug!("Shader changed: {:?}", path);
                dirty = true;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return dirty,
        }
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

pub fn is_shader_binary(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "spv")
}
