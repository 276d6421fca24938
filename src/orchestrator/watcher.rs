//! Profile hot-reload (supplement to spec §4.7): watches the active
//! profile's file for external edits and triggers a background re-index, so
//! an operator hand-editing `profiles/<name>.json` doesn't need to restart
//! the gateway to pick up the change.
//!
//! Grounded directly on the teacher's
//! `mcp_routing::config_watcher::start_config_watcher`: watch the profile's
//! parent directory rather than the file itself (editors replace files
//! atomically rather than writing in place), and debounce briefly before
//! reacting.

use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Spawns a background thread watching `profile_path`'s parent directory and
/// an async task that debounces and forwards reload-worthy events to
/// `on_change`. Both stop once `cancel` is triggered.
pub fn watch_profile<F>(profile_path: PathBuf, cancel: CancellationToken, mut on_change: F)
where
    F: FnMut() + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Event>(16);

    std::thread::spawn(move || {
        if let Err(error) = run_watcher(&profile_path, tx) {
            tracing::warn!(%error, "profile file watcher stopped");
        }
    });

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) if should_reload(&event) => {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        on_change();
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
    });
}

fn run_watcher(profile_path: &Path, tx: mpsc::Sender<Event>) -> notify::Result<()> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = tx.blocking_send(event);
            }
        },
        Config::default().with_poll_interval(Duration::from_secs(1)),
    )?;

    let Some(watch_dir) = profile_path.parent() else {
        return Ok(());
    };
    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;

    // Park this thread for as long as the watcher needs to stay alive.
    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}

fn should_reload(event: &Event) -> bool {
    match &event.kind {
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => true,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Create(_) => true,
        _ => false,
    }
}
