use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::vault::LocalVault;

/// Narrow host-notification surface: the engine reacts to these four
/// events and nothing else from the underlying watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    Created(String),
    Modified(String),
    Renamed { from: String, to: String },
    Deleted(String),
}

pub fn start_notify_watcher(
    vault: &LocalVault,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<LocalEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let root = vault.root().to_path_buf();
    // The callback outlives the borrow, so it maps paths through its own
    // root-only vault view.
    let mapper = LocalVault::new(root.clone(), Vec::new());
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            for local in map_event(&mapper, event) {
                let _ = tx.send(local);
            }
        }
    })?;
    watcher.watch(root.as_path(), RecursiveMode::Recursive)?;
    Ok((watcher, rx))
}

fn map_event(vault: &LocalVault, event: Event) -> Vec<LocalEvent> {
    match event.kind {
        EventKind::Modify(notify::event::ModifyKind::Name(_)) => {
            if event.paths.len() >= 2
                && let (Some(from), Some(to)) = (
                    vault.rel_path(&event.paths[0]),
                    vault.rel_path(&event.paths[1]),
                )
            {
                return vec![LocalEvent::Renamed { from, to }];
            }
            Vec::new()
        }
        EventKind::Create(_) => map_paths(vault, &event, LocalEvent::Created),
        EventKind::Modify(_) => map_paths(vault, &event, LocalEvent::Modified),
        EventKind::Remove(_) => map_paths(vault, &event, LocalEvent::Deleted),
        _ => Vec::new(),
    }
}

fn map_paths(
    vault: &LocalVault,
    event: &Event,
    make: impl Fn(String) -> LocalEvent,
) -> Vec<LocalEvent> {
    event
        .paths
        .iter()
        .filter_map(|path| vault.rel_path(path))
        .map(make)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn vault() -> LocalVault {
        LocalVault::new(PathBuf::from("/tmp/vault"), Vec::new())
    }

    #[test]
    fn maps_data_modify_to_modified() {
        let event = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Data(
                notify::event::DataChange::Any,
            )),
            paths: vec![PathBuf::from("/tmp/vault/Notes/A.md")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_event(&vault(), event),
            vec![LocalEvent::Modified("Notes/A.md".into())]
        );
    }

    #[test]
    fn maps_create_to_created() {
        let event = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/tmp/vault/New.md")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_event(&vault(), event),
            vec![LocalEvent::Created("New.md".into())]
        );
    }

    #[test]
    fn maps_rename_pair_to_renamed() {
        let event = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Name(
                notify::event::RenameMode::Both,
            )),
            paths: vec![
                PathBuf::from("/tmp/vault/Notes/A.md"),
                PathBuf::from("/tmp/vault/Notes/B.md"),
            ],
            attrs: Default::default(),
        };
        assert_eq!(
            map_event(&vault(), event),
            vec![LocalEvent::Renamed {
                from: "Notes/A.md".into(),
                to: "Notes/B.md".into()
            }]
        );
    }

    #[test]
    fn ignores_paths_outside_the_vault() {
        let event = Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/elsewhere/A.md")],
            attrs: Default::default(),
        };
        assert!(map_event(&vault(), event).is_empty());
    }
}
