//! Stable per-installation client identity.
//!
//! Every edit this client submits carries a [`ClientId`] so the server
//! and other clients can attribute concurrent modifications. The id is
//! generated once, persisted under the user's config directory, and
//! reused across sessions. Identity is provenance only; it plays no role
//! in authorization.

use std::path::{Path, PathBuf};

use tasksync_proto::task::ClientId;
use uuid::Uuid;

/// File name under the config directory holding the persisted id.
const ID_FILE: &str = "client-id";

/// Maximum length of the host prefix embedded in a generated id.
const HOST_PREFIX_MAX: usize = 50;

/// Returns this installation's client id, creating and persisting it on
/// first use.
///
/// The id has the form `<host>-<uuid>` where `<host>` is the `HOSTNAME`
/// environment value truncated to 50 characters (or `unknown`). Lookup
/// and persistence never fail the caller: if the config directory is
/// unavailable or unwritable, a fresh synthetic id is returned for this
/// process and a warning is logged.
#[must_use]
pub fn client_id() -> ClientId {
    match default_id_path() {
        Some(path) => load_or_create(&path),
        None => {
            tracing::warn!("no config directory available, using unpersisted client id");
            ClientId::new(generate_id())
        }
    }
}

/// Like [`client_id`], but reads and writes the id at an explicit path.
///
/// Used by tests and by configurations that relocate client state.
#[must_use]
pub fn client_id_at(path: &Path) -> ClientId {
    load_or_create(path)
}

/// Default location of the persisted id file.
#[must_use]
pub fn default_id_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tasksync").join(ID_FILE))
}

fn load_or_create(path: &Path) -> ClientId {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let stored = contents.trim();
            if stored.is_empty() {
                // Corrupt or truncated file; regenerate in place.
                create_and_persist(path)
            } else {
                ClientId::new(stored)
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => create_and_persist(path),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read client id file");
            ClientId::new(generate_id())
        }
    }
}

fn create_and_persist(path: &Path) -> ClientId {
    let id = generate_id();

    let write_result = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| std::fs::write(path, &id));

    match write_result {
        Ok(()) => tracing::info!(path = %path.display(), "persisted new client id"),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "could not persist client id, using it unpersisted"
            );
        }
    }

    ClientId::new(id)
}

/// Builds a fresh id from the host name and a random UUID.
fn generate_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let prefix: String = host.chars().take(HOST_PREFIX_MAX).collect();
    format!("{prefix}-{}", Uuid::new_v4())
}
