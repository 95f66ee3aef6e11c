//! Auth-state storage for the refresh agent
//!
//! A JSON file mapping user names to their `AuthState`. The daemon and
//! `--once` pre-spawn runs may share one file, so every access takes an
//! exclusive `flock` on a sibling `.lock` file. A `put` re-reads the file
//! under that lock and replaces only its own user before writing, so a
//! token rotated by another process is never reverted from a stale copy.
//! Writes go through a 0600 temp file + rename. Within one process a tokio
//! Mutex serializes callers.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use authenticator::AuthState;
#[cfg(unix)]
use nix::fcntl::{Flock, FlockArg};
use tokio::sync::Mutex;
use tracing::{debug, info};

type States = BTreeMap<String, AuthState>;

/// Process- and thread-safe auth-state file manager.
pub struct AuthStateStore {
    path: PathBuf,
    /// Last contents seen on disk
    state: Mutex<States>,
}

impl AuthStateStore {
    /// Load auth states from `path`, creating an empty `{}` file on first run.
    pub async fn load(path: PathBuf) -> anyhow::Result<Self> {
        let file = path.clone();
        let state = run_blocking(move || {
            let _lock = lock_file(&file)?;
            if file.exists() {
                read_states(&file)
            } else {
                info!(path = %file.display(), "auth state file not found, starting empty");
                let states = States::new();
                write_atomic(&file, &states)?;
                Ok(states)
            }
        })
        .await?;
        info!(path = %path.display(), users = state.len(), "loaded auth states");

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Re-read the file, picking up users added or refreshed by other processes.
    pub async fn reload(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let file = self.path.clone();
        *state = run_blocking(move || {
            let _lock = lock_file(&file)?;
            read_states(&file)
        })
        .await?;
        Ok(())
    }

    pub async fn get(&self, user: &str) -> Option<AuthState> {
        let state = self.state.lock().await;
        state.get(user).cloned()
    }

    /// User names in stable (sorted) order.
    pub async fn users(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.keys().cloned().collect()
    }

    /// Insert or replace one user's auth state and persist it.
    ///
    /// Other users' entries are taken from disk, not from this store's copy.
    pub async fn put(&self, user: String, auth_state: AuthState) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        debug!(user = %user, "storing auth state");
        let file = self.path.clone();
        *state = run_blocking(move || {
            let _lock = lock_file(&file)?;
            let mut states = read_states(&file)?;
            states.insert(user, auth_state);
            write_atomic(&file, &states)?;
            Ok(states)
        })
        .await?;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.len()
    }
}

async fn run_blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("auth state file task failed")?
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn lock_path(path: &Path) -> PathBuf {
    sibling(path, ".lock")
}

fn temp_path(path: &Path) -> PathBuf {
    sibling(path, &format!(".tmp.{}", std::process::id()))
}

/// Exclusive advisory lock on the store's `.lock` file, released on drop.
#[cfg(unix)]
fn lock_file(path: &Path) -> anyhow::Result<Flock<File>> {
    use std::os::unix::fs::OpenOptionsExt;

    let lock_path = lock_path(path);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .mode(0o600)
        .open(&lock_path)
        .with_context(|| format!("opening lock file {}", lock_path.display()))?;

    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_file, errno)| anyhow::anyhow!("flock {} failed: {errno}", lock_path.display()))
}

/// No cross-process locking off unix; the in-process mutex still applies.
#[cfg(not(unix))]
fn lock_file(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

/// Current file contents; a missing file reads as empty.
fn read_states(path: &Path) -> anyhow::Result<States> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(States::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("reading auth state file {}", path.display()));
        }
    };
    serde_json::from_str(&contents)
        .with_context(|| format!("parsing auth state file {}", path.display()))
}

/// Write auth states atomically. The temp file is created 0600 since it
/// holds live tokens from the first byte.
fn write_atomic(path: &Path, data: &States) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(data).context("serializing auth states")?;
    let tmp_path = temp_path(path);

    // A leftover from a crashed write may have looser permissions
    match std::fs::remove_file(&tmp_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context("removing stale temp auth state file"),
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file: File = options
        .open(&tmp_path)
        .context("creating temp auth state file")?;
    file.write_all(json.as_bytes())
        .context("writing temp auth state file")?;
    file.sync_all().context("syncing temp auth state file")?;
    drop(file);

    std::fs::rename(&tmp_path, path).context("renaming temp auth state file")?;

    debug!(path = %path.display(), "persisted auth states");
    Ok(())
}
