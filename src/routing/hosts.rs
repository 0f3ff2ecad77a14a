//! Hosts File Cache

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::block_in_place;
use tracing::{debug, error, warn};

/// Files above this size are never loaded
pub const MAX_HOSTS_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Platform hosts file location
pub fn default_hosts_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Windows\System32\drivers\etc\hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}

#[derive(Debug, Default)]
struct HostsState {
    stamp: Option<SystemTime>,
    records: HashMap<String, Ipv4Addr>,
}

/// Local static host overrides, reloaded when the file's mtime changes
#[derive(Debug)]
pub struct HostsFileCache {
    path: PathBuf,
    state: Mutex<HostsState>,
}

impl HostsFileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(HostsState::default()),
        }
    }

    /// Cache over the platform hosts file
    pub fn system() -> Self {
        Self::new(default_hosts_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a local override for `name`
    pub fn find(&self, name: &str) -> Option<Ipv4Addr> {
        let stamp = off_worker(|| self.current_stamp())?;

        if stamp.is_none() || stamp != self.lock().stamp {
            // Disk reads happen without the lock held
            let records = off_worker(|| self.load())?;
            let mut state = self.lock();
            state.records = records;
            state.stamp = stamp;
        }

        self.lock().records.get(name).copied()
    }

    fn lock(&self) -> MutexGuard<'_, HostsState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Modification time of a usable file; `None` means "no usable file"
    fn current_stamp(&self) -> Option<Option<SystemTime>> {
        let meta = match std::fs::metadata(&self.path) {
            Ok(meta) if meta.is_file() => meta,
            _ => return None,
        };

        if meta.len() > MAX_HOSTS_FILE_SIZE {
            error!("Hosts file too large: {} ({} bytes)", self.path.display(), meta.len());
            return None;
        }

        Some(meta.modified().ok())
    }

    fn load(&self) -> Option<HashMap<String, Ipv4Addr>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let records = parse_hosts(&content);
                debug!(
                    "Loaded {} host overrides from {}",
                    records.len(),
                    self.path.display()
                );
                Some(records)
            }
            Err(e) => {
                warn!("Failed to read hosts file {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

/// Run blocking file work, handing the worker thread back on a multi-thread runtime
fn off_worker<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => block_in_place(f),
        _ => f(),
    }
}

/// Parse `ip host # comment` lines, keeping IPv4 entries with exactly one name
fn parse_hosts(content: &str) -> HashMap<String, Ipv4Addr> {
    let mut records = HashMap::new();
    for line in content.lines() {
        let data = line.split('#').next().unwrap_or_default();
        let tokens: Vec<&str> = data.split_whitespace().collect();
        if let [ip, host] = tokens.as_slice() {
            match ip.parse::<Ipv4Addr>() {
                Ok(ip) => {
                    records.insert(host.to_string(), ip);
                }
                Err(_) => debug!("Skipping non-IPv4 hosts entry: {}", ip),
            }
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_hosts() {
        let records = parse_hosts(
            "# comment line\n\
             127.0.0.1 localhost\n\
             10.0.0.5\tintranet.corp   # trailing comment\n\
             ::1 ip6-localhost\n\
             1.2.3.4 a.example b.example\n\
             garbage\n",
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records["localhost"], Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(records["intranet.corp"], Ipv4Addr::new(10, 0, 0, 5));
        assert!(!records.contains_key("a.example"));
    }

    #[test]
    fn test_missing_file_means_no_override() {
        let cache = HostsFileCache::new("/nonexistent/path/to/hosts");
        assert_eq!(cache.find("localhost"), None);
    }

    #[test]
    fn test_reload_on_mtime_change() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "10.1.1.1 box.lan").unwrap();
        file.flush().unwrap();

        let cache = HostsFileCache::new(file.path());
        assert_eq!(cache.find("box.lan"), Some(Ipv4Addr::new(10, 1, 1, 1)));
        assert_eq!(cache.find("other.lan"), None);

        std::fs::write(file.path(), "10.2.2.2 other.lan\n").unwrap();
        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(file.path())
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(cache.find("other.lan"), Some(Ipv4Addr::new(10, 2, 2, 2)));
        assert_eq!(cache.find("box.lan"), None);
    }

    #[test]
    fn test_oversized_file_is_ignored() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "10.1.1.1 big.lan").unwrap();
        file.flush().unwrap();
        file.as_file().set_len(MAX_HOSTS_FILE_SIZE + 1).unwrap();

        let cache = HostsFileCache::new(file.path());
        assert_eq!(cache.find("big.lan"), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lookup_on_multi_thread_runtime() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "10.3.3.3 worker.lan").unwrap();
        file.flush().unwrap();

        let cache = std::sync::Arc::new(HostsFileCache::new(file.path()));
        let lookups: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.find("worker.lan") })
            })
            .collect();

        for lookup in lookups {
            assert_eq!(lookup.await.unwrap(), Some(Ipv4Addr::new(10, 3, 3, 3)));
        }
    }
}
