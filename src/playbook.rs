use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::debug;

use crate::action::Playbook;
use crate::error::StoreError;

/// Get/put of whole playbooks keyed by site. No merging happens here:
/// callers read, extend and write back.
pub trait PlaybookStore: Send + Sync {
    fn get(&self, site_key: &str) -> Result<Option<Playbook>, StoreError>;
    fn put(&self, site_key: &str, playbook: &Playbook) -> Result<(), StoreError>;
}

/// Site identity of a page: its host (with port when non-default), or the
/// raw string when the URL cannot be parsed.
pub fn site_key(page_url: &str) -> String {
    match url::Url::parse(page_url) {
        Ok(parsed) => match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => parsed.origin().ascii_serialization(),
        },
        Err(_) => page_url.to_string(),
    }
}

/// One pretty-printed JSON file per site under a directory.
pub struct JsonPlaybookStore {
    dir: PathBuf,
}

impl JsonPlaybookStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, site_key: &str) -> PathBuf {
        let file: String = site_key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl PlaybookStore for JsonPlaybookStore {
    fn get(&self, site_key: &str) -> Result<Option<Playbook>, StoreError> {
        let path = self.path_for(site_key);
        if !path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(&path)?;
        let reader = BufReader::new(file);
        let playbook: Playbook = serde_json::from_reader(reader)?;
        debug!(site = site_key, actions = playbook.actions.len(), path = %path.display(), "loaded playbook");
        Ok(Some(playbook))
    }

    fn put(&self, site_key: &str, playbook: &Playbook) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(site_key);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        serde_json::to_writer_pretty(file, playbook)?;
        debug!(site = site_key, actions = playbook.actions.len(), path = %path.display(), "saved playbook");
        Ok(())
    }
}

/// Process-local store, for dry runs and tests.
#[derive(Default)]
pub struct MemoryPlaybookStore {
    inner: Mutex<HashMap<String, Playbook>>,
}

impl MemoryPlaybookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(playbook: Playbook) -> Self {
        let store = Self::default();
        store
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(playbook.site_key.clone(), playbook);
        store
    }
}

impl PlaybookStore for MemoryPlaybookStore {
    fn get(&self, site_key: &str) -> Result<Option<Playbook>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(inner.get(site_key).cloned())
    }

    fn put(&self, site_key: &str, playbook: &Playbook) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.insert(site_key.to_string(), playbook.clone());
        Ok(())
    }
}
