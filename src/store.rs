use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// The six values saved for a running attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionKey {
    AttemptId,
    Test,
    Questions,
    Answers,
    CurrentQuestion,
    StartTime,
}

impl SessionKey {
    pub const ALL: [SessionKey; 6] = [
        SessionKey::AttemptId,
        SessionKey::Test,
        SessionKey::Questions,
        SessionKey::Answers,
        SessionKey::CurrentQuestion,
        SessionKey::StartTime,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SessionKey::AttemptId => "attemptId",
            SessionKey::Test => "test",
            SessionKey::Questions => "questions",
            SessionKey::Answers => "answers",
            SessionKey::CurrentQuestion => "currentQuestion",
            SessionKey::StartTime => "startTime",
        }
    }

    /// Full key, namespaced by test id.
    pub fn scoped(self, test_id: u64) -> String {
        format!("test_{}_{}", test_id, self.name())
    }
}

/// Durable key-value storage for session state.
pub trait SessionStore: Send {
    fn get(&self, test_id: u64, key: SessionKey) -> Result<Option<String>, StoreError>;
    fn set(&mut self, test_id: u64, key: SessionKey, value: &str) -> Result<(), StoreError>;
    /// Removes every key of the test.
    fn clear(&mut self, test_id: u64) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, test_id: u64, key: SessionKey) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(&key.scoped(test_id)).cloned())
    }

    fn set(&mut self, test_id: u64, key: SessionKey, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.scoped(test_id), value.to_string());
        Ok(())
    }

    fn clear(&mut self, test_id: u64) -> Result<(), StoreError> {
        for key in SessionKey::ALL {
            self.values.remove(&key.scoped(test_id));
        }
        Ok(())
    }
}

/// One YAML document per test under `dir`, rewritten atomically on every set.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, test_id: u64) -> PathBuf {
        self.dir.join(format!("test_{}.yaml", test_id))
    }

    fn read_all(&self, test_id: u64) -> Result<BTreeMap<String, String>, StoreError> {
        let path = self.path_for(test_id);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_yaml::from_str(&content)?)
    }
}

impl SessionStore for FileStore {
    fn get(&self, test_id: u64, key: SessionKey) -> Result<Option<String>, StoreError> {
        let mut values = self.read_all(test_id)?;
        Ok(values.remove(&key.scoped(test_id)))
    }

    fn set(&mut self, test_id: u64, key: SessionKey, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let mut values = self.read_all(test_id)?;
        values.insert(key.scoped(test_id), value.to_string());
        let yaml = serde_yaml::to_string(&values)?;
        atomic_write(&self.path_for(test_id), &yaml)
    }

    fn clear(&mut self, test_id: u64) -> Result<(), StoreError> {
        let path = self.path_for(test_id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

fn atomic_write(path: &Path, content: &str) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Sessions against different servers live in different directories.
pub fn state_dir_for(root: &Path, api_url: &str) -> PathBuf {
    let digest = compute_str_hash(api_url);
    root.join(&digest[..16])
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn compute_str_hash(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex_encode(&hasher.finalize())
}
