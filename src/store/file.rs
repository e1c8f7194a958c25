use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{ChangeLog, ChangeRecord, ConfigStore, GlobalConfig, VmRecord, CLUSTER_SUBJECT};
use crate::errors::{VmError, VmResult};

const GLOBAL_CONFIG_FILE: &str = "cluster.json";
const VM_CONFIG_FILE: &str = "config.json";
const HISTORY_FILE: &str = "history.jsonl";
const VMS_DIR: &str = "vms";

/// JSON files under a data directory:
///
/// ```text
/// <root>/cluster.json          cluster-wide VM list
/// <root>/vms/<name>/config.json
/// <root>/history.jsonl         change log
/// ```
pub struct FileConfigStore {
    root: PathBuf,
    write_lock: Mutex<()>,
    history: Box<dyn ChangeLog>,
}

impl FileConfigStore {
    pub fn open(root: impl Into<PathBuf>) -> VmResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(VMS_DIR))?;

        let store = Self {
            history: Box::new(FileChangeLog::new(root.join(HISTORY_FILE))),
            root,
            write_lock: Mutex::new(()),
        };

        let global = store.global_path();
        if !global.exists() {
            debug!(path = %global.display(), "Initialising empty cluster configuration");
            write_atomic(&global, &GlobalConfig::default())?;
        }

        Ok(store)
    }

    pub fn with_change_log(mut self, history: Box<dyn ChangeLog>) -> Self {
        self.history = history;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn global_path(&self) -> PathBuf {
        self.root.join(GLOBAL_CONFIG_FILE)
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.vm_dir(name).join(VM_CONFIG_FILE)
    }

    fn lock(&self) -> VmResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| VmError::Store("configuration lock poisoned".into()))
    }
}

impl ConfigStore for FileConfigStore {
    fn global_config(&self) -> VmResult<GlobalConfig> {
        read_json(&self.global_path())
    }

    fn update_global(
        &self,
        message: &str,
        update: &mut dyn FnMut(&mut GlobalConfig) -> VmResult<()>,
    ) -> VmResult<()> {
        let _guard = self.lock()?;
        let path = self.global_path();

        let mut config: GlobalConfig = read_json(&path)?;
        update(&mut config)?;
        config.version += 1;
        write_atomic(&path, &config)?;

        self.history.record(ChangeRecord::new(CLUSTER_SUBJECT, message))
    }

    fn create_vm_record(&self, name: &str, record: &VmRecord) -> VmResult<()> {
        let _guard = self.lock()?;
        let path = self.record_path(name);
        if path.exists() {
            return Err(VmError::AlreadyExists {
                name: name.to_string(),
            });
        }

        fs::create_dir_all(self.vm_dir(name))?;
        write_atomic(&path, record)
    }

    fn vm_record(&self, name: &str) -> VmResult<VmRecord> {
        match read_json(&self.record_path(name)) {
            Err(VmError::Io(e)) if e.kind() == ErrorKind::NotFound => Err(VmError::NotFound {
                name: name.to_string(),
            }),
            other => other,
        }
    }

    fn update_vm_record(
        &self,
        name: &str,
        message: &str,
        update: &mut dyn FnMut(&mut VmRecord) -> VmResult<()>,
    ) -> VmResult<()> {
        let _guard = self.lock()?;

        let mut record = self.vm_record(name)?;
        update(&mut record)?;
        write_atomic(&self.record_path(name), &record)?;

        self.history.record(ChangeRecord::new(name, message))
    }

    fn vm_dir(&self, name: &str) -> PathBuf {
        self.root.join(VMS_DIR).join(name)
    }

    fn record_change(&self, subject: &str, message: &str) -> VmResult<()> {
        self.history.record(ChangeRecord::new(subject, message))
    }

    fn change_history(&self, subject: Option<&str>) -> VmResult<Vec<ChangeRecord>> {
        self.history.entries(subject)
    }
}

/// Append-only JSON-lines change log.
pub struct FileChangeLog {
    path: PathBuf,
    file_lock: Mutex<()>,
}

impl FileChangeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file_lock: Mutex::new(()),
        }
    }
}

impl ChangeLog for FileChangeLog {
    fn record(&self, entry: ChangeRecord) -> VmResult<()> {
        let _guard = self
            .file_lock
            .lock()
            .map_err(|_| VmError::Store("change log lock poisoned".into()))?;

        let line = serde_json::to_string(&entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn entries(&self, subject: Option<&str>) -> VmResult<Vec<ChangeRecord>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ChangeRecord = serde_json::from_str(&line)?;
            if subject.map_or(true, |s| entry.subject == s) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> VmResult<T> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

// Write-then-rename so readers only ever see a complete file.
fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> VmResult<()> {
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(value)?;
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, FileConfigStore) {
        let dir = TempDir::new().unwrap();
        let store = FileConfigStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn fresh_store_has_no_vms() {
        let (_dir, store) = open_store();
        assert!(store.vm_names().unwrap().is_empty());
        assert_eq!(store.global_config().unwrap().version, 0);
    }

    #[test]
    fn append_bumps_version_and_logs_change() {
        let (_dir, store) = open_store();
        store.append_vm("web01", "Adding new VM 'web01'").unwrap();

        let config = store.global_config().unwrap();
        assert_eq!(config.virtual_machines, vec!["web01".to_string()]);
        assert_eq!(config.version, 1);

        let history = store.change_history(Some(CLUSTER_SUBJECT)).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "Adding new VM 'web01'");
    }

    #[test]
    fn duplicate_append_leaves_config_untouched() {
        let (_dir, store) = open_store();
        store.append_vm("web01", "first").unwrap();

        let err = store.append_vm("web01", "second").unwrap_err();
        assert!(matches!(err, VmError::AlreadyExists { .. }));

        let config = store.global_config().unwrap();
        assert_eq!(config.virtual_machines.len(), 1);
        assert_eq!(config.version, 1);
        assert_eq!(store.change_history(None).unwrap().len(), 1);
    }

    #[test]
    fn vm_records_round_trip_through_updates() {
        let (_dir, store) = open_store();
        let record = VmRecord::new(vec!["node-a".into()], 2, 2048);
        store.create_vm_record("web01", &record).unwrap();
        assert_eq!(store.vm_record("web01").unwrap(), record);

        store
            .update_vm_record("web01", "Set node", &mut |r: &mut VmRecord| {
                r.node = Some("node-a".into());
                Ok(())
            })
            .unwrap();

        assert_eq!(store.vm_record("web01").unwrap().node.as_deref(), Some("node-a"));
        assert_eq!(store.change_history(Some("web01")).unwrap().len(), 1);
    }

    #[test]
    fn creating_a_record_twice_is_rejected() {
        let (_dir, store) = open_store();
        let record = VmRecord::new(vec!["node-a".into()], 1, 512);
        store.create_vm_record("db01", &record).unwrap();
        assert!(matches!(
            store.create_vm_record("db01", &record),
            Err(VmError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn missing_record_is_not_found() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.vm_record("ghost"),
            Err(VmError::NotFound { name }) if name == "ghost"
        ));
    }

    #[test]
    fn reopening_keeps_existing_configuration() {
        let dir = TempDir::new().unwrap();
        FileConfigStore::open(dir.path())
            .unwrap()
            .append_vm("web01", "add")
            .unwrap();

        let store = FileConfigStore::open(dir.path()).unwrap();
        assert_eq!(store.vm_names().unwrap(), vec!["web01".to_string()]);
        assert!(!dir.path().join("cluster.json.tmp").exists());
    }
}
