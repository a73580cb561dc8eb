// Integration test utilities and fixture management for tether.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tether_core::config::TetherConfig;
use tether_core::pipeline::{ScanOptions, ScanSession};
use tether_core::progress::NoopReporter;
use tether_core::report::ScanReport;
use tether_core::store::SqliteStore;

/// A test fixture with a temporary Unity-style project tree.
#[derive(Debug)]
pub struct TestProject {
    pub dir: tempfile::TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file under the project root, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    /// Write the `.meta` side-car for an asset path.
    pub fn write_meta(&self, asset_rel: &str, guid: &str) {
        self.write(
            &format!("{asset_rel}.meta"),
            &format!(
                "fileFormatVersion: 2\nguid: {guid}\nNativeFormatImporter:\n  mainObjectFileID: 100100000\n"
            ),
        );
    }

    /// Bump a file's mtime without changing its content.
    pub fn touch(&self, rel: &str) {
        let path = self.dir.path().join(rel);
        let file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();
    }

    pub fn delete(&self, rel: &str) {
        std::fs::remove_file(self.dir.path().join(rel)).unwrap();
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Pad a short hex tail into a full 32-hex GUID string.
pub fn guid(tail: &str) -> String {
    format!("{:0>32}", tail)
}

/// A Unity object reference scalar pointing at `guid`.
pub fn object_ref(guid: &str) -> String {
    format!("{{fileID: 11400000, guid: {guid}, type: 2}}")
}

/// A minimal `.asset` body referencing the given GUIDs, one field each.
pub fn scriptable_object(refs: &[&str]) -> String {
    let mut body = String::from("--- !u!114 &11400000\nMonoBehaviour:\n  m_Name: Fixture\n");
    for (i, guid) in refs.iter().enumerate() {
        body.push_str(&format!("  m_Slot{i}: {}\n", object_ref(guid)));
    }
    body
}

/// Run one scan against the project with default options.
pub async fn run_scan(
    session: &mut ScanSession,
    store: &SqliteStore,
    opts: &ScanOptions,
) -> ScanReport {
    session
        .scan(store, opts, &NoopReporter, Arc::new(AtomicBool::new(false)))
        .await
        .expect("scan should not fail")
}

/// Fresh in-memory store + session over the project, then one full scan.
pub async fn scan_project(project: &TestProject) -> (ScanReport, ScanSession, SqliteStore) {
    scan_project_with_config(project, TetherConfig::default()).await
}

pub async fn scan_project_with_config(
    project: &TestProject,
    config: TetherConfig,
) -> (ScanReport, ScanSession, SqliteStore) {
    let store = SqliteStore::in_memory().expect("in-memory store");
    let mut session = ScanSession::new(project.path(), config);
    let report = run_scan(&mut session, &store, &ScanOptions::default()).await;
    (report, session, store)
}
