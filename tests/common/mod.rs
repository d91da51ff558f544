//! Shared fixtures: a temp directory holding both the object store and a
//! file-backed SQLite database.

#![allow(dead_code)]

use filebox::{
    db,
    services::{
        cipher::{CipherCodec, StorageKey},
        file_service::UploadLimits,
        object_store::ObjectStore,
        share_service::ShareDefaults,
    },
    state::AppState,
};
use std::{io::Cursor, path::Path, sync::Arc};
use tempfile::TempDir;
use uuid::Uuid;

pub const ANON_MAX: u64 = 64;
pub const USER_MAX: u64 = 256;
pub const DEFAULT_EXPIRE_HOURS: i64 = 2;
pub const DEFAULT_DOWNLOAD_LIMIT: i64 = 3;

pub struct TestApp {
    pub state: AppState,
    pub dir: TempDir,
}

impl TestApp {
    pub fn storage_root(&self) -> &Path {
        &self.state.files.store.base_path
    }
}

pub async fn setup() -> TestApp {
    setup_with_defaults(ShareDefaults {
        expire_hours: DEFAULT_EXPIRE_HOURS,
        download_limit: DEFAULT_DOWNLOAD_LIMIT,
    })
    .await
}

pub async fn setup_with_defaults(defaults: ShareDefaults) -> TestApp {
    let dir = tempfile::tempdir().expect("create temp dir");
    let objects = dir.path().join("objects");
    std::fs::create_dir_all(&objects).expect("create objects dir");

    let url = format!("sqlite://{}", dir.path().join("meta.db").display());
    let pool = db::connect(&url, 5).await.expect("connect sqlite");
    db::run_migrations(&pool).await.expect("run migrations");

    let store = ObjectStore::new(
        objects,
        CipherCodec::new(StorageKey::from_bytes([42u8; 32])),
    );
    let limits = UploadLimits {
        anonymous_max_bytes: ANON_MAX,
        authenticated_max_bytes: USER_MAX,
    };

    TestApp {
        state: AppState::new(Arc::new(pool), store, limits, defaults),
        dir,
    }
}

/// Upload `bytes` as `name` on behalf of `actor`.
pub async fn upload(app: &TestApp, bytes: &[u8], name: &str, actor: Option<Uuid>) -> filebox::models::file_record::FileRecord {
    app.state
        .files
        .upload(&mut Cursor::new(bytes.to_vec()), name, "text/plain", None, actor)
        .await
        .expect("upload")
}

/// Number of stored object files beneath the store root (scratch files excluded).
pub fn stored_object_count(root: &Path) -> usize {
    fn walk(dir: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        entries
            .filter_map(Result::ok)
            .map(|entry| {
                let path = entry.path();
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if hidden {
                    0
                } else if path.is_dir() {
                    walk(&path)
                } else {
                    1
                }
            })
            .sum()
    }
    walk(root)
}
