//! Process-wide artifact driver registry (spec §4.8). The registry owns no
//! component state itself — it is a pure redirector from a canonical type
//! string to the save/load callbacks a component registered for it, mirroring
//! `tsi-board::component`'s `NodeComponent` registry.

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::debug;
use tsi_types::error::CoreError;

/// The artifact directory plus whatever opaque handle/user data the caller
/// wants a driver to see. `tsi-artifacts` never inspects `handle` or
/// `user_data` — it only carries them from the dispatch call to the
/// registered driver.
pub struct ActionContext {
    pub dir: PathBuf,
    pub handle: Box<dyn Any + Send>,
    pub user_data: Box<dyn Any + Send>,
}

impl ActionContext {
    pub fn new(dir: PathBuf, handle: Box<dyn Any + Send>, user_data: Box<dyn Any + Send>) -> Self {
        Self { dir, handle, user_data }
    }

    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(crate::directory::WEIGHTS_FILE)
    }

    /// `encrypted=true` names `metadata.enc`; otherwise `metadata.json`.
    /// `tsi-artifacts` does not encrypt or decrypt these bytes itself — per
    /// spec's metadata fallback rule, whether encryption happened is the
    /// driver's decision, and this only picks the matching filename.
    pub fn metadata_path(&self, encrypted: bool) -> PathBuf {
        if encrypted {
            self.dir.join(crate::directory::METADATA_ENCRYPTED_FILE)
        } else {
            self.dir.join(crate::directory::METADATA_PLAINTEXT_FILE)
        }
    }
}

pub type SaveFn = Arc<dyn Fn(&mut ActionContext) -> Result<(), CoreError> + Send + Sync>;
pub type LoadFn = Arc<dyn Fn(&mut ActionContext) -> Result<(), CoreError> + Send + Sync>;

#[derive(Clone)]
struct Driver {
    save: SaveFn,
    load: LoadFn,
}

static REGISTRY: OnceCell<Mutex<HashMap<String, Driver>>> = OnceCell::new();

fn registry() -> &'static Mutex<HashMap<String, Driver>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers the save/load pair for `canonical_type`. One-shot per type:
/// a second registration for the same type is rejected rather than
/// silently overwriting the first (spec §4.8).
pub fn register_artifact_driver(canonical_type: &str, save: SaveFn, load: LoadFn) -> Result<(), CoreError> {
    let mut map = registry().lock();
    if map.contains_key(canonical_type) {
        return Err(CoreError::Internal(format!("artifact driver already registered for {canonical_type}")));
    }
    map.insert(canonical_type.to_string(), Driver { save, load });
    debug!(canonical_type, "artifact driver registered");
    Ok(())
}

pub fn dispatch_artifact_save(canonical_type: &str, ctx: &mut ActionContext) -> Result<(), CoreError> {
    let save = {
        let map = registry().lock();
        map.get(canonical_type).map(|d| d.save.clone()).ok_or_else(|| CoreError::NoDriver(canonical_type.to_string()))?
    };
    save(ctx)
}

pub fn dispatch_artifact_load(canonical_type: &str, ctx: &mut ActionContext) -> Result<(), CoreError> {
    let load = {
        let map = registry().lock();
        map.get(canonical_type).map(|d| d.load.clone()).ok_or_else(|| CoreError::NoDriver(canonical_type.to_string()))?
    };
    load(ctx)
}
