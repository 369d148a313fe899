//! Artifact registry and directory layout (spec §4.8): a process-wide,
//! one-shot `canonical_type -> {save, load}` driver registry plus the
//! content-addressed directory convention drivers are handed when invoked.
//! `weights.bin` and metadata bytes are opaque to this crate; a driver owns
//! their encoding (and, when it chooses to encrypt, their decryption).

pub mod directory;
pub mod registry;

pub use directory::{artifact_dir, artifact_id, METADATA_ENCRYPTED_FILE, METADATA_PLAINTEXT_FILE, WEIGHTS_FILE};
pub use registry::{dispatch_artifact_save, dispatch_artifact_load, register_artifact_driver, ActionContext, LoadFn, SaveFn};
