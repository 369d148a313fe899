//! Content-addressed artifact directory layout (spec's Artifact directory
//! section): `<root>/<canonical_type>/<family>/<model>/<artifact_id>/`,
//! where `artifact_id` is a hash of the inputs that fully determine an
//! artifact's content.

use std::path::{Path, PathBuf};

use tsi_types::hash::content_hash_of_parts;

/// Derives an artifact id from the fields that identify its content.
/// `configuration` is an opaque caller-chosen string (e.g. a serialized
/// hyperparameter set); two saves with the same four inputs are expected
/// to land at the same directory.
pub fn artifact_id(canonical_type: &str, family: &str, model: &str, configuration: &str) -> String {
    hex::encode(content_hash_of_parts([canonical_type, family, model, configuration]))
}

/// Builds `<root>/<canonical_type>/<family>/<model>/<artifact_id>/`. Does
/// not create the directory; callers create it on save and expect it to
/// exist on load.
pub fn artifact_dir(root: &Path, canonical_type: &str, family: &str, model: &str, artifact_id: &str) -> PathBuf {
    root.join(canonical_type).join(family).join(model).join(artifact_id)
}

pub const WEIGHTS_FILE: &str = "weights.bin";
pub const METADATA_ENCRYPTED_FILE: &str = "metadata.enc";
pub const METADATA_PLAINTEXT_FILE: &str = "metadata.json";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_id_is_stable_for_the_same_inputs() {
        let a = artifact_id("tsi.wikimyei.representation.vicreg", "crypto", "v1", "{}");
        let b = artifact_id("tsi.wikimyei.representation.vicreg", "crypto", "v1", "{}");
        assert_eq!(a, b);
    }

    #[test]
    fn artifact_id_differs_when_any_input_differs() {
        let a = artifact_id("tsi.wikimyei.representation.vicreg", "crypto", "v1", "{}");
        let b = artifact_id("tsi.wikimyei.representation.vicreg", "crypto", "v2", "{}");
        assert_ne!(a, b);
    }

    #[test]
    fn artifact_dir_nests_by_type_family_model_id() {
        let dir = artifact_dir(Path::new("/root"), "t", "f", "m", "abc123");
        assert_eq!(dir, Path::new("/root/t/f/m/abc123"));
    }
}
