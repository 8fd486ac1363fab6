//! Result artifact collection

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Artifact kind → candidate file names (first existing wins)
pub const ARTIFACT_PATTERNS: &[(&str, &[&str])] = &[
    ("orthophoto", &["orthophoto.tif", "orthophoto.jpg"]),
    ("dem", &["dem.tif"]),
    ("dsm", &["dsm.tif"]),
    ("dtm", &["dtm.tif"]),
    ("point_cloud", &["point_cloud.ply", "point_cloud.las"]),
    ("mesh", &["mesh.ply", "mesh.obj"]),
    ("texture", &["texture.jpg", "texture.png"]),
];

/// Scan the output directory for known artifacts
pub fn collect_artifacts(output_dir: &Path) -> BTreeMap<String, PathBuf> {
    let mut results = BTreeMap::new();
    for (kind, names) in ARTIFACT_PATTERNS {
        if let Some(path) = names
            .iter()
            .map(|name| output_dir.join(name))
            .find(|path| path.is_file())
        {
            results.insert(kind.to_string(), path);
        }
    }
    results
}
