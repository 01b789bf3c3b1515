//! Locating metadata documents on disk.

use std::env;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Environment variable overriding the default plugin directory.
pub const PLUGIN_PATH_ENV: &str = "MONTAGE_PLUGIN_PATH";

/// Directory searched for plugin metadata when the caller names none: the
/// `MONTAGE_PLUGIN_PATH` override if set, else a per-user data directory.
pub fn default_search_path() -> PathBuf {
    if let Some(path) = env::var_os(PLUGIN_PATH_ENV) {
        return PathBuf::from(path);
    }
    dirs::data_dir()
        .map(|dir| dir.join("montage").join("plugins"))
        .unwrap_or_else(|| PathBuf::from("/usr/lib/montage/plugins"))
}

/// Names of candidate metadata documents under `base_dir`, relative to it,
/// sorted. Any file with an `xml` extension counts; whether it is a valid
/// document is the parser's call. Unreadable entries are logged and skipped.
pub fn discover_metadata_documents(base_dir: impl AsRef<Path>) -> Vec<String> {
    let base_dir = base_dir.as_ref();
    let mut documents = Vec::new();
    let walker = WalkDir::new(base_dir).max_depth(2).into_iter();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if let Some(io) = err.io_error() {
                    log::debug!("skipping entry while scanning {}: {io}", base_dir.display());
                }
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_xml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
        if !is_xml {
            continue;
        }
        if let Ok(relative) = path.strip_prefix(base_dir) {
            documents.push(relative.to_string_lossy().into_owned());
        }
    }
    documents.sort();
    documents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_lists_xml_files_relative_to_the_base_dir() {
        let directory = tempfile::tempdir().expect("tempdir");
        let base = directory.path();
        std::fs::write(base.join("stock.xml"), "<x/>").unwrap();
        std::fs::write(base.join("LEGACY.XML"), "<x/>").unwrap();
        std::fs::write(base.join("readme.txt"), "not metadata").unwrap();
        std::fs::create_dir(base.join("extras")).unwrap();
        std::fs::write(base.join("extras").join("more.xml"), "<x/>").unwrap();

        let documents = discover_metadata_documents(base);
        let nested = Path::new("extras").join("more.xml").to_string_lossy().into_owned();
        assert_eq!(documents, vec!["LEGACY.XML".to_string(), nested, "stock.xml".to_string()]);
    }

    #[test]
    fn discovery_of_a_missing_directory_is_empty() {
        let directory = tempfile::tempdir().expect("tempdir");
        let absent = directory.path().join("nowhere");
        assert!(discover_metadata_documents(&absent).is_empty());
    }

    #[test]
    fn environment_variable_overrides_the_search_path() {
        env::set_var(PLUGIN_PATH_ENV, "/opt/montage/plugins");
        assert_eq!(default_search_path(), PathBuf::from("/opt/montage/plugins"));
        env::remove_var(PLUGIN_PATH_ENV);
        assert_ne!(default_search_path(), PathBuf::from("/opt/montage/plugins"));
    }
}
