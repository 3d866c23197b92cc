//! Input files: naming conventions and document decoding
//!
//! Recordings arrive as one static document per map plus one dynamic
//! document per run, each a JSON file or a single-entry `.zip` around one:
//!
//! - `static_data_<map>.zip` — the block/road/lane description of `<map>`;
//! - `dynamic_data_<map>_seed<N>.<ext>` — one recorded run on `<map>`,
//!   where `<N>` is the integer scenario seed.
//!
//! An empty file name maps to `"test_case"` with seed 0 (test fixtures).
//! Everything here fails loudly: wrong names, wrong extensions, and missing
//! or directory paths each have their own [`LoaderError`] variant, and the
//! pipeline treats all of them as fatal.

#![forbid(unsafe_code)]

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::map::BlockDescriptor;
use crate::trace::RawTick;

/// Default map name for empty (fixture) file names.
const TEST_CASE_MAP: &str = "test_case";

const STATIC_PREFIX: &str = "static_data_";
const DYNAMIC_PREFIX: &str = "dynamic_data_";
const SEED_MARKER: &str = "_seed";

/// Errors raised while naming, locating, or decoding input files.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// The file name follows neither the static nor the dynamic convention.
    #[error("unknown filename format: {0:?}")]
    UnknownFilenameFormat(String),
    /// A seed was requested from a static-data file name.
    #[error("not a dynamic file: {0:?}")]
    NotADynamicFile(String),
    /// Only `.json` and `.zip` inputs are accepted.
    #[error("unsupported extension on {0:?}")]
    UnsupportedExtension(PathBuf),
    /// The path does not exist.
    #[error("path not found: {0:?}")]
    PathNotFound(PathBuf),
    /// The path names a directory, not a document.
    #[error("path is a directory: {0:?}")]
    PathIsDirectory(PathBuf),
    /// An underlying read failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The archive could not be opened or has no entry.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// The document is not valid JSON for the expected shape.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The map name a file belongs to, per the naming conventions above.
pub fn map_name_of(path: &Path) -> Result<String, LoaderError> {
    let name = file_name_of(path);
    if name.is_empty() {
        return Ok(TEST_CASE_MAP.to_string());
    }
    if let Some(rest) = name.strip_prefix(STATIC_PREFIX) {
        if let Some(map) = rest.strip_suffix(".zip") {
            return Ok(map.to_string());
        }
    }
    if let Some(rest) = name.strip_prefix(DYNAMIC_PREFIX) {
        if let Some((map, _)) = rest.split_once(SEED_MARKER) {
            return Ok(map.to_string());
        }
    }
    Err(LoaderError::UnknownFilenameFormat(name))
}

/// The scenario seed encoded in a dynamic file name.
///
/// Static-data names have no seed and fail with
/// [`LoaderError::NotADynamicFile`]; an empty name is seed 0.
pub fn seed_of(path: &Path) -> Result<u64, LoaderError> {
    let name = file_name_of(path);
    if name.is_empty() {
        return Ok(0);
    }
    if let Some(rest) = name.strip_prefix(DYNAMIC_PREFIX) {
        if let Some((_, tail)) = rest.split_once(SEED_MARKER) {
            let digits = tail.split('.').next().unwrap_or(tail);
            return digits
                .parse::<u64>()
                .map_err(|_| LoaderError::UnknownFilenameFormat(name.clone()));
        }
    }
    if name.starts_with(STATIC_PREFIX) && name.ends_with(".zip") {
        return Err(LoaderError::NotADynamicFile(name));
    }
    Err(LoaderError::UnknownFilenameFormat(name))
}

/// Read the JSON text of a document, unwrapping a single-entry `.zip` when
/// necessary.
pub fn read_document(path: &Path) -> Result<Vec<u8>, LoaderError> {
    if !path.exists() {
        return Err(LoaderError::PathNotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        return Err(LoaderError::PathIsDirectory(path.to_path_buf()));
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(std::fs::read(path)?),
        Some("zip") => {
            let mut archive = zip::ZipArchive::new(File::open(path)?)?;
            let mut entry = archive.by_index(0)?;
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            Ok(buf)
        }
        _ => Err(LoaderError::UnsupportedExtension(path.to_path_buf())),
    }
}

/// Decode a static document into block descriptors.
pub fn load_blocks(path: &Path) -> Result<Vec<BlockDescriptor>, LoaderError> {
    Ok(serde_json::from_slice(&read_document(path)?)?)
}

/// Decode a dynamic document into its raw tick list.
pub fn load_ticks(path: &Path) -> Result<Vec<RawTick>, LoaderError> {
    Ok(serde_json::from_slice(&read_document(path)?)?)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scratch_dir() -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "tracecut-loader-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn filename_conventions_resolve() {
        let static_file = Path::new("static_data_town04.zip");
        assert_eq!(map_name_of(static_file).unwrap(), "town04");
        assert!(matches!(
            seed_of(static_file),
            Err(LoaderError::NotADynamicFile(_))
        ));

        let dynamic_file = Path::new("runs/dynamic_data_town04_seed17.json");
        assert_eq!(map_name_of(dynamic_file).unwrap(), "town04");
        assert_eq!(seed_of(dynamic_file).unwrap(), 17);

        let zipped = Path::new("dynamic_data_town10HD_seed3.zip");
        assert_eq!(map_name_of(zipped).unwrap(), "town10HD");
        assert_eq!(seed_of(zipped).unwrap(), 3);
    }

    #[test]
    fn empty_name_is_the_test_fixture() {
        assert_eq!(map_name_of(Path::new("")).unwrap(), "test_case");
        assert_eq!(seed_of(Path::new("")).unwrap(), 0);
    }

    #[test]
    fn unrecognised_names_are_rejected() {
        for name in ["trace.json", "dynamic_town01.json", "dynamic_data_town01_seedX.json"] {
            assert!(matches!(
                seed_of(Path::new(name)),
                Err(LoaderError::UnknownFilenameFormat(_))
            ));
        }
        assert!(matches!(
            map_name_of(Path::new("static_data_town04.json")),
            Err(LoaderError::UnknownFilenameFormat(_))
        ));
    }

    #[test]
    fn missing_paths_directories_and_extensions_are_distinct_errors() {
        let dir = scratch_dir();

        assert!(matches!(
            read_document(&dir.join("absent.json")),
            Err(LoaderError::PathNotFound(_))
        ));
        assert!(matches!(
            read_document(&dir),
            Err(LoaderError::PathIsDirectory(_))
        ));

        let other = dir.join("trace.csv");
        std::fs::write(&other, b"x").unwrap();
        assert!(matches!(
            read_document(&other),
            Err(LoaderError::UnsupportedExtension(_))
        ));
    }

    #[test]
    fn json_documents_decode_into_ticks() {
        let dir = scratch_dir();
        let path = dir.join("dynamic_data_test_seed1.json");
        let doc = r#"[
            {
                "currentTick": 0.0,
                "actorPositions": [{
                    "actor": { "kind": "vehicle", "id": 1, "egoVehicle": true },
                    "roadId": 1, "laneId": -1, "positionOnLane": 0.0,
                    "location": { "x": 0.0, "y": 0.0, "z": 0.0 }
                }]
            },
            {
                "currentTick": 0.1,
                "actorPositions": [{
                    "actor": { "kind": "pedestrian", "id": 2 },
                    "roadId": 1, "laneId": -1, "positionOnLane": 3.0,
                    "location": { "x": 3.0, "y": 0.0, "z": 0.0 }
                }]
            }
        ]"#;
        std::fs::write(&path, doc).unwrap();

        let ticks = load_ticks(&path).unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].actor_positions[0].actor.id(), 1);
        assert_eq!(ticks[1].current_tick.0, 0.1);
    }

    #[test]
    fn zip_documents_unwrap_their_single_entry() {
        let dir = scratch_dir();
        let path = dir.join("static_data_test.zip");
        let doc = br#"[{ "id": "b0", "roads": [] }]"#;
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            writer
                .start_file("static_data_test.json", zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(doc).unwrap();
            writer.finish().unwrap();
        }

        let blocks = load_blocks(&path).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].id, "b0");
    }
}
