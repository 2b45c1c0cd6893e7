//! Ground-truth manifest loading.
//!
//! The manifest is a CSV table with a required `id,path,expected` header
//! and one verification case per row. An optional fourth `max_distance`
//! column enables Hamming-distance near-matching for PDQ/MD5 rows.
//! Extra columns beyond those are ignored.
//!
//! Error granularity follows the run-level contract: a broken header or
//! unreadable file is fatal, a broken row is skipped with a warning and
//! loading continues.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::Algorithm;

/// One row of the manifest: a media file and its expected hash value.
///
/// Immutable once loaded. `media_id` is unique within a run — duplicate
/// ids are dropped at load time, keeping the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCase {
    pub media_id: String,
    pub source_path: PathBuf,
    /// Expected digest (PDQ/MD5) or path to the reference artifact (TMK).
    pub expected_hash: String,
    pub algorithm: Algorithm,
    /// Optional Hamming-distance bound for near-duplicate tolerance.
    /// Only meaningful for PDQ/MD5 rows.
    pub max_distance: Option<u32>,
}

/// An ordered, restartable sequence of verification cases.
#[derive(Debug, Clone)]
pub struct Manifest {
    cases: Vec<VerificationCase>,
    skipped_rows: usize,
}

impl Manifest {
    /// Load and parse a manifest file.
    ///
    /// Relative media paths are resolved against the manifest's own
    /// directory. Re-loading the same file yields the same sequence.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the file cannot be read or the
    /// header is missing a required column. Malformed rows are not
    /// errors at this level: they are skipped, logged, and counted.
    pub fn load(path: &Path, algorithm: Algorithm) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::Unreadable(path.to_path_buf(), e.to_string()))?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut lines = text.lines().enumerate();

        let header = loop {
            match lines.next() {
                Some((_, line)) if line.trim().is_empty() => continue,
                Some((_, line)) => break line,
                None => return Err(ManifestError::Empty(path.to_path_buf())),
            }
        };
        let columns: Vec<&str> = header.split(',').map(str::trim).collect();
        let col = |name: &str| {
            columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
                .ok_or_else(|| ManifestError::MissingColumn(name.to_string()))
        };
        let id_col = col("id")?;
        let path_col = col("path")?;
        let expected_col = col("expected")?;
        let distance_col = columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case("max_distance"));

        let mut cases = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut skipped_rows = 0usize;

        for (line_no, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();

            let row = parse_row(
                &fields,
                id_col,
                path_col,
                expected_col,
                distance_col,
                base_dir,
                algorithm,
            );
            match row {
                Ok(case) => {
                    if !seen_ids.insert(case.media_id.clone()) {
                        warn!(
                            line = line_no + 1,
                            id = %case.media_id,
                            "duplicate media id — row skipped"
                        );
                        skipped_rows += 1;
                        continue;
                    }
                    cases.push(case);
                }
                Err(reason) => {
                    warn!(line = line_no + 1, %reason, "malformed manifest row — skipped");
                    skipped_rows += 1;
                }
            }
        }

        Ok(Self {
            cases,
            skipped_rows,
        })
    }

    pub fn cases(&self) -> impl Iterator<Item = &VerificationCase> {
        self.cases.iter()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Rows dropped by row-granular errors during loading.
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }
}

impl IntoIterator for Manifest {
    type Item = VerificationCase;
    type IntoIter = std::vec::IntoIter<VerificationCase>;

    fn into_iter(self) -> Self::IntoIter {
        self.cases.into_iter()
    }
}

fn parse_row(
    fields: &[&str],
    id_col: usize,
    path_col: usize,
    expected_col: usize,
    distance_col: Option<usize>,
    base_dir: &Path,
    algorithm: Algorithm,
) -> Result<VerificationCase, String> {
    let field = |idx: usize, name: &str| -> Result<String, String> {
        match fields.get(idx) {
            Some(v) if !v.is_empty() => Ok((*v).to_string()),
            _ => Err(format!("missing {name} field")),
        }
    };

    let media_id = field(id_col, "id")?;
    let raw_path = field(path_col, "path")?;
    let expected_hash = field(expected_col, "expected")?;

    let source_path = {
        let p = PathBuf::from(&raw_path);
        if p.is_absolute() {
            p
        } else {
            base_dir.join(p)
        }
    };
    if !source_path.is_file() {
        return Err(format!("media file not found: {}", source_path.display()));
    }

    let max_distance = match distance_col.and_then(|idx| fields.get(idx)) {
        Some(v) if !v.is_empty() => Some(
            v.parse::<u32>()
                .map_err(|_| format!("unparseable max_distance: {v}"))?,
        ),
        _ => None,
    };

    Ok(VerificationCase {
        media_id,
        source_path,
        expected_hash,
        algorithm,
        max_distance,
    })
}

/// Fatal manifest problems. Row-level errors never surface here.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("cannot read manifest {0}: {1}")]
    Unreadable(PathBuf, String),

    #[error("manifest {0} is empty")]
    Empty(PathBuf),

    #[error("manifest header is missing required column '{0}'")]
    MissingColumn(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("manifest.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{body}").unwrap();
        path
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"media-bytes").unwrap();
    }

    #[test]
    fn loads_rows_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "cat.jpg");
        touch(tmp.path(), "dog.jpg");
        let path = write_manifest(
            tmp.path(),
            "id,path,expected\ncat.jpg,cat.jpg,a1b2\ndog.jpg,dog.jpg,c3d4\n",
        );

        let manifest = Manifest::load(&path, Algorithm::PdqMd5).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.skipped_rows(), 0);
        let ids: Vec<_> = manifest.cases().map(|c| c.media_id.as_str()).collect();
        assert_eq!(ids, ["cat.jpg", "dog.jpg"]);
    }

    #[test]
    fn missing_header_column_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_manifest(tmp.path(), "id,path\nx,y\n");
        let err = Manifest::load(&path, Algorithm::PdqMd5).unwrap_err();
        assert!(matches!(err, ManifestError::MissingColumn(c) if c == "expected"));
    }

    #[test]
    fn malformed_row_is_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "ok.jpg");
        let path = write_manifest(
            tmp.path(),
            "id,path,expected\nok.jpg,ok.jpg,aa\nbad.jpg,missing.jpg,bb\n,,\n",
        );

        let manifest = Manifest::load(&path, Algorithm::PdqMd5).unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.skipped_rows(), 2);
    }

    #[test]
    fn duplicate_id_keeps_first_row() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "a.jpg");
        let path = write_manifest(
            tmp.path(),
            "id,path,expected\na.jpg,a.jpg,first\na.jpg,a.jpg,second\n",
        );

        let manifest = Manifest::load(&path, Algorithm::PdqMd5).unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.skipped_rows(), 1);
        assert_eq!(manifest.cases().next().unwrap().expected_hash, "first");
    }

    #[test]
    fn reload_yields_same_sequence() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "a.jpg");
        touch(tmp.path(), "b.jpg");
        let path = write_manifest(
            tmp.path(),
            "id,path,expected\na.jpg,a.jpg,aa\nb.jpg,b.jpg,bb\n",
        );

        let first = Manifest::load(&path, Algorithm::PdqMd5).unwrap();
        let second = Manifest::load(&path, Algorithm::PdqMd5).unwrap();
        let a: Vec<_> = first.cases().cloned().collect();
        let b: Vec<_> = second.cases().cloned().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn max_distance_column_is_optional() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "a.jpg");
        touch(tmp.path(), "b.jpg");
        let path = write_manifest(
            tmp.path(),
            "id,path,expected,max_distance\na.jpg,a.jpg,aa,8\nb.jpg,b.jpg,bb,\n",
        );

        let manifest = Manifest::load(&path, Algorithm::PdqMd5).unwrap();
        let cases: Vec<_> = manifest.cases().collect();
        assert_eq!(cases[0].max_distance, Some(8));
        assert_eq!(cases[1].max_distance, None);
    }

    #[test]
    fn unparseable_max_distance_skips_row() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "a.jpg");
        let path = write_manifest(
            tmp.path(),
            "id,path,expected,max_distance\na.jpg,a.jpg,aa,lots\n",
        );

        let manifest = Manifest::load(&path, Algorithm::PdqMd5).unwrap();
        assert!(manifest.is_empty());
        assert_eq!(manifest.skipped_rows(), 1);
    }
}
