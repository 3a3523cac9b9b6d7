//! On-disk layout of an [`EmbeddingIndex`].
//!
//! An index directory holds three files:
//!
//! - `embeddings.npy`: NumPy v1.0 array, dtype `<f4`, C order, shape `(N, D)`.
//! - `metadata.csv`: `company,category,file_name,chunk_idx,text`, one row per
//!   chunk in the same order as the array rows.
//! - `manifest.json`: row count, dimension and SHA-256 digests of the two
//!   artifacts. Published last.
//!
//! All three files are staged to `*.tmp` siblings and synced before any of
//! them is renamed into place, so a failed write never replaces a good
//! artifact with a partial one. The old manifest is removed before the first
//! rename. An interrupted publish therefore leaves either a manifest whose
//! digests disagree with the artifacts, or no manifest and a staged file,
//! and both are rejected on load. Directories without a manifest and without
//! staged files (as written by NumPy/pandas pipelines) still load, with row
//! counts validated.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use groundwork_core::{GroundworkError, GroundworkResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::store::{Chunk, EmbeddingIndex};

/// File name of the embedding matrix.
pub const EMBEDDINGS_FILE: &str = "embeddings.npy";
/// File name of the metadata table.
pub const METADATA_FILE: &str = "metadata.csv";
/// File name of the manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

const FORMAT_VERSION: u32 = 2;
const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Summary written alongside the artifacts and validated on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Layout version; only the current version loads.
    pub format_version: u32,
    /// Number of chunks.
    pub rows: usize,
    /// Vector width, `0` for an empty index.
    pub dimension: usize,
    /// Hex SHA-256 of `embeddings.npy`.
    pub embeddings_sha256: String,
    /// Hex SHA-256 of `metadata.csv`.
    pub metadata_sha256: String,
    /// When the index was written.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataRecord {
    company: String,
    category: String,
    #[serde(rename = "file_name")]
    source_file: String,
    #[serde(rename = "chunk_idx")]
    chunk_index: usize,
    text: String,
}

impl EmbeddingIndex {
    /// Write the index to `dir`, creating the directory if needed.
    pub async fn persist(&self, dir: &Path) -> GroundworkResult<IndexManifest> {
        tokio::fs::create_dir_all(dir).await?;

        let dimension = self.dimension().unwrap_or(0);
        let embeddings = encode_npy(self, dimension);
        let metadata = encode_metadata(self)?;
        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            rows: self.len(),
            dimension,
            embeddings_sha256: digest(&embeddings),
            metadata_sha256: digest(&metadata),
            created_at: Utc::now(),
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;

        let artifacts = [
            (dir.join(EMBEDDINGS_FILE), embeddings),
            (dir.join(METADATA_FILE), metadata),
            (dir.join(MANIFEST_FILE), manifest_bytes),
        ];

        let mut staged = Vec::with_capacity(artifacts.len());
        for (target, bytes) in &artifacts {
            match stage(target, bytes).await {
                Ok(path) => staged.push(path),
                Err(e) => {
                    discard_all(&staged).await;
                    return Err(e);
                }
            }
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        if let Err(e) = remove_if_exists(&manifest_path).await {
            discard_all(&staged).await;
            return Err(e);
        }

        // Manifest goes last: until it lands, its staged copy marks the
        // directory as mid-publish.
        for (position, (from, (to, _))) in staged.iter().zip(&artifacts).enumerate() {
            if let Err(e) = tokio::fs::rename(from, to).await {
                discard_all(&staged[position..]).await;
                return Err(e.into());
            }
        }

        info!(
            dir = %dir.display(),
            rows = manifest.rows,
            dimension = manifest.dimension,
            "Embedding index persisted"
        );
        Ok(manifest)
    }

    /// Load an index previously written by [`persist`](Self::persist) (or by
    /// a NumPy/pandas pipeline using the same file names).
    ///
    /// Missing artifacts are [`GroundworkError::Io`]; any inconsistency
    /// between them is [`GroundworkError::CorruptStore`].
    pub async fn load(dir: &Path) -> GroundworkResult<Self> {
        let embeddings_bytes = tokio::fs::read(dir.join(EMBEDDINGS_FILE)).await?;
        let metadata_bytes = tokio::fs::read(dir.join(METADATA_FILE)).await?;
        let manifest = load_manifest(dir).await?;

        if let Some(manifest) = &manifest {
            if manifest.embeddings_sha256 != digest(&embeddings_bytes) {
                return Err(GroundworkError::CorruptStore(format!(
                    "{EMBEDDINGS_FILE} does not match the manifest digest"
                )));
            }
            if manifest.metadata_sha256 != digest(&metadata_bytes) {
                return Err(GroundworkError::CorruptStore(format!(
                    "{METADATA_FILE} does not match the manifest digest"
                )));
            }
        } else {
            for name in [EMBEDDINGS_FILE, METADATA_FILE, MANIFEST_FILE] {
                let leftover = staged_path(&dir.join(name));
                if tokio::fs::try_exists(&leftover).await? {
                    return Err(GroundworkError::CorruptStore(format!(
                        "no manifest and staged file {} present, the last write was interrupted",
                        leftover.display()
                    )));
                }
            }
            warn!(
                dir = %dir.display(),
                "No manifest found, only row counts can be cross-checked"
            );
        }

        let matrix = decode_npy(&embeddings_bytes)?;
        let records = decode_metadata(&metadata_bytes)?;

        if matrix.rows != records.len() {
            return Err(GroundworkError::CorruptStore(format!(
                "{EMBEDDINGS_FILE} has {} rows but {METADATA_FILE} has {}",
                matrix.rows,
                records.len()
            )));
        }
        if let Some(manifest) = &manifest {
            if manifest.rows != matrix.rows
                || (matrix.rows > 0 && manifest.dimension != matrix.cols)
            {
                return Err(GroundworkError::CorruptStore(format!(
                    "manifest declares {}x{} but artifacts hold {}x{}",
                    manifest.rows, manifest.dimension, matrix.rows, matrix.cols
                )));
            }
        }

        let mut index = EmbeddingIndex::new();
        for (row, record) in records.into_iter().enumerate() {
            let start = row * matrix.cols;
            let chunk = Chunk {
                company: record.company,
                category: record.category,
                source_file: record.source_file,
                chunk_index: record.chunk_index,
                text: record.text,
                embedding: matrix.values[start..start + matrix.cols].to_vec(),
            };
            index
                .append(chunk)
                .map_err(|e| GroundworkError::CorruptStore(format!("row {row}: {e}")))?;
        }

        info!(
            dir = %dir.display(),
            rows = index.len(),
            dimension = matrix.cols,
            "Embedding index loaded"
        );
        Ok(index)
    }
}

/// Read `manifest.json` from an index directory, if present.
pub async fn load_manifest(dir: &Path) -> GroundworkResult<Option<IndexManifest>> {
    let path = dir.join(MANIFEST_FILE);
    if !tokio::fs::try_exists(&path).await? {
        return Ok(None);
    }
    let data = tokio::fs::read(&path).await?;
    let manifest: IndexManifest = serde_json::from_slice(&data)
        .map_err(|e| GroundworkError::CorruptStore(format!("invalid manifest: {e}")))?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(GroundworkError::CorruptStore(format!(
            "unsupported index format version {}",
            manifest.format_version
        )));
    }
    Ok(Some(manifest))
}

fn staged_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

async fn stage(target: &Path, bytes: &[u8]) -> GroundworkResult<PathBuf> {
    let staged = staged_path(target);

    let result = async {
        let mut file = tokio::fs::File::create(&staged).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok::<(), std::io::Error>(())
    }
    .await;

    match result {
        Ok(()) => Ok(staged),
        Err(e) => {
            discard(&staged).await;
            Err(e.into())
        }
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove staged file");
        }
    }
}

async fn discard_all(paths: &[PathBuf]) {
    for path in paths {
        discard(path).await;
    }
}

async fn remove_if_exists(path: &Path) -> GroundworkResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn encode_metadata(index: &EmbeddingIndex) -> GroundworkResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if index.is_empty() {
        writer
            .write_record(["company", "category", "file_name", "chunk_idx", "text"])
            .map_err(|e| GroundworkError::Io(e.into()))?;
    }
    for chunk in index {
        writer
            .serialize(MetadataRecord {
                company: chunk.company.clone(),
                category: chunk.category.clone(),
                source_file: chunk.source_file.clone(),
                chunk_index: chunk.chunk_index,
                text: chunk.text.clone(),
            })
            .map_err(|e| GroundworkError::Io(e.into()))?;
    }
    writer
        .into_inner()
        .map_err(|e| GroundworkError::Io(e.into_error()))
}

fn decode_metadata(bytes: &[u8]) -> GroundworkResult<Vec<MetadataRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);
    reader
        .deserialize::<MetadataRecord>()
        .enumerate()
        .map(|(row, record)| {
            record.map_err(|e| {
                GroundworkError::CorruptStore(format!("{METADATA_FILE} row {row}: {e}"))
            })
        })
        .collect()
}

/// Row-major matrix decoded from an `.npy` file.
#[derive(Debug)]
struct Matrix {
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

fn encode_npy(index: &EmbeddingIndex, dimension: usize) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        index.len(),
        dimension
    );
    // Magic (6) + version (2) + header length (2) + header, padded to 64 bytes.
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut buffer = Vec::with_capacity(unpadded + padding + index.len() * dimension * 4);
    buffer.extend_from_slice(NPY_MAGIC);
    buffer.extend_from_slice(&[1, 0]);
    buffer.extend_from_slice(&(header.len() as u16).to_le_bytes());
    buffer.extend_from_slice(header.as_bytes());
    for chunk in index {
        for value in &chunk.embedding {
            buffer.extend_from_slice(&value.to_le_bytes());
        }
    }
    buffer
}

fn decode_npy(bytes: &[u8]) -> GroundworkResult<Matrix> {
    let corrupt = |msg: &str| GroundworkError::CorruptStore(format!("{EMBEDDINGS_FILE}: {msg}"));

    if bytes.len() < 10 || !bytes.starts_with(NPY_MAGIC) {
        return Err(corrupt("not an .npy file"));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(corrupt("truncated header"));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        other => return Err(corrupt(&format!("unsupported format version {other}"))),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| corrupt("truncated or non-text header"))?;

    let descr = header_value(header, "descr").ok_or_else(|| corrupt("missing descr"))?;
    let fortran = header_value(header, "fortran_order")
        .ok_or_else(|| corrupt("missing fortran_order"))?;
    let shape = header_value(header, "shape").ok_or_else(|| corrupt("missing shape"))?;

    if fortran != "False" {
        return Err(corrupt("Fortran-ordered arrays are not supported"));
    }
    let dims = parse_shape(shape).ok_or_else(|| corrupt("malformed shape"))?;
    let (rows, cols) = match dims.as_slice() {
        [rows, cols] => (*rows, *cols),
        [0] => (0, 0),
        _ => return Err(corrupt(&format!("expected a 2-D array, got shape {shape}"))),
    };

    let item_size = match descr.trim_matches('\'') {
        "<f4" => 4,
        "<f8" => 8,
        other => return Err(corrupt(&format!("unsupported dtype {other}"))),
    };

    let data = &bytes[data_start.min(bytes.len())..];
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(item_size))
        .ok_or_else(|| corrupt("shape overflows"))?;
    if data.len() != expected {
        return Err(corrupt(&format!(
            "shape ({rows}, {cols}) needs {expected} data bytes, found {}",
            data.len()
        )));
    }

    let values = if item_size == 4 {
        data.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    } else {
        data.chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
            .collect()
    };

    Ok(Matrix { rows, cols, values })
}

/// Raw text of the value stored under `key` in an `.npy` header dict.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("'{key}':");
    let start = header.find(&needle)? + needle.len();
    let rest = header[start..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else if let Some(quoted) = rest.strip_prefix('\'') {
        quoted.find('\'')? + 2
    } else {
        rest.find([',', '}'])?
    };
    Some(rest[..end].trim())
}

fn parse_shape(shape: &str) -> Option<Vec<usize>> {
    shape
        .strip_prefix('(')?
        .strip_suffix(')')?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::tests::make_chunk;

    fn sample_index() -> EmbeddingIndex {
        let mut index = EmbeddingIndex::new();
        let mut a = make_chunk("Premiums are due monthly.", vec![0.25, -1.5, 3.0]);
        a.chunk_index = 0;
        let mut b = make_chunk("Text with, commas and \"quotes\".", vec![1e-7, 0.0, -0.0]);
        b.chunk_index = 1;
        let mut c = make_chunk("Pension vesting age is 60.", vec![f32::MAX, f32::MIN_POSITIVE, 7.0]);
        c.company = "Maxlife".to_string();
        c.category = "Pension Plans".to_string();
        c.source_file = "pension guide.pdf".to_string();
        index.append(a).unwrap();
        index.append(b).unwrap();
        index.append(c).unwrap();
        index
    }

    #[test]
    fn test_npy_header_is_aligned_and_parseable() {
        let index = sample_index();
        let bytes = encode_npy(&index, 3);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');

        let matrix = decode_npy(&bytes).unwrap();
        assert_eq!((matrix.rows, matrix.cols), (3, 3));
        assert_eq!(matrix.values[0..3], [0.25, -1.5, 3.0]);
        assert_eq!(matrix.values[6].to_bits(), f32::MAX.to_bits());
    }

    #[test]
    fn test_npy_f8_narrowed() {
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (1, 2), }";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(NPY_MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&0.5f64.to_le_bytes());
        bytes.extend_from_slice(&(-2.0f64).to_le_bytes());

        let matrix = decode_npy(&bytes).unwrap();
        assert_eq!(matrix.values, vec![0.5, -2.0]);
    }

    #[test]
    fn test_npy_rejects_bad_input() {
        assert!(decode_npy(b"hello").is_err());

        let index = sample_index();
        let mut truncated = encode_npy(&index, 3);
        truncated.pop();
        assert!(matches!(
            decode_npy(&truncated),
            Err(GroundworkError::CorruptStore(_))
        ));

        let header = "{'descr': '<i4', 'fortran_order': False, 'shape': (0, 0), }";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(NPY_MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        assert!(decode_npy(&bytes).is_err());
    }

    #[test]
    fn test_header_value_extraction() {
        let header = "{'descr': '<f4', 'fortran_order': False, 'shape': (12, 300), }";
        assert_eq!(header_value(header, "descr"), Some("'<f4'"));
        assert_eq!(header_value(header, "fortran_order"), Some("False"));
        assert_eq!(header_value(header, "shape"), Some("(12, 300)"));
        assert_eq!(parse_shape("(12, 300)"), Some(vec![12, 300]));
        assert_eq!(parse_shape("(0,)"), Some(vec![0]));
        assert_eq!(parse_shape("12"), None);
    }

    #[tokio::test]
    async fn test_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let index = sample_index();

        let manifest = index.persist(tmp.path()).await.unwrap();
        assert_eq!(manifest.rows, 3);
        assert_eq!(manifest.dimension, 3);

        let loaded = EmbeddingIndex::load(tmp.path()).await.unwrap();
        assert_eq!(loaded, index);
        for (a, b) in loaded.iter().zip(index.iter()) {
            let bits_a: Vec<u32> = a.embedding.iter().map(|v| v.to_bits()).collect();
            let bits_b: Vec<u32> = b.embedding.iter().map(|v| v.to_bits()).collect();
            assert_eq!(bits_a, bits_b);
        }
    }

    #[tokio::test]
    async fn test_no_staged_files_left_behind() {
        let tmp = tempfile::tempdir().unwrap();
        sample_index().persist(tmp.path()).await.unwrap();

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(tmp.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        assert_eq!(names, vec![EMBEDDINGS_FILE, MANIFEST_FILE, METADATA_FILE]);
    }

    #[tokio::test]
    async fn test_interrupted_publish_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        sample_index().persist(tmp.path()).await.unwrap();

        // Crash after the artifacts were renamed but before the manifest was.
        let manifest = tmp.path().join(MANIFEST_FILE);
        let staged = staged_path(&manifest);
        tokio::fs::rename(&manifest, &staged).await.unwrap();
        let err = EmbeddingIndex::load(tmp.path()).await.unwrap_err();
        assert!(matches!(err, GroundworkError::CorruptStore(_)), "{err}");

        // Crash after only the embeddings were renamed.
        tokio::fs::remove_file(&staged).await.unwrap();
        tokio::fs::write(tmp.path().join("metadata.csv.tmp"), b"company\n")
            .await
            .unwrap();
        assert!(matches!(
            EmbeddingIndex::load(tmp.path()).await,
            Err(GroundworkError::CorruptStore(_))
        ));

        tokio::fs::remove_file(tmp.path().join("metadata.csv.tmp"))
            .await
            .unwrap();
        assert_eq!(EmbeddingIndex::load(tmp.path()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_republish_replaces_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        sample_index().persist(tmp.path()).await.unwrap();

        let mut smaller = EmbeddingIndex::new();
        smaller
            .append(make_chunk("Only row.", vec![1.0, 0.0, 0.0]))
            .unwrap();
        let manifest = smaller.persist(tmp.path()).await.unwrap();
        assert_eq!(manifest.rows, 1);
        assert_eq!(load_manifest(tmp.path()).await.unwrap().unwrap().rows, 1);
        assert_eq!(EmbeddingIndex::load(tmp.path()).await.unwrap(), smaller);
    }

    #[tokio::test]
    async fn test_empty_index_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        EmbeddingIndex::new().persist(tmp.path()).await.unwrap();
        let loaded = EmbeddingIndex::load(tmp.path()).await.unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimension(), None);
    }

    #[test]
    fn test_digest_is_sha256_hex() {
        assert_eq!(
            digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(digest(b"abc"), digest(b"abd"));
    }
}
