//! Append-only dense vector files.
//!
//! Two files grow in lockstep: `vectors.bin` holds an N x D float32 matrix,
//! `ids.bin` the parallel fingerprint ids. Each file starts with a small
//! header carrying a committed row count; appends write payload bytes first
//! and commit by rewriting the header, so a torn payload write is invisible
//! after restart. A row-count disagreement between the two headers is a
//! load error (torn commit), surfaced to the supervisor.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{HuntError, Result};
use crate::types::EmbeddingMatrix;

const VEC_MAGIC: &[u8; 4] = b"VHVC";
const ID_MAGIC: &[u8; 4] = b"VHID";
const FORMAT_VERSION: u32 = 1;

// magic + version + dim + rows
const VEC_HEADER_LEN: u64 = 4 + 4 + 4 + 8;
// magic + version + rows
const ID_HEADER_LEN: u64 = 4 + 4 + 8;

pub struct VectorFileStore {
    vector_path: PathBuf,
    id_path: PathBuf,
}

struct VecHeader {
    dim: u32,
    rows: u64,
}

impl VectorFileStore {
    pub fn new(vector_path: impl Into<PathBuf>, id_path: impl Into<PathBuf>) -> Self {
        Self {
            vector_path: vector_path.into(),
            id_path: id_path.into(),
        }
    }

    /// Append a batch of rows and their fingerprint ids. No-op for an empty
    /// batch. The batch dimension must agree with what is already on disk.
    pub fn append(&self, embeddings: &EmbeddingMatrix, ids: &[i64]) -> Result<()> {
        if embeddings.rows() == 0 {
            return Ok(());
        }
        if embeddings.rows() != ids.len() {
            return Err(HuntError::VectorIndex(format!(
                "append of {} vectors with {} ids",
                embeddings.rows(),
                ids.len()
            )));
        }

        if let Some(parent) = self.vector_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut vec_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.vector_path)?;
        let mut id_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.id_path)?;

        let vec_header = match read_vec_header(&mut vec_file)? {
            Some(h) => {
                if h.dim as usize != embeddings.dim() {
                    return Err(HuntError::VectorIndex(format!(
                        "dimension mismatch: file has {}, batch has {}",
                        h.dim,
                        embeddings.dim()
                    )));
                }
                h
            }
            None => {
                let h = VecHeader {
                    dim: embeddings.dim() as u32,
                    rows: 0,
                };
                write_vec_header(&mut vec_file, &h)?;
                h
            }
        };
        let id_rows = match read_id_header(&mut id_file)? {
            Some(rows) => rows,
            None => {
                write_id_header(&mut id_file, 0)?;
                0
            }
        };
        if vec_header.rows != id_rows {
            return Err(HuntError::VectorIndex(format!(
                "vector file has {} committed rows but id file has {}",
                vec_header.rows, id_rows
            )));
        }

        // Payload first, overwriting any torn tail beyond the committed count.
        let row_bytes = embeddings.dim() as u64 * 4;
        vec_file.seek(SeekFrom::Start(VEC_HEADER_LEN + vec_header.rows * row_bytes))?;
        let mut buf = Vec::with_capacity(embeddings.as_slice().len() * 4);
        for value in embeddings.as_slice() {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        vec_file.write_all(&buf)?;
        vec_file.sync_all()?;

        id_file.seek(SeekFrom::Start(ID_HEADER_LEN + id_rows * 8))?;
        let mut id_buf = Vec::with_capacity(ids.len() * 8);
        for id in ids {
            id_buf.extend_from_slice(&id.to_le_bytes());
        }
        id_file.write_all(&id_buf)?;
        id_file.sync_all()?;

        // Commit.
        let new_rows = vec_header.rows + embeddings.rows() as u64;
        write_vec_header(
            &mut vec_file,
            &VecHeader {
                dim: vec_header.dim,
                rows: new_rows,
            },
        )?;
        vec_file.sync_all()?;
        write_id_header(&mut id_file, new_rows)?;
        id_file.sync_all()?;

        debug!(total_rows = new_rows, "saved vectors");
        Ok(())
    }

    /// Load the committed matrix and id vector. Empty when either file is
    /// absent; an error when the two headers disagree.
    pub fn load(&self) -> Result<(EmbeddingMatrix, Vec<i64>)> {
        if !self.vector_path.exists() || !self.id_path.exists() {
            return Ok((EmbeddingMatrix::default(), Vec::new()));
        }

        let mut vec_file = File::open(&self.vector_path)?;
        let mut id_file = File::open(&self.id_path)?;

        let vec_header = read_vec_header(&mut vec_file)?
            .ok_or_else(|| HuntError::VectorIndex("vector file header is truncated".into()))?;
        let id_rows = read_id_header(&mut id_file)?
            .ok_or_else(|| HuntError::VectorIndex("id file header is truncated".into()))?;

        if vec_header.rows != id_rows {
            return Err(HuntError::VectorIndex(format!(
                "vector file has {} committed rows but id file has {}",
                vec_header.rows, id_rows
            )));
        }

        let dim = vec_header.dim as usize;
        let rows = vec_header.rows as usize;

        let mut data = vec![0u8; rows * dim * 4];
        vec_file.seek(SeekFrom::Start(VEC_HEADER_LEN))?;
        vec_file.read_exact(&mut data).map_err(|_| {
            HuntError::VectorIndex("vector payload is shorter than the committed count".into())
        })?;
        let floats: Vec<f32> = data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let mut id_data = vec![0u8; rows * 8];
        id_file.seek(SeekFrom::Start(ID_HEADER_LEN))?;
        id_file.read_exact(&mut id_data).map_err(|_| {
            HuntError::VectorIndex("id payload is shorter than the committed count".into())
        })?;
        let ids: Vec<i64> = id_data
            .chunks_exact(8)
            .map(|c| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(c);
                i64::from_le_bytes(arr)
            })
            .collect();

        let matrix = EmbeddingMatrix::from_raw(floats, rows, dim)
            .ok_or_else(|| HuntError::VectorIndex("vector payload size mismatch".into()))?;
        Ok((matrix, ids))
    }

    /// Committed row count without loading payloads. Zero when absent.
    pub fn row_count(&self) -> Result<u64> {
        if !self.vector_path.exists() {
            return Ok(0);
        }
        let mut vec_file = File::open(&self.vector_path)?;
        let header = read_vec_header(&mut vec_file)?
            .ok_or_else(|| HuntError::VectorIndex("vector file header is truncated".into()))?;
        Ok(header.rows)
    }
}

fn read_vec_header(file: &mut File) -> Result<Option<VecHeader>> {
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    let mut buf = [0u8; VEC_HEADER_LEN as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut buf)
        .map_err(|_| HuntError::VectorIndex("vector file header is truncated".into()))?;
    if &buf[0..4] != VEC_MAGIC {
        return Err(HuntError::VectorIndex("vector file magic mismatch".into()));
    }
    let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(HuntError::VectorIndex(format!(
            "unsupported vector file version {version}"
        )));
    }
    Ok(Some(VecHeader {
        dim: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        rows: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
    }))
}

fn write_vec_header(file: &mut File, header: &VecHeader) -> Result<()> {
    let mut buf = Vec::with_capacity(VEC_HEADER_LEN as usize);
    buf.extend_from_slice(VEC_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&header.dim.to_le_bytes());
    buf.extend_from_slice(&header.rows.to_le_bytes());
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&buf)?;
    Ok(())
}

fn read_id_header(file: &mut File) -> Result<Option<u64>> {
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    let mut buf = [0u8; ID_HEADER_LEN as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut buf)
        .map_err(|_| HuntError::VectorIndex("id file header is truncated".into()))?;
    if &buf[0..4] != ID_MAGIC {
        return Err(HuntError::VectorIndex("id file magic mismatch".into()));
    }
    let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(HuntError::VectorIndex(format!(
            "unsupported id file version {version}"
        )));
    }
    Ok(Some(u64::from_le_bytes(buf[8..16].try_into().unwrap())))
}

fn write_id_header(file: &mut File, rows: u64) -> Result<()> {
    let mut buf = Vec::with_capacity(ID_HEADER_LEN as usize);
    buf.extend_from_slice(ID_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&rows.to_le_bytes());
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> VectorFileStore {
        VectorFileStore::new(dir.join("vectors.bin"), dir.join("ids.bin"))
    }

    fn matrix(rows: &[Vec<f32>]) -> EmbeddingMatrix {
        EmbeddingMatrix::from_rows(rows).unwrap()
    }

    #[test]
    fn load_of_absent_files_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let (vectors, ids) = store.load().unwrap();
        assert!(vectors.is_empty());
        assert!(ids.is_empty());
        assert_eq!(store.row_count().unwrap(), 0);
    }

    #[test]
    fn append_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());

        store
            .append(&matrix(&[vec![1.0, 2.0], vec![3.0, 4.0]]), &[10, 11])
            .unwrap();
        store.append(&matrix(&[vec![5.0, 6.0]]), &[12]).unwrap();

        let (vectors, ids) = store.load().unwrap();
        assert_eq!(vectors.rows(), 3);
        assert_eq!(vectors.dim(), 2);
        assert_eq!(vectors.row(2), &[5.0, 6.0]);
        assert_eq!(ids, vec![10, 11, 12]);
    }

    #[test]
    fn empty_append_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store.append(&EmbeddingMatrix::new(4), &[]).unwrap();
        assert!(!tmp.path().join("vectors.bin").exists());
    }

    #[test]
    fn mismatched_batch_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let err = store
            .append(&matrix(&[vec![1.0, 2.0]]), &[1, 2])
            .unwrap_err();
        assert!(matches!(err, HuntError::VectorIndex(_)));
    }

    #[test]
    fn dimension_change_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store.append(&matrix(&[vec![1.0, 2.0]]), &[1]).unwrap();
        let err = store
            .append(&matrix(&[vec![1.0, 2.0, 3.0]]), &[2])
            .unwrap_err();
        assert!(matches!(err, HuntError::VectorIndex(_)));
    }

    #[test]
    fn torn_payload_is_truncated_to_committed_count() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store
            .append(&matrix(&[vec![1.0, 2.0], vec![3.0, 4.0]]), &[1, 2])
            .unwrap();

        // Simulate a crash mid-append: payload bytes landed, header did not.
        let mut f = OpenOptions::new()
            .append(true)
            .open(tmp.path().join("vectors.bin"))
            .unwrap();
        f.write_all(&[0xAB; 8]).unwrap();
        drop(f);

        let (vectors, ids) = store.load().unwrap();
        assert_eq!(vectors.rows(), 2);
        assert_eq!(ids.len(), 2);

        // And the next append overwrites the torn tail.
        store.append(&matrix(&[vec![5.0, 6.0]]), &[3]).unwrap();
        let (vectors, _) = store.load().unwrap();
        assert_eq!(vectors.row(2), &[5.0, 6.0]);
    }

    #[test]
    fn header_disagreement_is_a_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store.append(&matrix(&[vec![1.0, 2.0]]), &[1]).unwrap();

        // Roll the id header back one row.
        let mut f = OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmp.path().join("ids.bin"))
            .unwrap();
        write_id_header(&mut f, 0).unwrap();
        drop(f);

        assert!(matches!(
            store.load().unwrap_err(),
            HuntError::VectorIndex(_)
        ));
    }
}
