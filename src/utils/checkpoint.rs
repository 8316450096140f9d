//! Result and checkpoint files.
//!
//! Two formats are written:
//!
//! - **Eigenvalues**: a CSV with header `index,energy,status`, written by rank 0
//!   only.
//! - **Vector shards**: each rank writes its slice of a [`DistributedVector`] to
//!   `<prefix>.rank-<rank>.bin` as raw little-endian `f64`. Concatenating the
//!   files in rank order yields the full vector. No header is stored; the reader
//!   supplies the layout and the file length is checked against it.

use crate::{
    comm::Communicator,
    error::{ErrorKind, Result, SolverError},
    solvers::{ConvergenceStatus, SolverResult},
    vector::{DistributedVector, ShardLayout},
};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

const F64_BYTES: usize = std::mem::size_of::<f64>();

/// One row of the eigenvalue CSV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EigenvalueRecord {
    pub index: usize,
    pub energy: f64,
    pub status: ConvergenceStatus,
}

fn checkpoint_error(path: &Path, err: impl std::fmt::Display) -> SolverError {
    ErrorKind::Checkpoint {
        path: path.display().to_string(),
        message: err.to_string(),
    }
    .into()
}

/// Writes the eigenvalues of `result` to `path` on rank 0. Collective: the other
/// ranks wait at a barrier until the file is complete.
pub fn write_eigenvalues(
    path: impl AsRef<Path>,
    result: &SolverResult,
    comm: &dyn Communicator,
) -> Result<()> {
    let path = path.as_ref();
    if comm.rank() == 0 {
        let mut writer = csv::Writer::from_path(path).map_err(|e| checkpoint_error(path, e))?;
        for (index, &energy) in result.eigenvalues.iter().enumerate() {
            writer
                .serialize(EigenvalueRecord {
                    index,
                    energy,
                    status: result.status,
                })
                .map_err(|e| checkpoint_error(path, e))?;
        }
        writer.flush().map_err(|e| checkpoint_error(path, e))?;
        log::info!(
            "Wrote {} eigenvalue(s) to {}",
            result.eigenvalues.len(),
            path.display()
        );
    }
    comm.barrier()
}

pub fn read_eigenvalues(path: impl AsRef<Path>) -> Result<Vec<EigenvalueRecord>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).map_err(|e| checkpoint_error(path, e))?;
    reader
        .deserialize()
        .map(|row| row.map_err(|e| checkpoint_error(path, e)))
        .collect()
}

/// `<prefix>.rank-<rank>.bin`.
pub fn shard_path(prefix: impl AsRef<Path>, rank: usize) -> PathBuf {
    let mut name = prefix.as_ref().as_os_str().to_owned();
    name.push(format!(".rank-{rank}.bin"));
    PathBuf::from(name)
}

/// Writes this rank's shard of `v` and returns the file path. Local; no
/// communication.
pub fn write_shard(prefix: impl AsRef<Path>, v: &DistributedVector) -> Result<PathBuf> {
    let path = shard_path(prefix, v.rank());
    let file = File::create(&path).map_err(|e| checkpoint_error(&path, e))?;
    let mut writer = BufWriter::new(file);
    for x in v.local() {
        writer
            .write_all(&x.to_le_bytes())
            .map_err(|e| checkpoint_error(&path, e))?;
    }
    writer.flush().map_err(|e| checkpoint_error(&path, e))?;
    Ok(path)
}

/// Reads the shard of `rank` written by [`write_shard`] back into a vector
/// with the given layout.
pub fn read_shard(
    prefix: impl AsRef<Path>,
    layout: &ShardLayout,
    rank: usize,
) -> Result<DistributedVector> {
    let path = shard_path(prefix, rank);
    let file = File::open(&path).map_err(|e| checkpoint_error(&path, e))?;
    let mut bytes = Vec::new();
    BufReader::new(file)
        .read_to_end(&mut bytes)
        .map_err(|e| checkpoint_error(&path, e))?;

    let expected = layout.local_len(rank);
    if bytes.len() != expected * F64_BYTES {
        return Err(checkpoint_error(
            &path,
            format!(
                "expected {expected} amplitudes ({} bytes), found {} bytes",
                expected * F64_BYTES,
                bytes.len()
            ),
        ));
    }
    let local = bytes
        .chunks_exact(F64_BYTES)
        .map(|chunk| {
            let mut word = [0u8; F64_BYTES];
            word.copy_from_slice(chunk);
            f64::from_le_bytes(word)
        })
        .collect();
    DistributedVector::from_local(layout, rank, local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SelfComm;

    #[test]
    fn test_shard_path_format() {
        assert_eq!(
            shard_path("/tmp/run/ground", 3),
            PathBuf::from("/tmp/run/ground.rank-3.bin")
        );
    }

    #[test]
    fn test_shard_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("psi");
        let layout = ShardLayout::balanced(5, 1);
        let v = DistributedVector::from_fn(&layout, &SelfComm, |i| i as f64 - 2.5).unwrap();
        let path = write_shard(&prefix, &v).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 40);
        let back = read_shard(&prefix, &layout, 0).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_truncated_shard_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("psi");
        std::fs::write(shard_path(&prefix, 0), [0u8; 12]).unwrap();
        let err = read_shard(&prefix, &ShardLayout::balanced(2, 1), 0).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Checkpoint { .. }));
    }

    #[test]
    fn test_eigenvalue_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("energies.csv");
        let result = SolverResult {
            status: ConvergenceStatus::Converged,
            eigenvalues: vec![-1.25, -0.5],
            eigenvectors: Vec::new(),
            iterations: 40,
            attempts: 1,
            residual: 1e-9,
        };
        write_eigenvalues(&path, &result, &SelfComm).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("index,energy,status\n0,-1.25,converged\n"));
        let records = read_eigenvalues(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].energy, -0.5);
        assert_eq!(records[1].status, ConvergenceStatus::Converged);
    }
}
