use std::{io::Write, path::Path};

use crate::Bitfield;

#[derive(thiserror::Error, Debug)]
pub enum ProgressError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed progress file: {0}")]
    Malformed(#[from] serde_json::Error),
}

const VERSION: u32 = 1;

// `<download-dir>/<info.name>.progress`: which pieces are already verified,
// so a restart can skip re-hashing the whole download directory.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Progress {
    pub version: u32,
    pub have: Vec<usize>,
}

impl Progress {
    pub fn from_bitfield(bf: &Bitfield) -> Self {
        Self {
            version: VERSION,
            have: bf.iter_ones().collect(),
        }
    }

    pub fn into_bitfield(self, num_pieces: usize) -> Option<Bitfield> {
        if self.version != VERSION {
            return None;
        }
        let mut bf = Bitfield::repeat(false, num_pieces);
        for idx in self.have {
            if idx >= num_pieces {
                return None;
            }
            bf.set(idx, true);
        }
        Some(bf)
    }

    // Returns None if the file is absent or unparseable; callers fall back
    // to full on-disk verification in that case, per spec.
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    // Temp-file-then-rename, matching FileStore's write-through durability.
    pub fn save(&self, path: &Path) -> Result<(), ProgressError> {
        let tmp = path.with_extension("progress.tmp");
        {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(&serde_json::to_vec(self)?)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitvec::prelude::*;

    #[test]
    fn round_trips_through_bitfield() {
        let mut bf: Bitfield = BitVec::repeat(false, 10);
        bf.set(2, true);
        bf.set(7, true);
        let progress = Progress::from_bitfield(&bf);
        let restored = progress.into_bitfield(10).unwrap();
        assert_eq!(restored, bf);
    }

    #[test]
    fn save_then_load_round_trips_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.progress");
        let mut bf: Bitfield = BitVec::repeat(false, 4);
        bf.set(1, true);
        Progress::from_bitfield(&bf).save(&path).unwrap();

        let loaded = Progress::load(&path).unwrap().into_bitfield(4).unwrap();
        assert_eq!(loaded, bf);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Progress::load(&dir.path().join("nope.progress")).is_none());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let progress = Progress { version: VERSION, have: vec![99] };
        assert!(progress.into_bitfield(4).is_none());
    }
}
