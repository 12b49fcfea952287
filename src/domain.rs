use std::fmt;
use std::fs;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::VetError;

pub const DEFAULT_MAX_DATASET_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identifier {
    type Err = VetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty()
            || matches!(trimmed, "." | "..")
            || trimmed.chars().any(|ch| ch.is_control())
        {
            return Err(VetError::InvalidIdentifier(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for Identifier {
    type Error = VetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    /// One FITS light curve.
    Single,
    /// A zip archive of FITS light curves.
    Archive,
    /// A tabular dataset sent for direct analysis.
    Dataset,
}

impl UploadKind {
    pub fn extension(self) -> &'static str {
        match self {
            UploadKind::Single => "fits",
            UploadKind::Archive => "zip",
            UploadKind::Dataset => "csv",
        }
    }

    pub fn infer(path: &Utf8Path) -> Option<Self> {
        let ext = path.extension()?.to_ascii_lowercase();
        [UploadKind::Single, UploadKind::Archive, UploadKind::Dataset]
            .into_iter()
            .find(|kind| kind.extension() == ext)
    }

    fn size_limit(self, max_dataset_bytes: u64) -> Option<u64> {
        match self {
            UploadKind::Dataset => Some(max_dataset_bytes),
            UploadKind::Single | UploadKind::Archive => None,
        }
    }
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadKind::Single => write!(f, "single"),
            UploadKind::Archive => write!(f, "archive"),
            UploadKind::Dataset => write!(f, "dataset"),
        }
    }
}

/// A local file that passed the client-side checks for its upload kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFile {
    path: Utf8PathBuf,
    kind: UploadKind,
    size: u64,
}

impl DatasetFile {
    pub fn open(
        path: impl Into<Utf8PathBuf>,
        kind: UploadKind,
        max_dataset_bytes: u64,
    ) -> Result<Self, VetError> {
        let path = path.into();
        let file_name = path.file_name().unwrap_or(path.as_str()).to_string();

        let has_extension = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(kind.extension()))
            .unwrap_or(false);
        if !has_extension {
            return Err(VetError::InvalidExtension {
                file: file_name,
                expected: kind.extension(),
            });
        }

        let meta = fs::metadata(path.as_std_path())
            .map_err(|_| VetError::FileRead(path.clone().into_std_path_buf()))?;
        if !meta.is_file() {
            return Err(VetError::FileRead(path.into_std_path_buf()));
        }
        let size = meta.len();
        if size == 0 {
            return Err(VetError::EmptyFile(file_name));
        }
        if let Some(limit) = kind.size_limit(max_dataset_bytes) {
            if size > limit {
                return Err(VetError::FileTooLarge {
                    file: file_name,
                    size,
                    limit,
                });
            }
        }

        Ok(Self { path, kind, size })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn kind(&self) -> UploadKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn file_name(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }

    /// Opens the file for streaming; the upload body is never held in memory.
    pub fn open_reader(&self) -> Result<fs::File, VetError> {
        fs::File::open(self.path.as_std_path())
            .map_err(|_| VetError::FileRead(self.path.clone().into_std_path_buf()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Idle,
    InFlight,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadJob {
    pub file_name: String,
    pub kind: UploadKind,
    pub status: UploadStatus,
}

impl UploadJob {
    pub fn start(file: &DatasetFile) -> Self {
        Self {
            file_name: file.file_name().to_string(),
            kind: file.kind(),
            status: UploadStatus::InFlight,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.status == UploadStatus::InFlight
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn identifier_is_trimmed() {
        let id: Identifier = "  KIC-8462852 ".parse().unwrap();
        assert_eq!(id.as_str(), "KIC-8462852");
    }

    #[test]
    fn blank_identifier_is_rejected() {
        let err = "   ".parse::<Identifier>().unwrap_err();
        assert_matches!(err, VetError::InvalidIdentifier(_));
    }

    #[test]
    fn dot_segments_are_rejected() {
        for value in [".", "..", " .. "] {
            assert_matches!(value.parse::<Identifier>(), Err(VetError::InvalidIdentifier(_)));
        }
        assert!("KIC.1".parse::<Identifier>().is_ok());
    }

    #[test]
    fn infer_kind_from_extension() {
        assert_eq!(
            UploadKind::infer(Utf8Path::new("a/kplr001.FITS")),
            Some(UploadKind::Single)
        );
        assert_eq!(
            UploadKind::infer(Utf8Path::new("batch.zip")),
            Some(UploadKind::Archive)
        );
        assert_eq!(UploadKind::infer(Utf8Path::new("notes.txt")), None);
    }

    #[test]
    fn dataset_over_limit_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("flux.csv")).unwrap();
        fs::write(path.as_std_path(), vec![b'1'; 64]).unwrap();

        let err = DatasetFile::open(path.clone(), UploadKind::Dataset, 32).unwrap_err();
        assert_matches!(err, VetError::FileTooLarge { size: 64, limit: 32, .. });

        let ok = DatasetFile::open(path, UploadKind::Dataset, 64).unwrap();
        assert_eq!(ok.size(), 64);
    }

    #[test]
    fn wrong_extension_never_touches_disk() {
        let err = DatasetFile::open("missing.csv", UploadKind::Archive, 10).unwrap_err();
        assert_matches!(err, VetError::InvalidExtension { expected: "zip", .. });
    }
}
