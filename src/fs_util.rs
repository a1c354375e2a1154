use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;
use zip::ZipArchive;

use crate::error::GeoextentError;

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Gzip,
}

/// Sniffs the first bytes; extensions on archive downloads are unreliable.
pub fn archive_kind(path: &Path) -> Result<Option<ArchiveKind>, GeoextentError> {
    let mut file = fs::File::open(path)
        .map_err(|err| GeoextentError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut head = [0u8; 4];
    let read = file
        .read(&mut head)
        .map_err(|err| GeoextentError::Filesystem(format!("read {}: {err}", path.display())))?;
    if read >= 4 && head == ZIP_MAGIC {
        return Ok(Some(ArchiveKind::Zip));
    }
    if read >= 2 && head[..2] == GZIP_MAGIC {
        return Ok(Some(ArchiveKind::Gzip));
    }
    Ok(None)
}

/// Where an archive's content ended up, and the regular files it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unpacked {
    pub location: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Unpacks a downloaded archive next to itself and removes the archive.
/// Zip archives are checked in full before anything is written. Other files
/// are left alone.
pub fn unpack_in_place(path: &Path) -> Result<Unpacked, GeoextentError> {
    let Some(kind) = archive_kind(path)? else {
        return Ok(Unpacked {
            location: path.to_path_buf(),
            files: vec![path.to_path_buf()],
        });
    };
    let target = unpack_target(path, kind);
    let files = match kind {
        ArchiveKind::Zip => {
            validate_zip(path)?;
            extract_zip(path, &target)?
        }
        ArchiveKind::Gzip => {
            gunzip(path, &target)?;
            vec![target.clone()]
        }
    };
    fs::remove_file(path)
        .map_err(|err| GeoextentError::Filesystem(format!("remove {}: {err}", path.display())))?;
    debug!(archive = %path.display(), files = files.len(), "unpacked archive");
    Ok(Unpacked {
        location: target,
        files,
    })
}

/// `sites.zip` unpacks to `sites/`, `a.csv.gz` to `a.csv`. Names without the
/// archive extension, or whose stripped name is taken by the wrong kind of
/// entry, get an `.unpacked` suffix so the target never equals the archive.
fn unpack_target(path: &Path, kind: ArchiveKind) -> PathBuf {
    let suffix = match kind {
        ArchiveKind::Zip => "zip",
        ArchiveKind::Gzip => "gz",
    };
    let stripped = path
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.eq_ignore_ascii_case(suffix))
        .and(path.file_stem())
        .filter(|stem| !stem.is_empty())
        .map(|stem| path.with_file_name(stem));
    let usable = stripped.filter(|target| match kind {
        ArchiveKind::Zip => !target.exists() || target.is_dir(),
        ArchiveKind::Gzip => !target.is_dir(),
    });
    usable.unwrap_or_else(|| {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".unpacked");
        path.with_file_name(name)
    })
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, GeoextentError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        GeoextentError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| GeoextentError::Filesystem(err.to_string()))?;

    let mut written = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| GeoextentError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(GeoextentError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| GeoextentError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| GeoextentError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| GeoextentError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| GeoextentError::Filesystem(err.to_string()))?;
        written.push(entry_path);
    }
    Ok(written)
}

pub fn validate_zip(zip_path: &Path) -> Result<(), GeoextentError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        GeoextentError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| GeoextentError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| GeoextentError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| GeoextentError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub fn gunzip(gz_path: &Path, target: &Path) -> Result<(), GeoextentError> {
    let file = fs::File::open(gz_path).map_err(|err| {
        GeoextentError::Filesystem(format!("open gzip {}: {err}", gz_path.display()))
    })?;
    let mut decoder = GzDecoder::new(file);
    let part = target.with_extension("part");
    let result = fs::File::create(&part)
        .and_then(|mut out| io::copy(&mut decoder, &mut out))
        .and_then(|_| fs::rename(&part, target));
    if let Err(err) = result {
        let _ = fs::remove_file(&part);
        return Err(GeoextentError::Filesystem(format!(
            "gunzip {}: {err}",
            gz_path.display()
        )));
    }
    Ok(())
}
