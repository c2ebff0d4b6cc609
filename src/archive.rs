//! Recursive archive expansion with guaranteed temp-space cleanup.
//!
//! [`walk`] returns a lazy iterator over the leaf files of an archive,
//! descending into nested archives as it meets them. Recursion is an
//! explicit stack of frames, one per open archive, each owning a
//! [`TempWorkspace`]. A frame's directory is removed when its members are
//! exhausted or the iterator is dropped, whichever comes first.
//!
//! Two guards bound the walk: nesting depth ([`WalkLimits::max_depth`]) and
//! a SHA-256 digest set of the archives currently open, which stops an
//! archive that contains a copy of one of its ancestors.
//!
//! Supported: zip, tar, gzip (a gzip whose payload is a tar is unpacked as
//! a tar; otherwise the payload is a single member named after the file).
//! Anything else fails with [`ArchiveError::Unreadable`].

use crate::classify;
use crate::config::PipelineConfig;
use crate::models::{ArtifactPath, FileClassification};
use flate2::read::MultiGzDecoder;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Largest decompressed member accepted (zip-bomb protection).
pub const MAX_MEMBER_BYTES: u64 = 1024 * 1024 * 1024;

const USTAR_MAGIC: &[u8] = b"ustar";
const USTAR_MAGIC_OFFSET: usize = 257;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("unreadable archive")]
    Unreadable { detail: String },

    #[error("archive nesting deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("self-referential archive")]
    Cycle,

    #[error("archive member {name} exceeds {limit} bytes")]
    MemberTooLarge { name: String, limit: u64 },

    #[error("could not create temporary workspace: {0}")]
    Workspace(#[source] io::Error),
}

impl ArchiveError {
    fn unreadable(detail: impl ToString) -> Self {
        ArchiveError::Unreadable {
            detail: detail.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalkLimits {
    pub max_depth: usize,
    pub temp_root: Option<PathBuf>,
    pub max_member_bytes: u64,
}

impl Default for WalkLimits {
    fn default() -> Self {
        Self {
            max_depth: 10,
            temp_root: None,
            max_member_bytes: MAX_MEMBER_BYTES,
        }
    }
}

impl From<&PipelineConfig> for WalkLimits {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            max_depth: cfg.max_archive_depth,
            temp_root: cfg.temp_root.clone(),
            max_member_bytes: MAX_MEMBER_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    /// gzip, bgzip, or a gzip-wrapped tar (`.tgz`, `.tar.gz`).
    Gzip,
}

impl ArchiveFormat {
    /// Format from the file name, falling back to magic bytes.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".zip") {
            return Some(ArchiveFormat::Zip);
        }
        if name.ends_with(".tar") {
            return Some(ArchiveFormat::Tar);
        }
        if [".tgz", ".gz", ".gzip", ".bgz"]
            .iter()
            .any(|ext| name.ends_with(ext))
        {
            return Some(ArchiveFormat::Gzip);
        }
        match classify::sniff_mime(path).as_deref() {
            Some("application/zip") => Some(ArchiveFormat::Zip),
            Some("application/x-tar") => Some(ArchiveFormat::Tar),
            Some("application/gzip") => Some(ArchiveFormat::Gzip),
            _ => None,
        }
    }
}

/// A freshly created, uniquely named scratch directory.
///
/// Dropping it removes the directory; if plain removal fails (read-only
/// entries from a tar, for instance) permissions are relaxed and removal is
/// retried once. A failure after that is logged, never raised.
#[derive(Debug)]
pub struct TempWorkspace {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl TempWorkspace {
    pub fn create(root: Option<&Path>) -> Result<Self, ArchiveError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("supp-");
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root).map_err(ArchiveError::Workspace)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(ArchiveError::Workspace)?;
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if let Err(e) = dir.close() {
            debug!(path = %self.path.display(), error = %e, "retrying workspace removal");
            if let Err(e) = force_remove(&self.path) {
                warn!(path = %self.path.display(), error = %e, "could not remove temporary workspace");
            }
        }
    }
}

/// Make everything under `path` owner-writable, then remove it.
pub fn force_remove(path: &Path) -> io::Result<()> {
    relax_permissions(path);
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn relax_permissions(path: &Path) {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if meta.file_type().is_symlink() {
        return;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if meta.is_dir() { 0o700 } else { 0o600 };
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
    }
    #[cfg(not(unix))]
    {
        let mut perms = meta.permissions();
        perms.set_readonly(false);
        let _ = fs::set_permissions(path, perms);
    }
    if meta.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                relax_permissions(&entry.path());
            }
        }
    }
}

/// Open-archive state on the walk stack.
struct Frame {
    workspace: TempWorkspace,
    chain: Vec<String>,
    pending: VecDeque<String>,
    digest: [u8; 32],
    depth: usize,
}

/// What the walk produced next.
#[derive(Debug)]
pub enum WalkEvent {
    /// A leaf file, readable at `physical` until the next call to `next`.
    Member(ArtifactPath),
    /// An archive (the root or a nested one) that could not be expanded.
    Unreadable {
        archive: ArtifactPath,
        error: ArchiveError,
    },
}

/// Lazy, single-pass iterator over the leaves of an archive tree.
pub struct ArchiveWalk {
    root: Option<ArtifactPath>,
    stack: Vec<Frame>,
    open: HashSet<[u8; 32]>,
    limits: WalkLimits,
    last_member: Option<PathBuf>,
}

/// Walk `archive` and every archive nested inside it.
pub fn walk(archive: ArtifactPath, limits: WalkLimits) -> ArchiveWalk {
    ArchiveWalk {
        root: Some(archive),
        stack: Vec::new(),
        open: HashSet::new(),
        limits,
        last_member: None,
    }
}

impl ArchiveWalk {
    /// Number of archives currently unpacked on disk.
    pub fn open_archives(&self) -> usize {
        self.stack.len()
    }

    fn enter(&mut self, archive: &ArtifactPath, depth: usize) -> Result<(), ArchiveError> {
        if depth > self.limits.max_depth {
            return Err(ArchiveError::TooDeep {
                limit: self.limits.max_depth,
            });
        }
        let digest = digest_file(&archive.physical).map_err(ArchiveError::unreadable)?;
        if self.open.contains(&digest) {
            return Err(ArchiveError::Cycle);
        }
        let format = ArchiveFormat::detect(&archive.physical)
            .ok_or_else(|| ArchiveError::unreadable("unsupported archive format"))?;
        let workspace = TempWorkspace::create(self.limits.temp_root.as_deref())?;
        unpack(
            format,
            &archive.physical,
            workspace.path(),
            self.limits.max_member_bytes,
        )?;
        let pending: VecDeque<String> = list_members(workspace.path()).into();

        let mut chain = archive.chain.clone();
        chain.push(archive.member.clone());
        debug!(archive = %archive, depth, members = pending.len(), "unpacked archive");
        self.open.insert(digest);
        self.stack.push(Frame {
            workspace,
            chain,
            pending,
            digest,
            depth,
        });
        Ok(())
    }
}

impl Iterator for ArchiveWalk {
    type Item = WalkEvent;

    fn next(&mut self) -> Option<WalkEvent> {
        if let Some(done) = self.last_member.take() {
            let _ = fs::remove_file(done);
        }
        if let Some(root) = self.root.take() {
            if let Err(error) = self.enter(&root, 1) {
                warn!(archive = %root, error = ?error, "could not expand archive");
                return Some(WalkEvent::Unreadable {
                    archive: root,
                    error,
                });
            }
        }
        loop {
            let frame = self.stack.last_mut()?;
            let Some(rel) = frame.pending.pop_front() else {
                if let Some(done) = self.stack.pop() {
                    self.open.remove(&done.digest);
                }
                continue;
            };
            let artifact = ArtifactPath {
                physical: frame.workspace.path().join(&rel),
                chain: frame.chain.clone(),
                member: rel,
            };
            let depth = frame.depth;
            if classify::classify_with_fallback(&artifact.physical).class == FileClassification::Archive {
                match self.enter(&artifact, depth + 1) {
                    Ok(()) => {
                        // contents are unpacked; the nested file is no longer needed
                        let _ = fs::remove_file(&artifact.physical);
                        continue;
                    }
                    Err(error) => {
                        warn!(archive = %artifact, error = ?error, "could not expand nested archive");
                        return Some(WalkEvent::Unreadable {
                            archive: artifact,
                            error,
                        });
                    }
                }
            }
            self.last_member = Some(artifact.physical.clone());
            return Some(WalkEvent::Member(artifact));
        }
    }
}

/// A leaf seen while listing an archive tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    /// Path within the outermost archive.
    pub member: String,
    pub class: FileClassification,
}

/// Drain a walk into a listing of leaves. Nested archives that cannot be
/// opened are listed as archive leaves; an unreadable root is an error.
pub fn inventory(
    archive: &ArtifactPath,
    limits: &WalkLimits,
) -> Result<Vec<InventoryItem>, ArchiveError> {
    let mut items = Vec::new();
    for event in walk(archive.clone(), limits.clone()) {
        match event {
            WalkEvent::Member(member) => items.push(InventoryItem {
                class: classify::classify_with_fallback(&member.physical).class,
                member: member.archived_member().unwrap_or_default(),
            }),
            WalkEvent::Unreadable { archive: a, error } if a == *archive => return Err(error),
            WalkEvent::Unreadable { archive: a, .. } => items.push(InventoryItem {
                member: a.archived_member().unwrap_or_default(),
                class: FileClassification::Archive,
            }),
        }
    }
    Ok(items)
}

fn digest_file(path: &Path) -> io::Result<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().into())
}

fn unpack(format: ArchiveFormat, archive: &Path, dest: &Path, limit: u64) -> Result<(), ArchiveError> {
    match format {
        ArchiveFormat::Zip => unpack_zip(archive, dest, limit),
        ArchiveFormat::Tar => {
            let file = File::open(archive).map_err(ArchiveError::unreadable)?;
            unpack_tar(file, dest, limit)
        }
        ArchiveFormat::Gzip => unpack_gzip(archive, dest, limit),
    }
}

fn unpack_zip(archive: &Path, dest: &Path, limit: u64) -> Result<(), ArchiveError> {
    let file = File::open(archive).map_err(ArchiveError::unreadable)?;
    let mut zip = zip::ZipArchive::new(file).map_err(ArchiveError::unreadable)?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(ArchiveError::unreadable)?;
        if entry.is_dir() {
            continue;
        }
        let Some(rel) = entry.enclosed_name() else {
            warn!(archive = %archive.display(), member = entry.name(), "skipping member with unsafe path");
            continue;
        };
        if entry.size() > limit {
            return Err(ArchiveError::MemberTooLarge {
                name: entry.name().to_string(),
                limit,
            });
        }
        let name = entry.name().to_string();
        write_member(&mut entry, &dest.join(rel), limit, &name)?;
    }
    Ok(())
}

fn unpack_tar<R: Read>(reader: R, dest: &Path, limit: u64) -> Result<(), ArchiveError> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive.entries().map_err(ArchiveError::unreadable)?;
    for entry in entries {
        let mut entry = entry.map_err(ArchiveError::unreadable)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(ArchiveError::unreadable)?.into_owned();
        let name = path.to_string_lossy().into_owned();
        let Some(rel) = safe_relative(&path) else {
            warn!(member = %name, "skipping member with unsafe path");
            continue;
        };
        if entry.size() > limit {
            return Err(ArchiveError::MemberTooLarge { name, limit });
        }
        write_member(&mut entry, &dest.join(rel), limit, &name)?;
    }
    Ok(())
}

fn unpack_gzip(archive: &Path, dest: &Path, limit: u64) -> Result<(), ArchiveError> {
    let file = File::open(archive).map_err(ArchiveError::unreadable)?;
    let mut decoder = MultiGzDecoder::new(file);
    let mut payload = tempfile::Builder::new()
        .prefix(".gunzip-")
        .tempfile_in(dest)
        .map_err(ArchiveError::Workspace)?;
    let name = gzip_member_name(archive);
    copy_bounded(&mut decoder, payload.as_file_mut(), limit, &name)?;

    if is_tar(payload.path()).map_err(ArchiveError::unreadable)? {
        let reader = payload.reopen().map_err(ArchiveError::unreadable)?;
        unpack_tar(reader, dest, limit)
    } else {
        payload
            .persist(dest.join(&name))
            .map_err(|e| ArchiveError::unreadable(e.error))?;
        Ok(())
    }
}

/// Member name for a plain gzip: the file name without its gzip extension.
pub fn gzip_member_name(archive: &Path) -> String {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_lowercase();
    let stem = if lower.ends_with(".tgz") {
        format!("{}.tar", &name[..name.len() - 4])
    } else {
        [".gzip", ".gz", ".bgz"]
            .iter()
            .find(|ext| lower.ends_with(*ext))
            .map(|ext| name[..name.len() - ext.len()].to_string())
            .unwrap_or(name)
    };
    if stem.is_empty() {
        "payload".to_string()
    } else {
        stem
    }
}

fn is_tar(path: &Path) -> io::Result<bool> {
    let mut head = [0u8; 512];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    let end = USTAR_MAGIC_OFFSET + USTAR_MAGIC.len();
    Ok(filled >= end && &head[USTAR_MAGIC_OFFSET..end] == USTAR_MAGIC)
}

fn safe_relative(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

fn write_member<R: Read>(reader: &mut R, target: &Path, limit: u64, name: &str) -> Result<(), ArchiveError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(ArchiveError::unreadable)?;
    }
    let mut out = File::create(target).map_err(ArchiveError::unreadable)?;
    copy_bounded(reader, &mut out, limit, name)
}

fn copy_bounded<R: Read>(reader: &mut R, out: &mut File, limit: u64, name: &str) -> Result<(), ArchiveError> {
    let copied = io::copy(&mut reader.take(limit + 1), out).map_err(ArchiveError::unreadable)?;
    if copied > limit {
        return Err(ArchiveError::MemberTooLarge {
            name: name.to_string(),
            limit,
        });
    }
    Ok(())
}

/// Member paths under `root`, `/`-separated, sorted, without macOS metadata.
fn list_members(root: &Path) -> Vec<String> {
    let mut members = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != "__MACOSX");
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable workspace entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || entry.file_name().to_string_lossy().starts_with("._") {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        members.push(parts.join("/"));
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn format_from_name_then_magic() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert_eq!(ArchiveFormat::detect(Path::new("a.ZIP")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect(Path::new("a.tar.gz")), Some(ArchiveFormat::Gzip));
        assert_eq!(ArchiveFormat::detect(Path::new("a.tgz")), Some(ArchiveFormat::Gzip));
        assert_eq!(ArchiveFormat::detect(Path::new("a.tar")), Some(ArchiveFormat::Tar));

        let gz = tmp.path().join("mystery");
        let mut enc = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        enc.write_all(b"hello").unwrap();
        enc.finish().unwrap();
        assert_eq!(ArchiveFormat::detect(&gz), Some(ArchiveFormat::Gzip));

        let rar = tmp.path().join("x.rar");
        fs::write(&rar, b"not really").unwrap();
        assert_eq!(ArchiveFormat::detect(&rar), None);
    }

    #[test]
    fn gzip_names() {
        assert_eq!(gzip_member_name(Path::new("/a/table.csv.gz")), "table.csv");
        assert_eq!(gzip_member_name(Path::new("data.TGZ")), "data.tar");
        assert_eq!(gzip_member_name(Path::new(".gz")), "payload");
    }

    #[test]
    fn unsafe_paths_rejected() {
        assert!(safe_relative(Path::new("../etc/passwd")).is_none());
        assert!(safe_relative(Path::new("/abs")).is_none());
        assert_eq!(
            safe_relative(Path::new("./a/b.txt")),
            Some(PathBuf::from("a/b.txt"))
        );
    }

    #[test]
    fn workspace_removed_on_drop() {
        let root = tempfile::TempDir::new().unwrap();
        let ws = TempWorkspace::create(Some(root.path())).unwrap();
        let path = ws.path().to_path_buf();
        fs::create_dir_all(path.join("deep/er")).unwrap();
        fs::write(path.join("deep/er/f.txt"), b"x").unwrap();
        drop(ws);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn force_remove_handles_read_only_dirs() {
        use std::os::unix::fs::PermissionsExt;
        let root = tempfile::TempDir::new().unwrap();
        let dir = root.path().join("locked");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("f"), b"x").unwrap();
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o500)).unwrap();
        force_remove(&dir).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn corrupt_zip_is_unreadable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bad = tmp.path().join("bad.zip");
        fs::write(&bad, b"PK but not really").unwrap();
        let events: Vec<WalkEvent> =
            walk(ArtifactPath::top_level(bad, "bad.zip"), WalkLimits::default()).collect();
        assert_eq!(events.len(), 1);
        match &events[0] {
            WalkEvent::Unreadable { error, .. } => assert_eq!(error.to_string(), "unreadable archive"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn plain_gzip_yields_single_member() {
        let tmp = tempfile::TempDir::new().unwrap();
        let gz = tmp.path().join("notes.txt.gz");
        let mut enc = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        enc.write_all(b"some notes").unwrap();
        enc.finish().unwrap();
        let members: Vec<String> = walk(ArtifactPath::top_level(gz, "notes.txt.gz"), WalkLimits::default())
            .filter_map(|e| match e {
                WalkEvent::Member(m) => Some(m.logical()),
                _ => None,
            })
            .collect();
        assert_eq!(members, vec!["notes.txt.gz/notes.txt"]);
    }
}
