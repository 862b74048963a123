use crate::CoreError;
use dockyard_schema::PackagingMode;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of packaging one build context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageReport {
    pub archive: PathBuf,
    /// Non-directory entries recorded.
    pub files: usize,
}

/// Turns a build context directory into a single artifact file.
///
/// Any previous artifact at `dest` is replaced. Entries are recorded in
/// lexicographic order of their `/`-separated relative path, so packaging
/// the same tree twice yields the same bytes.
pub trait ContextPackager: Send + Sync {
    fn mode(&self) -> PackagingMode;

    fn package(&self, context: &Path, dest: &Path) -> Result<PackageReport, CoreError>;
}

pub fn packager_for(mode: PackagingMode) -> Arc<dyn ContextPackager> {
    match mode {
        PackagingMode::Manifest => Arc::new(ManifestPackager),
        PackagingMode::Tar => Arc::new(TarPackager),
    }
}

/// Writes the list of relative file paths, one per line.
///
/// The artifact carries no file contents; it records what the context held
/// at build time.
#[derive(Debug, Default)]
pub struct ManifestPackager;

impl ContextPackager for ManifestPackager {
    fn mode(&self) -> PackagingMode {
        PackagingMode::Manifest
    }

    fn package(&self, context: &Path, dest: &Path) -> Result<PackageReport, CoreError> {
        let entries = prepare(context, dest)?;
        let file = fs::File::create(dest).map_err(|e| packaging_err(dest, &e))?;
        let mut out = BufWriter::new(file);
        let mut files = 0;
        for entry in entries.iter().filter(|e| e.kind != EntryKind::Dir) {
            writeln!(out, "{}", entry.rel).map_err(|e| packaging_err(dest, &e))?;
            files += 1;
        }
        out.flush().map_err(|e| packaging_err(dest, &e))?;
        debug!("wrote manifest of {files} files to {}", dest.display());
        Ok(PackageReport {
            archive: dest.to_path_buf(),
            files,
        })
    }
}

/// Writes a reproducible tar of the context.
///
/// Headers carry mtime 0 and uid/gid 0; permissions are kept. Device nodes,
/// sockets, and FIFOs are skipped with a warning.
#[derive(Debug, Default)]
pub struct TarPackager;

impl ContextPackager for TarPackager {
    fn mode(&self) -> PackagingMode {
        PackagingMode::Tar
    }

    fn package(&self, context: &Path, dest: &Path) -> Result<PackageReport, CoreError> {
        let entries = prepare(context, dest)?;
        let file = fs::File::create(dest).map_err(|e| packaging_err(dest, &e))?;
        let mut ar = tar::Builder::new(BufWriter::new(file));
        ar.follow_symlinks(false);

        let mut files = 0;
        for entry in &entries {
            match entry.kind {
                EntryKind::File => {
                    append_file(&mut ar, entry)?;
                    files += 1;
                }
                EntryKind::Symlink => {
                    append_symlink(&mut ar, entry)?;
                    files += 1;
                }
                EntryKind::Dir => append_dir(&mut ar, entry)?,
            }
        }

        let mut out = ar.into_inner().map_err(|e| packaging_err(dest, &e))?;
        out.flush().map_err(|e| packaging_err(dest, &e))?;
        debug!("wrote tar of {files} entries to {}", dest.display());
        Ok(PackageReport {
            archive: dest.to_path_buf(),
            files,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Dir,
    Symlink,
}

#[derive(Debug)]
struct Entry {
    rel: String,
    full: PathBuf,
    kind: EntryKind,
}

fn packaging_err(path: &Path, e: &dyn std::fmt::Display) -> CoreError {
    CoreError::Packaging(format!("{}: {e}", path.display()))
}

/// Check the context, clear the old artifact, and list the tree.
fn prepare(context: &Path, dest: &Path) -> Result<Vec<Entry>, CoreError> {
    if !context.is_dir() {
        return Err(CoreError::Packaging(format!(
            "build context is not a directory: {}",
            context.display()
        )));
    }
    remove_previous(dest)?;
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| packaging_err(parent, &e))?;
        }
    }

    // The old artifact is gone and the new one not yet created, so an
    // archive directory inside the context never lists itself.
    let mut entries = Vec::new();
    collect_entries(context, context, &mut entries)?;
    entries.sort_by(|a, b| a.rel.cmp(&b.rel));
    Ok(entries)
}

fn remove_previous(dest: &Path) -> Result<(), CoreError> {
    match fs::remove_file(dest) {
        Ok(()) => {
            debug!("removed previous artifact {}", dest.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(packaging_err(dest, &e)),
    }
}

/// Recursively collect (relative, full, kind) entries below `current`.
fn collect_entries(
    root: &Path,
    current: &Path,
    out: &mut Vec<Entry>,
) -> Result<(), CoreError> {
    let dir = fs::read_dir(current).map_err(|e| packaging_err(current, &e))?;
    for entry in dir {
        let entry = entry.map_err(|e| packaging_err(current, &e))?;
        let full = entry.path();
        let rel = relative_name(root, &full)?;
        let ft = match full.symlink_metadata() {
            Ok(m) => m.file_type(),
            Err(e) => {
                warn!("skipping {rel}: metadata error: {e}");
                continue;
            }
        };

        if ft.is_dir() {
            out.push(Entry {
                rel,
                full: full.clone(),
                kind: EntryKind::Dir,
            });
            collect_entries(root, &full, out)?;
        } else if ft.is_file() {
            out.push(Entry {
                rel,
                full,
                kind: EntryKind::File,
            });
        } else if ft.is_symlink() {
            out.push(Entry {
                rel,
                full,
                kind: EntryKind::Symlink,
            });
        } else {
            warn!("skipping unsupported file type: {rel}");
        }
    }
    Ok(())
}

/// `/`-separated path of `full` relative to `root`.
fn relative_name(root: &Path, full: &Path) -> Result<String, CoreError> {
    let rel = full
        .strip_prefix(root)
        .map_err(|e| CoreError::Packaging(format!("path strip: {e}")))?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Ok(parts.join("/"))
}

fn make_header(entry: &Entry, entry_type: tar::EntryType) -> Result<tar::Header, CoreError> {
    let meta = entry
        .full
        .symlink_metadata()
        .map_err(|e| packaging_err(&entry.full, &e))?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(file_mode(&meta, entry_type));
    Ok(header)
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata, _entry_type: tar::EntryType) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(meta: &fs::Metadata, entry_type: tar::EntryType) -> u32 {
    match entry_type {
        tar::EntryType::Directory => 0o755,
        _ if meta.permissions().readonly() => 0o444,
        _ => 0o644,
    }
}

type TarOut = tar::Builder<BufWriter<fs::File>>;

fn append_file(ar: &mut TarOut, entry: &Entry) -> Result<(), CoreError> {
    let data = fs::read(&entry.full).map_err(|e| packaging_err(&entry.full, &e))?;
    let mut header = make_header(entry, tar::EntryType::Regular)?;
    header.set_size(data.len() as u64);
    header.set_cksum();
    ar.append_data(&mut header, &entry.rel, data.as_slice())
        .map_err(|e| packaging_err(&entry.full, &e))
}

fn append_dir(ar: &mut TarOut, entry: &Entry) -> Result<(), CoreError> {
    let mut header = make_header(entry, tar::EntryType::Directory)?;
    header.set_size(0);
    header.set_cksum();
    let path = format!("{}/", entry.rel.trim_end_matches('/'));
    ar.append_data(&mut header, &path, &[] as &[u8])
        .map_err(|e| packaging_err(&entry.full, &e))
}

fn append_symlink(ar: &mut TarOut, entry: &Entry) -> Result<(), CoreError> {
    let target = fs::read_link(&entry.full).map_err(|e| packaging_err(&entry.full, &e))?;
    let mut header = make_header(entry, tar::EntryType::Symlink)?;
    header.set_size(0);
    header.set_cksum();
    ar.append_link(&mut header, &entry.rel, &target)
        .map_err(|e| packaging_err(&entry.full, &e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        fs::create_dir_all(dir.path().join("app/static")).unwrap();
        fs::write(dir.path().join("app/main.py"), "print('hi')\n").unwrap();
        fs::write(dir.path().join("app/static/index.html"), "<html/>").unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        dir
    }

    #[test]
    fn manifest_lists_sorted_relative_files() {
        let ctx = sample_context();
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("web.tar");

        let report = ManifestPackager.package(ctx.path(), &dest).unwrap();
        assert_eq!(report.files, 3);
        assert_eq!(report.archive, dest);
        let text = fs::read_to_string(&dest).unwrap();
        assert_eq!(
            text,
            "Dockerfile\napp/main.py\napp/static/index.html\n"
        );
    }

    #[test]
    fn empty_context_yields_empty_manifest() {
        let ctx = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("empty.tar");

        let report = ManifestPackager.package(ctx.path(), &dest).unwrap();
        assert_eq!(report.files, 0);
        assert!(dest.exists());
        assert_eq!(fs::read(&dest).unwrap().len(), 0);
    }

    #[test]
    fn previous_artifact_is_replaced() {
        let ctx = sample_context();
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("web.tar");
        fs::write(&dest, "stale content from an older run\n").unwrap();

        ManifestPackager.package(ctx.path(), &dest).unwrap();
        let text = fs::read_to_string(&dest).unwrap();
        assert!(!text.contains("stale"));
    }

    #[test]
    fn artifact_inside_context_is_not_listed() {
        let ctx = sample_context();
        let dest = ctx.path().join("web.tar");
        let first = ManifestPackager.package(ctx.path(), &dest).unwrap();
        let second = ManifestPackager.package(ctx.path(), &dest).unwrap();
        assert_eq!(first.files, second.files);
        assert!(!fs::read_to_string(&dest).unwrap().contains("web.tar"));
    }

    #[test]
    fn missing_context_is_a_packaging_error() {
        let out = tempfile::tempdir().unwrap();
        let err = ManifestPackager
            .package(&out.path().join("nope"), &out.path().join("x.tar"))
            .unwrap_err();
        assert!(matches!(err, CoreError::Packaging(_)));
    }

    #[test]
    fn tar_is_deterministic_and_complete() {
        let ctx = sample_context();
        let out = tempfile::tempdir().unwrap();
        let a = out.path().join("a.tar");
        let b = out.path().join("b.tar");

        let report = TarPackager.package(ctx.path(), &a).unwrap();
        TarPackager.package(ctx.path(), &b).unwrap();
        assert_eq!(report.files, 3);
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());

        let data = fs::read(&a).unwrap();
        let mut archive = tar::Archive::new(data.as_slice());
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            assert_eq!(entry.header().mtime().unwrap(), 0);
            assert_eq!(entry.header().uid().unwrap(), 0);
            let name = entry.path().unwrap().to_string_lossy().to_string();
            names.push(name.trim_end_matches('/').to_owned());
        }
        assert_eq!(
            names,
            vec![
                "Dockerfile",
                "app",
                "app/main.py",
                "app/static",
                "app/static/index.html",
                "empty",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn tar_keeps_symlinks_as_links() {
        let ctx = sample_context();
        std::os::unix::fs::symlink("app/main.py", ctx.path().join("entry.py")).unwrap();
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("links.tar");

        TarPackager.package(ctx.path(), &dest).unwrap();
        let data = fs::read(&dest).unwrap();
        let mut archive = tar::Archive::new(data.as_slice());
        let link = archive
            .entries()
            .unwrap()
            .map(Result::unwrap)
            .find(|e| e.path().unwrap().to_string_lossy() == "entry.py")
            .unwrap();
        assert_eq!(link.header().entry_type(), tar::EntryType::Symlink);
        assert_eq!(
            link.link_name().unwrap().unwrap().to_string_lossy(),
            "app/main.py"
        );
    }

    #[test]
    fn packager_for_selects_mode() {
        assert_eq!(packager_for(PackagingMode::Manifest).mode(), PackagingMode::Manifest);
        assert_eq!(packager_for(PackagingMode::Tar).mode(), PackagingMode::Tar);
    }
}
