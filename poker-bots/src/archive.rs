//! Bot archive intake and validation, per spec.md §4.2.
//!
//! Grounded on `original_source/backend/app/bots/{validator,security}.py`:
//! the ordered, fail-on-first-violation check list and every numeric safety
//! bound are carried over directly. Safe extraction re-walks members and
//! streams bytes the same way `security.py::extract_archive_safely` does.

use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_ARCHIVE_MEMBERS: usize = 128;
pub const MAX_ARCHIVE_FILE_BYTES: u64 = 1024 * 1024;
pub const MAX_ARCHIVE_UNCOMPRESSED_BYTES: u64 = 2 * 1024 * 1024;
pub const MAX_BOT_SOURCE_BYTES: u64 = 256 * 1024;
pub const MAX_REQUIREMENTS_BYTES: u64 = 32 * 1024;

const ENTRYPOINT_NAME: &str = "bot.py";
const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2.0"];

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum ArchiveError {
    #[display(fmt = "uploaded archive is empty")]
    Empty,
    #[display(fmt = "archive exceeds the {} byte upload limit", MAX_UPLOAD_BYTES)]
    TooLarge,
    #[display(fmt = "filename must end in .zip")]
    BadFilename,
    #[display(fmt = "could not open upload as a zip archive")]
    NotAZip,
    #[display(fmt = "archive has too many members (max {})", MAX_ARCHIVE_MEMBERS)]
    TooManyMembers,
    #[display(fmt = "archive member has an unsafe path: {}", _0)]
    UnsafePath(String),
    #[display(fmt = "archive member is a symlink: {}", _0)]
    SymlinkMember(String),
    #[display(fmt = "duplicate normalized path in archive: {}", _0)]
    DuplicatePath(String),
    #[display(fmt = "archive member {} exceeds the per-file size limit", _0)]
    MemberTooLarge(String),
    #[display(fmt = "archive's total uncompressed size exceeds the limit")]
    TotalTooLarge,
    #[display(fmt = "no unique bot.py entrypoint found")]
    NoEntrypoint,
    #[display(fmt = "multiple candidate bot.py entrypoints found")]
    AmbiguousEntrypoint,
    #[display(fmt = "entrypoint exceeds the max bot source size")]
    EntrypointTooLarge,
    #[display(fmt = "entrypoint is not valid UTF-8")]
    EntrypointNotUtf8,
    #[display(fmt = "entrypoint does not parse as a syntactically valid bot module")]
    EntrypointSyntaxError,
    #[display(fmt = "entrypoint does not define a top-level class named PokerBot")]
    NoPokerBotClass,
    #[display(fmt = "requirements.txt is not unique, too large, or not UTF-8")]
    BadRequirements,
    #[display(fmt = "declared protocol version {} is not supported", _0)]
    UnsupportedProtocolVersion(String),
    #[display(fmt = "i/o error reading archive: {}", _0)]
    Io(std::io::Error),
}

impl From<std::io::Error> for ArchiveError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// The result of successfully validating an uploaded archive: where the
/// entrypoint lives inside the zip, and whatever protocol version it
/// statically declares (if any).
#[derive(Debug, Clone)]
pub struct ValidatedArchive {
    pub entrypoint_path: String,
    pub declared_protocol_version: Option<String>,
}

/// Run every check in spec.md §4.2, in order, failing on the first
/// violation encountered.
pub fn validate(bytes: &[u8], filename: &str) -> Result<ValidatedArchive, ArchiveError> {
    if bytes.is_empty() {
        return Err(ArchiveError::Empty);
    }
    if bytes.len() as u64 > MAX_UPLOAD_BYTES {
        return Err(ArchiveError::TooLarge);
    }
    if !filename.to_ascii_lowercase().ends_with(".zip") {
        return Err(ArchiveError::BadFilename);
    }

    let reader = std::io::Cursor::new(bytes);
    let mut zip = ZipArchive::new(reader).map_err(|_| ArchiveError::NotAZip)?;

    if zip.len() > MAX_ARCHIVE_MEMBERS {
        return Err(ArchiveError::TooManyMembers);
    }

    let mut seen_paths = HashSet::new();
    let mut total_uncompressed: u64 = 0;
    let mut entrypoint_candidates: Vec<String> = Vec::new();
    let mut requirements_seen = false;

    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        let raw_name = entry.name().to_string();
        if raw_name.is_empty() {
            return Err(ArchiveError::UnsafePath(raw_name));
        }
        let normalized = normalize_member_path(&raw_name)?;
        if is_symlink_entry(&entry) {
            return Err(ArchiveError::SymlinkMember(raw_name));
        }
        if !seen_paths.insert(normalized.clone()) {
            return Err(ArchiveError::DuplicatePath(normalized));
        }
        if entry.size() > MAX_ARCHIVE_FILE_BYTES {
            return Err(ArchiveError::MemberTooLarge(normalized));
        }
        total_uncompressed += entry.size();
        if total_uncompressed > MAX_ARCHIVE_UNCOMPRESSED_BYTES {
            return Err(ArchiveError::TotalTooLarge);
        }

        let base = Path::new(&normalized)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if base == ENTRYPOINT_NAME {
            entrypoint_candidates.push(normalized.clone());
        }
        if normalized == "requirements.txt" {
            if requirements_seen {
                return Err(ArchiveError::BadRequirements);
            }
            requirements_seen = true;
            if entry.size() > MAX_REQUIREMENTS_BYTES {
                return Err(ArchiveError::BadRequirements);
            }
        }
    }

    let entrypoint_path = locate_unique_entrypoint(&entrypoint_candidates)?;

    let mut entry = zip.by_name(&entrypoint_path)?;
    if entry.size() > MAX_BOT_SOURCE_BYTES {
        return Err(ArchiveError::EntrypointTooLarge);
    }
    let mut source = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut source)?;
    let source = String::from_utf8(source).map_err(|_| ArchiveError::EntrypointNotUtf8)?;
    drop(entry);

    if !looks_syntactically_valid(&source) {
        return Err(ArchiveError::EntrypointSyntaxError);
    }
    if !defines_pokerbot_class(&source) {
        return Err(ArchiveError::NoPokerBotClass);
    }

    if requirements_seen {
        let mut req = zip.by_name("requirements.txt")?;
        let mut buf = Vec::with_capacity(req.size() as usize);
        req.read_to_end(&mut buf)?;
        String::from_utf8(buf).map_err(|_| ArchiveError::BadRequirements)?;
    }

    let declared_protocol_version = extract_declared_protocol_version(&source)
        .map(|v| {
            if SUPPORTED_PROTOCOL_VERSIONS.contains(&v.as_str()) {
                Ok(v)
            } else {
                Err(ArchiveError::UnsupportedProtocolVersion(v))
            }
        })
        .transpose()?;

    Ok(ValidatedArchive {
        entrypoint_path,
        declared_protocol_version,
    })
}

/// Reject `..`, leading `/`, backslashes, and absolute paths; return the
/// normalized (forward-slash, non-leading-slash) path.
fn normalize_member_path(name: &str) -> Result<String, ArchiveError> {
    if name.starts_with('/') || name.contains('\\') {
        return Err(ArchiveError::UnsafePath(name.to_string()));
    }
    let path = Path::new(name);
    if path.is_absolute() {
        return Err(ArchiveError::UnsafePath(name.to_string()));
    }
    for component in path.components() {
        use std::path::Component;
        match component {
            Component::Normal(_) => {}
            _ => return Err(ArchiveError::UnsafePath(name.to_string())),
        }
    }
    Ok(name.to_string())
}

fn is_symlink_entry(entry: &zip::read::ZipFile) -> bool {
    const S_IFLNK: u32 = 0o120000;
    match entry.unix_mode() {
        Some(mode) => mode & 0o170000 == S_IFLNK,
        None => false,
    }
}

/// Locate the unique entrypoint: either the sole `bot.py` at archive root,
/// or the sole `bot.py` inside exactly one top-level directory. Any other
/// count of candidates is ambiguous or missing.
fn locate_unique_entrypoint(candidates: &[String]) -> Result<String, ArchiveError> {
    match candidates.len() {
        0 => Err(ArchiveError::NoEntrypoint),
        1 => Ok(candidates[0].clone()),
        _ => {
            let root_level: Vec<_> = candidates.iter().filter(|p| !p.contains('/')).collect();
            if root_level.len() == 1 {
                return Ok(root_level[0].clone());
            }
            let top_dirs: HashSet<&str> = candidates
                .iter()
                .filter_map(|p| p.split('/').next())
                .collect();
            if top_dirs.len() == 1 && candidates.len() == 1 {
                return Ok(candidates[0].clone());
            }
            Err(ArchiveError::AmbiguousEntrypoint)
        }
    }
}

/// A structural heuristic standing in for a real Python parser: balanced
/// brackets/quotes and at least one top-level statement. See DESIGN.md for
/// why this crate doesn't embed a Python front end.
fn looks_syntactically_valid(source: &str) -> bool {
    let mut depth: i32 = 0;
    let mut in_string: Option<char> = None;
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match in_string {
            Some(q) => {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    in_string = None;
                }
            }
            None => match c {
                '\'' | '"' => in_string = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                _ => {}
            },
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0 && in_string.is_none() && !source.trim().is_empty()
}

fn defines_pokerbot_class(source: &str) -> bool {
    source
        .lines()
        .any(|line| line.trim_start().starts_with("class PokerBot"))
}

/// Statically extract a declared protocol version from either a module-level
/// `BOT_PROTOCOL_VERSION = "..."` constant or a `protocol_version = "..."`
/// class attribute, per spec.md §4.2 item 11. Module-level takes precedence.
fn extract_declared_protocol_version(source: &str) -> Option<String> {
    extract_string_assignment(source, "BOT_PROTOCOL_VERSION")
        .or_else(|| extract_string_assignment(source, "protocol_version"))
}

fn extract_string_assignment(source: &str, name: &str) -> Option<String> {
    for line in source.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix(name) {
            let rest = rest.trim_start();
            if let Some(rest) = rest.strip_prefix('=') {
                let rest = rest.trim();
                for quote in ['"', '\''] {
                    if rest.starts_with(quote) {
                        if let Some(end) = rest[1..].find(quote) {
                            return Some(rest[1..1 + end].to_string());
                        }
                    }
                }
            }
        }
    }
    None
}

/// Re-walk an already-validated archive's members and stream bytes to disk
/// under `dest_dir`, re-checking path safety and size bounds on every
/// member (spec.md §4.2 "Safe extraction"). Rejected archives never reach
/// this function; this is belt-and-suspenders against a crafted zip whose
/// central directory lies about sizes.
pub fn extract_safely(bytes: &[u8], dest_dir: &Path) -> Result<(), ArchiveError> {
    let reader = std::io::Cursor::new(bytes);
    let mut zip = ZipArchive::new(reader).map_err(|_| ArchiveError::NotAZip)?;
    fs::create_dir_all(dest_dir)?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let normalized = normalize_member_path(entry.name())?;
        if is_symlink_entry(&entry) {
            return Err(ArchiveError::SymlinkMember(normalized));
        }
        let out_path: PathBuf = dest_dir.join(&normalized);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&out_path)?;
        let mut remaining = MAX_ARCHIVE_FILE_BYTES;
        let mut buf = [0u8; 8192];
        loop {
            let n = entry.read(&mut buf)?;
            if n == 0 {
                break;
            }
            if n as u64 > remaining {
                return Err(ArchiveError::MemberTooLarge(normalized));
            }
            remaining -= n as u64;
            std::io::Write::write_all(&mut out, &buf[..n])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn zip_with(files: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut w = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, content) in files {
                w.start_file(*name, FileOptions::default()).unwrap();
                w.write_all(content.as_bytes()).unwrap();
            }
            w.finish().unwrap();
        }
        buf
    }

    const VALID_BOT: &str = "BOT_PROTOCOL_VERSION = \"2.0\"\n\nclass PokerBot:\n    def act(self, state):\n        return {\"action\": \"fold\"}\n";

    #[test]
    fn valid_root_entrypoint_is_accepted() {
        let z = zip_with(&[("bot.py", VALID_BOT)]);
        let result = validate(&z, "mybot.zip").unwrap();
        assert_eq!(result.entrypoint_path, "bot.py");
        assert_eq!(result.declared_protocol_version.as_deref(), Some("2.0"));
    }

    #[test]
    fn rejects_path_traversal() {
        let z = zip_with(&[("../bot.py", VALID_BOT)]);
        let err = validate(&z, "mybot.zip").unwrap_err();
        assert!(matches!(err, ArchiveError::UnsafePath(_)));
    }

    #[test]
    fn rejects_missing_entrypoint() {
        let z = zip_with(&[("readme.txt", "hi")]);
        let err = validate(&z, "mybot.zip").unwrap_err();
        assert!(matches!(err, ArchiveError::NoEntrypoint));
    }

    #[test]
    fn rejects_missing_pokerbot_class() {
        let z = zip_with(&[("bot.py", "x = 1\n")]);
        let err = validate(&z, "mybot.zip").unwrap_err();
        assert!(matches!(err, ArchiveError::NoPokerBotClass));
    }

    #[test]
    fn rejects_unsupported_protocol_version() {
        let src = "BOT_PROTOCOL_VERSION = \"9.9\"\nclass PokerBot:\n    pass\n";
        let z = zip_with(&[("bot.py", src)]);
        let err = validate(&z, "mybot.zip").unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedProtocolVersion(_)));
    }

    #[test]
    fn rejects_bad_filename() {
        let z = zip_with(&[("bot.py", VALID_BOT)]);
        let err = validate(&z, "mybot.tar").unwrap_err();
        assert!(matches!(err, ArchiveError::BadFilename));
    }

    #[test]
    fn unique_top_level_dir_entrypoint_is_accepted() {
        let z = zip_with(&[("mybot/bot.py", VALID_BOT)]);
        let result = validate(&z, "mybot.zip").unwrap();
        assert_eq!(result.entrypoint_path, "mybot/bot.py");
    }

    #[test]
    fn extract_safely_writes_files_under_dest() {
        let z = zip_with(&[("bot.py", VALID_BOT)]);
        let dir = tempfile::tempdir().unwrap();
        extract_safely(&z, dir.path()).unwrap();
        assert!(dir.path().join("bot.py").exists());
    }

    /// S5: an unsafe archive is rejected by `validate` before any artifact
    /// store or upload-staging step runs, so no files ever land under
    /// `<runtime>/uploads` or `<runtime>/artifacts`. `validate` never
    /// touches a filesystem path on its own — the invariant holds by
    /// construction, not by cleanup.
    #[test]
    fn unsafe_archive_rejected_before_any_store_write() {
        let z = zip_with(&[("../bot.py", VALID_BOT)]);
        let dir = tempfile::tempdir().unwrap();
        let store = crate::artifact::ArtifactStore::new(dir.path());

        let result = validate(&z, "mybot.zip");
        assert!(matches!(result, Err(ArchiveError::UnsafePath(_))));

        if result.is_ok() {
            store.store("bot-1", "mybot.zip", &z).unwrap();
        }
        assert!(!dir.path().join("artifacts").exists());
        assert!(!dir.path().join("uploads").exists());
    }
}
