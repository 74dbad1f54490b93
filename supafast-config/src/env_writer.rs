//! Settings file rendering and the backup/commit/restore discipline used to
//! replace it.
//!
//! Values are collected into an ordered [`EnvOverrides`] list that each
//! pipeline step receives by `&mut` and are serialized once. Committing goes
//! through [`EnvTransaction`]:
//!
//! ```text
//! NoFile ──► BackedUp ──► CandidateWritten ──► Committed (backup deleted)
//!               │                │
//!               └──── failure ───┴──► Restored (original copied back)
//! ```

use std::{
    collections::{HashMap, HashSet},
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::{
    constants::{ENV_BACKUP_SUFFIX, is_managed_key},
    error::InitError,
};

/// Comment introducing lines carried over from an earlier file.
pub const CUSTOM_SECTION_HEADER: &str =
    "# Custom overrides (preserved from previous runs)";

#[derive(Debug, Clone, PartialEq, Eq)]
enum EnvLine {
    Section(String),
    Pair { key: String, value: String },
}

/// Ordered key/value overrides accumulated across pipeline steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    lines: Vec<EnvLine>,
    /// Raw lines carried over from a previous file, emitted verbatim.
    custom: Vec<String>,
}

impl EnvOverrides {
    /// Empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a titled section.
    pub fn section(&mut self, title: impl Into<String>) {
        self.lines.push(EnvLine::Section(title.into()));
    }

    /// Set `key`. A key pushed twice keeps its first position and takes the
    /// latest value.
    pub fn push(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        for line in &mut self.lines {
            if let EnvLine::Pair { key: k, value: v } = line
                && k == key
            {
                *v = value;
                return;
            }
        }
        self.lines.push(EnvLine::Pair {
            key: key.to_string(),
            value,
        });
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            EnvLine::Pair { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Managed pairs in insertion order.
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                EnvLine::Pair { key, value } => {
                    Some((key.clone(), value.clone()))
                }
                EnvLine::Section(_) => None,
            })
            .collect()
    }

    /// Managed keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            EnvLine::Pair { key, .. } => Some(key.as_str()),
            EnvLine::Section(_) => None,
        })
    }

    /// Carry over lines from a previous settings file that the generator does
    /// not own.
    ///
    /// Outside the custom section only unmanaged `KEY=VALUE` lines survive
    /// (the generated section comments are rebuilt on every run); inside it
    /// every line except managed keys is kept verbatim, so re-running is
    /// idempotent.
    pub fn preserve_unmanaged(&mut self, existing: &str) {
        let owned: HashSet<&str> = self.keys().collect();
        let mut in_custom = false;
        let mut carried = Vec::new();

        for line in existing.lines() {
            let trimmed = line.trim();
            if trimmed == CUSTOM_SECTION_HEADER {
                in_custom = true;
                continue;
            }
            let key = parse_key(trimmed);
            if let Some(key) = key
                && (is_managed_key(key) || owned.contains(key))
            {
                continue;
            }
            match (in_custom, key) {
                (_, Some(_)) => carried.push(line.to_string()),
                (true, None) if !trimmed.is_empty() => {
                    carried.push(line.to_string())
                }
                _ => {}
            }
        }

        if !carried.is_empty() {
            debug!(lines = carried.len(), "preserving unmanaged env lines");
        }
        self.custom = carried;
    }

    /// The settings file text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                EnvLine::Section(title) => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(&format!("# ---- {title} ----\n"));
                }
                EnvLine::Pair { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(&quote_value(value));
                    out.push('\n');
                }
            }
        }
        if !self.custom.is_empty() {
            out.push('\n');
            out.push_str(CUSTOM_SECTION_HEADER);
            out.push('\n');
            for line in &self.custom {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

fn parse_key(line: &str) -> Option<&str> {
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, _) = line.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then_some(key)
}

/// Quote values so neither dotenv parsers nor compose interpolation change
/// them.
pub fn quote_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.chars().any(|c| {
            c.is_whitespace()
                || matches!(c, '#' | '"' | '\'' | '$' | '\\' | '`')
        });
    if !needs_quotes {
        return value.to_string();
    }
    if value.is_empty() {
        return String::new();
    }
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$");
    format!("\"{escaped}\"")
}

/// Read a settings file into a map; a missing file is empty.
pub fn read_env_map(path: &Path) -> Result<HashMap<String, String>, InitError> {
    let mut map = HashMap::new();
    if !path.exists() {
        return Ok(map);
    }
    let iter = dotenvy::from_path_iter(path).map_err(|err| {
        InitError::fs("read", path, std::io::Error::other(err))
    })?;
    for entry in iter {
        let (key, value) = entry.map_err(|err| {
            InitError::fs("parse", path, std::io::Error::other(err))
        })?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Permission class for written artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Readable by the containers that mount it.
    Shared,
    /// Owner-only; holds secrets or hashes.
    Private,
}

impl FileMode {
    #[cfg(unix)]
    fn bits(self) -> u32 {
        match self {
            FileMode::Shared => 0o644,
            FileMode::Private => 0o600,
        }
    }
}

/// Replace `path` with `contents` via a temp file in the same directory.
///
/// Existing permissions are kept; new files get `mode`. No backup is made.
pub fn write_atomically(
    path: &Path,
    contents: &str,
    mode: FileMode,
) -> Result<(), InitError> {
    let dir = parent_dir(path);
    fs::create_dir_all(&dir)
        .map_err(|err| InitError::fs("create directory", &dir, err))?;

    let mut tmp = NamedTempFile::new_in(&dir)
        .map_err(|err| InitError::fs("create temp file in", &dir, err))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|err| InitError::fs("write", tmp.path().to_path_buf(), err))?;
    tmp.as_file()
        .sync_all()
        .map_err(|err| InitError::fs("sync", tmp.path().to_path_buf(), err))?;
    apply_permissions(tmp.path(), path, mode)?;

    tmp.persist(path)
        .map_err(|err| InitError::fs("replace", path, err.error))?;
    debug!(path = %path.display(), bytes = contents.len(), "wrote artifact");
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn apply_permissions(
    tmp: &Path,
    target: &Path,
    mode: FileMode,
) -> Result<(), InitError> {
    let permissions = match fs::metadata(target) {
        Ok(meta) => meta.permissions(),
        Err(_) => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::Permissions::from_mode(mode.bits())
            }
            #[cfg(not(unix))]
            {
                let _ = mode;
                return Ok(());
            }
        }
    };
    fs::set_permissions(tmp, permissions)
        .map_err(|err| InitError::fs("set permissions on", tmp, err))
}

/// Where a settings-file commit currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    /// No prior file; nothing to back up.
    NoFile,
    /// The prior file is copied to the backup path.
    BackedUp,
    /// The candidate is fully written next to the target.
    CandidateWritten,
    /// The candidate replaced the target and the backup is gone.
    Committed,
    /// A failure copied the backup back over the target.
    Restored,
}

/// One replacement of the settings file; see [`CommitState`].
#[derive(Debug)]
pub struct EnvTransaction {
    path: PathBuf,
    backup_path: PathBuf,
    state: CommitState,
    history: Vec<CommitState>,
}

impl EnvTransaction {
    /// Backup location for `path`.
    pub fn backup_path_for(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| ".env".into());
        name.push(ENV_BACKUP_SUFFIX);
        path.with_file_name(name)
    }

    /// Back up the current file, restoring a stale backup first if an earlier
    /// run was interrupted after deleting nothing but before committing.
    pub fn begin(path: &Path) -> Result<Self, InitError> {
        let backup_path = Self::backup_path_for(path);

        if !path.exists() && backup_path.exists() {
            warn!(
                backup = %backup_path.display(),
                "settings file missing but a backup exists; restoring it"
            );
            fs::copy(&backup_path, path).map_err(|err| {
                InitError::fs("restore stale backup to", path, err)
            })?;
        }

        let state = if path.exists() {
            fs::copy(path, &backup_path)
                .map_err(|err| InitError::fs("back up", path, err))?;
            info!(
                backup = %backup_path.display(),
                "backed up existing settings file"
            );
            CommitState::BackedUp
        } else {
            CommitState::NoFile
        };

        Ok(Self {
            path: path.to_path_buf(),
            backup_path,
            state,
            history: vec![state],
        })
    }

    /// Current state.
    pub fn state(&self) -> CommitState {
        self.state
    }

    /// States visited so far, oldest first.
    pub fn history(&self) -> &[CommitState] {
        &self.history
    }

    fn advance(&mut self, state: CommitState) {
        self.state = state;
        self.history.push(state);
    }

    /// Generate the candidate and replace the settings file with it. Any
    /// failure restores the backup before the error is returned.
    pub fn commit_with<F>(self, generate: F) -> Result<Self, InitError>
    where
        F: FnOnce() -> anyhow::Result<String>,
    {
        self.commit_staged(generate, Self::stage)
    }

    /// [`commit_with`](Self::commit_with) with the staging step supplied by
    /// the caller.
    fn commit_staged<F, S>(mut self, generate: F, stage: S) -> Result<Self, InitError>
    where
        F: FnOnce() -> anyhow::Result<String>,
        S: FnOnce(&Self, &str) -> Result<NamedTempFile, InitError>,
    {
        let candidate = match generate() {
            Ok(contents) => contents,
            Err(err) => {
                self.rollback()?;
                return Err(InitError::Candidate(err));
            }
        };

        let staged = match stage(&self, &candidate) {
            Ok(tmp) => tmp,
            Err(err) => {
                self.rollback()?;
                return Err(err);
            }
        };
        self.advance(CommitState::CandidateWritten);

        if let Err(err) = staged.persist(&self.path) {
            self.rollback()?;
            return Err(InitError::fs("replace", &self.path, err.error));
        }

        if self.backup_path.exists()
            && let Err(err) = fs::remove_file(&self.backup_path)
        {
            warn!(
                backup = %self.backup_path.display(),
                error = %err,
                "committed settings file but could not delete backup"
            );
        }
        self.advance(CommitState::Committed);
        info!(path = %self.path.display(), "committed settings file");
        Ok(self)
    }

    fn stage(&self, contents: &str) -> Result<NamedTempFile, InitError> {
        let dir = parent_dir(&self.path);
        fs::create_dir_all(&dir)
            .map_err(|err| InitError::fs("create directory", &dir, err))?;
        let mut tmp = NamedTempFile::new_in(&dir)
            .map_err(|err| InitError::fs("create temp file in", &dir, err))?;
        tmp.write_all(contents.as_bytes()).map_err(|err| {
            InitError::fs("write candidate", tmp.path().to_path_buf(), err)
        })?;
        tmp.as_file().sync_all().map_err(|err| {
            InitError::fs("sync candidate", tmp.path().to_path_buf(), err)
        })?;
        apply_permissions(tmp.path(), &self.path, FileMode::Private)?;
        Ok(tmp)
    }

    fn rollback(&mut self) -> Result<(), InitError> {
        if self.state == CommitState::NoFile {
            warn!(
                path = %self.path.display(),
                "settings file generation failed; no previous file to restore"
            );
            return Ok(());
        }
        fs::copy(&self.backup_path, &self.path)
            .map_err(|err| InitError::fs("restore backup to", &self.path, err))?;
        if let Err(err) = fs::remove_file(&self.backup_path) {
            warn!(error = %err, "restored settings file but kept backup");
        }
        self.advance(CommitState::Restored);
        warn!(
            path = %self.path.display(),
            "settings file generation failed; restored previous version"
        );
        Ok(())
    }
}

/// Back up, generate, commit; the whole settings-file state machine.
pub fn commit_env_file<F>(path: &Path, generate: F) -> Result<Vec<CommitState>, InitError>
where
    F: FnOnce() -> anyhow::Result<String>,
{
    let tx = EnvTransaction::begin(path)?.commit_with(generate)?;
    Ok(tx.history().to_vec())
}
