//! # Bundle Normalization
//!
//! Diagnostic bundles arrive as tar archives (plain or gzip-compressed) with
//! two quirks this module compensates for: an unpredictable common path
//! prefix baked into every member, and a legacy `input.final` member name
//! that must be presented as `input`. Extraction strips the prefix, rewrites
//! the legacy name, and synthesizes an empty `input` directory when the
//! archive carries none.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use clap::ValueEnum;
use flate2::read::GzDecoder;
use tar::Archive;
use tracing::debug;

use crate::error::FetchError;

/// Legacy member name rewritten during extraction.
const LEGACY_INPUT_DIR: &str = "input.final";
/// Canonical name the legacy member is presented under.
const CANONICAL_INPUT_DIR: &str = "input";
/// Solver settings file relocated by the goosefoot finalize step.
const SETTINGS_FILE: &str = "settings.xml";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extraction behavior switches. `synthesize_input` is normally derived from
/// [`Bundle::has_input_layout`] rather than set by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// Recursively remove an existing destination before extracting.
    pub force: bool,
    /// List every member as it is written.
    pub verbose: bool,
    /// Create an empty `input` directory before processing members.
    pub synthesize_input: bool,
}

/// A tar-format diagnostic bundle on disk.
///
/// Tar readers are single-pass, so every inspection or extraction re-opens
/// the file; the set of members is immutable between calls.
pub struct Bundle {
    path: PathBuf,
    gzipped: bool,
}

impl Bundle {
    /// Open a bundle, sniffing the gzip magic to decide how to read it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FetchError> {
        let path = path.into();
        let mut file = File::open(&path).map_err(|source| FetchError::ArchiveOpen {
            path: path.clone(),
            source,
        })?;
        let mut magic = [0u8; 2];
        let gzipped = match file.read_exact(&mut magic) {
            Ok(()) => magic == GZIP_MAGIC,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => false,
            Err(source) => return Err(FetchError::ArchiveOpen { path, source }),
        };
        Ok(Self { path, gzipped })
    }

    /// Path the bundle was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Longest common leading string shared by every non-directory member
    /// path, possibly empty. Pure inspection; no filesystem writes.
    ///
    /// The comparison is character-wise, not component-wise, so the prefix
    /// may end mid-name; stripping it still leaves at least one member path
    /// without a leading separator.
    pub fn common_prefix(&self) -> Result<String, FetchError> {
        let members = self.member_paths()?;
        let files: Vec<&str> = members
            .iter()
            .filter(|(_, is_dir)| !is_dir)
            .map(|(path, _)| path.as_str())
            .collect();
        Ok(common_leading(&files))
    }

    /// Whether a member named `{prefix}input` or `{prefix}input.final`
    /// exists. When neither does, extraction must synthesize an empty
    /// `input` directory (some bundles omit it entirely).
    pub fn has_input_layout(&self, prefix: &str) -> Result<bool, FetchError> {
        let canonical = format!("{prefix}{CANONICAL_INPUT_DIR}");
        let legacy = format!("{prefix}{LEGACY_INPUT_DIR}");
        Ok(self.member_paths()?.iter().any(|(path, _)| {
            let trimmed = path.trim_end_matches('/');
            trimmed == canonical || trimmed == legacy
        }))
    }

    /// Unpack every member into `dest`, stripping `prefix` from each path
    /// and substituting `input.final` with `input` in the remainder. The
    /// substitution is textual, so a renamed top-level directory and a
    /// renamed nested file are handled uniformly.
    ///
    /// Overwrite policy runs first: an existing destination fails with
    /// [`FetchError::DestinationExists`] unless `force` is set, in which case
    /// it is removed wholesale; a removal failure aborts before any write.
    /// Members whose remapped path would escape the destination are rejected.
    pub fn extract(
        &self,
        prefix: &str,
        dest: &Path,
        options: ExtractOptions,
    ) -> Result<(), FetchError> {
        prepare_destination(dest, options.force)?;
        if options.synthesize_input {
            let input_dir = dest.join(CANONICAL_INPUT_DIR);
            fs::create_dir_all(&input_dir).map_err(|source| FetchError::Io {
                path: input_dir,
                source,
            })?;
        }

        let mut archive = self.reader()?;
        for entry in archive.entries().map_err(|source| self.open_error(source))? {
            let mut entry = entry.map_err(|source| self.open_error(source))?;
            let member = entry
                .path()
                .map_err(|source| self.open_error(source))?
                .to_string_lossy()
                .into_owned();
            let is_dir = entry.header().entry_type().is_dir();

            let remainder = match member.strip_prefix(prefix) {
                Some(rest) => rest.replace(LEGACY_INPUT_DIR, CANONICAL_INPUT_DIR),
                // Only directory members can sit above the common prefix of
                // the file paths; their content lands under the root anyway.
                None if is_dir => continue,
                None => {
                    return Err(FetchError::Extraction {
                        path: PathBuf::from(member),
                        source: io::Error::new(
                            io::ErrorKind::InvalidData,
                            "member path does not share the archive prefix",
                        ),
                    });
                }
            };
            let Some(relative) = sanitize(&remainder, &member)? else {
                continue;
            };
            let target = dest.join(&relative);
            if options.verbose {
                println!("{}", relative.display());
            }

            if is_dir {
                fs::create_dir_all(&target).map_err(|source| FetchError::Extraction {
                    path: target.clone(),
                    source,
                })?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|source| FetchError::Extraction {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                let mut output = File::create(&target).map_err(|source| FetchError::Extraction {
                    path: target.clone(),
                    source,
                })?;
                io::copy(&mut entry, &mut output).map_err(|source| FetchError::Extraction {
                    path: target.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Plain tar unpack into `dest`, with no prefix stripping or renaming.
    pub fn unpack_plain(&self, dest: &Path) -> Result<(), FetchError> {
        fs::create_dir_all(dest).map_err(|source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        self.reader()?
            .unpack(dest)
            .map_err(|source| FetchError::Extraction {
                path: dest.to_path_buf(),
                source,
            })
    }

    fn reader(&self) -> Result<Archive<Box<dyn Read>>, FetchError> {
        let file = File::open(&self.path).map_err(|source| self.open_error(source))?;
        let reader: Box<dyn Read> = if self.gzipped {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Archive::new(reader))
    }

    fn member_paths(&self) -> Result<Vec<(String, bool)>, FetchError> {
        let mut archive = self.reader()?;
        let mut members = Vec::new();
        for entry in archive.entries().map_err(|source| self.open_error(source))? {
            let entry = entry.map_err(|source| self.open_error(source))?;
            let path = entry
                .path()
                .map_err(|source| self.open_error(source))?
                .to_string_lossy()
                .into_owned();
            members.push((path, entry.header().entry_type().is_dir()));
        }
        Ok(members)
    }

    fn open_error(&self, source: io::Error) -> FetchError {
        FetchError::ArchiveOpen {
            path: self.path.clone(),
            source,
        }
    }
}

/// Recognized inspection modes. Each variant carries its own finalize
/// behavior; unrecognized names are rejected at argument parse time instead
/// of silently skipping the finalize step.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum InspectMode {
    /// Goosefoot runs keep their solver settings under `input/`; finalize
    /// copies them into a sibling `settings/` directory.
    Goosefoot,
}

impl InspectMode {
    /// Mode-specific post-extraction step, run against the destination root.
    pub fn finalize(self, dest: &Path) -> Result<(), FetchError> {
        match self {
            Self::Goosefoot => {
                let source = dest.join(CANONICAL_INPUT_DIR).join(SETTINGS_FILE);
                if !source.is_file() {
                    return Err(FetchError::MissingFile(source));
                }
                let settings_dir = dest.join("settings");
                fs::create_dir_all(&settings_dir).map_err(|err| FetchError::Io {
                    path: settings_dir.clone(),
                    source: err,
                })?;
                let target = settings_dir.join(SETTINGS_FILE);
                fs::copy(&source, &target).map_err(|err| FetchError::Io {
                    path: target,
                    source: err,
                })?;
                Ok(())
            }
        }
    }
}

/// One-call normalization: prefix computation, input-layout detection,
/// extraction, and the optional mode finalize step.
pub fn normalize_bundle(
    archive: &Path,
    dest: &Path,
    mode: Option<InspectMode>,
    force: bool,
    verbose: bool,
) -> Result<(), FetchError> {
    let bundle = Bundle::open(archive)?;
    let prefix = bundle.common_prefix()?;
    debug!(prefix = %prefix, "computed common member prefix");
    let options = ExtractOptions {
        force,
        verbose,
        synthesize_input: !bundle.has_input_layout(&prefix)?,
    };
    bundle.extract(&prefix, dest, options)?;
    if let Some(mode) = mode {
        mode.finalize(dest)?;
    }
    Ok(())
}

fn common_leading(paths: &[&str]) -> String {
    let Some(first) = paths.first() else {
        return String::new();
    };
    let mut end = first.len();
    for path in &paths[1..] {
        let shared = first
            .as_bytes()
            .iter()
            .zip(path.as_bytes())
            .take_while(|(a, b)| a == b)
            .count();
        end = end.min(shared);
    }
    while !first.is_char_boundary(end) {
        end -= 1;
    }
    first[..end].to_string()
}

/// Rebuild a member's remapped path from normal components only. `Ok(None)`
/// means the path normalized to nothing and the member is skipped; parent
/// components are rejected outright so crafted archives cannot write outside
/// the destination.
fn sanitize(remainder: &str, member: &str) -> Result<Option<PathBuf>, FetchError> {
    let mut relative = PathBuf::new();
    for component in Path::new(remainder).components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => return Err(FetchError::PathEscape(PathBuf::from(member))),
            Component::Normal(part) => relative.push(part),
        }
    }
    if relative.as_os_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(relative))
}

fn prepare_destination(dest: &Path, force: bool) -> Result<(), FetchError> {
    if dest.exists() {
        if !force {
            return Err(FetchError::DestinationExists(dest.to_path_buf()));
        }
        let removal = if dest.is_dir() {
            fs::remove_dir_all(dest)
        } else {
            fs::remove_file(dest)
        };
        removal.map_err(|source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
    }
    fs::create_dir_all(dest).map_err(|source| FetchError::Io {
        path: dest.to_path_buf(),
        source,
    })
}
