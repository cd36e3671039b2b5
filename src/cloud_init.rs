//! Boot-time user-data resolution.
//!
//! User-data reaches the provider untouched. It may be configured inline or
//! as a path to a file; the two sources are mutually exclusive and neither
//! may be blank.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Errors raised while resolving cloud-init user-data.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum CloudInitError {
    /// Raised when both inline and file sources are provided.
    #[error("cloud-init user-data cannot be provided both inline and via file")]
    BothProvided,
    /// Raised when an inline payload is empty or only whitespace.
    #[error("cloud-init user-data must not be empty")]
    InlineEmpty,
    /// Raised when a file path is empty or only whitespace.
    #[error("cloud-init user-data file path must not be empty")]
    FilePathEmpty,
    /// Raised when a file resolves to empty or only whitespace.
    #[error("cloud-init user-data file must not be empty")]
    FileEmpty,
    /// Raised when reading the file source fails.
    #[error("failed to read cloud-init user-data file `{path}`: {message}")]
    FileRead {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// Where the user-data payload comes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Source<'a> {
    Inline(&'a str),
    File(&'a str),
    Absent,
}

impl<'a> Source<'a> {
    const fn select(inline: Option<&'a str>, file: Option<&'a str>) -> Result<Self, CloudInitError> {
        match (inline, file) {
            (Some(_), Some(_)) => Err(CloudInitError::BothProvided),
            (Some(payload), None) => Ok(Self::Inline(payload)),
            (None, Some(path)) => Ok(Self::File(path)),
            (None, None) => Ok(Self::Absent),
        }
    }
}

/// Resolves cloud-init user-data from either an inline value or a file.
///
/// Emptiness checks trim whitespace, but the returned payload is the original
/// content.
///
/// # Errors
///
/// Returns [`CloudInitError`] when the inputs are invalid or the file cannot be
/// read.
pub fn resolve_cloud_init_user_data(
    inline: Option<&str>,
    file: Option<&str>,
) -> Result<Option<String>, CloudInitError> {
    match Source::select(inline, file)? {
        Source::Absent => Ok(None),
        Source::Inline(payload) => {
            if payload.trim().is_empty() {
                return Err(CloudInitError::InlineEmpty);
            }
            Ok(Some(payload.to_owned()))
        }
        Source::File(path) => {
            if path.trim().is_empty() {
                return Err(CloudInitError::FilePathEmpty);
            }
            let expanded = expand_home(path);
            let content = read_file(&expanded).map_err(|message| CloudInitError::FileRead {
                path: expanded.to_string(),
                message,
            })?;
            if content.trim().is_empty() {
                return Err(CloudInitError::FileEmpty);
            }
            Ok(Some(content))
        }
    }
}

/// Expands a leading `~/` using `HOME`; other paths are returned unchanged.
fn expand_home(path: &str) -> Utf8PathBuf {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => Utf8PathBuf::from(home).join(rest),
        _ => Utf8PathBuf::from(path),
    }
}

fn read_file(path: &Utf8Path) -> Result<String, String> {
    let (dir, name) = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => (parent, name),
        (_, Some(name)) => (Utf8Path::new("."), name),
        (_, None) => return Err(format!("path has no file name: {path}")),
    };
    let handle = Dir::open_ambient_dir(dir, ambient_authority()).map_err(|err| err.to_string())?;
    handle.read_to_string(name).map_err(|err| err.to_string())
}
