//! Utility functions for file naming and path manipulation

use std::path::{Path, PathBuf};

/// Name used when sanitizing leaves nothing behind
const FALLBACK_FILE_NAME: &str = "unnamed";

/// Suffix marking in-progress downloads
pub const PARTIAL_SUFFIX: &str = "part";

/// Device names Windows refuses as file stems
const RESERVED_STEMS: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Make a remote name safe to use as a single path component
///
/// Path separators, characters reserved on common filesystems and control
/// characters become `_`. Trailing dots and spaces are trimmed, and a name
/// left empty, `.` or `..` is replaced. Leading dots are kept, so `.github.zip`
/// and `github.zip` stay distinct. Reserved Windows device names get a `_`
/// prefix.
///
/// # Examples
///
/// ```
/// use repo_harvest::utils::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("octocat/hello-world.zip"), "octocat_hello-world.zip");
/// assert_eq!(sanitize_file_name("../etc/passwd"), ".._etc_passwd");
/// assert_eq!(sanitize_file_name(".github.zip"), ".github.zip");
/// assert_eq!(sanitize_file_name("..."), "unnamed");
/// ```
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = replaced.trim_end_matches(|c: char| c == '.' || c == ' ');
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return FALLBACK_FILE_NAME.to_string();
    }

    let stem = trimmed.split('.').next().unwrap_or(trimmed);
    if RESERVED_STEMS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        return format!("_{trimmed}");
    }

    trimmed.to_string()
}

/// First of `name`, `stem (1).ext`, `stem (2).ext`, ... that `is_taken` rejects
///
/// A leading dot is part of the stem, so `.github.zip` becomes
/// `.github (1).zip`. Terminates as long as `is_taken` accepts finitely many
/// names.
///
/// # Examples
///
/// ```
/// use repo_harvest::utils::unique_file_name;
///
/// let taken = ["repo.zip", "repo (1).zip"];
/// assert_eq!(unique_file_name("repo.zip", |n| taken.contains(&n)), "repo (2).zip");
/// assert_eq!(unique_file_name("other.zip", |n| taken.contains(&n)), "other.zip");
/// ```
pub fn unique_file_name(name: &str, is_taken: impl Fn(&str) -> bool) -> String {
    if !is_taken(name) {
        return name.to_string();
    }

    let (stem, extension) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], Some(&name[dot + 1..])),
        _ => (name, None),
    };

    let mut i = 1u32;
    loop {
        let candidate = match extension {
            Some(ext) => format!("{stem} ({i}).{ext}"),
            None => format!("{stem} ({i})"),
        };
        if !is_taken(&candidate) {
            return candidate;
        }
        i += 1;
    }
}

/// Temporary path an artifact is streamed to before being renamed into place
///
/// The temp file lives in the same directory as the final file so the rename
/// stays on one filesystem and is atomic. It starts with a dot and carries a
/// random token so concurrent writers never share a temp file.
pub fn partial_path(dir: &Path, file_name: &str) -> PathBuf {
    let token: u64 = rand::random();
    dir.join(format!(".{file_name}.{token:016x}.{PARTIAL_SUFFIX}"))
}

/// Whether a path looks like a leftover in-progress download
#[must_use]
pub fn is_partial_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with('.') && name.ends_with(&format!(".{PARTIAL_SUFFIX}"))
}
