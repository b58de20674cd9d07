use std::path::{Path, PathBuf};

pub fn ensure_dir(path: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(path)?;
    Ok(path.to_path_buf())
}

pub fn get_data_path() -> std::io::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| std::io::Error::other("cannot resolve home directory"))?;
    ensure_dir(&home.join(".msgpilot"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Turns an arbitrary identifier into something usable as a file stem.
pub fn safe_filename(name: &str) -> String {
    let mut out = name.to_string();
    for ch in ['<', '>', ':', '"', '/', '\\', '|', '?', '*'] {
        out = out.replace(ch, "_");
    }
    out.trim().to_string()
}
