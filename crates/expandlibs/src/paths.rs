use std::env;
use std::path::{Component, Path, PathBuf};

/// Shorten `path` for use on a link command line: return whichever of
/// the cwd-relative spelling and the original spelling is shorter.
/// Paths that do not exist are returned unchanged; the downstream
/// linker is the authoritative validator.
pub fn relativize(path: &str) -> String {
    if !Path::new(path).exists() {
        return path.to_string();
    }
    let Ok(cwd) = env::current_dir() else {
        return path.to_string();
    };
    let rel = relative_to(&absolute(path), &cwd);
    let rel = rel.to_string_lossy().into_owned();
    if rel.len() <= path.len() {
        rel
    } else {
        path.to_string()
    }
}

/// Absolute, lexically normalized form of `path`. Does not touch the
/// filesystem beyond reading the current working directory.
pub fn absolute(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                // Only pops past real components; `/..` stays `/`.
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn relative_to(target: &Path, base: &Path) -> PathBuf {
    let mut t = target.components().peekable();
    let mut b = base.components().peekable();
    while let (Some(x), Some(y)) = (t.peek(), b.peek()) {
        if x != y {
            break;
        }
        t.next();
        b.next();
    }
    let mut out = PathBuf::new();
    for _ in b {
        out.push("..");
    }
    for c in t {
        out.push(c.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
