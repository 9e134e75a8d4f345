use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::debug;

use crate::config::ExpandConfig;
use crate::extract;
use crate::paths::absolute;

/// Insertion-ordered mapping from declared basename to the absolute
/// path it resolved to.
pub type DepList = Vec<(String, PathBuf)>;

/// Compute the transitive runtime dependencies of `root`, post-order:
/// every library appears after its own dependencies, and the root's
/// basename comes last. Declared names that are absolute or not found
/// on the search path are dropped; skip-listed names are resolved and
/// traversed but not inserted.
pub fn resolve(conf: &ExpandConfig, root: &Path, search_dirs: &[PathBuf]) -> Result<DepList> {
    resolve_with(conf, root, search_dirs, |binary| {
        extract::declared_dependencies(conf, binary)
    })
}

/// `resolve` with the metadata source factored out, for callers (and
/// tests) that already know each binary's declared names.
pub fn resolve_with<F>(
    conf: &ExpandConfig,
    root: &Path,
    search_dirs: &[PathBuf],
    mut declared: F,
) -> Result<DepList>
where
    F: FnMut(&Path) -> Vec<String>,
{
    let mut state = Resolver {
        conf,
        search_dirs,
        deps: Vec::new(),
        seen: HashSet::new(),
    };
    state.walk(root, &mut declared)?;

    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    state.deps.push((name, absolute(root)));
    Ok(state.deps)
}

struct Resolver<'a> {
    conf: &'a ExpandConfig,
    search_dirs: &'a [PathBuf],
    deps: DepList,
    seen: HashSet<String>,
}

impl<'a> Resolver<'a> {
    fn walk<F>(&mut self, binary: &Path, declared: &mut F) -> Result<()>
    where
        F: FnMut(&Path) -> Vec<String>,
    {
        for dep in declared(binary) {
            if Path::new(&dep).is_absolute() || self.seen.contains(&dep) {
                continue;
            }
            let Some(path) = self
                .search_dirs
                .iter()
                .map(|dir| dir.join(&dep))
                .find(|p| p.exists())
            else {
                debug!("{dep}: not on the search path, dropped");
                continue;
            };
            // Dependencies first, then the dependent itself.
            self.walk(&path, declared)?;
            if self.seen.insert(dep.clone()) {
                if self.conf.is_skipped(&dep) {
                    debug!("{dep}: skip-listed, resolved but not inserted");
                } else {
                    self.deps.push((dep, path));
                }
            }
        }
        Ok(())
    }
}

/// One basename per line, root last.
pub fn manifest(deps: &DepList) -> String {
    let mut out = String::new();
    for (name, _) in deps {
        out.push_str(name);
        out.push('\n');
    }
    out
}

/// Manifest variant with the final entry under `gtest/`; the only
/// permitted decoration.
pub fn gtest_manifest(deps: &DepList) -> String {
    let mut out = String::new();
    for (i, (name, _)) in deps.iter().enumerate() {
        if i == deps.len() - 1 {
            out.push_str("gtest/");
        }
        out.push_str(name);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn touch(path: &Path) {
        fs::write(path, b"").unwrap();
    }

    fn names(deps: &DepList) -> Vec<&str> {
        deps.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[test]
    fn post_order_with_absolute_references_dropped() {
        let conf = ExpandConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        for name in ["root", "libfoo.so", "libbar.so"] {
            touch(&dir.path().join(name));
        }
        let graph: HashMap<&str, Vec<String>> = HashMap::from([
            (
                "root",
                vec!["libfoo.so".to_string(), "/abs/libsys.so".to_string()],
            ),
            ("libfoo.so", vec!["libbar.so".to_string()]),
            ("libbar.so", vec![]),
        ]);
        let deps = resolve_with(&conf, &root, &[dir.path().to_path_buf()], |p| {
            graph[p.file_name().unwrap().to_str().unwrap()].clone()
        })
        .unwrap();
        assert_eq!(names(&deps), ["libbar.so", "libfoo.so", "root"]);
        for (_, path) in &deps {
            assert!(path.exists());
        }
    }

    #[test]
    fn diamond_dependencies_appear_once() {
        let conf = ExpandConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        for name in ["root", "a.so", "b.so", "d.so"] {
            touch(&dir.path().join(name));
        }
        let graph: HashMap<&str, Vec<String>> = HashMap::from([
            ("root", vec!["a.so".to_string(), "b.so".to_string()]),
            ("a.so", vec!["d.so".to_string()]),
            ("b.so", vec!["d.so".to_string()]),
            ("d.so", vec![]),
        ]);
        let deps = resolve_with(&conf, &root, &[dir.path().to_path_buf()], |p| {
            graph[p.file_name().unwrap().to_str().unwrap()].clone()
        })
        .unwrap();
        assert_eq!(names(&deps), ["d.so", "a.so", "b.so", "root"]);
    }

    #[test]
    fn search_directories_are_scanned_in_order() {
        let conf = ExpandConfig::default();
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let root = second.path().join("root");
        touch(&root);
        touch(&first.path().join("lib.so"));
        touch(&second.path().join("lib.so"));
        let deps = resolve_with(
            &conf,
            &root,
            &[first.path().to_path_buf(), second.path().to_path_buf()],
            |p| {
                if p.file_name().unwrap() == "root" {
                    vec!["lib.so".to_string()]
                } else {
                    vec![]
                }
            },
        )
        .unwrap();
        assert_eq!(deps[0].1, first.path().join("lib.so"));
    }

    #[test]
    fn skipped_names_are_traversed_but_not_listed() {
        let mut conf = ExpandConfig::default();
        conf.skip_exact = vec!["mid.so".to_string()];
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        for name in ["root", "mid.so", "leaf.so"] {
            touch(&dir.path().join(name));
        }
        let graph: HashMap<&str, Vec<String>> = HashMap::from([
            ("root", vec!["mid.so".to_string()]),
            ("mid.so", vec!["leaf.so".to_string()]),
            ("leaf.so", vec![]),
        ]);
        let deps = resolve_with(&conf, &root, &[dir.path().to_path_buf()], |p| {
            graph[p.file_name().unwrap().to_str().unwrap()].clone()
        })
        .unwrap();
        assert_eq!(names(&deps), ["leaf.so", "root"]);
    }

    #[test]
    fn no_declared_dependencies_yields_just_the_root() {
        let conf = ExpandConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        touch(&root);
        let deps = resolve_with(&conf, &root, &[], |_| vec![]).unwrap();
        assert_eq!(names(&deps), ["root"]);
    }

    #[test]
    fn manifests_decorate_only_the_final_entry() {
        let deps: DepList = vec![
            ("libbar.so".to_string(), PathBuf::from("/d/libbar.so")),
            ("root".to_string(), PathBuf::from("/d/root")),
        ];
        assert_eq!(manifest(&deps), "libbar.so\nroot\n");
        assert_eq!(gtest_manifest(&deps), "libbar.so\ngtest/root\n");
    }
}
