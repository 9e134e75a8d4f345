use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::debug;

use crate::config::ExpandConfig;
use crate::descriptor::ExpandDesc;
use crate::paths::{absolute, relativize};

/// Expands linker argument tokens: library references become the
/// dynamic library if one exists on disk, the static library itself if
/// present, or the recursive expansion of their descriptor file.
///
/// A `visited` set keyed by absolute descriptor path breaks cycles and
/// keeps shared descriptors from expanding twice; duplicates across
/// top-level tokens are deliberately preserved.
pub struct Expander<'a> {
    conf: &'a ExpandConfig,
    result: Vec<String>,
    visited: HashSet<PathBuf>,
}

impl<'a> Expander<'a> {
    pub fn new(conf: &'a ExpandConfig) -> Self {
        Self {
            conf,
            result: Vec::new(),
            visited: HashSet::new(),
        }
    }

    pub fn expand<I, S>(mut self, tokens: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for token in tokens {
            self.expand_token(token.as_ref())?;
        }
        Ok(self.result)
    }

    fn expand_token(&mut self, token: &str) -> Result<()> {
        if !self.is_lib_reference(token) {
            self.result.push(relativize(token));
            return Ok(());
        }
        let root = &token[..token.len() - self.conf.lib_suffix.len()];

        let candidate = self.dynamic_candidate(root);
        if Path::new(&candidate).exists() {
            self.result.push(relativize(&candidate));
            return Ok(());
        }
        if Path::new(token).exists() {
            self.result.push(relativize(token));
            return Ok(());
        }
        self.expand_desc(token)
    }

    /// A library reference carries the static-library suffix as its
    /// extension and the static-library prefix on its basename.
    fn is_lib_reference(&self, token: &str) -> bool {
        let Some(pos) = token.rfind('.') else {
            return false;
        };
        if &token[pos..] != self.conf.lib_suffix.as_str() {
            return false;
        }
        basename(&token[..pos]).starts_with(self.conf.lib_prefix.as_str())
    }

    /// The link-time stand-in for the dynamic library: the import
    /// stub where the platform has one, else the DLL itself with the
    /// prefix swapped in the basename only.
    fn dynamic_candidate(&self, root: &str) -> String {
        if !self.conf.import_lib_suffix.is_empty() {
            return format!("{root}{}", self.conf.import_lib_suffix);
        }
        let base = basename(root);
        let swapped = if self.conf.lib_prefix.is_empty() {
            format!("{}{base}", self.conf.dll_prefix)
        } else {
            base.replacen(&self.conf.lib_prefix, &self.conf.dll_prefix, 1)
        };
        let dir = &root[..root.len() - base.len()];
        format!("{dir}{swapped}{}", self.conf.dll_suffix)
    }

    fn expand_desc(&mut self, token: &str) -> Result<()> {
        let desc_path = absolute(format!("{token}{}", self.conf.libs_desc_suffix));
        if self.visited.contains(&desc_path) {
            return Ok(());
        }
        if !desc_path.exists() {
            // Leave the linker to produce its own diagnostic.
            self.result.push(token.to_string());
            return Ok(());
        }
        debug!("expanding {}", desc_path.display());
        self.visited.insert(desc_path.clone());
        let desc = ExpandDesc::read(&desc_path)?;
        for obj in &desc.objs {
            self.result.push(relativize(obj));
        }
        for lib in &desc.libs {
            self.expand_token(lib)?;
        }
        Ok(())
    }
}

fn basename(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn conf() -> ExpandConfig {
        let mut conf = ExpandConfig::default();
        conf.obj_suffix = ".o".to_string();
        conf.lib_suffix = ".a".to_string();
        conf.lib_prefix = "lib".to_string();
        conf.dll_suffix = ".so".to_string();
        conf.dll_prefix = "lib".to_string();
        conf.import_lib_suffix = String::new();
        conf.libs_desc_suffix = ".desc".to_string();
        conf
    }

    #[test]
    fn non_library_tokens_pass_through() {
        let conf = conf();
        let out = Expander::new(&conf)
            .expand(["-Wl,--as-needed", "main.o", "foo.a"])
            .unwrap();
        // foo.a lacks the lib prefix, so it is not a library reference.
        assert_eq!(out, ["-Wl,--as-needed", "main.o", "foo.a"]);
    }

    #[test]
    fn prefers_the_dynamic_library_when_present() {
        let conf = conf();
        let dir = tempfile::tempdir().unwrap();
        let dll = dir.path().join("libfoo.so");
        fs::write(&dll, b"").unwrap();
        let token = dir.path().join("libfoo.a").to_string_lossy().into_owned();
        let out = Expander::new(&conf).expand([token]).unwrap();
        assert_eq!(out, [dll.to_string_lossy().into_owned()]);
    }

    #[test]
    fn import_lib_suffix_takes_precedence() {
        let mut conf = conf();
        conf.import_lib_suffix = ".imp".to_string();
        let dir = tempfile::tempdir().unwrap();
        let imp = dir.path().join("libfoo.imp");
        fs::write(&imp, b"").unwrap();
        fs::write(dir.path().join("libfoo.so"), b"").unwrap();
        let token = dir.path().join("libfoo.a").to_string_lossy().into_owned();
        let out = Expander::new(&conf).expand([token]).unwrap();
        assert_eq!(out, [imp.to_string_lossy().into_owned()]);
    }

    #[test]
    fn falls_back_to_the_static_library_on_disk() {
        let conf = conf();
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("libfoo.a");
        fs::write(&lib, b"").unwrap();
        let token = lib.to_string_lossy().into_owned();
        let out = Expander::new(&conf).expand([&token]).unwrap();
        assert_eq!(out, [token]);
    }

    #[test]
    fn descriptor_expansion_emits_objs_before_nested_libs() {
        let conf = conf();
        let dir = tempfile::tempdir().unwrap();
        let baz = dir.path().join("libbaz.a");
        fs::write(&baz, b"").unwrap();
        let desc = format!("OBJS = a.o b.o\nLIBS = {}\n", baz.display());
        fs::write(dir.path().join("libbar.a.desc"), desc).unwrap();
        let token = dir.path().join("libbar.a").to_string_lossy().into_owned();
        let out = Expander::new(&conf).expand([token]).unwrap();
        let baz = baz.to_string_lossy().into_owned();
        assert_eq!(out, ["a.o", "b.o", baz.as_str()]);
    }

    #[test]
    fn cyclic_descriptors_expand_once_each() {
        let conf = conf();
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("libA.a");
        let b = dir.path().join("libB.a");
        fs::write(
            dir.path().join("libA.a.desc"),
            format!("LIBS = {}\n", b.display()),
        )
        .unwrap();
        fs::write(
            dir.path().join("libB.a.desc"),
            format!("LIBS = {}\n", a.display()),
        )
        .unwrap();
        let out = Expander::new(&conf)
            .expand([a.to_string_lossy().into_owned()])
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn missing_descriptor_leaves_the_token_alone() {
        let conf = conf();
        let out = Expander::new(&conf).expand(["libnothere.a"]).unwrap();
        assert_eq!(out, ["libnothere.a"]);
    }

    #[test]
    fn duplicate_top_level_tokens_are_preserved() {
        let conf = conf();
        let out = Expander::new(&conf).expand(["x.o", "x.o"]).unwrap();
        assert_eq!(out, ["x.o", "x.o"]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let conf = conf();
        let out = Expander::new(&conf).expand(Vec::<String>::new()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn expansion_is_deterministic() {
        let conf = conf();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("libbar.a.desc"), "OBJS = a.o\n").unwrap();
        let token = dir.path().join("libbar.a").to_string_lossy().into_owned();
        let first = Expander::new(&conf).expand([&token]).unwrap();
        let second = Expander::new(&conf).expand([&token]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn shared_descriptor_expands_once() {
        let conf = conf();
        let dir = tempfile::tempdir().unwrap();
        let common = dir.path().join("libcommon.a");
        fs::write(
            dir.path().join("libcommon.a.desc"),
            "OBJS = common.o\n",
        )
        .unwrap();
        let desc = format!("OBJS = a.o\nLIBS = {}\n", common.display());
        fs::write(dir.path().join("libA.a.desc"), &desc).unwrap();
        let desc = format!("OBJS = b.o\nLIBS = {}\n", common.display());
        fs::write(dir.path().join("libB.a.desc"), &desc).unwrap();
        let a = dir.path().join("libA.a").to_string_lossy().into_owned();
        let b = dir.path().join("libB.a").to_string_lossy().into_owned();
        let out = Expander::new(&conf).expand([a, b]).unwrap();
        assert_eq!(out, ["a.o", "common.o", "b.o"]);
    }
}
