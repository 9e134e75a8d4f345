use std::fs;
use std::path::Path;
use std::str;

use anyhow::{Context, Result};

use crate::error::Error;

/// A link descriptor: the object files and nested library references
/// that conceptually belong to a static library. Descriptors are
/// read-only on disk, produced by build steps outside this crate.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpandDesc {
    pub objs: Vec<String>,
    pub libs: Vec<String>,
}

impl ExpandDesc {
    /// Line-oriented `KEY = v1 v2 ...` parse. Lines without `=` and
    /// keys other than `OBJS`/`LIBS` are ignored.
    pub fn parse(content: &str) -> Self {
        let mut desc = ExpandDesc::default();
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let tokens = value.split_whitespace().map(ToString::to_string);
            match key.trim() {
                "OBJS" => desc.objs.extend(tokens),
                "LIBS" => desc.libs.extend(tokens),
                _ => {}
            }
        }
        desc
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("couldn't read descriptor {}", path.display()))?;
        let content = str::from_utf8(&bytes)
            .map_err(|_| Error::BadDescriptor(format!("{} is not UTF-8", path.display())))?;
        Ok(Self::parse(content))
    }

    /// Fixed emission order `OBJS`, `LIBS`; empty lists are omitted.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (key, values) in [("OBJS", &self.objs), ("LIBS", &self.libs)] {
            if !values.is_empty() {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(&values.join(" "));
                out.push('\n');
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.objs.is_empty() && self.libs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(objs: &[&str], libs: &[&str]) -> ExpandDesc {
        ExpandDesc {
            objs: objs.iter().map(|s| s.to_string()).collect(),
            libs: libs.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn parse_round_trips_serialize() {
        for d in [
            desc(&["a.o", "b.o"], &["libx.a"]),
            desc(&[], &["libx.a", "liby.a"]),
            desc(&["a.o"], &[]),
            desc(&[], &[]),
        ] {
            assert_eq!(ExpandDesc::parse(&d.serialize()), d);
        }
    }

    #[test]
    fn unknown_keys_and_junk_lines_are_ignored() {
        let d = ExpandDesc::parse("# comment\nFOO = bar\nOBJS = a.o\nno equals here\n");
        assert_eq!(d, desc(&["a.o"], &[]));
    }

    #[test]
    fn key_order_does_not_matter_for_parsing() {
        let d = ExpandDesc::parse("LIBS = libx.a\nOBJS = a.o b.o\n");
        assert_eq!(d, desc(&["a.o", "b.o"], &["libx.a"]));
    }

    #[test]
    fn empty_lists_are_omitted_on_emission() {
        assert_eq!(desc(&["a.o"], &[]).serialize(), "OBJS = a.o\n");
        assert_eq!(desc(&[], &[]).serialize(), "");
    }

    #[test]
    fn read_rejects_non_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.desc");
        std::fs::write(&path, [0x4f, 0x42, 0xff, 0xfe]).unwrap();
        let err = ExpandDesc::read(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::Error>(),
            Some(crate::Error::BadDescriptor(_))
        ));
    }
}
