use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::Command;

use anyhow::Result;
use log::{debug, warn};

use crate::config::ExpandConfig;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Elf,
    MachO,
    Pe,
}

/// Sniff the binary format from the file's magic bytes.
pub fn identify(path: &Path) -> Result<Option<BinaryKind>> {
    let mut magic = [0u8; 4];
    let mut f = File::open(path)?;
    let n = f.read(&mut magic)?;
    let magic = &magic[..n];
    if magic.starts_with(&[0x7f, b'E', b'L', b'F']) {
        return Ok(Some(BinaryKind::Elf));
    }
    if magic.starts_with(b"MZ") {
        return Ok(Some(BinaryKind::Pe));
    }
    match magic {
        // 32/64-bit Mach-O, either endianness, and fat binaries.
        [0xfe, 0xed, 0xfa, _] | [_, 0xfa, 0xed, 0xfe] | [0xca, 0xfe, 0xba, 0xbe] => {
            Ok(Some(BinaryKind::MachO))
        }
        _ => Ok(None),
    }
}

/// Library names `binary` declares as dynamic dependencies, in source
/// order. A failing or missing dumper is treated as "no declared
/// dependencies"; callers that need stricter behavior must check the
/// tool separately.
pub fn declared_dependencies(conf: &ExpandConfig, binary: &Path) -> Vec<String> {
    let kind = match identify(binary) {
        Ok(Some(kind)) => kind,
        Ok(None) => {
            debug!("{}: not a known binary format", binary.display());
            return Vec::new();
        }
        Err(e) => {
            warn!("{}: {e}", binary.display());
            return Vec::new();
        }
    };
    let output = match kind {
        BinaryKind::Elf => run_dump(&conf.elf_dump, &["-d"], binary),
        BinaryKind::MachO => {
            if conf.macho_dump.ends_with("otool") {
                run_dump(&conf.macho_dump, &["-l"], binary)
            } else {
                run_dump(&conf.macho_dump, &["--private-headers"], binary)
            }
        }
        BinaryKind::Pe => run_dump(&conf.pe_dump, &["--private-headers"], binary),
    };
    let output = match output {
        Ok(output) => output,
        Err(e) => {
            warn!("{}: {e}", binary.display());
            return Vec::new();
        }
    };
    match kind {
        BinaryKind::Elf => elf_needed(&output),
        BinaryKind::MachO => macho_dylibs(&output),
        BinaryKind::Pe => pe_imports(&output, conf.lowercase_pe_names),
    }
}

/// Run a host dumper and collect its stdout. Stderr is forwarded to
/// our own stderr; a non-zero exit is `Error::ToolFailure`.
fn run_dump(tool: &str, args: &[&str], binary: &Path) -> Result<String> {
    debug!("running {tool} {args:?} {}", binary.display());
    let out = Command::new(tool)
        .args(args)
        .arg(binary)
        .output()
        .map_err(Error::ArchiveIo)?;
    if !out.stderr.is_empty() {
        io::stderr().write_all(&out.stderr).ok();
    }
    if !out.status.success() {
        return Err(Error::ToolFailure {
            tool: tool.to_string(),
            status: out.status.code().unwrap_or(-1),
        }
        .into());
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// `readelf -d`: keep the bracketed name of each NEEDED tag.
fn elf_needed(output: &str) -> Vec<String> {
    let mut deps = Vec::new();
    for line in output.lines() {
        if !line.contains("NEEDED") {
            continue;
        }
        if let Some(start) = line.find('[') {
            if let Some(end) = line[start + 1..].find(']') {
                deps.push(line[start + 1..start + 1 + end].to_string());
            }
        }
    }
    deps
}

/// `otool -l` style load commands: the `name` line of each
/// LC_LOAD_DYLIB command, with loader-relative prefixes stripped.
fn macho_dylibs(output: &str) -> Vec<String> {
    let mut deps = Vec::new();
    let mut cmd = "";
    for line in output.lines() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix("cmd ") {
            cmd = rest.trim();
        } else if cmd == "LC_LOAD_DYLIB" {
            if let Some(rest) = line.strip_prefix("name ") {
                if let Some(name) = rest.split_whitespace().next() {
                    let name = name
                        .strip_prefix("@executable_path/")
                        .or_else(|| name.strip_prefix("@rpath/"))
                        .unwrap_or(name);
                    deps.push(name.to_string());
                }
            }
        }
    }
    deps
}

/// `objdump --private-headers` on PE: `DLL Name:` lines. Import-table
/// casing is mixed while on-disk names are lowercase, so names are
/// normalized unless configured otherwise.
fn pe_imports(output: &str, lowercase: bool) -> Vec<String> {
    let mut deps = Vec::new();
    for line in output.lines() {
        if let Some(name) = line.trim_start().strip_prefix("DLL Name:") {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            deps.push(if lowercase {
                name.to_lowercase()
            } else {
                name.to_string()
            });
        }
    }
    deps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_by_magic() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, bytes: &[u8]| {
            let p = dir.path().join(name);
            std::fs::write(&p, bytes).unwrap();
            p
        };
        let elf = write("a", &[0x7f, b'E', b'L', b'F', 2, 1]);
        let pe = write("b", b"MZ\x90\x00");
        let macho = write("c", &[0xcf, 0xfa, 0xed, 0xfe]);
        let text = write("d", b"OBJS = a.o\n");
        assert_eq!(identify(&elf).unwrap(), Some(BinaryKind::Elf));
        assert_eq!(identify(&pe).unwrap(), Some(BinaryKind::Pe));
        assert_eq!(identify(&macho).unwrap(), Some(BinaryKind::MachO));
        assert_eq!(identify(&text).unwrap(), None);
    }

    #[test]
    fn elf_needed_keeps_source_order() {
        let out = "\
Dynamic section at offset 0x2d78 contains 24 entries:
  Tag        Type                         Name/Value
 0x0000000000000001 (NEEDED)             Shared library: [libpthread.so.0]
 0x0000000000000001 (NEEDED)             Shared library: [libc.so.6]
 0x000000000000000e (SONAME)             Library soname: [libfoo.so]
";
        assert_eq!(elf_needed(out), ["libpthread.so.0", "libc.so.6"]);
    }

    #[test]
    fn macho_dylibs_tracks_the_current_command() {
        let out = "\
Load command 11
          cmd LC_LOAD_DYLIB
      cmdsize 56
         name /usr/lib/libSystem.B.dylib (offset 24)
Load command 12
          cmd LC_UUID
      cmdsize 24
         name should-not-appear (offset 24)
Load command 13
          cmd LC_LOAD_DYLIB
      cmdsize 48
         name @rpath/libmozglue.dylib (offset 24)
";
        assert_eq!(
            macho_dylibs(out),
            ["/usr/lib/libSystem.B.dylib", "libmozglue.dylib"]
        );
    }

    #[test]
    fn macho_strips_executable_path_prefix() {
        let out = "          cmd LC_LOAD_DYLIB\n         name @executable_path/libnss3.dylib (offset 24)\n";
        assert_eq!(macho_dylibs(out), ["libnss3.dylib"]);
    }

    #[test]
    fn pe_imports_lowercases_by_default() {
        let out = "\
The Import Tables (interpreted .idata section contents)
        DLL Name: KERNEL32.dll
        DLL Name: mozglue.dll
";
        assert_eq!(pe_imports(out, true), ["kernel32.dll", "mozglue.dll"]);
        assert_eq!(pe_imports(out, false), ["KERNEL32.dll", "mozglue.dll"]);
    }

    #[test]
    fn failing_tool_means_no_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("bin");
        std::fs::write(&binary, [0x7f, b'E', b'L', b'F']).unwrap();
        let mut conf = ExpandConfig::default();
        conf.elf_dump = "false".to_string();
        assert!(declared_dependencies(&conf, &binary).is_empty());
    }
}
