use std::env;

/// Process-wide platform configuration: how object files, static
/// libraries and dynamic libraries are named on the target, where the
/// host binary dumpers live, and which dependency names the loader
/// manifest should leave out.
///
/// Suffixes carry their leading dot; prefixes may be empty.
#[derive(Debug, Clone)]
pub struct ExpandConfig {
    pub obj_suffix: String,
    pub lib_suffix: String,
    pub lib_prefix: String,
    pub dll_suffix: String,
    pub dll_prefix: String,
    /// Non-empty only on platforms with separate import libraries.
    pub import_lib_suffix: String,
    /// Appended to a static library name to locate its descriptor.
    pub libs_desc_suffix: String,

    /// ELF dynamic-section printer.
    pub elf_dump: String,
    /// Mach-O load-command printer.
    pub macho_dump: String,
    /// PE private-headers printer.
    pub pe_dump: String,
    /// Normalize `DLL Name:` entries to lowercase.
    pub lowercase_pe_names: bool,

    /// Manifest skip-list: names starting with one of these prefixes
    /// are resolved but not inserted.
    pub skip_prefixes: Vec<String>,
    /// Manifest skip-list: exact names.
    pub skip_exact: Vec<String>,
}

impl Default for ExpandConfig {
    fn default() -> Self {
        let (obj, lib, lib_pre, dll, dll_pre, import) = if cfg!(target_os = "windows") {
            (".obj", ".lib", "", ".dll", "", ".lib")
        } else if cfg!(target_os = "macos") {
            (".o", ".a", "lib", ".dylib", "lib", "")
        } else {
            (".o", ".a", "lib", ".so", "lib", "")
        };
        let macho_dump = if cfg!(target_os = "macos") {
            "otool"
        } else {
            "objdump"
        };
        Self {
            obj_suffix: obj.to_string(),
            lib_suffix: lib.to_string(),
            lib_prefix: lib_pre.to_string(),
            dll_suffix: dll.to_string(),
            dll_prefix: dll_pre.to_string(),
            import_lib_suffix: import.to_string(),
            libs_desc_suffix: ".desc".to_string(),
            elf_dump: "readelf".to_string(),
            macho_dump: macho_dump.to_string(),
            pe_dump: "objdump".to_string(),
            lowercase_pe_names: true,
            skip_prefixes: Vec::new(),
            skip_exact: Vec::new(),
        }
    }
}

impl ExpandConfig {
    /// Host defaults overridden by `EXPANDLIBS_*` environment
    /// variables. The build system hands configuration through the
    /// environment; tests use the setters on the struct directly.
    pub fn from_env() -> Self {
        let mut conf = Self::default();
        let mut take = |key: &str, slot: &mut String| {
            if let Ok(v) = env::var(key) {
                *slot = v;
            }
        };
        take("EXPANDLIBS_OBJ_SUFFIX", &mut conf.obj_suffix);
        take("EXPANDLIBS_LIB_SUFFIX", &mut conf.lib_suffix);
        take("EXPANDLIBS_LIB_PREFIX", &mut conf.lib_prefix);
        take("EXPANDLIBS_DLL_SUFFIX", &mut conf.dll_suffix);
        take("EXPANDLIBS_DLL_PREFIX", &mut conf.dll_prefix);
        take("EXPANDLIBS_IMPORT_LIB_SUFFIX", &mut conf.import_lib_suffix);
        take("EXPANDLIBS_LIBS_DESC_SUFFIX", &mut conf.libs_desc_suffix);
        take("EXPANDLIBS_ELF_DUMP", &mut conf.elf_dump);
        take("EXPANDLIBS_MACHO_DUMP", &mut conf.macho_dump);
        take("EXPANDLIBS_PE_DUMP", &mut conf.pe_dump);
        if let Ok(v) = env::var("EXPANDLIBS_KEEP_PE_CASE") {
            conf.lowercase_pe_names = v != "1";
        }
        if let Ok(v) = env::var("EXPANDLIBS_SKIP_PREFIXES") {
            conf.skip_prefixes = split_list(&v);
        }
        if let Ok(v) = env::var("EXPANDLIBS_SKIP") {
            conf.skip_exact = split_list(&v);
        }
        conf
    }

    /// True when the manifest should drop `name` (its dependencies are
    /// still followed).
    pub fn is_skipped(&self, name: &str) -> bool {
        self.skip_prefixes.iter().any(|p| name.starts_with(p.as_str()))
            || self.skip_exact.iter().any(|e| e == name)
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
