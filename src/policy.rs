//! Sandbox Policy System
//!
//! A policy is plain data: the import allow-list consulted by the static
//! validator, the bare-name calls it rejects, and the capability table the
//! execution sandbox turns into the restricted namespace.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Import allow-list                                           │
//! │  - full standard library + approved third-party namespaces   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Denied calls                                                │
//! │  - dynamic evaluation primitives (eval, exec, ...)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Capability table                                            │
//! │  - safe builtins + (alias, module, attribute) bindings       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! None of this is an OS-level boundary. Code that passes the allow-list can
//! still reach anything the standard library exposes.

use crate::config::ImportPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Standard library modules accepted by the import check
///
/// Mirrors CPython's `sys.stdlib_module_names`.
pub const STDLIB_MODULES: &[&str] = &[
    "__future__",
    "_abc",
    "_aix_support",
    "_ast",
    "_asyncio",
    "_bisect",
    "_blake2",
    "_bootsubprocess",
    "_bz2",
    "_codecs",
    "_codecs_cn",
    "_codecs_hk",
    "_codecs_iso2022",
    "_codecs_jp",
    "_codecs_kr",
    "_codecs_tw",
    "_collections",
    "_collections_abc",
    "_compat_pickle",
    "_compression",
    "_contextvars",
    "_crypt",
    "_csv",
    "_ctypes",
    "_curses",
    "_curses_panel",
    "_datetime",
    "_dbm",
    "_decimal",
    "_elementtree",
    "_frozen_importlib",
    "_frozen_importlib_external",
    "_functools",
    "_gdbm",
    "_hashlib",
    "_heapq",
    "_imp",
    "_io",
    "_json",
    "_locale",
    "_lsprof",
    "_lzma",
    "_markupbase",
    "_md5",
    "_msi",
    "_multibytecodec",
    "_multiprocessing",
    "_opcode",
    "_operator",
    "_osx_support",
    "_overlapped",
    "_pickle",
    "_posixshmem",
    "_posixsubprocess",
    "_py_abc",
    "_pydecimal",
    "_pyio",
    "_queue",
    "_random",
    "_scproxy",
    "_sha1",
    "_sha256",
    "_sha3",
    "_sha512",
    "_signal",
    "_sitebuiltins",
    "_socket",
    "_sqlite3",
    "_sre",
    "_ssl",
    "_stat",
    "_statistics",
    "_string",
    "_strptime",
    "_struct",
    "_symtable",
    "_thread",
    "_threading_local",
    "_tkinter",
    "_tokenize",
    "_tracemalloc",
    "_typing",
    "_uuid",
    "_warnings",
    "_weakref",
    "_weakrefset",
    "_winapi",
    "_zoneinfo",
    "abc",
    "aifc",
    "antigravity",
    "argparse",
    "array",
    "ast",
    "asynchat",
    "asyncio",
    "asyncore",
    "atexit",
    "audioop",
    "base64",
    "bdb",
    "binascii",
    "bisect",
    "builtins",
    "bz2",
    "cProfile",
    "calendar",
    "cgi",
    "cgitb",
    "chunk",
    "cmath",
    "cmd",
    "code",
    "codecs",
    "codeop",
    "collections",
    "colorsys",
    "compileall",
    "concurrent",
    "configparser",
    "contextlib",
    "contextvars",
    "copy",
    "copyreg",
    "crypt",
    "csv",
    "ctypes",
    "curses",
    "dataclasses",
    "datetime",
    "dbm",
    "decimal",
    "difflib",
    "dis",
    "distutils",
    "doctest",
    "email",
    "encodings",
    "ensurepip",
    "enum",
    "errno",
    "faulthandler",
    "fcntl",
    "filecmp",
    "fileinput",
    "fnmatch",
    "fractions",
    "ftplib",
    "functools",
    "gc",
    "genericpath",
    "getopt",
    "getpass",
    "gettext",
    "glob",
    "graphlib",
    "grp",
    "gzip",
    "hashlib",
    "heapq",
    "hmac",
    "html",
    "http",
    "idlelib",
    "imaplib",
    "imghdr",
    "imp",
    "importlib",
    "inspect",
    "io",
    "ipaddress",
    "itertools",
    "json",
    "keyword",
    "lib2to3",
    "linecache",
    "locale",
    "logging",
    "lzma",
    "mailbox",
    "mailcap",
    "marshal",
    "math",
    "mimetypes",
    "mmap",
    "modulefinder",
    "msilib",
    "msvcrt",
    "multiprocessing",
    "netrc",
    "nis",
    "nntplib",
    "nt",
    "ntpath",
    "nturl2path",
    "numbers",
    "opcode",
    "operator",
    "optparse",
    "os",
    "ossaudiodev",
    "pathlib",
    "pdb",
    "pickle",
    "pickletools",
    "pipes",
    "pkgutil",
    "platform",
    "plistlib",
    "poplib",
    "posix",
    "posixpath",
    "pprint",
    "profile",
    "pstats",
    "pty",
    "pwd",
    "py_compile",
    "pyclbr",
    "pydoc",
    "pydoc_data",
    "pyexpat",
    "queue",
    "quopri",
    "random",
    "re",
    "readline",
    "reprlib",
    "resource",
    "rlcompleter",
    "runpy",
    "sched",
    "secrets",
    "select",
    "selectors",
    "shelve",
    "shlex",
    "shutil",
    "signal",
    "site",
    "smtpd",
    "smtplib",
    "sndhdr",
    "socket",
    "socketserver",
    "spwd",
    "sqlite3",
    "sre_compile",
    "sre_constants",
    "sre_parse",
    "ssl",
    "stat",
    "statistics",
    "string",
    "stringprep",
    "struct",
    "subprocess",
    "sunau",
    "symtable",
    "sys",
    "sysconfig",
    "syslog",
    "tabnanny",
    "tarfile",
    "telnetlib",
    "tempfile",
    "termios",
    "textwrap",
    "this",
    "threading",
    "time",
    "timeit",
    "tkinter",
    "token",
    "tokenize",
    "tomllib",
    "trace",
    "traceback",
    "tracemalloc",
    "tty",
    "turtle",
    "turtledemo",
    "types",
    "typing",
    "unicodedata",
    "unittest",
    "urllib",
    "uu",
    "uuid",
    "venv",
    "warnings",
    "wave",
    "weakref",
    "webbrowser",
    "winreg",
    "winsound",
    "wsgiref",
    "xdrlib",
    "xml",
    "xmlrpc",
    "zipapp",
    "zipfile",
    "zipimport",
    "zlib",
    "zoneinfo",
];

/// Third-party namespaces approved on top of the standard library
pub const APPROVED_PACKAGES: &[&str] = &["polars", "pyarrow", "numpy", "matplotlib"];

/// Name of the read-only dataset accessor placed in the restricted namespace
pub const DATASETS_NAME: &str = "datasets";

/// Bare-name calls rejected by the validator
pub const DENIED_CALLS: &[&str] = &["eval", "exec", "compile", "__import__"];

/// Builtins exposed to executed code.
///
/// File, network, introspection and dynamic-evaluation primitives (`open`,
/// `eval`, `exec`, `compile`, `input`, `globals`, `vars`, `getattr`, ...) are
/// absent on purpose.
pub const SAFE_BUILTINS: &[&str] = &[
    "__build_class__",
    "abs",
    "all",
    "any",
    "bool",
    "bytes",
    "callable",
    "chr",
    "dict",
    "divmod",
    "enumerate",
    "filter",
    "float",
    "format",
    "frozenset",
    "hash",
    "int",
    "isinstance",
    "issubclass",
    "iter",
    "len",
    "list",
    "map",
    "max",
    "min",
    "next",
    "object",
    "ord",
    "pow",
    "print",
    "range",
    "repr",
    "reversed",
    "round",
    "set",
    "slice",
    "sorted",
    "str",
    "sum",
    "tuple",
    "zip",
    "None",
    "True",
    "False",
    "Exception",
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "ImportError",
    "IndexError",
    "KeyError",
    "LookupError",
    "NameError",
    "NotImplementedError",
    "RuntimeError",
    "StopIteration",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
];

/// One entry of the capability table: `alias = module[.attribute]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleBinding {
    pub alias: String,
    pub module: String,
    pub attribute: Option<String>,
}

impl ModuleBinding {
    pub fn module(alias: &str, module: &str) -> Self {
        Self {
            alias: alias.to_string(),
            module: module.to_string(),
            attribute: None,
        }
    }

    pub fn attribute(alias: &str, module: &str, attribute: &str) -> Self {
        Self {
            alias: alias.to_string(),
            module: module.to_string(),
            attribute: Some(attribute.to_string()),
        }
    }
}

/// Complete sandbox policy combining all tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxPolicy {
    /// Human-readable name for this policy
    pub name: String,
    /// Modules the static import check accepts
    pub imports: ImportPolicy,
    /// Bare-name calls the static call check rejects
    pub denied_calls: BTreeSet<String>,
    /// Builtin names copied into the restricted namespace
    pub builtins: Vec<String>,
    /// Module handles bound into the restricted namespace
    pub bindings: Vec<ModuleBinding>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl SandboxPolicy {
    /// Standard library plus the approved data packages
    pub fn standard() -> Self {
        let imports = ImportPolicy::new(
            STDLIB_MODULES
                .iter()
                .chain(APPROVED_PACKAGES.iter())
                .copied(),
        );

        Self {
            name: "standard".to_string(),
            imports,
            denied_calls: DENIED_CALLS.iter().map(|s| s.to_string()).collect(),
            builtins: SAFE_BUILTINS.iter().map(|s| s.to_string()).collect(),
            bindings: vec![
                ModuleBinding::module("pl", "polars"),
                ModuleBinding::module("polars", "polars"),
                ModuleBinding::module("pyarrow", "pyarrow"),
                ModuleBinding::module("np", "numpy"),
                ModuleBinding::module("matplotlib", "matplotlib"),
                ModuleBinding::module("plt", "matplotlib.pyplot"),
                ModuleBinding::module("math", "math"),
                ModuleBinding::module("random", "random"),
                ModuleBinding::module("json", "json"),
                ModuleBinding::attribute("datetime", "datetime", "datetime"),
                ModuleBinding::attribute("timedelta", "datetime", "timedelta"),
                ModuleBinding::attribute("date", "datetime", "date"),
                ModuleBinding::attribute("time", "datetime", "time"),
                ModuleBinding::attribute("timezone", "datetime", "timezone"),
            ],
        }
    }

    /// Create a custom policy starting from a template
    pub fn custom(base: Self) -> SandboxPolicyBuilder {
        SandboxPolicyBuilder { policy: base }
    }

    /// Names that exist in the restricted namespace without an import
    pub fn preloaded_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.iter().map(|b| b.alias.clone()).collect();
        names.push(DATASETS_NAME.to_string());
        names.sort();
        names.dedup();
        names
    }

    pub fn is_call_denied(&self, name: &str) -> bool {
        self.denied_calls.contains(name)
    }
}

/// Builder for creating custom policies
pub struct SandboxPolicyBuilder {
    policy: SandboxPolicy,
}

impl SandboxPolicyBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.policy.name = name.to_string();
        self
    }

    pub fn allow_module(mut self, module: &str) -> Self {
        self.policy.imports.allow(module);
        self
    }

    pub fn deny_call(mut self, name: &str) -> Self {
        self.policy.denied_calls.insert(name.to_string());
        self
    }

    pub fn builtin(mut self, name: &str) -> Self {
        if !self.policy.builtins.iter().any(|b| b == name) {
            self.policy.builtins.push(name.to_string());
        }
        self
    }

    pub fn bind(mut self, binding: ModuleBinding) -> Self {
        self.policy.bindings.retain(|b| b.alias != binding.alias);
        self.policy.bindings.push(binding);
        self
    }

    pub fn build(self) -> SandboxPolicy {
        self.policy
    }
}
