// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Python language profile.

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use skm_core::WorkItem;

use crate::backend::{BackendList, RelevanceOracle};
use crate::language::{LanguageProfile, SymbolParser};

/// A `SymbolParser` specialised for Python.
pub type PythonParser = SymbolParser<PythonProfile>;

/// Build a Python parser from its collaborators. The backend list should be
/// ordered newest dialect first (e.g. python3 before python2).
pub fn python_parser(backends: BackendList, oracle: Box<dyn RelevanceOracle>) -> PythonParser {
    SymbolParser::new(PythonProfile, backends, oracle)
}

/// Standard-library module names, unioned across the interpreter versions a
/// scanned repository may realistically target.
static PYTHON_STDLIB: LazyLock<BTreeSet<&'static str>> = LazyLock::new(|| {
    [
        "__future__", "abc", "aifc", "argparse", "array", "ast", "asynchat", "asyncio",
        "asyncore", "atexit", "audioop", "base64", "bdb", "binascii", "bisect", "builtins",
        "bz2", "calendar", "cgi", "cgitb", "chunk", "cmath", "cmd", "code", "codecs",
        "codeop", "collections", "colorsys", "compileall", "concurrent", "configparser",
        "contextlib", "contextvars", "copy", "copyreg", "cProfile", "crypt", "csv", "ctypes",
        "curses", "dataclasses", "datetime", "dbm", "decimal", "difflib", "dis", "distutils",
        "doctest", "email", "encodings", "ensurepip", "enum", "errno", "faulthandler",
        "fcntl", "filecmp", "fileinput", "fnmatch", "fractions", "ftplib", "functools",
        "gc", "getopt", "getpass", "gettext", "glob", "graphlib", "grp", "gzip", "hashlib",
        "heapq", "hmac", "html", "http", "imaplib", "imghdr", "imp", "importlib", "inspect",
        "io", "ipaddress", "itertools", "json", "keyword", "lib2to3", "linecache", "locale",
        "logging", "lzma", "mailbox", "mailcap", "marshal", "math", "mimetypes", "mmap",
        "modulefinder", "multiprocessing", "netrc", "nis", "nntplib", "numbers", "operator",
        "optparse", "os", "ossaudiodev", "pathlib", "pdb", "pickle", "pickletools", "pipes",
        "pkgutil", "platform", "plistlib", "poplib", "posix", "pprint", "profile", "pstats",
        "pty", "pwd", "py_compile", "pyclbr", "pydoc", "queue", "quopri", "random", "re",
        "readline", "reprlib", "resource", "rlcompleter", "runpy", "sched", "secrets",
        "select", "selectors", "shelve", "shlex", "shutil", "signal", "site", "smtplib",
        "sndhdr", "socket", "socketserver", "spwd", "sqlite3", "ssl", "stat", "statistics",
        "string", "stringprep", "struct", "subprocess", "sunau", "symtable", "sys",
        "sysconfig", "syslog", "tabnanny", "tarfile", "telnetlib", "tempfile", "termios",
        "test", "textwrap", "threading", "time", "timeit", "tkinter", "token", "tokenize",
        "tomllib", "trace", "traceback", "tracemalloc", "tty", "turtle", "types", "typing",
        "unicodedata", "unittest", "urllib", "uu", "uuid", "venv", "warnings", "wave",
        "weakref", "webbrowser", "wsgiref", "xdrlib", "xml", "xmlrpc", "zipapp", "zipfile",
        "zipimport", "zlib", "zoneinfo",
        // python2-only names still seen in older history
        "BaseHTTPServer", "ConfigParser", "Cookie", "cPickle", "cStringIO", "htmlentitydefs",
        "httplib", "Queue", "SimpleHTTPServer", "SocketServer", "StringIO", "Tkinter",
        "urllib2", "urlparse", "xrange",
    ]
    .into_iter()
    .collect()
});

/// Python-specific hooks: stdlib membership and the `private_modules`
/// context the backend needs to tag repository-local imports.
pub struct PythonProfile;

impl LanguageProfile for PythonProfile {
    fn language(&self) -> &'static str {
        "python"
    }

    fn is_standard_library(&self, root: &str) -> bool {
        PYTHON_STDLIB.contains(root)
    }

    fn private_modules(&self, item: &WorkItem) -> BTreeSet<String> {
        python_private_modules(&item.tree_paths, item.display_path())
    }

    fn extend_context(&self, _item: &WorkItem, private: &BTreeSet<String>, context: &mut Value) {
        if let Some(object) = context.as_object_mut() {
            object.insert(
                "private_modules".to_string(),
                Value::Array(
                    private
                        .iter()
                        .map(|module| Value::String(module.clone()))
                        .collect(),
                ),
            );
        }
    }
}

/// Dotted names of the modules a tree defines, both absolute and relative to
/// the importing file's directory.
///
/// A package is a directory carrying `__init__.py`; every other `.py` blob is
/// a module of its own. The repository root imports as `.`.
pub fn python_private_modules(tree_paths: &[String], from_path: &str) -> BTreeSet<String> {
    let mut modules = BTreeSet::new();
    let current_dir = parent_dir(from_path);

    for path in tree_paths {
        if !path.ends_with(".py") {
            continue;
        }
        let module_path = if path.ends_with("__init__.py") {
            parent_dir(path)
        } else {
            path.trim_end_matches(".py").to_string()
        };
        if module_path.is_empty() {
            modules.insert(".".to_string());
            continue;
        }
        modules.insert(module_path.replace('/', "."));

        if !current_dir.is_empty() {
            if module_path == current_dir {
                modules.insert(".".to_string());
            } else if let Some(relative) = module_path.strip_prefix(&format!("{current_dir}/")) {
                modules.insert(relative.replace('/', "."));
            }
        }
    }
    modules
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(index) => path[..index].to_string(),
        None => String::new(),
    }
}
