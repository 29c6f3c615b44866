// SPDX-License-Identifier: MIT OR Apache-2.0
//! The JavaScript language profile.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::backend::{BackendList, RelevanceOracle};
use crate::language::{LanguageProfile, SymbolParser};

/// A `SymbolParser` specialised for JavaScript.
pub type JavascriptParser = SymbolParser<JavascriptProfile>;

/// Build a JavaScript parser from its collaborators.
pub fn javascript_parser(
    backends: BackendList,
    oracle: Box<dyn RelevanceOracle>,
) -> JavascriptParser {
    SymbolParser::new(JavascriptProfile, backends, oracle)
}

/// Well-known global identifiers, typed arrays included. Dotted entries
/// contribute their root.
static JS_STDLIB: LazyLock<BTreeSet<&'static str>> = LazyLock::new(|| {
    [
        "Infinity", "NaN", "undefined", "null", "eval", "isFinite", "isNaN", "parseFloat",
        "parseInt", "decodeURI", "decodeURIComponent", "encodeURI", "encodeURIComponent",
        "escape", "unescape", "Object", "Function", "Boolean", "Symbol", "Error", "EvalError",
        "InternalError", "RangeError", "ReferenceError", "SyntaxError", "TypeError", "URIError",
        "Number", "Math", "Date", "String", "RegExp", "Array", "Int8Array", "Uint8Array",
        "Uint8ClampedArray", "Int16Array", "Uint16Array", "Int32Array", "Uint32Array",
        "Float32Array", "Float64Array", "Map", "Set", "WeakMap", "WeakSet", "SIMD",
        "ArrayBuffer", "SharedArrayBuffer", "Atomics", "DataView", "JSON", "Promise",
        "Generator", "GeneratorFunction", "Reflect", "Proxy", "Intl", "arguments",
    ]
    .into_iter()
    .collect()
});

/// JavaScript hooks: a baked-in global namespace and the base context only.
pub struct JavascriptProfile;

impl LanguageProfile for JavascriptProfile {
    fn language(&self) -> &'static str {
        "javascript"
    }

    fn is_standard_library(&self, root: &str) -> bool {
        JS_STDLIB.contains(root)
    }
}
