//! Document Composer: turns a `SourceBundle` into a runnable document.
//!
//! The live preview document carries the instrumentation shim from
//! `shim.js`; the export document is clean. Both are pure string transforms.

use crate::{ErrorPolicy, SourceBundle};

const SHIM_TEMPLATE: &str = include_str!("shim.js");
const USER_SCRIPT_TOKEN: &str = "__LIVEPEN_USER_SCRIPT__";

/// Knobs that change the generated shim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShimOptions {
    pub error_policy: ErrorPolicy,
    pub forward_to_native: bool,
}

/// Shim text before and after the user's script
struct ShimParts {
    prologue: String,
    epilogue: String,
}

fn shim_parts(options: &ShimOptions) -> ShimParts {
    let rethrow = matches!(options.error_policy, ErrorPolicy::Rethrow);
    let rendered = SHIM_TEMPLATE
        .replace("__LIVEPEN_FORWARD_NATIVE__", bool_literal(options.forward_to_native))
        .replace("__LIVEPEN_RETHROW__", bool_literal(rethrow));

    // The token sits on its own line in the template.
    let (prologue, epilogue) = match rendered.find(USER_SCRIPT_TOKEN) {
        Some(at) => (
            rendered[..at].to_string(),
            rendered[at + USER_SCRIPT_TOKEN.len()..].to_string(),
        ),
        None => (rendered, String::new()),
    };
    ShimParts { prologue, epilogue }
}

fn bool_literal(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Compose the live preview document.
///
/// The script block is `<prologue><user script><epilogue>`; the user script is
/// inlined verbatim inside the shim's failure boundary.
pub fn compose(bundle: &SourceBundle, options: &ShimOptions) -> String {
    let shim = shim_parts(options);
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>{}</style>\n</head>\n<body>\n{}\n<script>{}{}{}</script>\n</body>\n</html>\n",
        bundle.styles, bundle.markup, shim.prologue, bundle.script, shim.epilogue
    )
}

/// Number of script-block lines that precede the user's first line.
///
/// Line `P + L` of the evaluated script block is line `L` of the JS pane, where
/// `P` is this value.
pub fn script_prologue_lines(options: &ShimOptions) -> u32 {
    shim_parts(options).prologue.matches('\n').count() as u32
}

/// Script-block text before the user's first line
pub fn script_prologue(options: &ShimOptions) -> String {
    shim_parts(options).prologue
}

/// Script-block text after the user's last line
pub fn script_epilogue(options: &ShimOptions) -> String {
    shim_parts(options).epilogue
}

/// Compose the clean export artifact: no shim, everything inline.
pub fn export(bundle: &SourceBundle) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>{}</style>\n</head>\n<body>\n{}\n<script>{}</script>\n</body>\n</html>\n",
        bundle.styles, bundle.markup, bundle.script
    )
}
