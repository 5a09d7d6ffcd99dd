// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scrubbing of error messages before they reach users.

use regex::Regex;
use std::sync::LazyLock;

/// Longest message stored on a task or sent in a notification
pub const MAX_MESSAGE_LEN: usize = 500;

/// Shown when nothing useful survives scrubbing
pub const GENERIC_MESSAGE: &str =
    "A problem occurred while processing your model. Our team has been notified.";

/// Messages shorter than this after scrubbing are replaced
const MIN_USEFUL_LEN: usize = 5;

static STACK_TRACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(?:stack backtrace:|Stack trace:|\nbacktrace:).*$")
        .expect("Invalid stack trace regex")
});

static SOURCE_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+at\s+\S+\.rs:\d+(?::\d+)?").expect("Invalid source location regex")
});

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]").expect("Invalid bracket regex"));

// A lone `/name` only counts as a path at a token start, so `I/O` survives
static FILE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"[A-Za-z]:\\[^\s'"`,;)]*|~?\.{0,2}/[^\s'"`,;)/]*/[^\s'"`,;)]*|(?P<lead>^|[\s'"`(=])~?/[^\s'"`,;)]+"#,
    )
    .expect("Invalid path regex")
});

static TYPE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[a-z_][a-z0-9_]*(?:::[A-Za-z_][A-Za-z0-9_]*)+").expect("Invalid type path regex")
});

static ERROR_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][A-Za-z0-9]*(?:Error|Exception):\s*").expect("Invalid error prefix regex")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

/// Strip paths, bracketed details, stack traces, source locations and
/// type names from `message`, capping the result at [`MAX_MESSAGE_LEN`].
pub fn sanitize_error(message: &str) -> String {
    let scrubbed = STACK_TRACE.replace(message, "");
    let scrubbed = SOURCE_LOCATION.replace_all(&scrubbed, "");
    let scrubbed = BRACKETED.replace_all(&scrubbed, "");
    let scrubbed = FILE_PATH.replace_all(&scrubbed, "${lead}");
    let scrubbed = TYPE_PATH.replace_all(&scrubbed, "");
    let scrubbed = ERROR_PREFIX.replace_all(&scrubbed, "");
    let scrubbed = WHITESPACE.replace_all(&scrubbed, " ");
    let scrubbed = scrubbed.trim().trim_end_matches(':').trim();

    if scrubbed.chars().count() < MIN_USEFUL_LEN {
        return GENERIC_MESSAGE.to_string();
    }

    if scrubbed.chars().count() > MAX_MESSAGE_LEN {
        let mut truncated: String = scrubbed.chars().take(MAX_MESSAGE_LEN - 3).collect();
        truncated.push_str("...");
        return truncated;
    }

    scrubbed.to_string()
}
