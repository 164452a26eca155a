//! File directive classification.
//!
//! A source file may begin with exactly one of the string-literal expression
//! statements `"use public"` or `"use interactive"`; the absence of any
//! directive is a legal third state. The outer build uses this tri-state to
//! pick one of three transformation pipelines. The expander itself never
//! strips or adds directives; they round-trip untouched.

use std::path::Path;

use oxc_allocator::Allocator;
use oxc_parser::Parser;
use serde::{Deserialize, Serialize};

use crate::analysis::source_type_for;

pub const DIRECTIVE_PUBLIC: &str = "use public";
pub const DIRECTIVE_INTERACTIVE: &str = "use interactive";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileDirective {
    Public,
    Interactive,
    #[default]
    None,
}

impl std::fmt::Display for FileDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileDirective::Public => write!(f, "public"),
            FileDirective::Interactive => write!(f, "interactive"),
            FileDirective::None => write!(f, "none"),
        }
    }
}

/// Classify the file's opening directive. The scan covers the directive
/// prologue only: the first non-string-literal statement terminates it. A
/// source that does not parse classifies as `None` here; the parse error
/// itself surfaces at the expander boundary.
pub fn classify(source: &str, path: &Path) -> FileDirective {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type_for(path)).parse();
    if ret.panicked {
        return FileDirective::None;
    }
    for directive in &ret.program.directives {
        match directive.directive.as_str() {
            DIRECTIVE_PUBLIC => return FileDirective::Public,
            DIRECTIVE_INTERACTIVE => return FileDirective::Interactive,
            _ => {}
        }
    }
    FileDirective::None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_ts(source: &str) -> FileDirective {
        classify(source, Path::new("page.ts"))
    }

    #[test]
    fn test_recognizes_both_markers() {
        assert_eq!(
            classify_ts("\"use public\";\nconst a = 1;"),
            FileDirective::Public
        );
        assert_eq!(
            classify_ts("'use interactive';\nconst a = 1;"),
            FileDirective::Interactive
        );
    }

    #[test]
    fn test_absence_is_a_legal_state() {
        assert_eq!(classify_ts("const a = 1;"), FileDirective::None);
        assert_eq!(classify_ts(""), FileDirective::None);
    }

    #[test]
    fn test_marker_must_open_the_file() {
        // The first non-string-literal statement terminates the scan.
        assert_eq!(
            classify_ts("const a = 1;\n\"use public\";"),
            FileDirective::None
        );
    }

    #[test]
    fn test_unknown_directives_are_ignored() {
        assert_eq!(
            classify_ts("\"use strict\";\n\"use public\";\nconst a = 1;"),
            FileDirective::Public
        );
    }
}
