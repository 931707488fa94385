//! Just enough Java source inspection to compile and launch a single file

use lazy_regex::{Lazy, Regex, lazy_regex};

static RE_COMMENT: Lazy<Regex> = lazy_regex!(r"(?s)/\*.*?\*/|//[^\n]*");
static RE_PACKAGE: Lazy<Regex> = lazy_regex!(r"(?m)^\s*package\s+([A-Za-z_$][\w$]*(?:\s*\.\s*[A-Za-z_$][\w$]*)*)\s*;");
static RE_PUBLIC_TYPE: Lazy<Regex> = lazy_regex!(
    r"(?m)^\s*public\s+(?:(?:final|abstract|strictfp|sealed|non-sealed)\s+)*(?:class|interface|enum|record)\s+([A-Za-z_$][\w$]*)"
);
static RE_ANY_CLASS: Lazy<Regex> = lazy_regex!(r"(?m)^\s*(?:(?:final|abstract)\s+)*class\s+([A-Za-z_$][\w$]*)");

pub const DEFAULT_CLASS: &str = "Main";

/// Names derived from a single-file Java submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavaUnit {
    /// Top-level class the file must be named after
    pub class_name: String,
    pub package: Option<String>,
}

impl JavaUnit {
    /// javac insists a public top-level type lives in `<Name>.java`. Without
    /// one, the first top-level class is launched, then `Main`.
    pub fn analyze(source: &str) -> Self {
        let stripped = RE_COMMENT.replace_all(source, " ");

        let package = RE_PACKAGE
            .captures(&stripped)
            .map(|c| c[1].split_whitespace().collect::<String>());

        let class_name = RE_PUBLIC_TYPE
            .captures(&stripped)
            .or_else(|| RE_ANY_CLASS.captures(&stripped))
            .map(|c| c[1].to_owned())
            .unwrap_or_else(|| DEFAULT_CLASS.to_owned());

        Self {
            class_name,
            package,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.java", self.class_name)
    }

    /// Fully qualified name handed to `java`
    pub fn main_class(&self) -> String {
        match &self.package {
            Some(package) => format!("{package}.{}", self.class_name),
            None => self.class_name.clone(),
        }
    }
}
