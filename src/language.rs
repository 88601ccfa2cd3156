use std::fmt;
use std::path::Path;

/// Languages the metrics scanner knows how to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Java,
    Python,
    Rust,
    Go,
    JavaScript,
    TypeScript,
    C,
    Cpp,
}

impl Language {
    /// Looks a language up by name, case-insensitively. Unknown names give `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "java" => Some(Language::Java),
            "python" => Some(Language::Python),
            "rust" => Some(Language::Rust),
            "go" => Some(Language::Go),
            "javascript" => Some(Language::JavaScript),
            "typescript" => Some(Language::TypeScript),
            "c" => Some(Language::C),
            "c++" | "cpp" => Some(Language::Cpp),
            _ => None,
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Java => &["java"],
            Language::Python => &["py"],
            Language::Rust => &["rs"],
            Language::Go => &["go"],
            Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Language::TypeScript => &["ts", "tsx"],
            Language::C => &["c", "h"],
            Language::Cpp => &["cc", "cpp", "cxx", "hpp", "hh"],
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions().contains(&ext))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Java => "Java",
            Language::Python => "Python",
            Language::Rust => "Rust",
            Language::Go => "Go",
            Language::JavaScript => "JavaScript",
            Language::TypeScript => "TypeScript",
            Language::C => "C",
            Language::Cpp => "C++",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
