// src/aur/pkgbuild.rs

//! PKGBUILD dependency extraction
//!
//! A PKGBUILD is a Bash script; its `depends` and `makedepends` arrays are
//! what dependency resolution needs. [`ScriptExtractor`] hands the script to
//! an external helper, [`InlineExtractor`] reads the arrays directly.
//!
//! ```bash
//! depends=('glibc' 'libx11>=1.8')
//! makedepends=(cmake
//!              ninja)  # build only
//! ```

use crate::error::{Error, Result};
use regex::Regex;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use tracing::debug;

/// Runtime and build-time dependency strings of one PKGBUILD
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildDependencies {
    pub depends: Vec<String>,
    pub makedepends: Vec<String>,
}

/// Turns PKGBUILD content into dependency lists
pub trait DependencyExtractor: Send + Sync {
    fn extract(&self, pkgbuild: &str) -> Result<BuildDependencies>;
}

/// Runs an external helper that reads the PKGBUILD on stdin and prints
/// `depends` on its first output line and `makedepends` on its second,
/// whitespace separated
#[derive(Debug, Clone)]
pub struct ScriptExtractor {
    program: PathBuf,
}

impl ScriptExtractor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DependencyExtractor for ScriptExtractor {
    fn extract(&self, pkgbuild: &str) -> Result<BuildDependencies> {
        debug!("Extracting dependencies with {}", self.program.display());
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(pkgbuild.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(Error::ParseError(format!(
                "{} exited with {:?}: {}",
                self.program.display(),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines();
        let mut next_list = || -> Vec<String> {
            lines
                .next()
                .map(|l| l.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default()
        };

        Ok(BuildDependencies {
            depends: next_list(),
            makedepends: next_list(),
        })
    }
}

static QUOTED_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]*)"|'([^']*)'|([^\s"']+)"#)
        .unwrap_or_else(|e| panic!("invalid PKGBUILD value pattern: {e}"))
});

/// Reads `depends=(...)` and `makedepends=(...)` straight from the script
///
/// Only literal arrays are understood; values built from variable expansion
/// come through unexpanded.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExtractor;

impl DependencyExtractor for InlineExtractor {
    fn extract(&self, pkgbuild: &str) -> Result<BuildDependencies> {
        let content = strip_comments(pkgbuild);
        Ok(BuildDependencies {
            depends: extract_array(&content, "depends")?,
            makedepends: extract_array(&content, "makedepends")?,
        })
    }
}

/// Drop `#` comments that start a line or follow whitespace
fn strip_comments(content: &str) -> String {
    content
        .lines()
        .map(|line| {
            let mut prev_space = true;
            for (i, c) in line.char_indices() {
                if c == '#' && prev_space {
                    return &line[..i];
                }
                prev_space = c.is_whitespace() || c == '(';
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Values of a top-level `name=(...)` array, possibly spanning lines
fn extract_array(content: &str, name: &str) -> Result<Vec<String>> {
    let pattern = format!(r"(?ms)^\s*{}=\((.*?)\)", regex::escape(name));
    let re = Regex::new(&pattern).map_err(|e| Error::ParseError(e.to_string()))?;

    let Some(caps) = re.captures(content) else {
        return Ok(Vec::new());
    };
    let body = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

    Ok(QUOTED_VALUE
        .captures_iter(body)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
        .map(|m| m.as_str().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const PKGBUILD: &str = r#"# Maintainer: someone <someone@example.org>
pkgname=foo
pkgver=1.2.3
pkgrel=1
depends=('glibc' "libx11>=1.8"
         zlib)  # compression
makedepends=(cmake 'ninja')
optdepends=('python: scripting')
checkdepends=('bats')

build() {
    cmake -B build -G Ninja
}
"#;

    #[test]
    fn test_inline_extractor() {
        let deps = InlineExtractor.extract(PKGBUILD).unwrap();
        assert_eq!(deps.depends, vec!["glibc", "libx11>=1.8", "zlib"]);
        assert_eq!(deps.makedepends, vec!["cmake", "ninja"]);
    }

    #[test]
    fn test_inline_extractor_missing_arrays() {
        let deps = InlineExtractor.extract("pkgname=bar\npkgver=1\n").unwrap();
        assert_eq!(deps, BuildDependencies::default());
    }

    #[test]
    fn test_makedepends_not_mistaken_for_depends() {
        let deps = InlineExtractor
            .extract("makedepends=('go')\ndepends=('git')\n")
            .unwrap();
        assert_eq!(deps.depends, vec!["git"]);
        assert_eq!(deps.makedepends, vec!["go"]);
    }

    #[test]
    fn test_script_extractor() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("extract.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\necho 'glibc zlib'\necho 'cmake'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let deps = ScriptExtractor::new(&script).extract(PKGBUILD).unwrap();
        assert_eq!(deps.depends, vec!["glibc", "zlib"]);
        assert_eq!(deps.makedepends, vec!["cmake"]);
    }

    #[test]
    fn test_script_extractor_failure() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("fail.sh");
        std::fs::write(&script, "#!/bin/sh\ncat > /dev/null\necho boom >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let err = ScriptExtractor::new(&script).extract(PKGBUILD).unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));
    }
}
