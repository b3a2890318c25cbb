//! GET-directive preprocessor.
//!
//! A source line beginning `GET "file"` is replaced by the referenced file's
//! content before tokenization. Each file is included at most once per
//! expansion, so cyclic GET graphs short-circuit instead of recursing.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::CompileError;

pub struct Preprocessor;

impl Preprocessor {
    /// Expand `main_file` and every file it GETs into one source string.
    pub fn process(main_file: &Path) -> Result<String, CompileError> {
        let mut included = HashSet::new();
        Self::process_internal(main_file, &mut included)
    }

    /// Expand GET directives inside an in-memory source, resolving includes
    /// relative to `base_dir`.
    pub fn process_source(source: &str, base_dir: &Path) -> Result<String, CompileError> {
        let mut included = HashSet::new();
        Self::expand(source, base_dir, &mut included)
    }

    fn process_internal(
        path: &Path,
        included: &mut HashSet<PathBuf>,
    ) -> Result<String, CompileError> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !included.insert(canonical) {
            tracing::debug!(file = %path.display(), "GET cycle short-circuited");
            return Ok(String::new());
        }

        let source = fs::read_to_string(path).map_err(|e| {
            CompileError::Io(format!("could not read source file '{}': {}", path.display(), e))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::expand(&source, base_dir, included)
    }

    fn expand(
        source: &str,
        base_dir: &Path,
        included: &mut HashSet<PathBuf>,
    ) -> Result<String, CompileError> {
        let mut output = String::with_capacity(source.len());
        for line in source.lines() {
            if let Some(file_name) = get_directive_target(line) {
                let include_path = base_dir.join(file_name);
                output.push_str(&Self::process_internal(&include_path, included)?);
            } else {
                output.push_str(line);
                output.push('\n');
            }
        }
        Ok(output)
    }
}

/// The quoted file name of a `GET "file"` line, if the line is one.
fn get_directive_target(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("GET")?;
    let start = rest.find('"')?;
    let end = rest.rfind('"')?;
    if start == end {
        return None;
    }
    Some(&rest[start + 1..end])
}
