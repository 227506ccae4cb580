use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use renderer::{ShaderEntry, ShaderOrigin};
use tracing::{debug, warn};

const SHADER_EXTENSION: &str = "txt";

/// Shader files found in one directory, sorted by file name.
///
/// Never empty: a missing or empty directory yields the built-in fallback as
/// the only entry.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    entries: Vec<ShaderEntry>,
}

impl Catalog {
    pub fn scan(root: &Path) -> Self {
        let mut entries = match fs::read_dir(root) {
            Ok(dir) => dir
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| {
                    let keep = path.is_file() && has_shader_extension(path);
                    if !keep {
                        debug!(path = %path.display(), "skipping non-shader file");
                    }
                    keep
                })
                .map(ShaderEntry::file)
                .collect::<Vec<_>>(),
            Err(err) => {
                warn!(dir = %root.display(), error = %err, "failed to read shader directory");
                Vec::new()
            }
        };
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        if entries.is_empty() {
            warn!(dir = %root.display(), "no .txt shader files found; using the fallback shader");
            entries.push(ShaderEntry::builtin());
        } else {
            debug!(dir = %root.display(), count = entries.len(), "scanned shader catalog");
        }

        Self {
            root: root.to_path_buf(),
            entries,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[ShaderEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ShaderEntry> {
        self.entries
    }

    /// Index of the entry named by `query`.
    ///
    /// Matches the file name, then the file stem (both case-insensitive). A
    /// query naming an existing file outside the catalog is appended to it.
    pub fn locate(&mut self, query: &str) -> Result<usize> {
        let matches = |entry: &ShaderEntry, key: &str| match &entry.origin {
            ShaderOrigin::File(path) => path
                .file_stem()
                .is_some_and(|stem| stem.to_string_lossy().eq_ignore_ascii_case(key))
                || entry.name.eq_ignore_ascii_case(key),
            ShaderOrigin::Builtin => entry.name.eq_ignore_ascii_case(key),
        };
        if let Some(index) = self.entries.iter().position(|entry| matches(entry, query)) {
            return Ok(index);
        }

        let path = PathBuf::from(query);
        if path.is_file() {
            let canonical = path.canonicalize().ok();
            let existing = self.entries.iter().position(|entry| match &entry.origin {
                ShaderOrigin::File(known) => {
                    canonical.is_some() && known.canonicalize().ok() == canonical
                }
                ShaderOrigin::Builtin => false,
            });
            if let Some(index) = existing {
                return Ok(index);
            }
            self.entries.retain(|entry| entry.origin != ShaderOrigin::Builtin);
            self.entries.push(ShaderEntry::file(path));
            return Ok(self.entries.len() - 1);
        }

        bail!(
            "shader '{query}' is neither in {} nor an existing file",
            self.root.display()
        )
    }
}

fn has_shader_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(SHADER_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(catalog: &Catalog) -> Vec<&str> {
        catalog
            .entries()
            .iter()
            .map(|entry| entry.name.as_str())
            .collect()
    }

    #[test]
    fn scans_txt_files_case_insensitively_in_name_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("zebra.txt"), "void main() {}").unwrap();
        fs::write(dir.path().join("Aurora.TXT"), "void main() {}").unwrap();
        fs::write(dir.path().join("notes.md"), "not a shader").unwrap();
        fs::create_dir(dir.path().join("nested.txt")).unwrap();

        let catalog = Catalog::scan(dir.path());
        assert_eq!(names(&catalog), vec!["Aurora.TXT", "zebra.txt"]);
    }

    #[test]
    fn missing_or_empty_directory_yields_fallback_only() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::scan(dir.path());
        assert_eq!(catalog.entries(), &[ShaderEntry::builtin()]);

        let catalog = Catalog::scan(&dir.path().join("absent"));
        assert_eq!(catalog.entries(), &[ShaderEntry::builtin()]);
    }

    #[test]
    fn locates_by_name_stem_or_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("plasma.txt"), "void main() {}").unwrap();
        fs::write(dir.path().join("tunnel.txt"), "void main() {}").unwrap();
        let outside = TempDir::new().unwrap();
        let extra = outside.path().join("extra.frag");
        fs::write(&extra, "void main() {}").unwrap();

        let mut catalog = Catalog::scan(dir.path());
        assert_eq!(catalog.locate("tunnel.txt").unwrap(), 1);
        assert_eq!(catalog.locate("PLASMA").unwrap(), 0);
        let inside = dir.path().join("tunnel.txt");
        assert_eq!(catalog.locate(inside.to_str().unwrap()).unwrap(), 1);

        assert_eq!(catalog.locate(extra.to_str().unwrap()).unwrap(), 2);
        assert_eq!(catalog.entries()[2].name, "extra.frag");
        assert!(catalog.locate("missing").is_err());
    }

    #[test]
    fn explicit_file_replaces_the_fallback_entry() {
        let dir = TempDir::new().unwrap();
        let shader = dir.path().join("only.glsl");
        fs::write(&shader, "void main() {}").unwrap();

        let mut catalog = Catalog::scan(&dir.path().join("absent"));
        assert_eq!(catalog.locate(shader.to_str().unwrap()).unwrap(), 0);
        assert_eq!(names(&catalog), vec!["only.glsl"]);
    }
}
