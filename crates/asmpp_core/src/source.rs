use std::path::{Path, PathBuf};

pub type BytePos = usize;
pub type Span = std::ops::Range<BytePos>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

#[derive(Clone, Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
}

impl SourceFile {
    pub fn display_name(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Clone, Debug, Default)]
pub struct SourceManager {
    files: Vec<SourceFile>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a file from disk. Loading the same path twice reads it twice and
    /// yields two ids.
    pub fn load_path(&mut self, path: &Path) -> Result<FileId, std::io::Error> {
        let text = std::fs::read_to_string(path)?;
        Ok(self.insert_source(path.to_path_buf(), normalize_newlines(&text)))
    }

    pub fn add_virtual_file(
        &mut self,
        path: impl Into<PathBuf>,
        text: impl Into<String>,
    ) -> FileId {
        let path = path.into();
        let text = normalize_newlines(&text.into());
        self.insert_source(path, text)
    }

    pub fn file(&self, id: FileId) -> &SourceFile {
        &self.files[id.0 as usize]
    }

    pub fn files_iter(&self) -> impl Iterator<Item = (FileId, &SourceFile)> {
        self.files
            .iter()
            .enumerate()
            .map(|(idx, file)| (FileId(idx as u32), file))
    }

    fn insert_source(&mut self, path: PathBuf, text: String) -> FileId {
        let id = FileId(self.files.len() as u32);
        self.files.push(SourceFile { path, text });
        id
    }
}

fn normalize_newlines(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}
