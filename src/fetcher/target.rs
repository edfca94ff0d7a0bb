use std::path::{Component, Path, PathBuf};

use url::Url;
use tempfile::{Builder, NamedTempFile};

use crate::utils::error::FetchError;

/// Local destination of one link: `<dir>/<last URL path segment>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    dir: PathBuf,
    file_name: String,
}

impl DownloadTarget {
    /// Derives the target for `href` inside `dir`.
    ///
    /// The last non-empty path segment is percent-decoded and used as the
    /// file name; query and fragment are ignored. Names that could leave
    /// `dir` are rejected rather than rewritten.
    pub fn resolve(dir: &Path, href: &str) -> Result<Self, FetchError> {
        let invalid = |reason| FetchError::InvalidTarget {
            url: href.to_string(),
            reason,
        };

        let url = Url::parse(href).map_err(|_| invalid("not an absolute URL"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("only http and https links are supported"));
        }

        let segment = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .ok_or_else(|| invalid("URL has no file name"))?;

        let file_name = urlencoding::decode(segment)
            .map_err(|_| invalid("file name is not valid UTF-8"))?
            .into_owned();

        if file_name.chars().any(|c| c.is_control() || c == '/' || c == '\\') {
            return Err(invalid("file name contains a path separator or control character"));
        }
        let mut components = Path::new(&file_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(invalid("file name is empty or a relative path")),
        }

        let target = Self {
            dir: dir.to_path_buf(),
            file_name,
        };
        if target.path().parent() != Some(dir) {
            return Err(invalid("file name escapes the download directory"));
        }
        Ok(target)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Final location of the file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    /// Creates a hidden temporary file in the target directory to stream
    /// into before the rename. It is deleted when dropped unless persisted.
    pub fn temp_file(&self) -> Result<NamedTempFile, FetchError> {
        let mut builder = Builder::new();
        builder.prefix(".").suffix(".part");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o644));
        }
        builder
            .tempfile_in(&self.dir)
            .map_err(|source| FetchError::Io {
                path: self.dir.clone(),
                source,
            })
    }
}
