use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const CODE_DOWNLOADING: i32 = 0;
const CODE_STALLED: i32 = -1;
const CODE_FAILED: i32 = -3;
const STATUS_PREFIX: &str = "Attachment:";

/// Discrete download state of an attachment that has no local file yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DownloadProgress {
    Downloading,
    Stalled,
    Failed,
}

impl DownloadProgress {
    /// Map a raw code reported by the transport.
    ///
    /// Codes outside the known set are treated as an ongoing download.
    pub fn from_code(code: i32) -> Self {
        match code {
            CODE_STALLED => Self::Stalled,
            CODE_FAILED => Self::Failed,
            _ => Self::Downloading,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Downloading => CODE_DOWNLOADING,
            Self::Stalled => CODE_STALLED,
            Self::Failed => CODE_FAILED,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Downloading => "downloading...",
            Self::Stalled => "stalled",
            Self::Failed => "download failed",
        }
    }
}

/// File attached to a message, tracked through its download lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    /// Local file, set once the download completed.
    pub file: Option<PathBuf>,
    /// Raw progress code as last reported; kept verbatim so unknown codes survive.
    pub progress_code: i32,
    pub mime: Option<String>,
    /// Local thumbnail, when one has been decoded.
    pub preview: Option<PathBuf>,
}

impl Attachment {
    /// Attachment announced by the sender, nothing downloaded yet.
    pub fn pending(mime: Option<String>) -> Self {
        Self {
            file: None,
            progress_code: CODE_DOWNLOADING,
            mime,
            preview: None,
        }
    }

    /// Attachment already present on disk (for example one we sent).
    pub fn local(path: impl Into<PathBuf>, mime: Option<String>) -> Self {
        Self {
            file: Some(path.into()),
            progress_code: CODE_DOWNLOADING,
            mime,
            preview: None,
        }
    }

    pub fn record_progress(&mut self, code: i32) {
        self.progress_code = code;
    }

    pub fn resolve(&mut self, path: impl Into<PathBuf>) {
        self.file = Some(path.into());
    }

    pub fn set_preview(&mut self, path: impl Into<PathBuf>) {
        self.preview = Some(path.into());
    }

    pub fn is_resolved(&self) -> bool {
        self.file
            .as_deref()
            .is_some_and(|path| !path.as_os_str().is_empty())
    }

    /// Current progress; `None` once the file is resolved.
    pub fn progress(&self) -> Option<DownloadProgress> {
        if self.is_resolved() {
            None
        } else {
            Some(DownloadProgress::from_code(self.progress_code))
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime
            .as_deref()
            .is_some_and(|mime| mime.starts_with("image/"))
    }
}

/// Clickable link to a downloaded attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentLink {
    /// File name, or empty when a thumbnail already stands for the file.
    pub label: String,
    pub path: PathBuf,
}

/// Display facts of an attachment sub-panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentView {
    pub thumbnail: Option<PathBuf>,
    pub link: Option<AttachmentLink>,
    /// Progress text, only while no local file exists.
    pub status_text: Option<String>,
}

impl AttachmentView {
    pub fn project(attachment: &Attachment) -> Self {
        let thumbnail = attachment
            .preview
            .clone()
            .filter(|path| !path.as_os_str().is_empty());

        let file = attachment
            .file
            .as_deref()
            .filter(|_| attachment.is_resolved());
        match file {
            Some(path) => {
                let label = if thumbnail.is_some() {
                    String::new()
                } else {
                    file_name(path)
                };
                Self {
                    thumbnail,
                    link: Some(AttachmentLink {
                        label,
                        path: path.to_path_buf(),
                    }),
                    status_text: None,
                }
            }
            None => {
                let progress = DownloadProgress::from_code(attachment.progress_code);
                Self {
                    thumbnail,
                    link: None,
                    status_text: Some(format!("{STATUS_PREFIX} {}", progress.label())),
                }
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
