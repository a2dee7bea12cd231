use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Post-processing applied by the extractor after the download finishes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PostProcess {
    #[default]
    None,
    /// Re-encode to mp3 and keep only the audio track.
    AudioExtract,
}

impl PostProcess {
    /// Container the post-processor produces, if it decides one.
    pub fn output_ext(self) -> Option<&'static str> {
        match self {
            PostProcess::None => None,
            PostProcess::AudioExtract => Some("mp3"),
        }
    }
}

/// Format choices offered to the user.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FormatPreset {
    /// Best video + best audio, merged.
    #[default]
    Best,
    /// Best audio, extracted to mp3.
    Audio,
    P720,
    P1080,
    /// Offered separately in the format list; same selector as `Best`.
    Mkv,
}

impl FormatPreset {
    pub fn selector(self) -> &'static str {
        match self {
            FormatPreset::Best | FormatPreset::Mkv => "bestvideo+bestaudio/best",
            FormatPreset::Audio => "bestaudio",
            FormatPreset::P720 => "bestvideo[height<=720]+bestaudio/best[height<=720]",
            FormatPreset::P1080 => "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
        }
    }

    pub fn post_process(self) -> PostProcess {
        match self {
            FormatPreset::Audio => PostProcess::AudioExtract,
            _ => PostProcess::None,
        }
    }
}

/// What to download and where. Immutable once handed to the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadRequest {
    url: String,
    destination: PathBuf,
    format: String,
    post_process: PostProcess,
}

impl DownloadRequest {
    pub fn new(
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
        format: impl Into<String>,
        post_process: PostProcess,
    ) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            format: format.into(),
            post_process,
        }
    }

    pub fn from_preset(url: impl Into<String>, destination: impl Into<PathBuf>, preset: FormatPreset) -> Self {
        Self::new(url, destination, preset.selector(), preset.post_process())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn post_process(&self) -> PostProcess {
        self.post_process
    }

    /// Naming template handed to the extractor: `<destination>/%(title)s.%(ext)s`.
    pub fn output_template(&self) -> String {
        self.destination
            .join("%(title)s.%(ext)s")
            .to_string_lossy()
            .to_string()
    }

    /// Where the finished file lands when the extractor can't tell us.
    pub fn conventional_path(&self, title: &str, ext: &str) -> PathBuf {
        let ext = self.post_process.output_ext().unwrap_or(ext);
        self.destination.join(format!("{title}.{ext}"))
    }
}
