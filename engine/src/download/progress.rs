use serde::{Deserialize, Serialize};

/// Stage the extractor reports with each progress tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressStatus {
    Downloading,
    Finished,
    Other(String),
}

impl From<&str> for ProgressStatus {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "downloading" => ProgressStatus::Downloading,
            "finished" => ProgressStatus::Finished,
            other => ProgressStatus::Other(other.to_string()),
        }
    }
}

/// Raw progress tick as the extractor reports it: human-readable strings,
/// not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressPayload {
    pub status: ProgressStatus,
    pub percent: Option<String>,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

impl ProgressPayload {
    pub fn downloading(percent: &str, speed: &str, eta: &str) -> Self {
        Self {
            status: ProgressStatus::Downloading,
            percent: Some(percent.into()),
            speed: Some(speed.into()),
            eta: Some(eta.into()),
        }
    }
}

/// Parsed progress forwarded to the observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// 0.0 ..= 100.0
    pub percent: f32,
    pub speed: String,
    pub eta: String,
}

impl ProgressUpdate {
    pub fn from_payload(p: &ProgressPayload) -> Self {
        Self {
            percent: p.percent.as_deref().map(parse_percent).unwrap_or(0.0),
            speed: p.speed.as_deref().map(clean_field).unwrap_or_default(),
            eta: p.eta.as_deref().map(clean_field).unwrap_or_default(),
        }
    }
}

/// `" 42.3%"` → 42.3. Anything unparseable is 0.0.
pub fn parse_percent(raw: &str) -> f32 {
    let cleaned = strip_ansi(raw);
    cleaned
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|p| p.is_finite())
        .map(|p| p.clamp(0.0, 100.0))
        .unwrap_or(0.0)
}

fn clean_field(raw: &str) -> String {
    let s = strip_ansi(raw).trim().to_string();
    // yt-dlp prints NA for fields it doesn't know yet
    if s.eq_ignore_ascii_case("na") || s.eq_ignore_ascii_case("n/a") {
        String::new()
    } else {
        s
    }
}

/// Drop CSI colour sequences (`ESC [ ... letter`) the extractor may embed.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            if chars.peek() == Some(&'[') {
                chars.next();
                for n in chars.by_ref() {
                    if n.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
