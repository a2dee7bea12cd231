use std::path::{Path, PathBuf};
use std::process::Command;

pub fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

/// Per-user application directory:
///   ~/Library/Application Support/ytdl-desk (macOS)
///   ~/.config/ytdl-desk (Linux)
///   %APPDATA%\ytdl-desk (Windows)
pub fn app_support_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(home);
    base.join("ytdl-desk")
}

/// Cross-platform Downloads folder (dirs::download_dir handles win/mac/linux)
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(home)
}

/// Hand a file to the desktop's default application. Fire-and-forget: the
/// spawned opener is not waited on.
pub fn open_with_default_app(path: &Path) -> std::io::Result<()> {
    #[cfg(target_os = "windows")]
    {
        // Use PowerShell to avoid `start` quoting quirks
        Command::new("powershell")
            .args(["-NoProfile", "-Command", "Start-Process"])
            .arg(path)
            .spawn()?;
    }
    #[cfg(target_os = "macos")]
    {
        Command::new("open").arg(path).spawn()?;
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        Command::new("xdg-open").arg(path).spawn()?;
    }
    Ok(())
}
