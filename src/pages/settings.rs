use anyhow::bail;
use serde_json::Value;
use ytdl_desk_lib::settings::{DARK_MODE, DOWNLOAD_PATH};
use ytdl_desk_lib::PreferenceStore;

use crate::app::SettingsCommand;

pub fn run(prefs: &mut PreferenceStore, cmd: SettingsCommand) -> anyhow::Result<()> {
    match cmd {
        SettingsCommand::Show => {
            println!("# {}", prefs.path().display());
            println!("{}", serde_json::to_string_pretty(prefs.values())?);
        }
        SettingsCommand::Get { key } => match prefs.get_value(&key) {
            Some(v) => println!("{v}"),
            None => bail!("no setting named '{key}'"),
        },
        SettingsCommand::Set { key, value } => {
            let v = parse_value(&key, &value)?;
            prefs.set(key, v);
            prefs.save();
            println!("Settings saved.");
        }
    }
    Ok(())
}

/// Known keys are type-checked; anything else is taken as JSON if it parses,
/// else as a plain string.
fn parse_value(key: &str, raw: &str) -> anyhow::Result<Value> {
    match key {
        DARK_MODE => match raw.trim().to_lowercase().as_str() {
            "true" | "on" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "off" | "no" | "0" => Ok(Value::Bool(false)),
            other => bail!("{DARK_MODE} expects true/false, got '{other}'"),
        },
        DOWNLOAD_PATH => Ok(Value::String(raw.trim().to_string())),
        _ => Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))),
    }
}
