use ytdl_desk_lib::library::{self, FileRemoval};

use crate::app::{Context, HistoryCommand};

pub fn run(ctx: &Context, cmd: HistoryCommand) -> anyhow::Result<()> {
    match cmd {
        HistoryCommand::List { json } => {
            let entries = ctx.db.list_entries()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }
            if entries.is_empty() {
                println!("No downloads yet.");
            }
            for e in entries {
                println!("#{:<4} {}  [{}]", e.id, e.title, e.date);
                println!("      {}", e.filepath);
            }
        }
        HistoryCommand::Open { id } => {
            let entry = library::open_entry(&ctx.db, id)?;
            println!("Opened {}", entry.filepath);
        }
        HistoryCommand::Delete { id, keep_file } => {
            let report = library::remove_entry(&ctx.db, id, !keep_file)?;
            println!("Deleted history entry: {}", report.entry.title);
            match report.file {
                FileRemoval::Removed => println!("Deleted file {}", report.entry.filepath),
                FileRemoval::Missing => println!("File was already gone: {}", report.entry.filepath),
                FileRemoval::Kept => {}
                FileRemoval::Failed(e) => eprintln!("Could not delete file:\n{e}"),
            }
        }
    }
    Ok(())
}
