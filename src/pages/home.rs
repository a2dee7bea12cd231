use std::io::{BufRead, IsTerminal};
use std::sync::Arc;

use anyhow::bail;
use tokio::sync::mpsc;
use ytdl_desk_lib::{channel_emitter, DownloadRequest, TaskController, TaskEvent};

use crate::app::{Context, DownloadArgs};

/// Start one download and drive it until it completes, fails or is cancelled.
/// A completed download is recorded in the history ledger.
pub async fn download(ctx: &Context, args: DownloadArgs) -> anyhow::Result<()> {
    let url = args.url.trim();
    if url.is_empty() {
        bail!("Please enter a video URL.");
    }

    let dir = match args.dir {
        Some(d) => d,
        None => ctx.prefs.resolved_download_dir(),
    };
    std::fs::create_dir_all(&dir)?;

    let request = DownloadRequest::from_preset(url, &dir, args.format.into());
    let (emitter, mut events) = channel_emitter();
    let controller = TaskController::new(Arc::new(ctx.extractor.clone()), emitter);
    controller.start(request)?;

    let mut controls = if std::io::stdin().is_terminal() {
        eprintln!("controls: p = pause, r = resume, c = cancel (then Enter)");
        Some(spawn_stdin_reader())
    } else {
        None
    };

    loop {
        tokio::select! {
            ev = events.recv() => {
                let Some(ev) = ev else {
                    bail!("download task ended without a result");
                };
                if args.json {
                    println!("{}", serde_json::to_string(&ev)?);
                }
                match ev {
                    TaskEvent::Progress(p) => {
                        if !args.json {
                            println!("Progress: {:.2}% Speed: {} ETA: {}", p.percent, p.speed, p.eta);
                        }
                    }
                    TaskEvent::Completed { title, filepath, url } => {
                        let id = ctx.db.add_entry(&title, &filepath, &url)?;
                        if !args.json {
                            println!("Download finished: {title}");
                            println!("Saved to {filepath} (history #{id})");
                        }
                        return Ok(());
                    }
                    TaskEvent::Failed { error } => {
                        return Err(error.into());
                    }
                }
            }
            line = recv_control(&mut controls) => {
                match line {
                    Some(l) => apply_control(&controller, l.trim()),
                    None => controls = None,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if controller.cancel() {
                    eprintln!("cancelling...");
                }
            }
        }
    }
}

fn apply_control(controller: &TaskController, cmd: &str) {
    let (done, what) = match cmd {
        "p" | "pause" => (controller.pause(), "paused"),
        "r" | "resume" => (controller.resume(), "resumed"),
        "c" | "cancel" => (controller.cancel(), "cancelling..."),
        "" => return,
        other => {
            eprintln!("unknown control '{other}' (p / r / c)");
            return;
        }
    };
    if done {
        eprintln!("{what}");
    } else {
        eprintln!("nothing to do ({:?})", controller.state());
    }
}

/// Pending forever once stdin is closed or not interactive, so select! just
/// stops polling it.
async fn recv_control(rx: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Blocking line reader on a plain thread; the process may exit while it's
/// still waiting for input.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
