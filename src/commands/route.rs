use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use sr_capture::{Capture, DryRunInput, GameWindow, ReplayCapture};
use sr_data::{AtlasStore, Route};

use super::load_atlas;
use crate::config::Settings;
use crate::pipeline::{DeviceSet, Pipeline, PipelineStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hotkey {
    Pause,
    Resume,
    Quit,
}

fn parse_hotkey(line: &str) -> Option<Hotkey> {
    match line.trim() {
        "p" | "pause" => Some(Hotkey::Pause),
        "r" | "resume" => Some(Hotkey::Resume),
        "q" | "quit" | "stop" => Some(Hotkey::Quit),
        _ => None,
    }
}

/// Check a route against the atlas without running it.
pub fn check_route(settings: &Settings, route_path: &Path) -> Result<()> {
    let atlas = load_atlas(settings)?;
    let route = Route::load(route_path)?;
    route
        .validate(&atlas)
        .with_context(|| format!("Route {} is invalid", route.name))?;
    println!(
        "Route {} is valid: {} op(s), regions {:?}",
        route.name,
        route.ops.len(),
        route.region_ids(&atlas)
    );
    Ok(())
}

/// Run a route file. Frames come from the game window, or from a directory
/// of recorded frames with `replay`. Input goes to the dry-run driver.
pub async fn run_route(settings: Settings, route_path: &Path, replay: Option<&Path>) -> Result<()> {
    let atlas: Arc<dyn AtlasStore> = Arc::new(load_atlas(&settings)?);
    let route = Route::load(route_path)?;
    info!("Loaded route {} ({} ops)", route.name, route.ops.len());

    let capture: Box<dyn Capture + Send> = match replay {
        Some(dir) => Box::new(ReplayCapture::from_dir(dir)?),
        None => Box::new(GameWindow::new(&settings.window_titles)),
    };
    let devices = DeviceSet {
        capture,
        input: Box::new(DryRunInput::new()),
    };

    let pipeline = Pipeline::start_route(settings, atlas, route, devices);
    let mut status = pipeline.subscribe();

    let (key_tx, mut key_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if let Some(key) = parse_hotkey(&line) {
                if key_tx.send(key).is_err() {
                    break;
                }
            }
        }
    });
    println!("Commands: p = pause, r = resume, q = stop");

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                println!("{}", serde_json::to_string(&current)?);
                if matches!(current, PipelineStatus::Finished { .. } | PipelineStatus::Failed { .. }) {
                    break;
                }
            }
            Some(key) = key_rx.recv() => match key {
                Hotkey::Pause => pipeline.pause(),
                Hotkey::Resume => pipeline.resume(),
                Hotkey::Quit => pipeline.stop(),
            },
            _ = tick.tick() => {
                if pipeline.is_finished() {
                    break;
                }
            }
        }
    }

    let reports = pipeline.join().await?;
    for (i, report) in reports.iter().enumerate() {
        if report.success {
            println!("Attempt {}: done ({} moves, {} battles)", i + 1, report.moves.len(), report.battles);
        } else {
            warn!("Attempt {} failed: {}", i + 1, report.failure.as_deref().unwrap_or("unknown"));
        }
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hotkey() {
        assert_eq!(parse_hotkey("p"), Some(Hotkey::Pause));
        assert_eq!(parse_hotkey(" resume \n"), Some(Hotkey::Resume));
        assert_eq!(parse_hotkey("q"), Some(Hotkey::Quit));
        assert_eq!(parse_hotkey("x"), None);
    }
}
