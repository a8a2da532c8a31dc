use abc_piano::{
    AbcRenderer, ActivePitchSet, Args, AudioResource, ControllerEvent, PRESETS, PianoApp, PlayOutcome, Renderer,
    key_for_midi, key_states, load_score_text, render_keyboard, render_progress,
};
use anyhow::Result;
use clap::Parser;
use log::{debug, info, warn};
use std::io;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_presets {
        for preset in PRESETS {
            println!("{}", preset.name);
        }
        return Ok(());
    }

    let text = load_score_text(&args)?;

    if args.dry_run {
        let score = AbcRenderer.render(&text)?;
        info!(
            "Rendered '{}' with {} events over {:.3}ms..!",
            score.title.clone().unwrap_or_else(|| "<untitled>".into()),
            score.events.len(),
            score.total_ms
        );
        println!("{}", serde_json::to_string_pretty(&score)?);
        return Ok(());
    }

    let audio = match args.record.as_ref() {
        Some(path) => AudioResource::recording(path.clone()),
        None => AudioResource::logging(),
    };

    let mut app = PianoApp::new(AbcRenderer, audio, args.session_options());
    app.edit(text);

    let verbose = args.verbose;
    let mut progress = render_progress(0.0, 0.0);
    app.set_observer(move |event| match event {
        ControllerEvent::Progress { elapsed_ms, total_ms } => {
            progress = render_progress(*elapsed_ms, *total_ms);
        }
        ControllerEvent::HighlightsChanged(pitches) => {
            let active: ActivePitchSet = pitches.iter().copied().collect();
            println!("{} {}", render_keyboard(&key_states(&active)), progress);
            if verbose {
                let names: Vec<&str> = pitches
                    .iter()
                    .map(|&midi| key_for_midi(midi).map_or("off the keyboard", |key| key.name))
                    .collect();
                println!("    sounding {:?} {:?}", pitches, names);
            }
        }
        ControllerEvent::StateChanged(state) => debug!("Playback state: {:?}", state),
    });

    let handle = app.handle();
    ctrlc::set_handler(move || {
        warn!("Ctrl-C received, stopping playback..!");
        handle.request_stop();
    })
    .expect("Error setting Ctrl-C handler..!");

    let commands = app.handle();
    thread::spawn(move || {
        for line in io::stdin().lines().map_while(|line| line.ok()) {
            match line.trim() {
                "r" | "restart" => commands.request_restart(),
                "s" | "stop" => commands.request_stop(),
                "" => {}
                other => warn!("Unknown command '{}', try 'r' to restart or 's' to stop..!", other),
            }
        }
    });
    info!("Type 'r' then Enter to restart, 's' then Enter to stop..!");

    if let PlayOutcome::Ignored = app.press_play()? {
        warn!("The score is empty, nothing to play..!");
        return Ok(());
    }

    while app.is_playing() {
        app.wait(Duration::from_millis(100));
    }

    info!("Playback finished, exiting..!");
    Ok(())
}
