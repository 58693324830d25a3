use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use soundviz_core::{
    audio::encode_wav,
    trainer::{build_practice_groups, Envelope, PolySynth, RecordingSink},
    AppConfig, AudioSourceAdapter, BeatDetector, FrameInput, FrameLoop, Hand, MidiSink,
    PracticeMode, Score, TrainerEvent, TrainerSession, VisualiserHost, VisualiserKind,
};
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        tracing::error!(%err, "soundviz failed");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> soundviz_core::Result<()> {
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Beats { input, fps } => run_beats(&config, &input, fps),
        Commands::Visualise {
            input,
            mode,
            fps,
            frames,
            output,
        } => run_visualise(&config, &input, mode, fps, frames, output.as_ref()),
        Commands::Live { mode, seconds } => run_live(&config, mode, seconds),
        Commands::Score { input } => run_score(&config, &input),
        Commands::Play {
            input,
            practice,
            speed,
            hand,
            step_ms,
            port,
            render,
        } => run_play(
            &config,
            &input,
            PlayOptions {
                practice,
                speed,
                hand,
                step_ms,
                port: port.as_deref(),
                render: render.as_ref(),
            },
        ),
    }
}

fn frame_interval(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(fps.clamp(1, 240)))
}

fn print_json(value: &impl serde::Serialize) -> soundviz_core::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Plays a WAV file through the analyser and prints every beat.
fn run_beats(config: &AppConfig, input: &PathBuf, fps: u32) -> soundviz_core::Result<()> {
    tracing::info!(?input, fps, "detecting beats");

    let mut audio = AudioSourceAdapter::new(config.audio.clone());
    audio.connect_uploaded_file(input)?;
    let mut detector = BeatDetector::new(&config.beat);
    detector.start();

    let interval = frame_interval(fps);
    let mut frames = FrameLoop::new();
    frames.start();
    let mut count = 0usize;
    while let Some(now) = frames.tick(interval) {
        audio.advance(interval);
        for event in detector.analyze(&mut audio, now) {
            print_json(&event)?;
            count += 1;
        }
        if audio.playback_status().map_or(true, |status| status.finished) {
            frames.stop();
        }
    }

    tracing::info!(beats = count, frames = frames.frame(), "beat detection finished");
    audio.close();
    Ok(())
}

/// Renders a WAV file offline and writes the draw lists as JSON.
fn run_visualise(
    config: &AppConfig,
    input: &PathBuf,
    mode: VisualiserKind,
    fps: u32,
    max_frames: Option<u64>,
    output: Option<&PathBuf>,
) -> soundviz_core::Result<()> {
    tracing::info!(?input, visualiser = %mode, fps, "rendering offline");

    let mut audio = AudioSourceAdapter::new(config.audio.clone());
    audio.connect_uploaded_file(input)?;
    let mut detector = BeatDetector::new(&config.beat);
    detector.start();
    let mut host = VisualiserHost::new(&config.visualiser);
    host.switch_to(mode);

    let interval = frame_interval(fps);
    let mut frames = FrameLoop::new();
    frames.start();
    let mut lists = Vec::new();
    while let Some(now) = frames.tick(interval) {
        audio.advance(interval);
        for event in detector.analyze(&mut audio, now) {
            host.on_beat(&event, now);
        }
        let frequency = audio.frequency_data();
        let time_domain = audio.time_domain_data();
        lists.push(host.on_frame(
            &FrameInput::new(frequency.as_ref(), time_domain.as_ref()),
            now,
        ));

        let finished = audio.playback_status().map_or(true, |status| status.finished);
        if finished || max_frames.is_some_and(|max| frames.frame() >= max) {
            frames.stop();
        }
    }
    lists.push(host.stop());

    let commands: usize = lists.iter().map(|list| list.len()).sum();
    match output {
        Some(path) => {
            std::fs::write(path, serde_json::to_vec(&lists)?)?;
            tracing::info!(?path, frames = lists.len(), commands, "draw lists written");
        }
        None => print_json(&serde_json::json!({
            "visualiser": mode.as_str(),
            "frames": lists.len(),
            "commands": commands,
        }))?,
    }
    audio.close();
    Ok(())
}

/// Listens to the microphone and prints beats as they happen.
fn run_live(config: &AppConfig, mode: VisualiserKind, seconds: u64) -> soundviz_core::Result<()> {
    tracing::info!(visualiser = %mode, seconds, "starting live mode");

    let mut audio = AudioSourceAdapter::new(config.audio.clone());
    audio.connect_microphone()?;
    let mut detector = BeatDetector::new(&config.beat);
    detector.start();
    let mut host = VisualiserHost::new(&config.visualiser);
    host.switch_to(mode);

    let interval = frame_interval(60);
    let mut frames = FrameLoop::new();
    frames.start();
    while let Some(now) = frames.tick(interval) {
        std::thread::sleep(interval);
        audio.advance(interval);
        for event in detector.analyze(&mut audio, now) {
            host.on_beat(&event, now);
            print_json(&event)?;
        }
        let frequency = audio.frequency_data();
        let time_domain = audio.time_domain_data();
        host.on_frame(
            &FrameInput::new(frequency.as_ref(), time_domain.as_ref()),
            now,
        );
        if now >= Duration::from_secs(seconds) {
            frames.stop();
        }
    }

    tracing::info!(diagnostics = ?audio.check_audio_data(), "live mode finished");
    host.stop();
    audio.close();
    Ok(())
}

/// Prints a summary of a note file and its practice groups.
fn run_score(config: &AppConfig, input: &PathBuf) -> soundviz_core::Result<()> {
    let score = Score::load(input)?;
    let groups = build_practice_groups(&score, Hand::Both, config.trainer.chord_tolerance);
    let tracks: Vec<_> = score
        .tracks
        .iter()
        .map(|track| {
            serde_json::json!({
                "name": track.name,
                "channel": track.channel,
                "notes": track.notes.len(),
                "sustain_events": track.sustain_events().count(),
            })
        })
        .collect();
    print_json(&serde_json::json!({
        "name": score.name,
        "bpm": score.bpm,
        "duration": score.duration(),
        "notes": score.note_count(),
        "tracks": tracks,
        "practice_groups": groups,
    }))
}

struct PlayOptions<'a> {
    practice: bool,
    speed: f64,
    hand: Hand,
    step_ms: u64,
    port: Option<&'a str>,
    render: Option<&'a PathBuf>,
}

/// Runs the transport offline and prints trainer events and MIDI output.
/// With `--render` and no port the notes go to the local synth instead and
/// end up in a WAV file.
fn run_play(config: &AppConfig, input: &PathBuf, options: PlayOptions<'_>) -> soundviz_core::Result<()> {
    let PlayOptions {
        practice,
        speed,
        hand,
        step_ms,
        port,
        render,
    } = options;
    let score = Score::load(input)?;
    let recorder = RecordingSink::new("recorder");
    let sample_rate = config.audio.sample_rate;
    let synth = PolySynth::new(sample_rate);

    let mut session =
        TrainerSession::new(config.trainer.clone()).with_synth(Box::new(synth.clone()));
    session.set_output(open_output(port, render.is_some(), &recorder)?);
    session.load(score);
    session.set_mode(if practice {
        PracticeMode::Practice
    } else {
        PracticeMode::Listen
    });
    session.set_hand(hand);
    let bpm = session.set_speed(speed);
    tracing::info!(bpm, mode = ?session.mode(), %hand, "playing score");
    session.play()?;

    let step = step_ms.max(1) as f64 / 1000.0;
    let samples_per_step = (step * f64::from(sample_rate)).round() as usize;
    let mut rendered = Vec::new();
    // Generous upper bound so a zero-length score still terminates.
    let limit = (session.duration() / session.speed() + 1.0) / step;
    let mut ticks = 0.0;
    'playback: while ticks < limit {
        ticks += 1.0;
        for event in session.tick(step) {
            print_json(&event)?;
            if matches!(event, TrainerEvent::Finished { .. }) {
                break 'playback;
            }
        }
        for message in recorder.take() {
            print_json(&message)?;
        }
        if render.is_some() {
            rendered.extend(synth.render(samples_per_step));
        }
    }
    session.stop();
    if let Some(path) = render {
        let tail = Envelope::default().release * sample_rate as f32;
        rendered.extend(synth.render(tail.ceil() as usize));
        std::fs::write(path, encode_wav(&rendered, sample_rate)?)?;
        tracing::info!(?path, samples = rendered.len(), "synth output written");
    }
    for message in recorder.take() {
        tracing::debug!(?message, "panic message");
    }
    Ok(())
}

/// `None` leaves the session on its local synth.
#[cfg(feature = "midi")]
fn open_output(
    port: Option<&str>,
    local: bool,
    recorder: &RecordingSink,
) -> soundviz_core::Result<Option<Box<dyn MidiSink>>> {
    match port {
        Some(pattern) => Ok(Some(Box::new(
            soundviz_core::trainer::MidiOutputPort::connect(pattern)?,
        ))),
        None if local => Ok(None),
        None => Ok(Some(Box::new(recorder.clone()))),
    }
}

#[cfg(not(feature = "midi"))]
fn open_output(
    port: Option<&str>,
    local: bool,
    recorder: &RecordingSink,
) -> soundviz_core::Result<Option<Box<dyn MidiSink>>> {
    match port {
        Some(_) => Err(soundviz_core::SoundVizError::DeviceNotSupported(
            "built without the `midi` feature".into(),
        )),
        None if local => Ok(None),
        None => Ok(Some(Box::new(recorder.clone()))),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Beat-reactive visualiser and MIDI piano trainer", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply to anything it leaves out.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the beats detected in a WAV file as JSON lines.
    Beats {
        input: PathBuf,
        #[arg(long, default_value_t = 60)]
        fps: u32,
    },
    /// Render a WAV file offline into per-frame draw lists.
    Visualise {
        input: PathBuf,
        #[arg(short, long, default_value = "spectrum")]
        mode: VisualiserKind,
        #[arg(long, default_value_t = 60)]
        fps: u32,
        /// Stop after this many frames.
        #[arg(long)]
        frames: Option<u64>,
        /// Where to write the draw lists; prints a summary when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Visualise the microphone in real time.
    Live {
        #[arg(short, long, default_value = "spectrum")]
        mode: VisualiserKind,
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Summarise a MIDI or JSON note file.
    Score { input: PathBuf },
    /// Play a note file offline and print the emitted MIDI messages.
    Play {
        input: PathBuf,
        /// Score against practice tolerances and report accuracy at the end.
        #[arg(long)]
        practice: bool,
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
        #[arg(long, default_value = "both")]
        hand: Hand,
        /// Transport step in milliseconds.
        #[arg(long, default_value_t = 10)]
        step_ms: u64,
        /// Send to the first MIDI output whose name contains this text.
        #[arg(long)]
        port: Option<String>,
        /// Play through the built-in synth and write the audio to this WAV.
        #[arg(long)]
        render: Option<PathBuf>,
    },
}
