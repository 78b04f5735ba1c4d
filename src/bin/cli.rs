//! nodetone CLI: play a session config live or render it to WAV.
//!
//! Usage:
//!   nt-cli play session.toml --notes "C4 E4 G4" --seconds 8
//!   nt-cli render session.toml --out take.wav --seconds 4

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use nt_ir::Note;
use nt_master::{FileSource, RenderMode, Session, SessionConfig, DEFAULT_OFFLINE_RATE};
use tokio::runtime::Handle;
use tracing::info;

#[derive(Parser)]
#[command(name = "nt-cli")]
#[command(about = "Beat-synchronous instrument playback for nodetone sessions")]
struct Cli {
    /// Log filter, e.g. "info" or "nt_master=debug"
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play through the default audio device
    Play {
        #[command(flatten)]
        pattern: Pattern,
    },
    /// Render offline to a WAV file
    Render {
        #[command(flatten)]
        pattern: Pattern,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[derive(Args)]
struct Pattern {
    /// Session config (TOML)
    config: PathBuf,

    /// Instrument to play; defaults to the first one configured
    #[arg(short, long)]
    instrument: Option<String>,

    /// Notes played one per beat, cycling
    #[arg(short, long, default_value = "C4 E4 G4 C5")]
    notes: String,

    #[arg(long, default_value_t = 0.8)]
    velocity: f32,

    /// Beats per minute, overriding the config
    #[arg(long)]
    bpm: Option<f64>,

    #[arg(short, long, default_value_t = 8.0)]
    seconds: f64,
}

impl Pattern {
    fn notes(&self) -> Result<Vec<Note>> {
        let notes = self
            .notes
            .split_whitespace()
            .map(|n| n.parse::<Note>().with_context(|| format!("bad note {n:?}")))
            .collect::<Result<Vec<_>>>()?;
        if notes.is_empty() {
            bail!("no notes to play");
        }
        Ok(notes)
    }
}

/// Plays one pattern note per beat on one instrument.
struct Player {
    instrument: String,
    notes: Vec<Note>,
    velocity: f32,
    beats: mpsc::Receiver<u64>,
    sounding: Option<Note>,
}

impl Player {
    fn attach(session: &mut Session, pattern: &Pattern) -> Result<Self> {
        let instrument = match &pattern.instrument {
            Some(id) => id.clone(),
            None => session.instrument_ids().next().context("config defines no instruments")?.to_string(),
        };
        if session.instrument(&instrument).is_none() {
            bail!("unknown instrument {instrument:?}");
        }
        let (tx, beats) = mpsc::channel();
        session.clock_mut().on_beat(move |beat, _time| {
            let _ = tx.send(beat);
        });
        if let Some(bpm) = pattern.bpm {
            session.set_bpm(bpm);
        }
        Ok(Self { instrument, notes: pattern.notes()?, velocity: pattern.velocity, beats, sounding: None })
    }

    fn on_tick(&mut self, session: &mut Session) {
        while let Ok(beat) = self.beats.try_recv() {
            if let Some(note) = self.sounding.take() {
                session.release_note(&self.instrument, note);
            }
            let note = self.notes[beat as usize % self.notes.len()];
            session.trigger_note(&self.instrument, note, self.velocity);
            self.sounding = Some(note);
        }
    }
}

fn open_session(path: &Path, mode: RenderMode) -> Result<Session> {
    let mut config = SessionConfig::load(path).with_context(|| format!("reading {}", path.display()))?;
    config.context.mode = mode;
    if mode == RenderMode::Offline && config.context.sample_rate.is_none() {
        config.context.sample_rate = Some(DEFAULT_OFFLINE_RATE);
    }
    let root = match &config.sample_root {
        Some(root) => root.clone(),
        None => path.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let mut session = Session::new(config, Arc::new(FileSource::new(root)), Handle::current());
    session.activate().context("opening audio context")?;
    Ok(session)
}

async fn play(pattern: Pattern) -> Result<()> {
    let mut session = open_session(&pattern.config, RenderMode::Realtime)?;
    let mut player = Player::attach(&mut session, &pattern)?;
    if let Some(latency) = session.latency() {
        info!("Output latency {}", latency);
    }

    session.start_transport();
    info!("Playing {} at {} BPM", player.instrument, session.clock().bpm());
    let shutdown = async {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(pattern.seconds.max(0.0))) => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }
    };
    session.run(shutdown, |s| player.on_tick(s)).await;

    session.stop_transport();
    session.all_notes_off();
    let stats = session.cache_stats();
    info!("Cache: {} samples, {} bytes, hit rate {:.0}%", stats.entries, stats.used_bytes, stats.hit_rate * 100.0);
    session.close();
    Ok(())
}

async fn render(pattern: Pattern, out: PathBuf) -> Result<()> {
    let mut session = open_session(&pattern.config, RenderMode::Offline)?;
    let mut player = Player::attach(&mut session, &pattern)?;
    let sample_rate = session.context().map_or(DEFAULT_OFFLINE_RATE, |c| c.sample_rate());
    let total = (pattern.seconds.max(0.0) * sample_rate as f64).round() as usize;
    info!("Rendering {} frames at {} Hz to {}", total, sample_rate, out.display());

    session.start_transport();
    let mut frames = Vec::with_capacity(total);
    let mut first = true;
    while frames.len() < total {
        let chunk = (total - frames.len()).min(nt_ir::BLOCK_SIZE);
        frames.extend(session.render_frames(chunk)?);
        player.on_tick(&mut session);
        // The first beat starts the loads; let them land before rendering on.
        if first {
            session.wait_for_loads().await;
            first = false;
        }
    }

    std::fs::write(&out, nt_master::frames_to_wav(&frames, sample_rate))
        .with_context(|| format!("writing {}", out.display()))?;
    info!("Wrote {}", out.display());
    session.close();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_env_filter(&cli.log_level).init();

    match cli.command {
        Command::Play { pattern } => play(pattern).await,
        Command::Render { pattern, out } => render(pattern, out).await,
    }
}
