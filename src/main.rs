mod annotate;
mod capture;
mod control;
mod detection;
mod mode;
mod output;
mod overlay;
mod scheduler;
mod session;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use capture::WebcamDevices;
use clap::Parser;
use control::ControlEvent;
use detection::{Delegate, DetectorConfig, Task};
use output::{OutputSink, V4L2Output};
use overlay::ImageCanvas;
use scheduler::RefreshScheduler;
use session::Session;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// What to track
    #[arg(long, value_enum, default_value_t = Task::Hand)]
    task: Task,

    /// Path to the landmark model (ONNX file)
    #[arg(long)]
    model: PathBuf,

    /// Path to the blendshape model (ONNX file, face only)
    #[arg(long)]
    blendshape_model: Option<PathBuf>,

    /// Inference backend
    #[arg(long, value_enum, default_value_t = Delegate::Gpu)]
    delegate: Delegate,

    /// Maximum number of faces or hands reported per frame (the ONNX backend finds one)
    #[arg(long, default_value_t = 1)]
    max_subjects: usize,

    /// Do not compute or draw blendshape scores
    #[arg(long)]
    no_blend_scores: bool,

    /// Minimum presence score for a subject to be reported
    #[arg(long, default_value_t = 0.5)]
    min_presence: f32,

    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Display refresh rate driving the annotation loop
    #[arg(long, default_value_t = 60)]
    refresh_hz: u32,

    /// Output v4l2loopback device path for the annotated video
    #[arg(short, long)]
    output_device: Option<PathBuf>,

    /// Save the last annotated frame as PNG on exit
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Enable predictions right away instead of waiting for a toggle
    #[arg(long)]
    start_enabled: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn detector_config(&self) -> DetectorConfig {
        let mut config = DetectorConfig::new(self.task, &self.model);
        config.delegate = self.delegate;
        config.max_subjects = self.max_subjects;
        config.output_blend_scores = self.task == Task::Face && !self.no_blend_scores;
        config.blendshape_model_path = self.blendshape_model.clone();
        config.min_presence = self.min_presence;
        config
    }
}

type HostSession = Session<ImageCanvas, RefreshScheduler>;

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("landmark-cam starting");
    tracing::info!("Task: {}", args.task);
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Refresh: {} Hz, delegate: {}", args.refresh_hz, args.delegate);

    let config = args.detector_config();
    let mut session: HostSession = Session::new(
        Box::new(WebcamDevices::new(
            args.input_device,
            args.capture_width,
            args.capture_height,
        )),
        overlay::renderer_for(args.task, config.output_blend_scores),
        ImageCanvas::new(args.capture_width, args.capture_height),
        RefreshScheduler::new(args.refresh_hz),
    );

    tracing::info!("Loading {} model from {}", args.task, args.model.display());
    session
        .load_detector(|| detection::create_detector(config))
        .context("Failed to load landmark model")?;

    let mut output = match &args.output_device {
        Some(path) => Some(
            V4L2Output::new(path, args.capture_width, args.capture_height)
                .context("Failed to initialize v4l2loopback output")?,
        ),
        None => None,
    };
    if let Some(sink) = &output {
        let (width, height) = sink.resolution();
        tracing::info!("Output: {}x{}", width, height);
    }

    let controls = control::spawn_stdin();
    if args.start_enabled {
        toggle(&mut session);
    } else {
        tracing::info!("Press Enter to {}, q to quit", session.label().to_lowercase());
    }

    let last_frame = run_host(&mut session, &controls, output.as_mut(), args.snapshot.is_some())?;

    let stats = session.stats();
    tracing::info!(
        "Stopped after {} ticks ({} detections, {} repeated frames skipped)",
        stats.ticks,
        stats.detections,
        stats.skipped
    );

    if let (Some(path), Some(frame)) = (&args.snapshot, last_frame) {
        output::save_snapshot(&frame, path)?;
    }

    Ok(())
}

fn toggle(session: &mut HostSession) {
    match session.toggle() {
        Ok(_) => tracing::info!("Press Enter to {}", session.label().to_lowercase()),
        Err(e) => tracing::debug!("Toggle had no effect: {}", e),
    }
}

/// One iteration per display refresh until the user quits. Returns the last
/// composited frame when `keep_last` is set.
fn run_host(
    session: &mut HostSession,
    controls: &crossbeam_channel::Receiver<ControlEvent>,
    mut output: Option<&mut V4L2Output>,
    keep_last: bool,
) -> Result<Option<image::RgbImage>> {
    let mut last_frame = None;

    loop {
        session.scheduler_mut().wait_for_refresh();

        for event in controls.try_iter() {
            match event {
                ControlEvent::Toggle => toggle(session),
                ControlEvent::Quit => return Ok(last_frame),
            }
        }

        // Failures are logged by the session and end the loop, not the program
        if let Err(e) = session.poll_stream() {
            tracing::debug!("Stream poll failed: {}", e);
        }
        if session.scheduler_mut().take_request() {
            if let Err(e) = session.run_tick() {
                tracing::debug!("Tick failed: {}", e);
            }
        }

        if output.is_none() && !keep_last {
            continue;
        }
        let Some(frame) = session.current_frame() else {
            continue;
        };
        let annotated = output::composite(frame, session.canvas().image());
        if let Some(sink) = output.as_deref_mut() {
            sink.write_frame(&annotated)
                .context("Failed to write frame")?;
        }
        if keep_last {
            last_frame = Some(annotated);
        }
    }
}
