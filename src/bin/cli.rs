use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use crabstream::pipeline::PipelineOrchestrator;
use crabstream::testing::FakeRig;
use crabstream::transport::{LogTransport, QueuedTransport};
use crabstream::{CrabStreamConfig, PipelineEvent};
use tokio::sync::broadcast;

const USAGE: &str = "Usage: crabstream-cli <command> [args]

Commands:
  info [--json]
  config-dump [--config <path>]
  demo <url> [--record <dir>] [--seconds <n>] [--config <path>] [--json]
  devices [--json]                      (camera/audio features)
  live <url> [--record <dir>] [--seconds <n>] [--config <path>]   (full feature)";

fn main() -> Result<()> {
    crabstream::init_logging();

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1) else {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    match command.as_str() {
        "info" => cmd_info(&args),
        "config-dump" => cmd_config_dump(&args),
        "demo" => cmd_demo(&args),
        "devices" => cmd_devices(&args),
        "live" => cmd_live(&args),
        _ => {
            eprintln!("Unknown command: {}\n\n{}", command, USAGE);
            std::process::exit(1);
        }
    }
}

/// Options shared by `demo` and `live`
struct RunOptions {
    url: String,
    record_dir: Option<PathBuf>,
    seconds: u64,
    config_path: PathBuf,
    json: bool,
}

fn parse_run_options(args: &[String]) -> Result<RunOptions> {
    let mut url = None;
    let mut record_dir = None;
    let mut seconds = 5;
    let mut config_path = CrabStreamConfig::default_path();
    let mut json = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--record" => {
                i += 1;
                record_dir = Some(PathBuf::from(flag_value(args, i, "--record")?));
            }
            "--seconds" => {
                i += 1;
                seconds = flag_value(args, i, "--seconds")?
                    .parse()
                    .context("--seconds expects a whole number")?;
            }
            "--config" => {
                i += 1;
                config_path = PathBuf::from(flag_value(args, i, "--config")?);
            }
            "--json" => json = true,
            other if url.is_none() => url = Some(other.to_string()),
            other => bail!("unexpected argument: {}", other),
        }
        i += 1;
    }

    Ok(RunOptions {
        url: url.ok_or_else(|| anyhow!("stream url required"))?,
        record_dir,
        seconds,
        config_path,
        json,
    })
}

fn flag_value<'a>(args: &'a [String], index: usize, flag: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{} needs a value", flag))
}

fn config_flag(args: &[String]) -> PathBuf {
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(CrabStreamConfig::default_path)
}

fn cmd_info(args: &[String]) -> Result<()> {
    let info = crabstream::get_info();
    if args.iter().any(|a| a == "--json") {
        println!("{}", serde_json::to_string(&info)?);
    } else {
        println!("{} {}", info.name, info.version);
        println!("{}", info.description);
        println!("backends: {}", info.backends.join(", "));
    }
    Ok(())
}

fn cmd_config_dump(args: &[String]) -> Result<()> {
    let path = config_flag(args);
    let config = CrabStreamConfig::load_layered(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Run the whole lifecycle against in-memory devices and a logging transport
fn cmd_demo(args: &[String]) -> Result<()> {
    let options = parse_run_options(args)?;
    let config = CrabStreamConfig::load_layered(&options.config_path)?;
    let transport = Arc::new(QueuedTransport::with_capacity(
        Arc::new(LogTransport::new()),
        config.stream.queue_capacity,
    ));

    let (rig, builder) = FakeRig::new();
    let mut pipeline = builder
        .transport(transport.clone())
        .config(config)
        .build()?;

    let fps = pipeline.config().video.fps.max(1);
    let tick = Duration::from_micros(1_000_000 / u64::from(fps));
    run_session(&mut pipeline, &options, || {
        rig.capture_tick();
        std::thread::sleep(tick);
    })?;

    if !options.json {
        println!(
            "transport: {} units sent, {} dropped",
            transport.sent_units(),
            transport.dropped_units()
        );
    }
    Ok(())
}

/// Prepare, stream, optionally record, and tear down, calling `tick` until
/// the time runs out or Ctrl+C arrives
fn run_session<F: FnMut()>(
    pipeline: &mut PipelineOrchestrator,
    options: &RunOptions,
    mut tick: F,
) -> Result<()> {
    let mut events = pipeline.subscribe();

    if !pipeline.prepare_video_default() {
        bail!("video parameters rejected by the encoder");
    }
    if !pipeline.prepare_audio_default() {
        bail!("audio parameters rejected by the encoder");
    }

    pipeline.start_stream(&options.url)?;
    if let Some(dir) = &options.record_dir {
        let path = pipeline.start_record_in(dir)?;
        if !options.json {
            println!("Recording to {}", path.display());
        }
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = stop_flag.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    let target = Duration::from_secs(options.seconds);
    while start.elapsed() < target && !stop_flag.load(Ordering::SeqCst) {
        tick();
        print_events(&mut events, options.json)?;
    }

    if let Some(summary) = pipeline.stop_record() {
        if !options.json {
            println!(
                "{} ({} units, {:.0} bps)",
                summary.saved_message(),
                summary.units_written(),
                summary.avg_bitrate()
            );
        }
    }
    pipeline.stop_stream();
    print_events(&mut events, options.json)?;

    if options.json {
        println!("{}", serde_json::to_string(&pipeline.snapshot())?);
    } else {
        println!("Routed {} units", pipeline.routed_units());
    }
    Ok(())
}

fn print_events(events: &mut broadcast::Receiver<PipelineEvent>, json: bool) -> Result<()> {
    loop {
        match events.try_recv() {
            Ok(event) => print_event(&event, json)?,
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                log::warn!("Skipped {} pipeline events", skipped);
            }
            Err(_) => return Ok(()),
        }
    }
}

fn print_event(event: &PipelineEvent, json: bool) -> Result<()> {
    match event {
        PipelineEvent::RecordingSaved(summary) if json => {
            println!("{}", serde_json::to_string(summary)?);
        }
        _ if json => {}
        PipelineEvent::StateChanged(state) => println!("state: {:?}", state),
        PipelineEvent::ConnectionSuccess => println!("connected"),
        PipelineEvent::ConnectionFailed(reason) => println!("connection failed: {}", reason),
        PipelineEvent::Disconnected => println!("disconnected"),
        PipelineEvent::AuthSuccess => println!("authenticated"),
        PipelineEvent::AuthError => println!("authentication failed"),
        PipelineEvent::RecordingStarted(path) => println!("recording started: {}", path.display()),
        PipelineEvent::RecordingSaved(summary) => println!("{}", summary.saved_message()),
    }
    Ok(())
}

#[cfg(any(feature = "camera", feature = "audio"))]
fn cmd_devices(args: &[String]) -> Result<()> {
    let json = args.iter().any(|a| a == "--json");

    #[cfg(feature = "camera")]
    {
        let cameras = crabstream::camera::list_cameras()?;
        if json {
            println!("{}", serde_json::to_string(&cameras)?);
        } else {
            for camera in cameras {
                println!("camera {}: {}", camera.index, camera.name);
            }
        }
    }

    #[cfg(feature = "audio")]
    {
        let microphones = crabstream::audio::list_audio_devices()?;
        if json {
            println!("{}", serde_json::to_string(&microphones)?);
        } else {
            for mic in microphones {
                let marker = if mic.is_default { " (default)" } else { "" };
                println!("microphone {}: {}{}", mic.id, mic.name, marker);
            }
        }
    }

    Ok(())
}

#[cfg(not(any(feature = "camera", feature = "audio")))]
fn cmd_devices(_args: &[String]) -> Result<()> {
    bail!("built without the camera and audio features")
}

/// Real camera, microphone, H.264, Opus, and MP4; the transport only logs
#[cfg(all(feature = "recording", feature = "audio", feature = "camera"))]
fn cmd_live(args: &[String]) -> Result<()> {
    use crabstream::audio::{MicrophoneSource, OpusAudioEncoder};
    use crabstream::camera::NokhwaCameraSource;
    use crabstream::pipeline::TransportSink;
    use crabstream::recording::{H264Encoder, Mp4WriterFactory};
    use crabstream::timing::PTSClock;

    let options = parse_run_options(args)?;
    let config = CrabStreamConfig::load_layered(&options.config_path)?;

    let clock = PTSClock::new();
    let transport: Arc<dyn TransportSink> = Arc::new(QueuedTransport::with_capacity(
        Arc::new(LogTransport::new()),
        config.stream.queue_capacity,
    ));
    let mut pipeline = PipelineOrchestrator::builder()
        .video_source(Box::new(NokhwaCameraSource::new(clock.clone())))
        .audio_source(Box::new(MicrophoneSource::new(clock)))
        .video_encoder(Box::new(H264Encoder::new()))
        .audio_encoder(Box::new(OpusAudioEncoder::new()))
        .transport(transport)
        .container_factory(Arc::new(Mp4WriterFactory::from_config(&config.recording)))
        .config(config)
        .build()?;

    run_session(&mut pipeline, &options, || {
        std::thread::sleep(Duration::from_millis(100));
    })
}

#[cfg(not(all(feature = "recording", feature = "audio", feature = "camera")))]
fn cmd_live(_args: &[String]) -> Result<()> {
    bail!("live capture needs the full feature set (--features full)")
}
