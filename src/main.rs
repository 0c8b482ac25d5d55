//! # camera_agent CLI
//!
//! Exercises the camera agent against the in-memory mock driver.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use tracing::info;

use camera_agent::device::mock::{MockCameraDriver, MOCK_JPEG};
use camera_agent::device::{CameraDeviceInfo, CameraId};
use camera_agent::looper::{Executor, Looper};
use camera_agent::{AgentConfig, CameraAgent, CameraState, PictureCallbacks};

#[derive(Parser)]
#[command(name = "camera_agent")]
#[command(about = "Serialized camera command dispatch", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the cameras the mock driver exposes
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Open a camera, take one picture, close it, and print the states seen
    Demo {
        /// Camera to open
        #[arg(long, default_value_t = 0)]
        camera: CameraId,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AgentConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AgentConfig::load()?,
    };
    camera_agent::logging::init(&config);

    match cli.command {
        Commands::Info { json } => {
            let info = MockCameraDriver::new();
            let agent = CameraAgent::new(Arc::new(info), &config)?;
            let devices = agent
                .camera_device_info()
                .context("camera enumeration failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                print_device_info(&devices);
            }
        }
        Commands::Demo { camera } => {
            let states = run_demo(&config, camera)?;
            let states: Vec<&str> = states.iter().map(CameraState::as_str).collect();
            println!("{}", states.join(" -> "));
        }
    }

    Ok(())
}

fn print_device_info(info: &CameraDeviceInfo) {
    println!("cameras: {}", info.number_of_cameras());
    for id in 0..info.number_of_cameras() {
        let Some(c) = CameraId::try_from(id).ok().and_then(|id| info.characteristics(id)) else {
            continue;
        };
        println!(
            "  [{}] facing={:?} orientation={} can_disable_shutter_sound={}",
            id, c.facing, c.sensor_orientation, c.can_disable_shutter_sound
        );
    }
    if let Some(id) = info.first_back_camera_id() {
        println!("first back camera: {}", id);
    }
    if let Some(id) = info.first_front_camera_id() {
        println!("first front camera: {}", id);
    }
}

/// Open, capture and close, sampling the camera state after each step.
fn run_demo(config: &AgentConfig, camera_id: CameraId) -> Result<Vec<CameraState>> {
    let driver = Arc::new(MockCameraDriver::new().manual_completion());
    let agent = CameraAgent::new(driver.clone(), config)?;
    let callbacks: Arc<dyn Executor> = Arc::new(Looper::spawn("demo-callbacks")?);
    let timeout = config.dispatch.operation_timeout();
    let mut states = vec![agent.state()];

    let (tx, rx) = mpsc::channel();
    agent.open_camera(Some(callbacks.clone()), camera_id, move |result| {
        let _ = tx.send(result);
    })?;
    let proxy = rx.recv_timeout(timeout).context("open callback")??;
    states.push(proxy.state());

    let (tx, rx) = mpsc::channel();
    proxy.take_picture(
        Some(callbacks),
        PictureCallbacks::new().on_jpeg(move |data, _| {
            let _ = tx.send(data);
        }),
    )?;
    // Any blocking call returns only after the capture command has run.
    proxy.get_settings()?;
    states.push(proxy.state());

    driver.finish_capture(MOCK_JPEG.to_vec());
    let jpeg = rx.recv_timeout(timeout).context("jpeg callback")?;
    info!(bytes = jpeg.as_ref().map_or(0, Vec::len), "picture taken");
    states.push(proxy.state());

    agent.close_camera(true)?;
    states.push(agent.state());

    agent.recycle();
    Ok(states)
}
