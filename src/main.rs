use std::{
    io::{stdin, stdout, Write},
    path::PathBuf,
    sync::Arc,
};

use clap::Parser;
use teleop_record::{
    data_saver::Mp4Writer, hand::Hand, usb_camera::StereoCamera, DeviceLink, EpisodeStore,
    RecorderConfig, Result, Session, StatusSource,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
struct Args {
    /// json file with recorder settings, flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    dataset: Option<PathBuf>,

    #[arg(long)]
    fps: Option<f64>,

    /// seconds per episode
    #[arg(long)]
    duration: Option<f64>,

    /// tactile controller port
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long)]
    verbose: bool,
}

fn prompt(msg: &str) -> String {
    print!("{msg}");
    let _ = stdout().flush();
    let mut input = String::new();
    match stdin().read_line(&mut input) {
        // closed stdin ends the loop
        Ok(0) | Err(_) => "exit".into(),
        Ok(_) => input.trim().to_lowercase(),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let mut cfg = match &args.config {
        Some(path) => RecorderConfig::load(path)?,
        None => RecorderConfig::default(),
    };
    if let Some(dataset) = args.dataset {
        cfg.dataset_path = dataset;
    }
    if let Some(fps) = args.fps {
        cfg.fps = fps;
    }
    if let Some(duration) = args.duration {
        cfg.record_duration = duration;
    }
    if let Some(port) = args.port {
        cfg.tactile.port = port;
    }

    cfg.validate()?;

    let store = EpisodeStore::new(&cfg.dataset_path)?;
    let link = Arc::new(DeviceLink::open_serial(&cfg.tactile.port, cfg.tactile.baud)?);
    let mut hand = Hand::new(link.clone());
    hand.log_modules();
    if let Err(e) = hand.set_enable(true) {
        warn!("enable failed: {e}");
    }
    let source: Arc<dyn StatusSource> = link;
    let session = Session::new(&cfg, &store);

    info!(
        dataset = %cfg.dataset_path.display(),
        fps = cfg.fps,
        duration = cfg.record_duration,
        "teleop recorder ready"
    );
    loop {
        let index = store.next_index();
        println!("\n================");
        println!("[Episode {index}]");
        if prompt("Press enter when ready: ") == "exit" {
            break;
        }

        match session.record(StereoCamera::open, source.clone(), Mp4Writer::new) {
            Ok(report) => {
                println!(
                    "Episode {} recorded: {} frames, {} offsets",
                    report.index, report.frames, report.offsets
                );
                if prompt("Press enter to save or type 'del' to delete: ") == "del" {
                    match store.remove(report.index) {
                        Ok(()) => println!("Episode {} has been deleted.", report.index),
                        Err(e) => warn!(index = report.index, "delete failed: {e}"),
                    }
                } else {
                    println!("Episode {} has been saved.", report.index);
                }
            }
            Err(e) if e.is_fatal_to_session() => {
                error!("episode aborted: {e}");
                println!("Episode aborted, nothing was saved: {e}");
                println!("Check the camera and tactile sensors before retrying.");
            }
            Err(e) => {
                warn!("episode failed: {e}");
                println!("Episode recording failed: {e}");
            }
        }

        if prompt("Press enter to record the next episode or type 'exit' to quit: ") == "exit" {
            break;
        }
    }
    drop(hand);
    Ok(())
}
