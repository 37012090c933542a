use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use lx_cue::artnet::ArtNetEngine;
use lx_cue::config::{ConsoleConfig, OutputKind};
use lx_cue::console::{Console, ConsoleCommand};
use lx_cue::cue_list::CueList;
use lx_cue::dmx_output::{OutputInterface, SerialInterface};
use lx_cue::live_cue::{FadeObserver, FadeOutcome};
use lx_cue::osc::{OscControlSink, OscListener};

#[derive(Parser, Debug)]
#[command(name = "lx-cue")]
#[command(version, about = "Cue playback for Art-Net and DMX widgets", long_about = None)]
struct Args {
    /// Properties file with key=value settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    channels: Option<usize>,

    #[arg(long)]
    dimmers: Option<usize>,

    /// artnet or widget
    #[arg(short, long)]
    interface: Option<OutputKind>,

    /// Art-Net target node or broadcast address
    #[arg(long)]
    artip: Option<Ipv4Addr>,

    /// Address advertised to Art-Net nodes
    #[arg(long)]
    local_ip: Option<Ipv4Addr>,

    #[arg(long)]
    net: Option<u8>,

    #[arg(long)]
    subnet: Option<u8>,

    #[arg(short, long)]
    universe: Option<u8>,

    /// Serial port of the DMX widget
    #[arg(short, long)]
    widget: Option<String>,

    /// OSC control port, 0 disables
    #[arg(short, long)]
    oscport: Option<u16>,
}

impl Args {
    fn into_config(self) -> Result<ConsoleConfig> {
        let mut config = match &self.config {
            Some(path) => ConsoleConfig::load(path)?,
            None => ConsoleConfig::default(),
        };
        if let Some(channels) = self.channels {
            config.channels = channels;
        }
        if let Some(dimmers) = self.dimmers {
            config.set("dimmers", &dimmers.to_string())?;
        }
        if let Some(interface) = self.interface {
            config.interface = interface;
        }
        config.artip = self.artip.or(config.artip);
        config.local_ip = self.local_ip.or(config.local_ip);
        for (key, value) in [
            ("artnet_net", self.net),
            ("artnet_subnet", self.subnet),
            ("artnet_universe", self.universe),
        ] {
            if let Some(value) = value {
                config.set(key, &value.to_string())?;
            }
        }
        if let Some(widget) = self.widget {
            config.widget = widget;
        }
        config.oscport = self.oscport.unwrap_or(config.oscport);
        Ok(config)
    }
}

/// Prints fade events for the operator.
struct FadeLog;

impl FadeObserver for FadeLog {
    fn on_fade_start(&self, cue: f64) {
        info!("Fading: Cue {cue}");
    }

    fn on_fade_complete(&self, cue: f64, outcome: FadeOutcome) {
        match outcome {
            FadeOutcome::Completed => info!("Cue {cue} complete"),
            FadeOutcome::Stopped => info!("Cue {cue} stopped"),
        }
    }
}

fn open_output(config: &ConsoleConfig) -> Result<Arc<dyn OutputInterface>> {
    match config.interface {
        OutputKind::ArtNet => {
            let engine = ArtNetEngine::configure(config.artnet_config());
            if let Some(e) = engine.setup_error() {
                warn!("Art-Net output disabled: {e}");
            }
            engine.start_listening();
            Ok(Arc::new(engine))
        }
        OutputKind::Widget => {
            let widget = SerialInterface::open(config.widget.clone())
                .with_context(|| format!("opening DMX widget {:?}", config.widget))?;
            Ok(Arc::new(widget))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;
    info!(
        "{} channels, {} dimmers, {} output",
        config.channels, config.dimmers, config.interface
    );

    let cues = CueList::new(config.channels, config.dimmers);
    let output = open_output(&config)?;
    cues.set_output(Some(output.clone()));
    cues.set_delegate(Some(Arc::new(FadeLog)));
    match OscControlSink::new() {
        Ok(sink) => cues.set_control_sink(Some(Arc::new(sink))),
        Err(e) => warn!("Cue control messages disabled: {e}"),
    }
    cues.start_live_output();

    let mut listener = if config.oscport == 0 {
        None
    } else {
        match OscListener::bind(format!("0.0.0.0:{}", config.oscport), cues.clone()) {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!("OSC control unavailable: {e}");
                None
            }
        }
    };

    let mut console = Console::new(cues.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match ConsoleCommand::parse(line) {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(command) => match console.execute(command) {
                        Ok(Some(reply)) => println!("{reply}"),
                        Ok(None) => {}
                        Err(e) => println!("{e}"),
                    },
                    Err(e) => println!("{e}"),
                }
            }
        }
    }

    info!("Shutting down");
    if let Some(listener) = listener.as_mut() {
        listener.stop();
    }
    cues.stop();
    cues.stop_live_output();
    // last frame reaches the receivers before the sockets close
    tokio::time::sleep(Duration::from_millis(50)).await;
    output.close();
    Ok(())
}
