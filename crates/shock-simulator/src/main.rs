//! Host simulator for the shock-logger capture pipeline.
//!
//! Runs the real drivers and pipeline against an emulated 25LC256, LIS3DH
//! and serial link. Commands are read from stdin, one per line:
//!
//! | Command          | Effect                                           |
//! |------------------|--------------------------------------------------|
//! | `start`          | start/stop button                                |
//! | `config`         | configuration button                             |
//! | `send on\|off`   | transmit choice while configuring                |
//! | `burst [amp]`    | fill the FIFO with a synthetic burst             |
//! | `shock [axes]`   | fire the threshold detector (axes bits, hex)     |
//! | `remote <bytes>` | feed bytes to the command decoder, e.g. `L 0`    |
//! | `tick <secs>`    | advance uptime                                   |
//! | `status`         | print state and counters                         |
//! | `quit`           | save the EEPROM image and exit                   |
//!
//! The EEPROM image is kept in `shock-eeprom.bin` (or the first argument)
//! and the configuration in `shock-config.bin` (or the second argument).

use std::io::{self, BufRead, Write as _};
use std::path::{Path, PathBuf};
use std::time::Instant;

use embassy_futures::block_on;
use log::{error, info, warn};

use shock_logger::command::{Command, CommandDecoder};
use shock_logger::config::Config;
use shock_logger::pipeline::Uptime;
use shock_logger::sampling::{AXES, BYTES_PER_LEVEL, FIFO_LEVELS, RAW_BURST_BYTES, RawBurst};
use shock_logger::sensors::Lis3dh;
use shock_logger::sim::{EmulatedEeprom, EmulatedLis3dh, NoopDelay, SerialLink};
use shock_logger::storage::Eeprom25lc256;
use shock_logger::{CapturePipeline, EventSignals, PipelineEvent};

const DEFAULT_IMAGE_PATH: &str = "shock-eeprom.bin";
const DEFAULT_CONFIG_PATH: &str = "shock-config.bin";

/// Threshold reads that stay active after a simulated shock
const SHOCK_READS: u32 = 4;

static SIGNALS: EventSignals = EventSignals::new();

/// Wall-clock uptime with a manual offset for `tick`.
struct HostUptime {
    boot: Instant,
    offset_secs: u64,
}

impl Uptime for HostUptime {
    fn uptime_secs(&self) -> u16 {
        (self.boot.elapsed().as_secs() + self.offset_secs) as u16
    }
}

type Pipeline = CapturePipeline<
    Eeprom25lc256<EmulatedEeprom, NoopDelay>,
    Lis3dh<EmulatedLis3dh>,
    SerialLink,
    HostUptime,
>;

fn load_config(path: &Path) -> Config {
    match std::fs::read(path) {
        Ok(bytes) => match Config::from_bytes(&bytes) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring {}: {}", path.display(), e);
                Config::default()
            }
        },
        Err(_) => {
            let config = Config::default();
            match config.to_bytes() {
                Ok(bytes) => {
                    if let Err(e) = std::fs::write(path, bytes) {
                        warn!("Could not write {}: {}", path.display(), e);
                    }
                }
                Err(e) => warn!("Could not encode default config: {}", e),
            }
            config
        }
    }
}

fn load_eeprom(path: &Path) -> EmulatedEeprom {
    match std::fs::read(path) {
        Ok(image) => {
            info!("Loaded EEPROM image from {}", path.display());
            EmulatedEeprom::from_image(&image)
        }
        Err(_) => {
            info!("Starting with a blank EEPROM");
            EmulatedEeprom::new()
        }
    }
}

fn save_eeprom(pipeline: &mut Pipeline, path: &Path) {
    let image = pipeline.catalog_mut().store().device().image();
    match std::fs::write(path, image) {
        Ok(()) => info!("Saved EEPROM image to {}", path.display()),
        Err(e) => error!("Could not save {}: {}", path.display(), e),
    }
}

/// One FIFO of a decaying oscillation, little-endian 16-bit samples.
fn synthetic_burst(amplitude: f32, phase: f32) -> RawBurst {
    let mut raw = [0u8; RAW_BURST_BYTES];
    for level in 0..FIFO_LEVELS {
        let t = level as f32 / FIFO_LEVELS as f32;
        for axis in 0..AXES {
            let angle = std::f32::consts::TAU * (phase + t + axis as f32 / AXES as f32);
            let value = (amplitude * angle.sin() * (-t).exp()) as i16;
            let offset = level * BYTES_PER_LEVEL + axis * 2;
            raw[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        }
    }
    raw
}

fn parse_remote(args: &[&str]) -> Vec<Command> {
    let mut decoder = CommandDecoder::new();
    let mut commands = Vec::new();

    for arg in args {
        let byte = match (arg.len(), arg.parse::<u8>()) {
            (1, Err(_)) => arg.as_bytes()[0],
            (_, Ok(value)) if decoder.is_partial() => value,
            _ => {
                warn!("Skipping {:?}", arg);
                continue;
            }
        };
        match decoder.feed(byte) {
            Ok(Some(command)) => commands.push(command),
            Ok(None) => {}
            Err(e) => warn!("{}", e),
        }
    }
    if decoder.is_partial() {
        warn!("Incomplete command dropped");
    }
    commands
}

fn drain_events(pipeline: &mut Pipeline) {
    while let Some(event) = SIGNALS.try_next() {
        if let Err(e) = block_on(pipeline.handle(event)) {
            error!("Handling {:?} failed: {}", event, e);
        }
        SIGNALS.complete(event);
    }

    let sent = pipeline.link_mut().take_tx();
    if !sent.is_empty() {
        let hex: Vec<String> = sent.iter().map(|b| format!("{b:02x}")).collect();
        println!("tx ({} bytes): {}", sent.len(), hex.join(" "));
    }
}

fn print_status(pipeline: &mut Pipeline) {
    let pages = block_on(pipeline.catalog_mut().page_count());
    let events = block_on(pipeline.catalog_mut().event_count());
    println!(
        "state {:?}, queue {} bursts, transmit choice {}, pages {:?}, events {:?}",
        pipeline.state(),
        pipeline.queue().len(),
        pipeline.send_choice(),
        pages,
        events
    );
}

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let image_path = PathBuf::from(args.next().unwrap_or_else(|| DEFAULT_IMAGE_PATH.into()));
    let config_path = PathBuf::from(args.next().unwrap_or_else(|| DEFAULT_CONFIG_PATH.into()));

    let config = load_config(&config_path);
    let store = Eeprom25lc256::new(load_eeprom(&image_path), NoopDelay, config.store);
    let sensor = Lis3dh::new(EmulatedLis3dh::new(), config.sensor);
    let clock = HostUptime {
        boot: Instant::now(),
        offset_secs: 0,
    };
    let mut pipeline = CapturePipeline::new(store, sensor, SerialLink::new(), clock, config.pipeline);

    if let Err(e) = block_on(pipeline.init()) {
        error!("Boot failed: {}", e);
        return;
    }

    let mut phase = 0.0f32;
    let stdin = io::stdin();
    print!("> ");
    let _ = io::stdout().flush();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let words: Vec<&str> = line.split_whitespace().collect();

        match words.as_slice() {
            [] => {}
            ["start"] => {
                SIGNALS.raise(PipelineEvent::StartStopPressed);
            }
            ["config"] => {
                SIGNALS.raise(PipelineEvent::ConfigPressed);
            }
            ["send", choice] => pipeline.set_send_enabled(*choice == "on"),
            ["burst", rest @ ..] => {
                let amplitude = rest
                    .first()
                    .and_then(|a| a.parse::<f32>().ok())
                    .unwrap_or(4000.0);
                let burst = synthetic_burst(amplitude, phase);
                phase += 0.25;
                pipeline.sensor_mut().device_mut().load_burst(&burst);
                SIGNALS.raise(PipelineEvent::SensorInterrupt);
            }
            ["shock", rest @ ..] => {
                let axes = rest
                    .first()
                    .and_then(|a| u8::from_str_radix(a, 16).ok())
                    .unwrap_or(0x2A);
                pipeline
                    .sensor_mut()
                    .device_mut()
                    .trigger_threshold(axes, SHOCK_READS);
                SIGNALS.raise(PipelineEvent::SensorInterrupt);
            }
            ["remote", rest @ ..] => {
                for command in parse_remote(rest) {
                    SIGNALS.raise(PipelineEvent::Remote(command));
                }
            }
            ["tick", secs] => match secs.parse::<u64>() {
                Ok(secs) => pipeline.clock_mut().offset_secs += secs,
                Err(e) => warn!("Bad tick {:?}: {}", secs, e),
            },
            ["status"] => print_status(&mut pipeline),
            ["quit"] => break,
            other => warn!("Unknown command {:?}", other),
        }

        drain_events(&mut pipeline);
        print!("> ");
        let _ = io::stdout().flush();
    }

    save_eeprom(&mut pipeline, &image_path);
}
