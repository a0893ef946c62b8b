//! Bus Raider bridge over stdin/stdout.
//!
//! Link frames arrive on stdin and leave on stdout. The target is the
//! simulated Z80, optionally loaded with an image before the loop starts.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bus_raider::{App, BridgeConfig, SimTarget, logger};
use clap::Parser;
use hdlc_link::LinkSink;
use log::LevelFilter;
use raider_core::SystemClock;

/// Pause when a loop pass had nothing to read.
const IDLE_SLEEP: Duration = Duration::from_micros(500);

#[derive(Parser)]
#[command(name = "bus-raider")]
#[command(about = "Bus Raider bridge core with a simulated Z80 target")]
struct Args {
    /// Bridge configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Raw binary loaded into target memory
    #[arg(long)]
    target_image: Option<PathBuf>,

    /// Address for --target-image, hex
    #[arg(long, value_parser = parse_hex_u16, default_value = "0")]
    load_address: u16,

    /// S-record image decoded into target memory
    #[arg(long)]
    srec: Option<PathBuf>,

    /// Target clock rate, overriding the configuration
    #[arg(long)]
    clock_hz: Option<u32>,

    /// Level of log records forwarded to the host
    #[arg(long, default_value = "debug")]
    log_level: LevelFilter,
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("{s}: {e}"))
}

/// Writes frames straight to stdout.
struct StdoutSink {
    out: io::Stdout,
}

impl LinkSink for StdoutSink {
    fn put_bytes(&mut self, bytes: &[u8]) {
        let mut lock = self.out.lock();
        // A closed stdout ends the session on the next read anyway.
        let _ = lock.write_all(bytes).and_then(|()| lock.flush());
    }

    fn tx_available(&self) -> usize {
        usize::MAX
    }
}

fn spawn_stdin_reader() -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

fn load_target(sim: &mut SimTarget, args: &Args) -> Result<()> {
    if let Some(path) = &args.target_image {
        let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        if usize::from(args.load_address) + data.len() > 0x1_0000 {
            bail!("{} does not fit at {:04x}", path.display(), args.load_address);
        }
        sim.load(args.load_address, &data);
    }
    if let Some(path) = &args.srec {
        let text = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let image = format_srec::decode(&text).with_context(|| format!("decoding {}", path.display()))?;
        for (addr, bytes) in &image.chunks {
            let at = u16::try_from(*addr).with_context(|| format!("record address {addr:x}"))?;
            sim.load(at, bytes);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    if let Some(hz) = args.clock_hz {
        config.clock_hz = hz;
    }

    let mut sim = SimTarget::new(config.clock_hz);
    load_target(&mut sim, &args)?;

    let log_queue = logger::install(config.log_queue, args.log_level).context("installing logger")?;
    let sink = StdoutSink { out: io::stdout() };
    let mut app = App::new(sim, Box::new(sink), Rc::new(SystemClock::new()), &config)?;
    app.attach_log_queue(log_queue);

    let input = spawn_stdin_reader();
    loop {
        match input.try_recv() {
            Ok(bytes) => app.feed(&bytes),
            Err(TryRecvError::Empty) => thread::sleep(IDLE_SLEEP),
            Err(TryRecvError::Disconnected) => break,
        }
        app.service();
    }
    app.service();
    Ok(())
}
