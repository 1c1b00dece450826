//! Receive from a PlutoSDR and report block power and hardware status.
//!
//! Command-line options:
//!
//! - `--uri <uri>` or `-u <uri>`: IIO context URI, e.g. `ip:192.168.2.1` or
//!   `usb:1.18.5`. Without it the first USB board found is used.
//! - `--freq <hz>` or `-f <hz>`: center frequency (default 100 MHz).
//! - `--rate <sps>` or `-s <sps>`: sample rate (default 4 MS/s).
//! - `--gain <db>` or `-g <db>`: manual gain, -1 for automatic.
//! - `--narrow`: 8-bit samples.
//!
//! Example: `cargo run --features libiio --example pluto_rx -- -f 433.92e6 -g 30`
use ctrlc;
use log::info;
use pluto_sdr_rs::{
    error::Result, DeviceInfo, DeviceScanner, GainMode, IqMode, LibIio, MemoryStore, PlutoSdr,
    UsbScanner,
};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};

struct Args {
    uri: Option<String>,
    freq: f64,
    rate: u32,
    gain: f32,
    narrow: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        uri: None,
        freq: 100_000_000.0,
        rate: 4_000_000,
        gain: -1.0,
        narrow: false,
    };
    let mut it = env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--uri" | "-u" => args.uri = it.next(),
            "--freq" | "-f" => {
                args.freq = it.next().and_then(|v| v.parse().ok()).expect("invalid frequency")
            }
            "--rate" | "-s" => {
                args.rate = it
                    .next()
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(|v| v as u32)
                    .expect("invalid sample rate")
            }
            "--gain" | "-g" => {
                args.gain = it.next().and_then(|v| v.parse().ok()).expect("invalid gain")
            }
            "--narrow" => args.narrow = true,
            other => eprintln!("Ignoring unknown argument '{}'", other),
        }
    }
    args
}

fn main() -> Result<()> {
    // Keep stdout free for sample consumers
    stderrlog::new().verbosity(log::Level::Info).init().unwrap();

    let args = parse_args();

    let devices = match &args.uri {
        Some(uri) => vec![DeviceInfo {
            identity: uri.clone(),
            uri: uri.clone(),
        }],
        None => UsbScanner.scan()?,
    };
    if devices.is_empty() {
        eprintln!("No supported devices found.");
        return Ok(());
    }
    for dev in &devices {
        eprintln!("  {} -> {}", dev.identity, dev.uri);
    }

    let (mut sdr, mut reader) = PlutoSdr::new(LibIio, MemoryStore::new());
    sdr.refresh(&devices)?;
    sdr.set_sample_rate(args.rate)?;
    sdr.set_gain_mode(GainMode::Manual)?;
    sdr.set_gain(args.gain)?;
    sdr.retune(args.freq)?;
    if args.narrow {
        sdr.set_iq_mode(IqMode::Narrow)?;
    }
    info!(
        "Sampling at {} S/s, {} samples per block",
        sdr.config().sample_rate(),
        sdr.block_size()
    );

    static SHUTDOWN: AtomicBool = AtomicBool::new(false);
    ctrlc::set_handler(|| SHUTDOWN.store(true, Ordering::Relaxed))
        .expect("Error setting Ctrl-C handler");

    sdr.start()?;
    let mut blocks: u64 = 0;
    while !SHUTDOWN.load(Ordering::Relaxed) {
        let Some(block) = reader.read() else {
            break;
        };
        blocks += 1;
        let power = block.iter().map(|s| s.norm_sqr()).sum::<f32>() / block.len().max(1) as f32;
        let status = sdr.status();
        eprintln!(
            "block {:>6}: {} samples, power {:>7.2} dBFS{}{}",
            blocks,
            block.len(),
            10.0 * power.max(1e-12).log10(),
            if status.underflow { " UNDERFLOW" } else { "" },
            if status.overdrive { " OVERDRIVE" } else { "" },
        );
        if !sdr.is_running() {
            eprintln!("Acquisition stopped");
            break;
        }
    }

    eprintln!("\nClosing device...");
    sdr.stop();
    Ok(())
}
