mod capture;

use clap::Parser;
use std::path::PathBuf;

use rfnm_sdr::device::describe;
use rfnm_sdr::file::SampleFormat;
use rfnm_sdr::sim::{self, SimConfig};
use rfnm_sdr::{DeviceInfo, StreamFormat};

#[derive(Parser, Debug)]
#[command(name = "rfnm-rx")]
#[command(about = "Capture IQ samples from an RFNM receive stream")]
struct Cli {
    /// List attached devices as JSON and exit
    #[arg(long)]
    list: bool,

    /// Open the device with this serial
    #[arg(long)]
    serial: Option<String>,

    /// Stream format: CS8, CS16, CF32
    #[arg(short = 'F', long, default_value = "CS16")]
    format: String,

    /// Receive channels, comma separated
    #[arg(short = 'C', long, value_delimiter = ',', default_value = "0")]
    channels: Vec<usize>,

    /// Center frequency in MHz
    #[arg(short = 'c', long, default_value = "2450")]
    center_freq: f64,

    /// RF gain in dB
    #[arg(short = 'g', long, default_value = "0")]
    gain: f64,

    /// Antenna port (A..H, ANT, LOOPBACK)
    #[arg(short = 'a', long)]
    antenna: Option<String>,

    /// Sample rate divisor applied to the sample clock (1 or 2)
    #[arg(long, default_value = "1")]
    rate_div: u32,

    /// RFIC low-pass bandwidth in MHz (0 keeps the default)
    #[arg(long, default_value = "0")]
    bandwidth: f64,

    /// Enable automatic DC offset correction
    #[arg(long)]
    dc: bool,

    /// Elements requested per read
    #[arg(long, default_value = "16384")]
    chunk: usize,

    /// Read timeout in microseconds
    #[arg(long, default_value = "100000")]
    timeout_us: i64,

    /// Elements to capture per channel
    #[arg(short = 'n', long, default_value = "1000000")]
    samples: u64,

    /// IQ recording replayed as channel input, one per channel
    #[arg(short = 'f', long)]
    input: Vec<PathBuf>,

    /// Sample format of the input recordings: ci8, ci16, cf32
    #[arg(long, default_value = "ci16")]
    input_format: String,

    /// Output prefix; each channel is written to <prefix>.ch<N>.<format>
    #[arg(short = 'w', long)]
    write: Option<String>,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Print statistics
    #[arg(long)]
    stats: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if cli.list {
        let devices: Vec<DeviceInfo> = sim::discover(&SimConfig::default())
            .iter()
            .map(describe)
            .collect();
        match serde_json::to_string_pretty(&devices) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("error: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let format = match cli.format.to_ascii_uppercase().parse::<StreamFormat>() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{} (use CS8, CS16, or CF32)", e);
            std::process::exit(1);
        }
    };
    let input_format = match cli.input_format.parse::<SampleFormat>() {
        Ok(f) => f,
        Err(_) => {
            eprintln!(
                "unknown sample format: {} (use ci8, ci16, or cf32)",
                cli.input_format
            );
            std::process::exit(1);
        }
    };
    if cli.chunk == 0 {
        eprintln!("--chunk must be at least 1");
        std::process::exit(1);
    }

    if cli.verbose {
        log::info!("rfnm-rx starting");
        log::info!("center frequency: {} MHz", cli.center_freq);
        log::info!("channels: {:?} ({})", cli.channels, format);
    }

    let opts = capture::CaptureOptions {
        serial: cli.serial,
        format,
        channels: cli.channels,
        freq_mhz: cli.center_freq,
        gain_db: cli.gain,
        antenna: cli.antenna,
        rate_div: cli.rate_div,
        bandwidth_mhz: cli.bandwidth,
        dc_correction: cli.dc,
        chunk: cli.chunk,
        timeout_us: cli.timeout_us,
        samples: cli.samples,
        input: cli.input,
        input_format,
        write: cli.write,
        stats: cli.stats,
    };

    if let Err(e) = capture::run(&opts) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
