use anyhow::{Context, bail};
use clap::Parser;
use radarlink_core::client::Client;
use radarlink_core::config::{ClientInfo, SensorConfig, SessionConfig, SubsweepConfig};
use radarlink_core::protocol::constants::DEFAULT_TCP_PORT;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Radar streaming client", long_about = None)]
struct Args {
    /// Server IP address (TCP transport)
    #[arg(long)]
    ip: Option<String>,

    /// TCP port
    #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
    port: u16,

    /// Serial port path (serial transport)
    #[arg(long)]
    serial: Option<String>,

    /// Override the serial baud rate
    #[arg(long)]
    baudrate: Option<u32>,

    /// Session configuration TOML; built from the sweep flags when omitted
    #[arg(long)]
    config: Option<String>,

    /// Sensor id to stream from
    #[arg(long, default_value_t = 1)]
    sensor: u32,

    /// First measured distance point
    #[arg(long, default_value_t = 80)]
    start_point: i32,

    /// Number of distance points per sweep
    #[arg(long, default_value_t = 160)]
    num_points: u32,

    /// Number of frames to stream (0 = until interrupted)
    #[arg(long, default_value_t = 10)]
    frames: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn client_info(args: &Args) -> anyhow::Result<ClientInfo> {
    match (&args.ip, &args.serial) {
        (Some(ip), None) => Ok(ClientInfo::socket(ip.clone(), args.port)),
        (None, Some(port)) => Ok(ClientInfo::Serial {
            port: port.clone(),
            override_baudrate: args.baudrate,
            flow_control: false,
        }),
        (Some(_), Some(_)) => bail!("--ip and --serial are mutually exclusive"),
        (None, None) => bail!("one of --ip or --serial is required"),
    }
}

fn session_config(args: &Args) -> anyhow::Result<SessionConfig> {
    if let Some(path) = &args.config {
        return SessionConfig::load_from_file(path)
            .with_context(|| format!("loading session config from {path}"));
    }
    Ok(SessionConfig::new(
        args.sensor,
        SensorConfig {
            subsweeps: vec![SubsweepConfig {
                start_point: args.start_point,
                num_points: args.num_points,
                ..SubsweepConfig::default()
            }],
            ..SensorConfig::default()
        },
    ))
}

fn run(args: &Args) -> anyhow::Result<()> {
    let info = client_info(args)?;
    let config = session_config(args)?;

    let mut client = Client::open(info).context("connecting to the sensor")?;
    if let Some(server_info) = client.server_info() {
        info!(
            rss_version = %server_info.rss_version,
            sensor_count = server_info.sensor_count,
            "Server ready"
        );
    }

    client
        .setup_session(config, None)
        .context("setting up the session")?;
    client.start_session().context("starting the session")?;

    let mut n = 0u32;
    while args.frames == 0 || n < args.frames {
        let results = client.get_next().context("waiting for a frame")?;
        for group in &results {
            for (sensor_id, measurement) in group {
                let peak = measurement
                    .frame
                    .data()
                    .iter()
                    .map(|s| s.norm())
                    .fold(0.0f32, f32::max);
                println!(
                    "sensor {sensor_id}  t={:.6}s  tick={}  peak={peak:.1}{}",
                    measurement.tick_time(),
                    measurement.tick,
                    if measurement.data_saturated {
                        "  [saturated]"
                    } else {
                        ""
                    },
                );
            }
        }
        n += 1;
    }

    client.stop_session().context("stopping the session")?;
    client.close().context("closing the client")?;
    info!(frames = n, "Done");
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        error!("Error: {e:#}");
        std::process::exit(1);
    }
}
