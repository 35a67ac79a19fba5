use anyhow::{bail, Context, Result};
use broute_rs::config::{SerialConfig, SessionConfig};
use broute_rs::constants::PROPERTY_MAP_EPCS;
use broute_rs::echonet::{ElFrame, PropertyMap};
use broute_rs::util::hex::{encode_hex, hex_byte};
use broute_rs::wisun::transport::open_serial;
use broute_rs::{init_logger, log_info, log_warn, SessionState, SmartMeter};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "broute-cli")]
#[command(about = "CLI tool for Wi-SUN B-route smart meters")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the meter and print every received frame until Ctrl-C
    Monitor {
        #[arg(short, long)]
        port: String,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        dongle: Option<broute_rs::DongleKind>,
        /// Properties to poll, e.g. E7,E8
        #[arg(long, value_delimiter = ',')]
        observe: Vec<String>,
        /// Base observation interval in milliseconds
        #[arg(long, default_value = "60000")]
        interval: u64,
        #[arg(short, long, default_value = "115200")]
        baudrate: u32,
        #[arg(short, long)]
        debug: bool,
    },
    /// Decode an ECHONET Lite frame given in hex
    Decode { hex: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Monitor {
            port,
            config,
            id,
            password,
            dongle,
            observe,
            interval,
            baudrate,
            debug,
        } => {
            let mut session = match config {
                Some(path) => SessionConfig::from_json_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => SessionConfig::default(),
            };
            if let Some(id) = id {
                session.id = id;
            }
            if let Some(password) = password {
                session.password = password.into();
            }
            if let Some(dongle) = dongle {
                session.dongle = dongle;
            }
            if !observe.is_empty() {
                session.observation_epcs = observe
                    .iter()
                    .map(|epc| hex_byte(epc).with_context(|| format!("invalid EPC {epc}")))
                    .collect::<Result<_>>()?;
            }
            session.debug |= debug;
            session.validate()?;

            init_logger(session.debug);
            monitor(port, baudrate, session, Duration::from_millis(interval)).await
        }
        Commands::Decode { hex } => {
            init_logger(false);
            decode(&hex)
        }
    }
}

async fn monitor(port: String, baudrate: u32, config: SessionConfig, interval: Duration) -> Result<()> {
    let serial = SerialConfig {
        port,
        baud_rate: baudrate,
        ..SerialConfig::default()
    };
    let stream = open_serial(&serial)?;
    let observe = !config.observation_epcs.is_empty();
    let (meter, mut notifications) = SmartMeter::spawn(stream, config);

    loop {
        tokio::select! {
            note = notifications.recv() => {
                let Some(note) = note else { break };
                if let Some(err) = note.error {
                    if note.status.state == SessionState::Failed {
                        bail!(err);
                    }
                    log_warn(&format!("{err}"));
                    continue;
                }
                match (note.peer, note.frame) {
                    (Some(peer), Some(frame)) => log_info(&format!("{} {}", peer.address, frame)),
                    _ if note.status.state == SessionState::Available => {
                        log_info("B-route session available");
                        meter.get_static().await?;
                        if observe {
                            meter.start_observation(interval).await?;
                        }
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log_info("interrupted");
                break;
            }
        }
    }

    let pan = meter.pan().await?;
    if pan.has_channel() {
        log_info(&format!("PAN descriptor: {}", serde_json::to_string(&pan)?));
    }
    meter.release().await?;
    Ok(())
}

fn decode(hex: &str) -> Result<()> {
    let frame = ElFrame::decode_hex(hex.trim()).context("not an ECHONET Lite frame")?;
    println!("{frame}");

    let Some(data) = frame.as_data() else {
        return Ok(());
    };
    println!("TID  {}", data.tid);
    println!("SEOJ {}", data.seoj);
    println!("DEOJ {}", data.deoj);
    println!("ESV  {:02X}", data.esv);
    for property in &data.properties {
        if PROPERTY_MAP_EPCS.contains(&property.epc) {
            let map = PropertyMap::from_form1(&property.edt)?;
            let codes: Vec<String> = map.codes().iter().map(|c| format!("{c:02X}")).collect();
            println!("  {:02X} [{}]", property.epc, codes.join(" "));
        } else {
            println!("  {:02X} {}", property.epc, encode_hex(&property.edt));
        }
    }
    Ok(())
}
