//! sunsynk-gw CLI entry point.
//!
//! Lists the sensor catalog, prints an example configuration, runs the poll
//! loop or performs a single write.
//!
//! `poll` exits with a failure status when the inverter cannot be reached or
//! reads keep failing, so that a supervisor (systemd, s6, a container runtime)
//! restarts it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info};

use sunsynk_gw::config::{Config, Driver, InverterConfig, EXAMPLE_CONFIG};
use sunsynk_gw::core::logging::{self, log_banner};
use sunsynk_gw::prelude::*;
use sunsynk_gw::transport::SimulatedTransport;

/// Sunsynk Gateway - inverter register access over Modbus
#[derive(Parser, Debug)]
#[command(name = "sunsynk-gw", version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the sensor catalog
    Sensors {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print an example configuration
    Example,

    /// Poll the configured sensors
    Poll {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Read once and exit
        #[arg(long)]
        once: bool,

        /// Print readings as JSON lines
        #[arg(long)]
        jsonl: bool,
    },

    /// Write one setting and read it back
    Write {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Sensor id (see `sensors`)
        sensor: String,

        /// New value: number, option label or HH:MM
        value: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Sensors { json } => list_sensors(json),
        Commands::Example => {
            println!("{}", EXAMPLE_CONFIG);
            Ok(())
        }
        Commands::Poll {
            config,
            once,
            jsonl,
        } => poll(&config, once, jsonl).await,
        Commands::Write {
            config,
            sensor,
            value,
        } => write(&config, &sensor, &value).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn list_sensors(json: bool) -> Result<()> {
    if json {
        let sensors: Vec<&Sensor> = SENSORS_5KW.iter().map(|s| s.as_ref()).collect();
        let text = serde_json::to_string_pretty(&sensors)
            .map_err(|e| InverterError::invalid_data(e.to_string()))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Sensors ({}):", SENSORS_5KW.len());
    println!();
    for sensor in SENSORS_5KW.iter() {
        let rw = if sensor.kind.is_writable() {
            " (rw)"
        } else {
            ""
        };
        println!(
            "  {:<32} {:<20} {:<6} {}{}",
            sensor.id,
            format!("{:?}", sensor.address),
            sensor.unit,
            kind_name(&sensor.kind),
            rw
        );
    }
    Ok(())
}

fn kind_name(kind: &SensorKind) -> &'static str {
    match kind {
        SensorKind::Plain => "plain",
        SensorKind::Temperature => "temperature",
        SensorKind::Serial => "serial",
        SensorKind::Fault => "fault",
        SensorKind::InverterState => "inverter_state",
        SensorKind::SdStatus => "sd_status",
        SensorKind::Math { .. } => "math",
        SensorKind::Number { .. } => "number",
        SensorKind::Select { .. } => "select",
        SensorKind::Time => "time",
    }
}

fn build_transport(config: &InverterConfig) -> Result<Box<dyn RegisterTransport>> {
    match config.driver {
        #[cfg(feature = "modbus-tcp")]
        Driver::ModbusTcp => {
            use sunsynk_gw::transport::{ModbusTcpConfig, ModbusTcpTransport};

            let tcp = ModbusTcpConfig::new(&config.address)
                .with_server_id(config.server_id)
                .with_connect_timeout(config.connect_timeout());
            Ok(Box::new(ModbusTcpTransport::new(tcp)))
        }
        #[cfg(not(feature = "modbus-tcp"))]
        Driver::ModbusTcp => Err(InverterError::config(
            "driver modbus_tcp requires the modbus-tcp feature",
        )),
        Driver::Simulated => Ok(Box::new(SimulatedTransport::new())),
    }
}

async fn open_session(config: &Config) -> Result<Session<Box<dyn RegisterTransport>>> {
    let transport = build_transport(&config.inverter)?;
    let mut session = Session::new(transport, config.inverter.engine());

    if let Err(e) = session.connect().await {
        log_banner(&format!("Could not connect to {}", config.inverter.address));
        return Err(e);
    }
    Ok(session)
}

async fn poll(path: &Path, once: bool, jsonl: bool) -> Result<()> {
    let config = Config::load(path)?;
    let sensors = config.sensors(&SENSORS_5KW)?;

    let mut session = open_session(&config).await?;
    session.track(sensors);
    info!(
        "Polling {} sensors every {:?}",
        session.tracked().len(),
        config.polling.interval()
    );

    let mut driver = PollDriver::new(session.into_shared(), config.polling.retry_policy());

    if once {
        let outcome = driver.poll_tracked().await?;
        let values = driver.session().lock().await.values();
        print_batch(&values, jsonl);
        driver.session().lock().await.disconnect().await?;
        return match outcome {
            CycleOutcome::Complete(_) => Ok(()),
            CycleOutcome::Failed { error, .. } => Err(InverterError::Transport(error)),
        };
    }

    let store = Arc::new(MemoryStore::new());
    let printer = tokio::spawn(print_events(store.subscribe(), jsonl));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    // No in-process writers; the channel stays open for the loop's lifetime.
    let (_write_tx, write_rx) = mpsc::channel::<WriteRequest>(16);

    let result = driver
        .run(store.as_ref(), config.polling.interval(), write_rx, shutdown_rx)
        .await;

    // Closing the channel lets the printer drain the last cycle and stop.
    drop(store);
    if let Err(e) = printer.await {
        error!("Output task failed: {}", e);
    }
    if let Err(e) = driver.session().lock().await.disconnect().await {
        error!("Disconnect failed: {}", e);
    }
    result
}

async fn write(path: &Path, sensor_id: &str, value: &str) -> Result<()> {
    let config = Config::load(path)?;
    let sensor = SENSORS_5KW
        .get(sensor_id)
        .cloned()
        .ok_or_else(|| InverterError::UnknownSensor(sensor_id.to_string()))?;
    if !sensor.kind.is_writable() {
        return Err(InverterError::ReadOnly(sensor.id.clone()));
    }
    let value: Value = value.parse().unwrap_or_else(|never| match never {});

    let mut session = open_session(&config).await?;
    session.track([sensor.clone()]);

    let mut driver = PollDriver::new(session.into_shared(), config.polling.retry_policy());
    let report = driver.write(&sensor, &value).await?;

    let mut session = driver.session().lock().await;
    let confirmed = session.value(&sensor.id).cloned().unwrap_or_default();
    println!("{}: {} (registers {:?})", sensor.id, confirmed, report.registers);
    session.disconnect().await?;
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<ValueEvent>, jsonl: bool) {
    loop {
        match events.recv().await {
            Ok(ValueEvent::Changed(batch)) => print_batch(&batch, jsonl),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Output lagging, skipped {} updates", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_batch(batch: &ValueBatch, jsonl: bool) {
    for reading in batch {
        if jsonl {
            match serde_json::to_string(reading) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Cannot serialize {}: {}", reading.sensor_id, e),
            }
        } else if reading.unit.is_empty() {
            println!("{}: {}", reading.sensor_id, reading.value);
        } else {
            println!("{}: {} {}", reading.sensor_id, reading.value, reading.unit);
        }
    }
}
