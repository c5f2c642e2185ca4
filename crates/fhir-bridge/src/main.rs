use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

mod aggregator;
mod client;
mod fhir;
mod hub;
mod parser;
mod serial;

use aggregator::Aggregator;
use client::FhirClient;
use parser::Vital;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("could not open serial port {port}: {err}")]
    SerialOpen {
        port: String,
        err: serialport::Error,
    },
    #[error("reading from the serial port failed: {0}")]
    SerialRead(std::io::Error),
    #[error("could not set up {device}: {err}")]
    HubSetup { device: String, err: String },
    #[error("sensor hub error: {0}")]
    Hub(String),
}

pub type Update = Result<Vital, SourceError>;

#[derive(Parser)]
#[command(name = "fhir-bridge")]
#[command(version = "1.0")]
#[command(about = "averages vitals from a pulse-oximetry sensor and posts \
    them as FHIR observation bundles")]
struct Cli {
    /// endpoint the bundles are posted to
    #[arg(long, default_value = "https://httpbin.org/post")]
    url: String,
    /// FHIR reference of the monitored patient, e.g. Patient/example
    #[arg(long)]
    patient: Option<String>,
    /// value for the X-API-KEY header, header is omitted when unset
    #[arg(long)]
    api_key: Option<String>,
    /// seconds between heart rate posts
    #[arg(long, default_value = "1")]
    heart_rate_every: u64,
    /// seconds between oxygen saturation posts
    #[arg(long, default_value = "5")]
    oxygen_every: u64,
    /// seconds between ambient temperature/humidity posts
    #[arg(long, default_value = "900")]
    environment_every: u64,
    #[command(subcommand)]
    source: Source,
}

#[derive(Subcommand)]
enum Source {
    /// read vitals lines from a serial attached microcontroller
    Serial {
        #[arg(short, long, default_value = "/dev/ttyACM0")]
        port: String,
        #[arg(short, long, default_value = "115200")]
        baud: u32,
    },
    /// poll the biometric sensor hub directly over i2c
    Hub {
        #[arg(long, default_value = "/dev/i2c-1")]
        i2c: String,
        #[arg(long, default_value = "/dev/gpiochip0")]
        gpiochip: String,
        /// gpio line wired to the hub's reset input
        #[arg(long, default_value = "4")]
        reset_line: u32,
        /// gpio line wired to the hub's mfio input
        #[arg(long, default_value = "13")]
        mfio_line: u32,
        /// request the extended report (adds the R ratio and extra status)
        #[arg(long)]
        extended: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    setup_tracing();

    let (tx, rx) = mpsc::channel(100);
    match cli.source {
        Source::Serial { ref port, baud } => serial::start_reading(port.clone(), baud, tx),
        Source::Hub {
            ref i2c,
            ref gpiochip,
            reset_line,
            mfio_line,
            extended,
        } => hub::start_monitoring(
            hub::HubConfig {
                i2c: i2c.clone(),
                gpiochip: gpiochip.clone(),
                reset_line,
                mfio_line,
                extended,
            },
            tx,
        ),
    }

    let client = FhirClient::new(&cli.url, cli.api_key.as_deref())?;
    info!("posting observation bundles to {}", cli.url);
    post_loop(rx, &client, &cli).await;
    Ok(())
}

/// Multiplexes the vitals channel and the three posting cadences. Each
/// cadence drains its own averaging window; an empty window posts nothing.
async fn post_loop(mut rx: mpsc::Receiver<Update>, client: &FhirClient, cli: &Cli) {
    let mut agg = Aggregator::default();
    let patient = cli.patient.as_deref();

    let mut heart_rate = ticker(cli.heart_rate_every);
    let mut oxygen = ticker(cli.oxygen_every);
    let mut environment = ticker(cli.environment_every);

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Some(Ok(vital)) => agg.add(vital),
                Some(Err(report)) => warn!("vitals source: {report}"),
                None => {
                    info!("vitals source stopped");
                    break;
                }
            },
            _ = heart_rate.tick() => {
                if let Some(avg) = agg.take_heart_rate() {
                    post(client, vec![fhir::heart_rate(avg, patient)]).await;
                }
            }
            _ = oxygen.tick() => {
                if let Some(avg) = agg.take_oxygen() {
                    post(client, vec![fhir::oxygen_saturation(avg, patient)]).await;
                }
            }
            _ = environment.tick() => {
                let (temperature, humidity) = agg.take_environment();
                let observations: Vec<_> = [
                    temperature.map(|avg| fhir::ambient_temperature(avg, patient)),
                    humidity.map(|avg| fhir::relative_humidity(avg, patient)),
                ]
                .into_iter()
                .flatten()
                .collect();
                post(client, observations).await;
            }
        }
    }
}

fn ticker(seconds: u64) -> tokio::time::Interval {
    let mut interval = interval(Duration::from_secs(seconds));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn post(client: &FhirClient, observations: Vec<fhir::Observation>) {
    let Some(bundle) = fhir::bundle(observations) else {
        return;
    };
    if let Err(err) = client.post_bundle(&bundle).await {
        warn!("could not deliver bundle: {err}");
    }
}

fn setup_tracing() {
    use tracing::level_filters::LevelFilter;
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{self, layer::SubscriberExt, util::SubscriberInitExt, Layer};

    let env_filter = tracing_subscriber::filter::EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let file_subscriber = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false)
        .with_filter(env_filter);
    tracing_subscriber::registry()
        .with(file_subscriber)
        .with(ErrorLayer::default())
        .init();
}
