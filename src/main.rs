use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payment_gateway::application::gateway::{Adapters, Gateway};
use payment_gateway::application::ingestion::IngestionError;
use payment_gateway::config::GatewayConfig;
use payment_gateway::domain::ports::EventBus;
use payment_gateway::interfaces::csv::payment_writer::PaymentWriter;
use payment_gateway::interfaces::json::order_reader::OrderReader;
use payment_gateway::telemetry::init_tracing;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const DRAIN_POLL: Duration = Duration::from_millis(5);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input orders, one `order.created` JSON document per line
    input: PathBuf,

    /// Path to persistent database (optional). Requires the `storage-rocksdb` feature.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Configuration file (yaml, toml or json)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("warn");
    let cli = Cli::parse();

    let mut config = GatewayConfig::load(cli.config.as_deref()).into_diagnostic()?;
    if cli.db_path.is_some() {
        config.storage.db_path = cli.db_path;
    }
    // Orders are fed through the in-process bus.
    config.kafka = None;

    let (adapters, bus) = Adapters::in_memory(&config);
    let adapters = adapters
        .with_configured_backends(&config)
        .await
        .into_diagnostic()?;
    let gateway = Gateway::new(&config, adapters);

    let topic = config.topics.order_created.clone();
    let file = File::open(&cli.input).into_diagnostic()?;
    for line in OrderReader::new(BufReader::new(file)).lines() {
        match line {
            Ok(line) => {
                let key = line
                    .parse()
                    .map(|order| order.order_id)
                    .unwrap_or_else(|_| format!("line-{}", line.line));
                bus.publish(&topic, &key, line.payload)
                    .await
                    .into_diagnostic()?;
            }
            Err(e) => eprintln!("Error reading order: {}", e),
        }
    }

    let (errors_tx, mut errors_rx) = mpsc::channel::<IngestionError>(64);
    let reporter = tokio::spawn(async move {
        while let Some(report) = errors_rx.recv().await {
            eprintln!(
                "Error ingesting order (partition {}, offset {}): {}",
                report.partition, report.offset, report.error
            );
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingestion = gateway.ingestion.with_error_channel(errors_tx);
    let consumer = tokio::spawn(async move { ingestion.run(shutdown_rx).await });

    while bus.lag(&config.consumer.group_id, &topic).await > 0 {
        tokio::time::sleep(DRAIN_POLL).await;
    }
    let _ = shutdown_tx.send(true);

    consumer.await.into_diagnostic()?.into_diagnostic()?;
    reporter.await.into_diagnostic()?;

    // Output final state
    let payments = gateway.service.list_payments().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(&payments).into_diagnostic()?;

    Ok(())
}
