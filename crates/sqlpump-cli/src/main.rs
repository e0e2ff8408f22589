mod config;
mod output;
mod telemetry;

use clap::Parser;
use config::Config;
use tokio::io::AsyncReadExt;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Runs SQL statements over one PostgreSQL connection, pipelined through
/// its query queue.
#[derive(Debug, Parser)]
#[command(name = "sqlpump", version)]
struct Args {
    #[arg(long, default_value = "config.example.toml")]
    config: String,
    /// Log connection and dispatch events.
    #[arg(short, long)]
    verbose: bool,
    /// Statements to run; read from stdin and split on `;` when omitted.
    sql: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from_path(&args.config)?;
    if let Some(metrics) = &config.metrics {
        telemetry::serve(&metrics.listen_addr).await?;
    }

    let statements = if args.sql.is_empty() {
        let mut input = String::new();
        tokio::io::stdin().read_to_string(&mut input).await?;
        output::split_statements(&input)
    } else {
        args.sql
    };
    run(config, statements).await
}

async fn run(config: Config, statements: Vec<String>) -> anyhow::Result<()> {
    let (client, driver) = sqlpump_pg::connect(config.connection, config.client)?;

    // Submit everything first so the statements queue up behind each other.
    let mut submitted = Vec::with_capacity(statements.len());
    for sql in statements {
        submitted.push(client.submit(sql).await);
    }
    info!(statements = submitted.len(), "statements submitted");

    let mut failed = 0usize;
    for (index, query) in submitted.into_iter().enumerate() {
        let outcome = match query {
            Ok(query) => query.wait().await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(result) => print!("{}", output::render(&result)),
            Err(err) => {
                failed += 1;
                error!(statement = index + 1, "{err}");
            }
        }
    }

    let _ = client.close().await;
    drop(client);
    if let Err(err) = driver.await? {
        return Err(err.context("connection failed"));
    }
    if failed > 0 {
        return Err(anyhow::anyhow!("{failed} statement(s) failed"));
    }
    Ok(())
}
