use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use csvnotion::caption::HostedCaptionProvider;
use csvnotion::cli::{self, Command, Opts};
use csvnotion::notion::client::{
    HttpNotionClient, DEFAULT_MAX_RETRIES, DEFAULT_WRITES_PER_SECOND,
};
use csvnotion::notion::NotionApi;
use csvnotion::progress::create_reporter;
use csvnotion::{run_delete_all, run_upload, RunStatus};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "csvnotion=debug"
        } else {
            "csvnotion=info"
        })
    });
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer);

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false);
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
    Ok(())
}

async fn run(opts: Opts) -> i32 {
    let invocation = match cli::build_invocation(opts) {
        Ok(invocation) => invocation,
        Err(err) => {
            error!("{err}");
            return 2;
        }
    };

    let api: Arc<dyn NotionApi> = Arc::new(HttpNotionClient::new(
        invocation.token,
        DEFAULT_WRITES_PER_SECOND,
        DEFAULT_MAX_RETRIES,
    ));
    let reporter = create_reporter();

    let result = match invocation.command {
        Command::DeleteAll => {
            run_delete_all(api, &invocation.database_id, reporter).await
        }
        Command::Upload(rules) => {
            let caption_provider = rules.caption.as_ref().map(|caption| {
                Arc::new(HostedCaptionProvider::new(caption.token.clone())) as _
            });
            run_upload(
                *rules,
                api,
                &invocation.database_id,
                reporter,
                caption_provider,
            )
            .await
        }
    };

    match result {
        Ok(RunStatus::Clean) => {
            info!("done");
            0
        }
        Ok(RunStatus::RowFailures(count)) => {
            error!(failed = count, "finished with row errors");
            1
        }
        Err(err) => {
            error!("{err}");
            2
        }
    }
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    let verbose = opts.verbose;
    let log_file = opts.log.clone();

    if let Err(err) = init_logging(verbose, log_file.as_deref()) {
        eprintln!("{err:#}");
        std::process::exit(2);
    }
    info!("csvnotion {}", env!("CARGO_PKG_VERSION"));

    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nAbort");
            std::process::exit(1);
        }
    });

    let code = run(opts).await;
    std::process::exit(code);
}
