mod bootstrap;

use std::process::ExitCode;

use chrono::Utc;
use restock_core::registry::ProductRegistry;
use restock_core::settings::{PublishTarget, Settings};
use restock_core::time_utils::resolve_timezone;
use restock_data::fetcher::{TimelineClient, TimelineCredentials, DEFAULT_BASE_URL};
use restock_data::links::HttpLinkResolver;
use restock_runtime::credentials::SheetCredentials;
use restock_runtime::pipeline::{Pipeline, RunOptions, RunSummary};
use restock_runtime::publisher::{
    CsvPublisher, ReportSink, SheetsPublisher, StdoutPublisher, DEFAULT_SHEETS_BASE_URL,
};

#[tokio::main]
async fn main() -> ExitCode {
    let settings = Settings::load();

    if let Err(e) = bootstrap::ensure_directories()
        .and_then(|_| bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref()))
    {
        eprintln!("restock-stats: startup failed: {:#}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!("restock-stats v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Account: {}, Publish: {}, Timezone: {}",
        settings.account,
        settings.publish,
        settings.timezone
    );

    match run(&settings).await {
        Ok(summary) => {
            tracing::info!(
                inserted = summary.inserted,
                stored = summary.stored,
                rows = summary.report_rows,
                "run complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            if e.is_transient() {
                tracing::warn!("run aborted, will retry on the next schedule: {}", e);
            } else {
                tracing::error!("run failed: {}", e);
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(settings: &Settings) -> restock_core::Result<RunSummary> {
    let tz = resolve_timezone(&settings.timezone)?;
    let registry = ProductRegistry::load_or_default(settings.registry_path())?;
    tracing::debug!(products = registry.len(), "product registry loaded");

    let sink: Box<dyn ReportSink> = match settings.publish_target() {
        PublishTarget::Sheet => {
            let credentials = SheetCredentials::load_from(&settings.sheet_credentials_path())?;
            Box::new(SheetsPublisher::new(
                DEFAULT_SHEETS_BASE_URL,
                credentials,
                settings.sheet_name.clone(),
            )?)
        }
        PublishTarget::Csv => Box::new(CsvPublisher::new(settings.csv_path.clone())),
        PublishTarget::Stdout => Box::new(StdoutPublisher),
    };

    let store_path = settings.store_path();
    let pipeline = Pipeline::new(&registry, sink.as_ref(), RunOptions::from_settings(settings, tz));

    if settings.skip_fetch {
        return pipeline.run(&store_path, Utc::now()).await;
    }

    let credentials = TimelineCredentials::load_from(&settings.timeline_credentials_path())?;
    let client = TimelineClient::new(DEFAULT_BASE_URL, credentials)?;
    let pipeline = pipeline.with_source(&client);

    if settings.no_resolve_links {
        return pipeline.run(&store_path, Utc::now()).await;
    }
    let resolver = HttpLinkResolver::new()?;
    pipeline.with_resolver(&resolver).run(&store_path, Utc::now()).await
}
