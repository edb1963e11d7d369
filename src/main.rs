use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mail_triage::channels::{ImapMailbox, SmtpMailTransport};
use mail_triage::config::TriageConfig;
use mail_triage::extract::pdf::{DEFAULT_OCR_LANG, DEFAULT_OCR_TIMEOUT};
use mail_triage::extract::{ContentExtractor, OcrBackend, TesseractOcr};
use mail_triage::pipeline::{
    AzureMapsGeocoder, Forwarder, Geocoder, MacroArea, MetricsFile, Poller, TriagePipeline,
    create_classifier, spawn_poller,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = TriageConfig::from_env().context("invalid configuration")?;

    let _guard = setup_tracing(&config.log_dir);

    eprintln!("📬 Mail Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {} @ {}", config.email, config.imap.host);
    eprintln!(
        "   LLM: {} ({})",
        config.llm.backend.name(),
        config.llm.model
    );
    eprintln!("   Confidence threshold: {}", config.routing.threshold);
    eprintln!("   Control mailbox: {}", config.routing.control_mailbox);
    for area in MacroArea::ROUTABLE {
        eprintln!(
            "   Route {}: {}",
            area,
            config.routing.recipient(area).unwrap_or("(control mailbox)")
        );
    }
    eprintln!("   Poll interval: {}s", config.poller.interval.as_secs());

    // ── Departments ─────────────────────────────────────────────────────
    let departments = config
        .departments()
        .with_context(|| format!("loading {}", config.departments_file.display()))?;
    eprintln!("   Departments: {}", departments.len());

    // ── Adapters ────────────────────────────────────────────────────────
    let mailbox = Arc::new(ImapMailbox::new(config.imap.clone()));
    let transport = Arc::new(SmtpMailTransport::new(&config.smtp).context("building SMTP transport")?);
    let classifier = create_classifier(&config.llm, config.department_mismatch_penalty)
        .context("building classifier")?;

    let geocoder: Option<Arc<dyn Geocoder>> = match &config.geocoder {
        Some(geo) => {
            let client = AzureMapsGeocoder::new(geo.api_key.clone(), &geo.api_base, geo.timeout)
                .context("building geocoder")?;
            eprintln!("   Geocoder: enabled");
            Some(Arc::new(client))
        }
        None => {
            eprintln!("   Geocoder: disabled (AZURE_API_KEY not set)");
            None
        }
    };

    let ocr: Option<Arc<dyn OcrBackend>> = if config.ocr_enabled {
        match TesseractOcr::detect(DEFAULT_OCR_LANG, DEFAULT_OCR_TIMEOUT).await {
            Some(tesseract) => {
                eprintln!("   OCR: {}", tesseract.name());
                Some(Arc::new(tesseract))
            }
            None => {
                eprintln!("   OCR: unavailable (pdftoppm/tesseract not found)");
                None
            }
        }
    } else {
        eprintln!("   OCR: disabled");
        None
    };
    eprintln!();

    // ── Pipeline ────────────────────────────────────────────────────────
    let forwarder = Forwarder::new(
        transport,
        config.email.clone(),
        config.routing.control_mailbox.clone(),
    );
    let pipeline = Arc::new(TriagePipeline::new(
        ContentExtractor::new(ocr),
        classifier,
        geocoder,
        forwarder,
        config.routing.clone(),
        departments,
    ));

    let poller = Poller::new(
        mailbox,
        pipeline,
        MetricsFile::new(&config.metrics_file),
        config.poller.clone(),
    );
    let (handle, shutdown) = spawn_poller(poller);

    shutdown_signal().await;
    tracing::info!("Shutdown requested, waiting for the poller to finish");
    let _ = shutdown.send(true);

    let state = handle.await.context("poller task failed")?;
    state.metrics.log_stats();
    tracing::info!(
        processed = state.processed_count(),
        "Mail triage stopped"
    );

    Ok(())
}

/// Console plus a daily-rolling file under `log_dir`. The returned guard
/// must stay alive for the file writer to flush.
fn setup_tracing(log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "mail-triage.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer().with_target(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl-C received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}
