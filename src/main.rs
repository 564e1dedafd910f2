use anyhow::{Context, Result};
use cuebridge::{
    Config, Diagnostics, EndpointTable, JobIds, OscClient, PatternGenerator, PortDiscovery,
    RingLog, Server, ToolContext, ToolDispatcher,
};
use std::io;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// 탐색은 자체 current-thread 런타임에서 block_on 하므로 main은 동기 함수로 유지
fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    // stdout은 응답 전용이므로 로그는 stderr로
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.as_str().to_ascii_lowercase()));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false),
        )
        .init();

    let config = Arc::new(config);
    let log = Arc::new(RingLog::new(config.log.max_entries, config.log.level));

    let discovery = Arc::new(
        PortDiscovery::with_lsof(&config, Arc::clone(&log))
            .context("Failed to set up port discovery")?,
    );
    let osc = Arc::new(OscClient::new(
        Arc::clone(&config),
        Arc::new(EndpointTable::new()),
        Arc::clone(&discovery),
        Arc::clone(&log),
    ));
    let diagnostics = Diagnostics::new(
        Arc::clone(&config),
        discovery,
        Arc::clone(&osc),
        Arc::clone(&log),
    );

    let ctx = ToolContext {
        config: Arc::clone(&config),
        log: Arc::clone(&log),
        osc,
        diagnostics,
        generator: Box::new(PatternGenerator::new()),
        jobs: JobIds::new(),
    };
    let server = Server::new(ToolDispatcher::with_builtin_tools(ctx));

    log.info(format!(
        "cuebridge {} ready (host {}, cue port {}, command port {})",
        env!("CARGO_PKG_VERSION"),
        config.host,
        config.cue_port,
        config
            .port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "discovered".to_string())
    ));

    let stdin = io::stdin();
    let stdout = io::stdout();
    server
        .serve(stdin.lock(), stdout.lock())
        .context("stdio loop failed")?;
    Ok(())
}
