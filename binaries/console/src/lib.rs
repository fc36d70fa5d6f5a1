pub mod console;

use anyhow::Result;
use tracing::warn;

use console::{ConsoleApp, ConsoleConfig, FilterChange, bridge::ServiceBundle};

/// What to show once the console is up.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Instance to open in the detail view.
    pub instance: Option<String>,
    /// Deep-link query string (`filter=..&sortBy=..`).
    pub query: Option<String>,
    /// Filter edits applied after the deep link, in order.
    pub changes: Vec<FilterChange>,
}

/// Connects to the configured Operate instance and runs until Ctrl-C.
#[cfg(feature = "protocol")]
pub fn run_console(config: ConsoleConfig, options: RunOptions) -> Result<()> {
    use anyhow::Context;

    config.validate()?;
    // The blocking HTTP client has to be created and dropped outside the
    // runtime.
    let bundle = console::bridge::default_service_bundle(&config.base_url).with_context(|| {
        format!("failed to initialize protocol clients for {}", config.base_url)
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run_app(&config, &bundle, options, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {err}");
        }
    }));
    drop(runtime);
    drop(bundle);
    result
}

/// Builds the console on `bundle`, applies `options` and renders until
/// `shutdown` resolves.
pub async fn run_app(
    config: &ConsoleConfig,
    bundle: &ServiceBundle,
    options: RunOptions,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let app = ConsoleApp::from_service_bundle(config, bundle);
    app.init();

    if let Err(err) = app.load_grouped_workflows().await {
        warn!("failed to load deployed workflows: {err}");
    }
    app.apply_deep_link(options.query.as_deref().unwrap_or(""))?;
    for change in options.changes {
        app.apply_change(change);
    }
    if let Some(id) = options.instance {
        app.select_instance(id);
    }

    app.run(shutdown).await;
    app.reset();
    Ok(())
}
