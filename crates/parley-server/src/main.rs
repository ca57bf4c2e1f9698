use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use parley_server::api::{self, AppState};
use parley_server::console::run_console;
use parley_server::files::DiskFileStore;
use parley_server::mailer::LogMailer;
use parley_server::persistence::SqlitePersistence;
use parley_server::{ChatServer, ServerConfig, ServerContext};
use parley_store::Database;

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run());
    // The console's blocking stdin read must not hold the process open.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        listen = %config.listen_addr,
        http = %config.http_addr,
        database = %config.database_path.display(),
        files = %config.file_storage_path.display(),
        "Loaded configuration"
    );
    info!(
        instance = %config.instance_name,
        admin_enabled = config.admin_token.is_some(),
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize adapters
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    let store = Arc::new(SqlitePersistence::new(db));
    let files =
        Arc::new(DiskFileStore::new(config.file_storage_path.clone(), config.max_file_size).await?);
    let mailer = Arc::new(LogMailer);

    let listen_addr = config.listen_addr;
    let http_addr = config.http_addr;
    let ctx = Arc::new(ServerContext::new(config, store, mailer, files));

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic throttle cleanup (every 5 minutes, evict buckets idle >10 min)
    let throttle = ctx.throttle.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            throttle.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Chat listener, HTTP API and operator console
    // -----------------------------------------------------------------------
    let server = ChatServer::bind(listen_addr, ctx.clone()).await?;
    let handle = server.handle();
    let mut chat = tokio::spawn(server.run());

    let http_shutdown = CancellationToken::new();
    let http = tokio::spawn(api::serve(
        AppState { ctx: ctx.clone() },
        http_addr,
        http_shutdown.clone(),
    ));

    let console_handle = handle.clone();
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = run_console(stdin, tokio::io::stdout(), console_handle).await {
            error!(error = %e, "Console failed");
        }
    });

    // -----------------------------------------------------------------------
    // 6. Run until the listener stops (console `exit`, Ctrl+C or failure)
    // -----------------------------------------------------------------------
    let outcome = tokio::select! {
        result = &mut chat => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            handle.stop();
            chat.await
        }
    };

    http_shutdown.cancel();
    if let Err(e) = http.await? {
        error!(error = %e, "HTTP server failed");
    }

    match outcome? {
        Ok(()) => {
            info!("Server stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Chat listener failed");
            Err(e.into())
        }
    }
}
