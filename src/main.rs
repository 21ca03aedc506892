use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use mailgram::audit;
use mailgram::config::{Config, Mode};
use mailgram::forwarder::{self, MailForwarder};
use mailgram::github::GithubClient;
use mailgram::http;
use mailgram::telegram::api::TelegramApi;
use mailgram::telegram::commands::{self, AboutInfo};
use mailgram::templates::MessageTemplates;

#[derive(Parser)]
#[command(name = "mailgram", version, about = "Relays unread IMAP mail to a Telegram chat")]
struct Cli {
    /// Operation mode; selects which bot token variable is used
    #[arg(long, value_enum, default_value_t = Mode::Development)]
    mode: Mode,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    let config = Config::from_env(cli.mode).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  See .env.example for the required variables");
        std::process::exit(1);
    });

    let _log_guard = audit::init(Path::new(&config.log_file))?;

    eprintln!("📬 mailgram v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mode: {}", config.mode.as_str());
    eprintln!(
        "   Mailbox: {} at {}:{}",
        config.mail_login, config.imap_host, config.imap_port
    );
    eprintln!(
        "   Chat: {}{}",
        config.group_id,
        config
            .thread_id
            .map(|t| format!(" (topic {t})"))
            .unwrap_or_default()
    );
    eprintln!("   Templates: {}", config.template_path);
    eprintln!("   Check interval: {}s", config.check_interval_secs);
    eprintln!(
        "   Uptime probe: http://0.0.0.0:{}/api/uptime",
        config.http_port
    );
    eprintln!("   Log file: {}\n", config.log_file);

    let templates = MessageTemplates::load(Path::new(&config.template_path)).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let api = Arc::new(TelegramApi::new(config.bot_token.clone()));

    // A failed getMe only costs the @BotName command suffix, so it is
    // not worth refusing to start over.
    let me = match api.get_me().await {
        Ok(me) => {
            tracing::info!("Bot {} (@{}) is ready", me.first_name, me.username.as_deref().unwrap_or("?"));
            Some(me)
        }
        Err(e) => {
            tracing::warn!("getMe failed at startup: {e}");
            None
        }
    };

    let forwarder = Arc::new(MailForwarder::new(
        &config,
        templates,
        Arc::clone(&api),
    ));
    let (forwarder_handle, forwarder_shutdown) =
        forwarder::spawn_forwarder(Arc::clone(&forwarder));

    let github = match (&config.github_repo, &config.github_token) {
        (Some(repo), Some(token)) => Some(GithubClient::new(repo.clone(), token.clone())),
        _ => None,
    };
    let about = AboutInfo {
        username: me.and_then(|me| me.username),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: config.mode,
        github,
    };
    let (_command_handle, command_shutdown) = commands::spawn_command_loop(
        Arc::clone(&api),
        Arc::clone(&forwarder),
        Arc::clone(&forwarder_shutdown),
        about,
    );

    let app = http::uptime_routes();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    tracing::info!(port = config.http_port, "Liveness endpoint started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    forwarder_shutdown.store(true, Ordering::Relaxed);
    command_shutdown.store(true, Ordering::Relaxed);

    // Give an in-flight mail check a moment to finish, then cut it off.
    let abort = forwarder_handle.abort_handle();
    if tokio::time::timeout(Duration::from_secs(3), forwarder_handle)
        .await
        .is_err()
    {
        abort.abort();
    }

    Ok(())
}
