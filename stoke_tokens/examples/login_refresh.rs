use std::{sync::Arc, time::Duration};

use clap::Parser;
use stoke_clock::DurationSecs;
use stoke_tokens::{AccessToken, Password, RefresherConfig, Username};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The base URL of the authority, without the `/api/...` suffix
    #[clap(short, long, env)]
    auth_url: String,

    /// The username to log in with
    #[clap(short, long, env)]
    username: String,

    /// The password to log in with
    #[clap(short, long, env, hide_env_values = true)]
    password: String,

    /// Seconds before expiry at which to refresh
    #[clap(short, long, env, default_value_t = 5)]
    refresh_window: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = RefresherConfig {
        refresh_window: DurationSecs(opts.refresh_window),
        ..RefresherConfig::default()
    };

    let refresher = Arc::new(config.build(AccessToken::from_static(""))?);
    refresher
        .login(
            &opts.auth_url,
            &Username::from(opts.username),
            &Password::from(opts.password),
        )
        .await?;

    let _refresh = refresher.spawn_refresh();

    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;

        let creds = refresher.call_credentials().await;
        let state = refresher.state().await;
        if creds.is_empty() {
            tracing::error!("credentials lost; log in again");
            break;
        }

        tracing::info!(
            token = format_args!("{:#?}", creds.token()),
            expiry = state.expiry.0,
            "pulled credentials"
        );
    }

    Ok(())
}
