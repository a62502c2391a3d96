/// Install the global fmt subscriber for a hosting binary.
///
/// `RUST_LOG` sets the filter; `LOG_FORMAT=json` switches to JSON lines.
/// Fails if a global subscriber is already installed.
pub fn init() -> anyhow::Result<()> {
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "user_accounts=debug,sqlx=warn".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    let installed = if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).try_init()
    };
    installed.map_err(|e| anyhow::anyhow!(e.to_string()))
}
