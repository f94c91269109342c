use {
    anyhow::Result,
    clap::Subcommand,
    skylark_config::SkylarkConfig,
    skylark_oauth::{Clock, SystemClock, TokenRecord},
};

use crate::context::token_manager;

#[derive(Subcommand)]
pub enum AuthAction {
    /// Sign in through the browser.
    Login {
        /// Only print the sign-in URL instead of opening the browser.
        #[arg(long)]
        no_browser: bool,
    },
    /// Show the current sign-in state.
    Status,
    /// Sign out and delete the stored token.
    Logout,
}

pub async fn handle_auth(action: AuthAction, config: &SkylarkConfig) -> Result<()> {
    match action {
        AuthAction::Login { no_browser } => login(config, !no_browser).await,
        AuthAction::Status => status(config).await,
        AuthAction::Logout => logout(config).await,
    }
}

async fn login(config: &SkylarkConfig, open_browser: bool) -> Result<()> {
    let manager = token_manager(config, open_browser)?;
    let record = manager
        .login_without_auto_open(move |url| {
            if open_browser {
                println!("Opening your browser to sign in. If it does not open, visit:\n{url}");
            } else {
                println!("Visit this URL to sign in:\n{url}");
            }
            println!("Waiting for sign-in to complete...");
        })
        .await?;
    println!("Signed in ({}).", describe_expiry(&record, SystemClock.now()));
    Ok(())
}

async fn status(config: &SkylarkConfig) -> Result<()> {
    let manager = token_manager(config, false)?;
    println!("Issuer: {}", manager.config().issuer);
    match manager.current().await {
        Some(record) => {
            println!("Token:  {}", describe_expiry(&record, SystemClock.now()));
            println!(
                "Refresh token: {}",
                if record.has_refresh_token() { "present" } else { "none" }
            );
            if let Some(scope) = &record.scope {
                println!("Scopes: {scope}");
            }
        },
        None => println!("Not signed in. Run `skylark auth login`."),
    }
    Ok(())
}

async fn logout(config: &SkylarkConfig) -> Result<()> {
    token_manager(config, false)?.logout().await;
    println!("Signed out.");
    Ok(())
}

fn describe_expiry(record: &TokenRecord, now: u64) -> String {
    if record.expires_at > now {
        let remaining = record.expires_at - now;
        let hours = remaining / 3600;
        let mins = (remaining % 3600) / 60;
        format!("valid, {hours}h {mins}m remaining")
    } else if record.has_refresh_token() {
        "expired, will refresh on next use".to_string()
    } else {
        "expired".to_string()
    }
}
