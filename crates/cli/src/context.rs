use std::sync::Arc;

use {
    anyhow::Context,
    skylark_config::SkylarkConfig,
    skylark_oauth::{SystemBrowser, TokenManager, UrlOpener},
};

/// Leaves opening the sign-in URL to the user.
struct PrintOnly;

impl UrlOpener for PrintOnly {
    fn open(&self, _url: &str) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn token_manager(config: &SkylarkConfig, open_browser: bool) -> anyhow::Result<TokenManager> {
    let store = config.auth.secret_store()?;
    let opener: Arc<dyn UrlOpener> = if open_browser {
        Arc::new(SystemBrowser)
    } else {
        Arc::new(PrintOnly)
    };
    TokenManager::builder(config.auth.oauth_config(), Arc::new(store))
        .opener(opener)
        .build()
        .context("set [auth] issuer and client_id in skylark.toml, or SKYLARK_ISSUER and SKYLARK_CLIENT_ID")
}
