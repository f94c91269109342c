use std::{
    io::{self, Write},
    sync::Arc,
};

use {
    anyhow::{Result, bail},
    clap::Args,
    futures::StreamExt,
    skylark_chat::{ChatClient, ChatMessage, StreamEvent},
    skylark_config::SkylarkConfig,
    tracing::info,
};

use crate::context::token_manager;

#[derive(Args)]
pub struct ChatArgs {
    /// Message to send.
    #[arg(short, long)]
    message: String,

    /// Optional system prompt.
    #[arg(long)]
    system: Option<String>,

    /// Model override.
    #[arg(long)]
    model: Option<String>,

    /// Also print the model's reasoning, to stderr.
    #[arg(long)]
    show_reasoning: bool,
}

pub async fn handle_chat(args: ChatArgs, config: &SkylarkConfig) -> Result<()> {
    if config.chat.base_url.is_empty() {
        bail!("set [chat] base_url in skylark.toml or SKYLARK_CHAT_BASE_URL");
    }
    let manager = token_manager(config, false)?;
    let model = args.model.unwrap_or_else(|| config.chat.model.clone());
    let client = ChatClient::new(Arc::new(manager), &config.chat.base_url, model)
        .with_identity(config.chat.identity());

    let mut messages = Vec::new();
    if let Some(system) = args.system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(args.message));

    let mut stream = client.stream(&messages).await?;
    let mut stdout = io::stdout().lock();
    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Text(text) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            },
            StreamEvent::Reasoning(text) => {
                if args.show_reasoning {
                    eprint!("{text}");
                }
            },
            StreamEvent::Usage(usage) => {
                info!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "usage"
                );
            },
        }
    }
    writeln!(stdout)?;
    Ok(())
}
