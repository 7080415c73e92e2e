//! Assistant server binary.
//!
//! Wires the conversation core to its backends and serves the three
//! external surfaces: the satellite voice protocol, the streaming chat
//! endpoint, and the admin editor for the live system message.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vesper::asr::HttpTranscriber;
use vesper::config::{AssistantConfig, read_key_file};
use vesper::core::Assistant;
use vesper::llm::OllamaClient;
use vesper::prompt::PromptAssembler;
use vesper::store::BehaviourStore;
use vesper::synth::HttpSynthesizer;
use vesper::tools::behaviour::{ListBehaviour, RemoveBehaviour, UpdateBehaviour};
use vesper::tools::close::CloseVoiceChannel;
use vesper::tools::home::{HomeAssistantClient, HomeAutomationAction};
use vesper::tools::math::PerformMathOperation;
use vesper::tools::search::PerformSearch;
use vesper::tools::time::GetCurrentTime;
use vesper::tools::weather::CheckWeather;
use vesper::tools::website::OpenWebsite;
use vesper::tools::ToolRegistry;
use vesper::voice::VoiceServer;
use vesper::web::admin::{self, AdminState};
use vesper::web::chat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("vesper.toml"), PathBuf::from);
    let config = AssistantConfig::load(&config_path)?;
    info!(config = %config_path.display(), "starting vesper");

    // Home Assistant client, if configured.
    let home = match (
        &config.integrations.home_assistant_url,
        &config.integrations.home_assistant_key_file,
    ) {
        (Some(url), Some(key_file)) => match read_key_file(key_file, "HA_API_KEY") {
            Ok(token) => Some(Arc::new(HomeAssistantClient::new(url.clone(), token))),
            Err(e) => {
                warn!("home automation disabled: {e}");
                None
            }
        },
        _ => None,
    };

    // Weather API key, if configured.
    let weather_key = config
        .integrations
        .weather_key_file
        .as_deref()
        .and_then(|path| match read_key_file(path, "WEATHER_API_KEY") {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("weather lookups disabled: {e}");
                None
            }
        });

    let behaviour = Arc::new(BehaviourStore::new(config.store.behaviour_path.clone()));
    let prompt = PromptAssembler::new(
        config.store.instructions_path.clone(),
        config.store.knowledge_path.clone(),
        Arc::clone(&behaviour),
        home.clone(),
    );

    // Voice tools lead the registry so they lead the prompt.
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CloseVoiceChannel));
    registry.register(Arc::new(GetCurrentTime));
    registry.register(Arc::new(PerformMathOperation));
    registry.register(Arc::new(PerformSearch::new()));
    registry.register(Arc::new(OpenWebsite::new()));
    registry.register(Arc::new(HomeAutomationAction::new(home)));
    registry.register(Arc::new(CheckWeather::new(
        weather_key,
        config.integrations.weather_default_location.clone(),
    )));
    registry.register(Arc::new(UpdateBehaviour::new(Arc::clone(&behaviour))));
    registry.register(Arc::new(RemoveBehaviour::new(Arc::clone(&behaviour))));
    registry.register(Arc::new(ListBehaviour::new(behaviour)));

    let model = Arc::new(OllamaClient::new(&config.llm));
    let assistant = Arc::new(Assistant::new(prompt, registry, model));

    let shutdown = CancellationToken::new();

    // Voice protocol server.
    let voice = VoiceServer::new(
        Arc::clone(&assistant),
        Arc::new(HttpTranscriber::new(config.speech.transcribe_url.clone())),
        Arc::new(HttpSynthesizer::new(
            config.speech.synthesize_url.clone(),
            config.speech.voice.clone(),
        )),
        config.clone(),
    );
    let voice_task = tokio::spawn(voice.run(shutdown.clone()));

    // Chat surface.
    let chat_app = chat::router(Arc::clone(&assistant));
    let chat_listener = tokio::net::TcpListener::bind(&config.web.chat_bind).await?;
    info!(addr = %config.web.chat_bind, "chat surface listening");
    let chat_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let serve = axum::serve(chat_listener, chat_app)
            .with_graceful_shutdown(async move { chat_shutdown.cancelled().await });
        if let Err(e) = serve.await {
            warn!("chat server failed: {e}");
        }
    });

    // Admin surface.
    let admin_token = config
        .web
        .admin_token_file
        .as_deref()
        .and_then(|path| read_key_file(path, "ADMIN_TOKEN").ok());
    let admin_state = Arc::new(AdminState::new(
        config.store.instructions_path.clone(),
        admin_token,
    )?);
    let admin_app = admin::router(admin_state);
    let admin_listener = tokio::net::TcpListener::bind(&config.web.admin_bind).await?;
    info!(addr = %config.web.admin_bind, "admin surface listening");
    let admin_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let serve = axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(async move { admin_shutdown.cancelled().await });
        if let Err(e) = serve.await {
            warn!("admin server failed: {e}");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown.cancel();

    if let Err(e) = voice_task.await? {
        warn!("voice server exited with error: {e}");
    }
    Ok(())
}
