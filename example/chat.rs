//! chat window against the configured endpoint.
//!
//! env: GEMINI_API_KEY (default gemini backend), or LLM_BACKEND=openai with
//! OPENAI_API_KEY / LLM_BASE_URL / LLM_MODEL for the `llm` crate backends.
//! f5 rebuilds the session from the current transcript.

use bevy::prelude::*;
use bevy_genai_chat::{
    Backend, ChatConfig, ChatSessionPlugin, ChatTheme, ChatViewPlugin, Endpoint, GeminiEndpoint,
    RestartSession, SessionSettings,
};

fn main() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let config = ChatConfig::from_env();
    let endpoint = Endpoint::from_config(&config).unwrap_or_else(|err| {
        error!(target: "chat", "backend {:?} unusable ({err}); falling back to gemini", config.backend);
        Endpoint::new(GeminiEndpoint::new(&ChatConfig { backend: Backend::Gemini, ..config.clone() }))
    });
    let theme = ChatTheme::default();

    App::new()
        .insert_resource(ClearColor(theme.background))
        .insert_resource(theme)
        .insert_resource(config)
        .insert_resource(SessionSettings::default())
        .insert_resource(endpoint)
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "Chat Genai".into(),
                #[cfg(target_arch = "wasm32")]
                canvas: Some("#bevy".into()),
                #[cfg(target_arch = "wasm32")]
                fit_canvas_to_parent: true,
                ..default()
            }),
            ..default()
        }))
        .add_plugins((ChatSessionPlugin, ChatViewPlugin))
        .add_systems(Startup, |mut commands: Commands| {
            commands.spawn(Camera2d);
        })
        .add_systems(Update, restart_on_f5)
        .run();
}

fn restart_on_f5(keys: Res<ButtonInput<KeyCode>>, mut ev: EventWriter<RestartSession>) {
    if keys.just_pressed(KeyCode::F5) {
        info!(target: "chat", "restarting session");
        ev.write(RestartSession);
    }
}
