//! bevy_genai_chat: a bevy chat client for hosted llm endpoints.
//!
//! - `Conversation` owns the transcript, the remote session handle and the
//!   prompt draft; every mutation goes through its methods.
//! - exchanges are strictly serialized: one request in flight, one assistant
//!   message per user message, failures become a fixed sentinel reply.
//! - never blocks the main thread: on native we spawn onto a tiny tokio
//!   runtime (no bevy pool blocking); on wasm we use bevy's async pool,
//!   which yields to the browser/event loop.
//! - responses are split into prose/code segments (`extract`) and rendered
//!   into styled runs (`render`) for the chat view (`view`).

use std::sync::Arc;

use bevy::prelude::*;
use bevy::tasks::AsyncComputeTaskPool;
use flume::{Receiver, Sender, TryRecvError};

pub mod clipboard;
pub mod config;
pub mod conversation;
pub mod endpoint;
pub mod extract;
pub mod gemini;
pub mod provider;
pub mod render;
pub mod view;

pub use clipboard::{Clipboard, ClipboardError, ClipboardSink};
pub use config::{Backend, ChatConfig, GenerationConfig, HarmBlockThreshold, HarmCategory, SafetySetting, SessionSettings};
pub use conversation::{ChatPhase, Conversation, Message, Role, SEND_FAILURE_TEXT, SubmitRejected, to_endpoint_history};
pub use endpoint::{ChatEndpoint, ChatError, HistoryTurn, SessionHandle, TurnRole};
pub use extract::{Segment, extract_segments};
pub use gemini::GeminiEndpoint;
pub use provider::LlmEndpoint;
pub use render::{DisplayUnit, Highlighter, render_message, render_segment};
pub use view::{ChatTheme, ChatViewPlugin};

/// the endpoint sessions are built from. insert before running the app.
#[derive(Resource, Clone)]
pub struct Endpoint(pub Arc<dyn ChatEndpoint>);

impl Endpoint {
    pub fn new(endpoint: impl ChatEndpoint + 'static) -> Self {
        Self(Arc::new(endpoint))
    }

    /// picks the backend named by the config.
    pub fn from_config(config: &ChatConfig) -> Result<Self, ChatError> {
        Ok(match &config.backend {
            Backend::Gemini => Self::new(GeminiEndpoint::new(config)),
            Backend::Llm(name) => Self::new(LlmEndpoint::new(name, config)?),
        })
    }
}

/// on native we keep a tiny tokio runtime to drive endpoint futures.
/// we spawn onto this rt from compute tasks so neither the main thread
/// nor bevy's compute pools block.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Resource, Clone)]
pub struct TokioRt(pub Arc<tokio::runtime::Runtime>);

#[cfg(not(target_arch = "wasm32"))]
impl Default for TokioRt {
    fn default() -> Self {
        info!(target: "bevy_genai_chat", "ChatSessionPlugin: initializing Tokio multi-thread runtime (native)");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("tokio runtime");
        Self(Arc::new(rt))
    }
}

/// system ordering so uis can run after we apply results
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum ChatSet {
    /// submissions and session (re)builds are dispatched here
    Dispatch,
    /// finished network work is applied to `Conversation` here
    Drain,
}

/// the one entry point for sending a prompt (enter key and send button alike).
#[derive(Event, Debug, Clone)]
pub struct SubmitPrompt {
    pub text: String,
}

/// rebuilds the session handle seeded with the current transcript.
#[derive(Event, Debug, Clone, Default)]
pub struct RestartSession;

#[derive(Event, Debug)]
pub struct SessionStarted {
    pub epoch: u64,
}
#[derive(Event, Debug)]
pub struct SessionFailed {
    pub epoch: u64,
    pub error: ChatError,
}
#[derive(Event, Debug)]
pub struct ExchangeStarted {
    pub prompt: String,
}
#[derive(Event, Debug)]
pub struct ExchangeResolved {
    /// the underlying failure, if the reply was replaced by the sentinel.
    pub error: Option<ChatError>,
}

enum InboxMsg {
    SessionReady { epoch: u64, handle: Arc<dyn SessionHandle> },
    SessionErr { epoch: u64, error: ChatError },
    Reply(Result<String, ChatError>),
}

/// cross-thread inbox; producers send, main thread drains.
#[derive(Resource, Clone)]
struct ChatInbox {
    tx: Sender<InboxMsg>,
    rx: Receiver<InboxMsg>,
}

impl Default for ChatInbox {
    fn default() -> Self {
        let (tx, rx) = flume::bounded(64);
        Self { tx, rx }
    }
}

/// send to inbox without blocking; a full or closed inbox drops the message.
fn push_inbox(tx: &Sender<InboxMsg>, msg: InboxMsg) {
    if let Err(err) = tx.try_send(msg) {
        warn!(target: "bevy_genai_chat", "chat inbox dropped a message: {}", err);
    }
}

/// a restart requested while a reply was pending; applied once it lands.
#[derive(Resource, Default)]
struct DeferredRestart(bool);

#[cfg(not(target_arch = "wasm32"))]
fn spawn_request(rt: &TokioRt, run: impl Future<Output = ()> + Send + 'static) {
    let rt = rt.0.clone();
    // native: hand off to tokio so bevy pools stay free.
    AsyncComputeTaskPool::get()
        .spawn(async move {
            let _ = rt.spawn(run).await;
        })
        .detach();
}

#[cfg(target_arch = "wasm32")]
fn spawn_request(run: impl Future<Output = ()> + 'static) {
    // wasm path: just await directly (no tokio).
    AsyncComputeTaskPool::get().spawn(run).detach();
}

/// bevy plugin: wires the conversation state, events and network systems.
/// requires an `Endpoint` resource before the first `Update`.
/// on native, also inserts a tiny tokio runtime resource by default.
pub struct ChatSessionPlugin;

impl Plugin for ChatSessionPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "bevy_genai_chat", "ChatSessionPlugin: build()");
        app.init_resource::<ChatInbox>()
            .init_resource::<DeferredRestart>()
            .init_resource::<Conversation>()
            .init_resource::<SessionSettings>()
            .add_event::<SubmitPrompt>()
            .add_event::<RestartSession>()
            .add_event::<SessionStarted>()
            .add_event::<SessionFailed>()
            .add_event::<ExchangeStarted>()
            .add_event::<ExchangeResolved>()
            .configure_sets(Update, (ChatSet::Dispatch, ChatSet::Drain).chain())
            .add_systems(Startup, initialize_session)
            .add_systems(Update, (start_sessions, handle_submit).chain().in_set(ChatSet::Dispatch))
            .add_systems(Update, drain_chat_inbox.in_set(ChatSet::Drain));

        #[cfg(not(target_arch = "wasm32"))]
        if app.world().get_resource::<TokioRt>().is_none() {
            app.insert_resource(TokioRt::default());
        }
    }
}

/// the first session is built from whatever the transcript holds at startup.
fn initialize_session(mut ev: EventWriter<RestartSession>) {
    ev.write(RestartSession);
}

fn start_sessions(
    mut requests: EventReader<RestartSession>,
    mut deferred: ResMut<DeferredRestart>,
    endpoint: Option<Res<Endpoint>>,
    settings: Res<SessionSettings>,
    inbox: Res<ChatInbox>,
    mut conversation: ResMut<Conversation>,
    mut ev_failed: EventWriter<SessionFailed>,

    // native-only: small runtime to drive network futures
    #[cfg(not(target_arch = "wasm32"))] rt: Res<TokioRt>,
) {
    // any number of requests this frame collapse into one rebuild
    let requested = requests.read().count() > 0;
    if !requested && !deferred.0 {
        return;
    }
    // the new handle must be seeded with the pending exchange's outcome
    if conversation.is_awaiting_reply() {
        if !deferred.0 {
            debug!(target: "bevy_genai_chat", "restart deferred until the pending reply lands");
        }
        deferred.0 = true;
        return;
    }
    deferred.0 = false;
    let epoch = conversation.begin_session();

    let Some(endpoint) = endpoint else {
        error!(target: "bevy_genai_chat", "no Endpoint resource; chat session not started");
        ev_failed.write(SessionFailed { epoch, error: ChatError::SessionUnavailable });
        return;
    };

    let history = to_endpoint_history(conversation.transcript());
    info!(target: "bevy_genai_chat",
        "starting session: endpoint={} epoch={} history_turns={}",
        endpoint.0.name(), epoch, history.len()
    );

    let endpoint = endpoint.0.clone();
    let settings = settings.clone();
    let tx = inbox.tx.clone();
    let run = async move {
        let msg = match endpoint.start_session(&settings, history).await {
            Ok(handle) => InboxMsg::SessionReady { epoch, handle },
            Err(error) => InboxMsg::SessionErr { epoch, error },
        };
        push_inbox(&tx, msg);
    };

    #[cfg(not(target_arch = "wasm32"))]
    spawn_request(&rt, run);
    #[cfg(target_arch = "wasm32")]
    spawn_request(run);
}

fn handle_submit(
    mut submissions: EventReader<SubmitPrompt>,
    inbox: Res<ChatInbox>,
    mut conversation: ResMut<Conversation>,
    mut ev_started: EventWriter<ExchangeStarted>,
    mut ev_resolved: EventWriter<ExchangeResolved>,

    #[cfg(not(target_arch = "wasm32"))] rt: Res<TokioRt>,
) {
    for SubmitPrompt { text } in submissions.read() {
        let exchange = match conversation.submit(text) {
            Ok(exchange) => exchange,
            Err(reason) => {
                debug!(target: "bevy_genai_chat", "submit ignored: {:?}", reason);
                continue;
            }
        };
        info!(target: "bevy_genai_chat", "submit: prompt_len={}", exchange.prompt.len());
        ev_started.write(ExchangeStarted { prompt: exchange.prompt.clone() });

        let Some(session) = exchange.session else {
            let error = ChatError::SessionUnavailable;
            error!(target: "bevy_genai_chat", "Failed to send message: {}", error);
            conversation.resolve(Err(error.clone()));
            ev_resolved.write(ExchangeResolved { error: Some(error) });
            continue;
        };

        let tx = inbox.tx.clone();
        let prompt = exchange.prompt;
        let run = async move {
            let outcome = session.send(&prompt).await;
            push_inbox(&tx, InboxMsg::Reply(outcome));
        };

        #[cfg(not(target_arch = "wasm32"))]
        spawn_request(&rt, run);
        #[cfg(target_arch = "wasm32")]
        spawn_request(run);
    }
}

/// drains the inbox and applies results to the conversation.
fn drain_chat_inbox(
    inbox: Res<ChatInbox>,
    mut conversation: ResMut<Conversation>,
    mut ev_started: EventWriter<SessionStarted>,
    mut ev_failed: EventWriter<SessionFailed>,
    mut ev_resolved: EventWriter<ExchangeResolved>,
) {
    loop {
        let msg = match inbox.rx.try_recv() {
            Ok(m) => m,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        };
        match msg {
            InboxMsg::SessionReady { epoch, handle } => {
                if conversation.install_session(epoch, handle) {
                    info!(target: "bevy_genai_chat", "session ready: epoch={}", epoch);
                    ev_started.write(SessionStarted { epoch });
                } else {
                    debug!(target: "bevy_genai_chat", "dropping stale session: epoch={}", epoch);
                }
            }
            InboxMsg::SessionErr { epoch, error } => {
                if epoch != conversation.session_epoch() {
                    continue;
                }
                error!(target: "bevy_genai_chat", "session init failed: {}", error);
                conversation.fail_session(epoch);
                ev_failed.write(SessionFailed { epoch, error });
            }
            InboxMsg::Reply(outcome) => {
                let error = outcome.as_ref().err().cloned();
                if let Some(err) = &error {
                    error!(target: "bevy_genai_chat", "Failed to send message: {}", err);
                }
                if conversation.resolve(outcome) {
                    info!(target: "bevy_genai_chat", "exchange resolved: ok={}", error.is_none());
                    ev_resolved.write(ExchangeResolved { error });
                } else {
                    warn!(target: "bevy_genai_chat", "reply arrived with no pending exchange");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::testing::ScriptedEndpoint;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[derive(Resource, Default)]
    struct Seen {
        started: Vec<u64>,
        failed: Vec<ChatError>,
        resolved: Vec<Option<ChatError>>,
    }

    fn record(
        mut seen: ResMut<Seen>,
        mut started: EventReader<SessionStarted>,
        mut failed: EventReader<SessionFailed>,
        mut resolved: EventReader<ExchangeResolved>,
    ) {
        seen.started.extend(started.read().map(|e| e.epoch));
        seen.failed.extend(failed.read().map(|e| e.error.clone()));
        seen.resolved.extend(resolved.read().map(|e| e.error.clone()));
    }

    fn app_with(endpoint: ScriptedEndpoint) -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.insert_resource(Endpoint::new(endpoint));
        app.add_plugins(ChatSessionPlugin);
        app.init_resource::<Seen>();
        app.add_systems(Update, record.after(ChatSet::Drain));
        app
    }

    fn pump_until(app: &mut App, done: impl Fn(&World) -> bool) {
        for _ in 0..1000 {
            app.update();
            if done(app.world()) {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("condition not reached");
    }

    fn transcript(app: &App) -> Vec<(Role, String)> {
        app.world()
            .resource::<Conversation>()
            .transcript()
            .iter()
            .map(|m| (m.role(), m.text().to_string()))
            .collect()
    }

    fn submit(app: &mut App, text: &str) {
        app.world_mut().send_event(SubmitPrompt { text: text.into() });
    }

    #[test]
    fn hello_round_trip() {
        let ep = ScriptedEndpoint::replying([Ok("Hi there".into())]);
        let mut app = app_with(ep.clone());
        pump_until(&mut app, |w| w.resource::<Conversation>().has_session());

        submit(&mut app, "Hello");
        app.update();
        assert_eq!(transcript(&app)[0], (Role::User, "Hello".into()));

        pump_until(&mut app, |w| !w.resource::<Conversation>().is_awaiting_reply());
        assert_eq!(
            transcript(&app),
            vec![(Role::User, "Hello".into()), (Role::Assistant, "Hi there".into())]
        );
        assert_eq!(ep.sent(), vec!["Hello".to_string()]);
        assert_eq!(app.world().resource::<Seen>().resolved, vec![None]);
    }

    #[test]
    fn endpoint_failure_becomes_sentinel() {
        let ep = ScriptedEndpoint::replying([Err(ChatError::Transport("reset".into()))]);
        let mut app = app_with(ep);
        pump_until(&mut app, |w| w.resource::<Conversation>().has_session());

        submit(&mut app, "Hello");
        pump_until(&mut app, |w| w.resource::<Conversation>().transcript().len() == 2);
        assert_eq!(transcript(&app)[1], (Role::Assistant, SEND_FAILURE_TEXT.to_string()));
        assert_eq!(app.world().resource::<Conversation>().phase(), ChatPhase::Idle);
        assert_eq!(
            app.world().resource::<Seen>().resolved,
            vec![Some(ChatError::Transport("reset".into()))]
        );
    }

    #[test]
    fn failed_init_degrades_every_submit() {
        let ep = ScriptedEndpoint::failing_start(ChatError::MissingApiKey("GEMINI_API_KEY"));
        let mut app = app_with(ep.clone());
        pump_until(&mut app, |w| !w.resource::<Seen>().failed.is_empty());
        assert!(!app.world().resource::<Conversation>().has_session());

        submit(&mut app, "anyone there?");
        app.update();
        assert_eq!(
            transcript(&app),
            vec![
                (Role::User, "anyone there?".into()),
                (Role::Assistant, SEND_FAILURE_TEXT.into()),
            ]
        );
        assert!(ep.sent().is_empty());
    }

    #[test]
    fn blank_submit_makes_no_call() {
        let ep = ScriptedEndpoint::replying([Ok("unused".into())]);
        let mut app = app_with(ep.clone());
        pump_until(&mut app, |w| w.resource::<Conversation>().has_session());

        submit(&mut app, "   ");
        for _ in 0..5 {
            app.update();
        }
        assert!(transcript(&app).is_empty());
        assert!(ep.sent().is_empty());
    }

    #[test]
    fn second_submit_while_awaiting_is_dropped() {
        let ep = ScriptedEndpoint::replying([Ok("one".into()), Ok("two".into())]);
        let mut app = app_with(ep.clone());
        pump_until(&mut app, |w| w.resource::<Conversation>().has_session());

        submit(&mut app, "first");
        submit(&mut app, "second");
        pump_until(&mut app, |w| !w.resource::<Conversation>().is_awaiting_reply());
        for _ in 0..5 {
            app.update();
        }
        assert_eq!(
            transcript(&app),
            vec![(Role::User, "first".into()), (Role::Assistant, "one".into())]
        );
        assert_eq!(ep.sent(), vec!["first".to_string()]);
    }

    #[test]
    fn restart_reseeds_with_transcript() {
        let ep = ScriptedEndpoint::replying([Ok("a1".into())]);
        let mut app = app_with(ep.clone());
        pump_until(&mut app, |w| w.resource::<Seen>().started.len() == 1);

        submit(&mut app, "q1");
        pump_until(&mut app, |w| !w.resource::<Conversation>().is_awaiting_reply());

        app.world_mut().send_event(RestartSession);
        pump_until(&mut app, |w| w.resource::<Seen>().started.len() == 2);

        let seeded = ep.seeded();
        assert_eq!(seeded.len(), 2);
        assert!(seeded[0].is_empty());
        assert_eq!(seeded[1], vec![HistoryTurn::user("q1"), HistoryTurn::model("a1")]);
        assert_eq!(app.world().resource::<Seen>().started, vec![1, 2]);
    }

    #[test]
    fn restart_while_awaiting_waits_for_the_reply() {
        let ep = ScriptedEndpoint::default();
        let mut app = app_with(ep.clone());
        pump_until(&mut app, |w| w.resource::<Seen>().started.len() == 1);

        // pending exchange whose reply has not landed yet
        app.world_mut().resource_mut::<Conversation>().submit("q").ok();
        app.world_mut().send_event(RestartSession);
        for _ in 0..5 {
            app.update();
        }
        assert_eq!(ep.seeded().len(), 1);

        let tx = app.world().resource::<ChatInbox>().tx.clone();
        tx.send(InboxMsg::Reply(Ok("a".into()))).unwrap();
        pump_until(&mut app, |w| w.resource::<Seen>().started.len() == 2);

        let seeded = ep.seeded();
        assert_eq!(seeded.len(), 2);
        assert_eq!(seeded[1], vec![HistoryTurn::user("q"), HistoryTurn::model("a")]);
    }

    #[test]
    fn failed_restart_drops_the_old_handle() {
        let ep = ScriptedEndpoint::default();
        let mut app = app_with(ep.clone());
        pump_until(&mut app, |w| w.resource::<Conversation>().has_session());

        ep.script.lock().unwrap().start_error = Some(ChatError::Transport("down".into()));
        app.world_mut().send_event(RestartSession);
        pump_until(&mut app, |w| !w.resource::<Seen>().failed.is_empty());
        assert!(!app.world().resource::<Conversation>().has_session());

        submit(&mut app, "still there?");
        app.update();
        assert_eq!(transcript(&app)[1], (Role::Assistant, SEND_FAILURE_TEXT.to_string()));
        assert!(ep.sent().is_empty());
    }

    #[test]
    fn drain_applies_inbox_messages() {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.init_resource::<ChatInbox>();
        app.init_resource::<Conversation>();
        app.init_resource::<Seen>();
        app.add_event::<SessionStarted>();
        app.add_event::<SessionFailed>();
        app.add_event::<ExchangeResolved>();
        app.add_systems(Update, (drain_chat_inbox, record).chain());

        let epoch = app.world_mut().resource_mut::<Conversation>().begin_session();
        app.world_mut().resource_mut::<Conversation>().submit("ping").ok();
        {
            let tx = app.world().resource::<ChatInbox>().tx.clone();
            tx.send(InboxMsg::SessionErr { epoch: epoch + 5, error: ChatError::EmptyResponse })
                .unwrap();
            tx.send(InboxMsg::SessionErr { epoch, error: ChatError::SessionUnavailable })
                .unwrap();
            tx.send(InboxMsg::Reply(Ok("pong".into()))).unwrap();
            tx.send(InboxMsg::Reply(Ok("late".into()))).unwrap();
        }
        app.update();

        let seen = app.world().resource::<Seen>();
        assert_eq!(seen.failed, vec![ChatError::SessionUnavailable]);
        assert_eq!(seen.resolved, vec![None]);
        assert_eq!(
            transcript(&app),
            vec![(Role::User, "ping".into()), (Role::Assistant, "pong".into())]
        );
    }
}
