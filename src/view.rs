//! chat view: transcript panel, prompt line, send button and code copy buttons.
//!
//! the view never mutates the transcript itself. typing edits the draft,
//! enter and the send button both emit `SubmitPrompt`, and new messages are
//! appended to the panel as the conversation grows.

use bevy::input::keyboard::{Key, KeyboardInput};
use bevy::prelude::*;
use bevy::ui::ScrollPosition;

use crate::clipboard::Clipboard;
use crate::config::ChatConfig;
use crate::conversation::{ChatPhase, Conversation, Message, Role};
use crate::render::{CodeBlockView, DisplayUnit, Highlighter, RunStyle, TextRun, render_message};
use crate::{ChatSet, SubmitPrompt};

const SEND_LABEL: &str = "Send";
const LOADING_LABEL: &str = "...";
const COPY_LABEL: &str = "copy";
const COPIED_LABEL: &str = "copied!";
const COPY_FEEDBACK_SECS: f32 = 1.5;
const PLACEHOLDER: &str = "Enter your prompt";

/// text colors for one side of the conversation.
#[derive(Clone, Debug)]
pub struct RolePalette {
    pub bubble: Color,
    pub text: Color,
    pub strong: Color,
    pub emphasis: Color,
    pub link: Color,
    pub inline_code: Color,
    pub muted: Color,
}

#[derive(Resource, Clone, Debug)]
pub struct ChatTheme {
    pub background: Color,
    pub panel: Color,
    pub user: RolePalette,
    pub assistant: RolePalette,
    pub code_bg: Color,
    pub code_text: Color,
    pub button: Color,
    pub button_hover: Color,
    pub button_pressed: Color,
    pub button_disabled: Color,
    pub font_size: f32,
    pub code_font_size: f32,
}

impl Default for ChatTheme {
    fn default() -> Self {
        Self {
            background: Color::srgb_u8(18, 18, 20),
            panel: Color::srgba_u8(15, 23, 42, 230),
            user: RolePalette {
                bubble: Color::srgb_u8(3, 7, 18),
                text: Color::WHITE,
                strong: Color::WHITE,
                emphasis: Color::srgb_u8(186, 198, 255),
                link: Color::srgb_u8(125, 211, 252),
                inline_code: Color::srgb_u8(253, 224, 71),
                muted: Color::srgb_u8(148, 163, 184),
            },
            assistant: RolePalette {
                bubble: Color::srgb_u8(116, 128, 255),
                text: Color::BLACK,
                strong: Color::srgb_u8(15, 15, 40),
                emphasis: Color::srgb_u8(49, 46, 129),
                link: Color::srgb_u8(12, 74, 110),
                inline_code: Color::srgb_u8(127, 29, 29),
                muted: Color::srgb_u8(55, 65, 81),
            },
            code_bg: Color::srgb_u8(29, 31, 33),
            code_text: Color::srgb_u8(197, 200, 198),
            button: Color::srgb_u8(59, 130, 246),
            button_hover: Color::srgb_u8(96, 165, 250),
            button_pressed: Color::srgb_u8(37, 99, 235),
            button_disabled: Color::srgb_u8(107, 114, 128),
            font_size: 16.0,
            code_font_size: 14.0,
        }
    }
}

impl ChatTheme {
    pub fn palette(&self, role: Role) -> &RolePalette {
        match role {
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
        }
    }

    fn prose_color(&self, role: Role, style: &RunStyle) -> Color {
        let p = self.palette(role);
        if style.code {
            p.inline_code
        } else if style.link {
            p.link
        } else if style.muted || style.strikethrough {
            p.muted
        } else if style.strong || style.heading {
            p.strong
        } else if style.emphasis || style.quote {
            p.emphasis
        } else {
            p.text
        }
    }

    fn code_color(&self, style: &RunStyle) -> Color {
        match style.color {
            Some((r, g, b)) => Color::srgb_u8(r, g, b),
            None => self.code_text,
        }
    }
}

// ---------------------- ui tags ----------------------

#[derive(Component)]
pub struct TranscriptPanel;
#[derive(Component)]
pub struct EmptyState;
#[derive(Component)]
pub struct PromptText;
#[derive(Component)]
pub struct SendButton;
#[derive(Component)]
pub struct SendLabel;

#[derive(Component, Debug)]
pub struct MessageBubble {
    pub index: usize,
    pub role: Role,
}

/// copy affordance of one code block; `label` is its text child.
#[derive(Component, Debug)]
pub struct CopyButton {
    pub source: String,
    pub label: Entity,
}
#[derive(Component)]
pub struct CopyLabel;

#[derive(Component)]
struct CopyFeedback(Timer);

/// chat ui. expects `ChatSessionPlugin` for the conversation and its events.
pub struct ChatViewPlugin;

impl Plugin for ChatViewPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "bevy_genai_chat", "ChatViewPlugin: build()");
        app.init_resource::<ChatTheme>()
            .init_resource::<Highlighter>()
            .init_resource::<Clipboard>()
            .add_event::<SubmitPrompt>()
            .add_systems(Startup, spawn_chat_view)
            .add_systems(
                Update,
                (capture_prompt_input, send_button_interaction).before(ChatSet::Dispatch),
            )
            .add_systems(
                Update,
                (
                    append_new_messages,
                    refresh_prompt_text,
                    refresh_send_button,
                    copy_button_interaction,
                    tick_copy_feedback,
                )
                    .after(ChatSet::Drain),
            );
    }
}

/// the shared submit path. a no-op while a reply is pending.
fn request_submit(conversation: &Conversation, ev: &mut EventWriter<SubmitPrompt>) -> bool {
    if conversation.is_awaiting_reply() {
        return false;
    }
    ev.write(SubmitPrompt { text: conversation.draft().to_string() });
    true
}

// ---------------------- setup ----------------------

fn spawn_chat_view(mut commands: Commands, theme: Res<ChatTheme>, config: Option<Res<ChatConfig>>) {
    let label = config
        .map(|c| c.assistant_label.clone())
        .unwrap_or_else(|| "Assistant".to_string());
    let font = |size: f32| TextFont { font_size: size, ..default() };

    commands
        .spawn((
            Node {
                width: Val::Percent(100.0),
                height: Val::Percent(100.0),
                flex_direction: FlexDirection::Column,
                row_gap: Val::Px(12.0),
                padding: UiRect::all(Val::Px(12.0)),
                ..default()
            },
            BackgroundColor(theme.background),
        ))
        .with_children(|root| {
            // --- transcript ---
            root.spawn((
                Node {
                    width: Val::Percent(100.0),
                    flex_grow: 1.0,
                    min_height: Val::Px(0.0),
                    flex_direction: FlexDirection::Column,
                    row_gap: Val::Px(12.0),
                    padding: UiRect::all(Val::Px(16.0)),
                    overflow: Overflow::scroll_y(),
                    ..default()
                },
                BackgroundColor(theme.panel),
                BorderRadius::all(Val::Px(8.0)),
                ScrollPosition::default(),
                TranscriptPanel,
            ))
            .with_children(|panel| {
                panel
                    .spawn((
                        Node {
                            flex_direction: FlexDirection::Column,
                            align_items: AlignItems::Center,
                            align_self: AlignSelf::Center,
                            margin: UiRect::vertical(Val::Auto),
                            row_gap: Val::Px(8.0),
                            ..default()
                        },
                        EmptyState,
                    ))
                    .with_children(|e| {
                        e.spawn((
                            Text::new("Start chatting with your favorite"),
                            font(24.0),
                            TextColor(theme.user.muted),
                        ));
                        e.spawn((
                            Text::new(format!("{label}.AI here !!")),
                            font(32.0),
                            TextColor(theme.assistant.bubble),
                        ));
                    });
            });

            // --- prompt row ---
            root.spawn((
                Node {
                    width: Val::Percent(100.0),
                    flex_direction: FlexDirection::Row,
                    align_items: AlignItems::Center,
                    column_gap: Val::Px(12.0),
                    padding: UiRect::axes(Val::Px(16.0), Val::Px(8.0)),
                    ..default()
                },
                BackgroundColor(theme.panel),
                BorderRadius::all(Val::Px(6.0)),
            ))
            .with_children(|row| {
                row.spawn((
                    Node { flex_grow: 1.0, ..default() },
                    Text::new(PLACEHOLDER),
                    font(theme.font_size),
                    TextColor(theme.user.muted),
                    PromptText,
                ));
                row.spawn((
                    Button,
                    Node {
                        width: Val::Px(90.0),
                        height: Val::Px(36.0),
                        align_items: AlignItems::Center,
                        justify_content: JustifyContent::Center,
                        ..default()
                    },
                    BackgroundColor(theme.button),
                    BorderRadius::all(Val::Px(6.0)),
                    SendButton,
                ))
                .with_children(|b| {
                    b.spawn((Text::new(SEND_LABEL), font(theme.font_size), TextColor(Color::WHITE), SendLabel));
                });
            });
        });
}

// ---------------------- input ----------------------

fn capture_prompt_input(
    mut ev_kbd: EventReader<KeyboardInput>,
    mut conversation: ResMut<Conversation>,
    mut ev_submit: EventWriter<SubmitPrompt>,
) {
    for ev in ev_kbd.read() {
        if !ev.state.is_pressed() {
            continue;
        }
        match &ev.logical_key {
            Key::Enter => {
                request_submit(&conversation, &mut ev_submit);
            }
            Key::Backspace => conversation.edit_draft(|d| {
                d.pop();
            }),
            _ => {
                if let Some(txt) = &ev.text {
                    let s: String = txt.chars().filter(|c| !c.is_control()).collect();
                    if !s.is_empty() {
                        conversation.edit_draft(|d| d.push_str(&s));
                    }
                }
            }
        }
    }
}

fn send_button_interaction(
    conversation: Res<Conversation>,
    theme: Res<ChatTheme>,
    mut q: Query<(&Interaction, &mut BackgroundColor), (Changed<Interaction>, With<SendButton>)>,
    mut ev_submit: EventWriter<SubmitPrompt>,
) {
    for (i, mut bg) in &mut q {
        if conversation.is_awaiting_reply() {
            bg.0 = theme.button_disabled;
            continue;
        }
        match *i {
            Interaction::Pressed => {
                bg.0 = theme.button_pressed;
                request_submit(&conversation, &mut ev_submit);
            }
            Interaction::Hovered => bg.0 = theme.button_hover,
            Interaction::None => bg.0 = theme.button,
        }
    }
}

// ---------------------- text refresh ----------------------

fn refresh_prompt_text(
    conversation: Res<Conversation>,
    theme: Res<ChatTheme>,
    mut q_prompt: Query<(&mut Text, &mut TextColor), With<PromptText>>,
) {
    if !conversation.is_changed() {
        return;
    }
    for (mut t, mut color) in &mut q_prompt {
        if conversation.draft().is_empty() {
            t.0 = PLACEHOLDER.to_string();
            color.0 = theme.user.muted;
        } else {
            t.0 = format!("{} |", conversation.draft());
            color.0 = theme.user.text;
        }
    }
}

/// disabled look and a "..." label while awaiting a reply.
fn refresh_send_button(
    conversation: Res<Conversation>,
    theme: Res<ChatTheme>,
    mut last_phase: Local<ChatPhase>,
    mut labels: Query<&mut Text, With<SendLabel>>,
    mut buttons: Query<&mut BackgroundColor, With<SendButton>>,
) {
    if conversation.phase() == *last_phase {
        return;
    }
    *last_phase = conversation.phase();
    let (label, color) = if conversation.is_awaiting_reply() {
        (LOADING_LABEL, theme.button_disabled)
    } else {
        (SEND_LABEL, theme.button)
    };
    for mut t in &mut labels {
        t.0 = label.to_string();
    }
    for mut bg in &mut buttons {
        bg.0 = color;
    }
}

// ---------------------- transcript ----------------------

fn append_new_messages(
    mut commands: Commands,
    conversation: Res<Conversation>,
    theme: Res<ChatTheme>,
    highlighter: Res<Highlighter>,
    config: Option<Res<ChatConfig>>,
    mut rendered: Local<usize>,
    mut pending_scroll: Local<u8>,
    mut panels: Query<(Entity, &mut ScrollPosition), With<TranscriptPanel>>,
    mut empty: Query<&mut Node, With<EmptyState>>,
) {
    let transcript = conversation.transcript();
    if transcript.len() > *rendered {
        let label = config
            .as_ref()
            .map(|c| c.assistant_label.as_str())
            .unwrap_or("Assistant");
        for (panel, _) in &panels {
            commands.entity(panel).with_children(|p| {
                for (index, message) in transcript.iter().enumerate().skip(*rendered) {
                    spawn_message(p, index, message, label, &theme, &highlighter);
                }
            });
        }
        debug!(target: "bevy_genai_chat", "rendered messages {}..{}", *rendered, transcript.len());
        *rendered = transcript.len();
        for mut node in &mut empty {
            node.display = Display::None;
        }
        // layout lands over the next frames; keep pinning to the bottom
        *pending_scroll = 3;
    }

    if *pending_scroll > 0 {
        *pending_scroll -= 1;
        for (_, mut scroll) in &mut panels {
            scroll.offset_y = f32::MAX;
        }
    }
}

fn spawn_message(
    parent: &mut ChildSpawnerCommands,
    index: usize,
    message: &Message,
    assistant_label: &str,
    theme: &ChatTheme,
    highlighter: &Highlighter,
) {
    let role = message.role();
    let palette = theme.palette(role);
    let (align, header) = match role {
        Role::User => (AlignSelf::FlexEnd, "User"),
        Role::Assistant => (AlignSelf::FlexStart, assistant_label),
    };

    parent
        .spawn((
            Node {
                flex_direction: FlexDirection::Column,
                align_self: align,
                max_width: Val::Percent(85.0),
                padding: UiRect::all(Val::Px(10.0)),
                row_gap: Val::Px(6.0),
                ..default()
            },
            BackgroundColor(palette.bubble),
            BorderRadius::all(Val::Px(8.0)),
            MessageBubble { index, role },
        ))
        .with_children(|b| {
            b.spawn((
                Text::new(header),
                TextFont { font_size: theme.font_size * 0.8, ..default() },
                TextColor(palette.muted),
            ));
            for unit in render_message(message.text(), highlighter) {
                match unit {
                    DisplayUnit::Prose(runs) => {
                        spawn_runs(b, &runs, theme.font_size, |s| theme.prose_color(role, s));
                    }
                    DisplayUnit::Code(view) => spawn_code_block(b, view, theme),
                }
            }
        });
}

fn spawn_runs(
    parent: &mut ChildSpawnerCommands,
    runs: &[TextRun],
    font_size: f32,
    color_of: impl Fn(&RunStyle) -> Color,
) {
    let font = TextFont { font_size, ..default() };
    parent
        .spawn((Text::default(), font.clone()))
        .with_children(|t| {
            for run in runs {
                t.spawn((TextSpan::new(run.text.clone()), font.clone(), TextColor(color_of(&run.style))));
            }
        });
}

fn spawn_code_block(parent: &mut ChildSpawnerCommands, view: CodeBlockView, theme: &ChatTheme) {
    let small = TextFont { font_size: theme.code_font_size * 0.85, ..default() };
    parent
        .spawn((
            Node {
                width: Val::Percent(100.0),
                flex_direction: FlexDirection::Column,
                padding: UiRect::all(Val::Px(10.0)),
                row_gap: Val::Px(6.0),
                ..default()
            },
            BackgroundColor(theme.code_bg),
            BorderRadius::all(Val::Px(6.0)),
        ))
        .with_children(|c| {
            c.spawn(Node {
                width: Val::Percent(100.0),
                flex_direction: FlexDirection::Row,
                justify_content: JustifyContent::SpaceBetween,
                align_items: AlignItems::Center,
                ..default()
            })
            .with_children(|row| {
                let lang = view.language.clone().unwrap_or_else(|| "text".to_string());
                row.spawn((Text::new(lang), small.clone(), TextColor(theme.user.muted)));

                let label = row
                    .spawn((Text::new(COPY_LABEL), small.clone(), TextColor(Color::WHITE), CopyLabel))
                    .id();
                row.spawn((
                    Button,
                    Node {
                        padding: UiRect::axes(Val::Px(8.0), Val::Px(2.0)),
                        ..default()
                    },
                    BackgroundColor(theme.button_disabled),
                    BorderRadius::all(Val::Px(4.0)),
                    CopyButton { source: view.source.clone(), label },
                ))
                .add_child(label);
            });
            spawn_runs(c, &view.runs, theme.code_font_size, |s| theme.code_color(s));
        });
}

// ---------------------- copy ----------------------

fn copy_button_interaction(
    mut commands: Commands,
    clipboard: Res<Clipboard>,
    theme: Res<ChatTheme>,
    mut q: Query<(Entity, &Interaction, &CopyButton, &mut BackgroundColor), Changed<Interaction>>,
    mut labels: Query<&mut Text, With<CopyLabel>>,
) {
    for (e, i, button, mut bg) in &mut q {
        match *i {
            Interaction::Pressed => {
                bg.0 = theme.button_pressed;
                if clipboard.copy(&button.source) {
                    if let Ok(mut t) = labels.get_mut(button.label) {
                        t.0 = COPIED_LABEL.to_string();
                    }
                    commands
                        .entity(e)
                        .insert(CopyFeedback(Timer::from_seconds(COPY_FEEDBACK_SECS, TimerMode::Once)));
                }
            }
            Interaction::Hovered => bg.0 = theme.button_hover,
            Interaction::None => bg.0 = theme.button_disabled,
        }
    }
}

fn tick_copy_feedback(
    mut commands: Commands,
    time: Res<Time>,
    mut q: Query<(Entity, &CopyButton, &mut CopyFeedback)>,
    mut labels: Query<&mut Text, With<CopyLabel>>,
) {
    for (e, button, mut feedback) in &mut q {
        if feedback.0.tick(time.delta()).finished() {
            if let Ok(mut t) = labels.get_mut(button.label) {
                t.0 = COPY_LABEL.to_string();
            }
            commands.entity(e).remove::<CopyFeedback>();
        }
    }
}
