use std::collections::HashMap;
use std::io::{self, Stdout};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction as LayoutDirection, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Clear, List, ListItem, ListState, Padding, Paragraph, Tabs, Wrap,
};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use tracing::{debug, info, warn};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::api::ShareRequest;
use crate::auth::{self, JoinOutcome, SignedInUser};
use crate::data::{FeedService, ShareService};
use crate::feed::{Container, Direction, FeedController, FeedEvent, FeedState, Playback};
use crate::record::{Category, VideoRecord};
use crate::session::{self, Enrollment};
use crate::video::MpvStage;
use crate::vote::{Press, VoteState};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);
const COLOR_FUNNY: Color = Color::Rgb(249, 226, 175);

const SPINNER_FRAMES: [&str; 10] = [
    "⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏",
];
const FOOTER_HINTS: &str = "j/k swipe · u/d vote · Enter play · m mute · Tab switch · r reload · s share · x delete · l login · p profile · o open · c copy · L logout · ? help · q quit";

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

/// Cuts `text` to at most `width` terminal columns, ending with an ellipsis
/// when shortened.
fn truncate(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

fn wrap_plain(text: &str, width: usize, style: Style) -> Vec<Line<'static>> {
    let width = width.max(1);
    text.lines()
        .flat_map(|line| {
            if line.trim().is_empty() {
                vec![Line::from("")]
            } else {
                wrap(line, WrapOptions::new(width))
                    .into_iter()
                    .map(|part| Line::from(Span::styled(part.into_owned(), style)))
                    .collect()
            }
        })
        .collect()
}

fn vote_label(state: VoteState) -> &'static str {
    match state {
        VoteState::Up => "you upvoted",
        VoteState::Down => "you downvoted",
        VoteState::None => "no vote",
    }
}

fn playback_marker(playback: Option<Playback>) -> &'static str {
    match playback {
        Some(Playback::Playing) => "▶",
        Some(Playback::Blocked) => "⏵",
        Some(Playback::Idle) | None => " ",
    }
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NoticeKind {
    Info,
    Success,
    Error,
}

/// The single notification slot; a new notice replaces the previous one.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Notice {
    kind: NoticeKind,
    text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum FieldValue {
    Text(String),
    Toggle(bool),
}

#[derive(Clone, Debug)]
struct FormField {
    label: &'static str,
    value: FieldValue,
    digits_only: bool,
}

impl FormField {
    fn text(label: &'static str) -> Self {
        Self {
            label,
            value: FieldValue::Text(String::new()),
            digits_only: false,
        }
    }

    fn code(label: &'static str) -> Self {
        Self {
            digits_only: true,
            ..Self::text(label)
        }
    }

    fn toggle(label: &'static str) -> Self {
        Self {
            label,
            value: FieldValue::Toggle(false),
            digits_only: false,
        }
    }
}

#[derive(Clone, Debug)]
struct Form {
    title: &'static str,
    fields: Vec<FormField>,
    active: usize,
    status: Option<String>,
    submitting: bool,
}

impl Form {
    fn new(title: &'static str, fields: Vec<FormField>) -> Self {
        Self {
            title,
            fields,
            active: 0,
            status: None,
            submitting: false,
        }
    }

    fn share() -> Self {
        Self::new(
            "Share a video",
            vec![
                FormField::text("URL"),
                FormField::text("Title"),
                FormField::text("Description"),
                FormField::toggle("Private"),
            ],
        )
    }

    fn login() -> Self {
        Self::new("Sign in", vec![FormField::text("Email")])
    }

    fn code(title: &'static str) -> Self {
        Self::new(title, vec![FormField::code("Code")])
    }

    fn next(&mut self) {
        if !self.fields.is_empty() {
            self.active = (self.active + 1) % self.fields.len();
        }
    }

    fn previous(&mut self) {
        if !self.fields.is_empty() {
            self.active = (self.active + self.fields.len() - 1) % self.fields.len();
        }
    }

    fn insert_char(&mut self, ch: char) {
        let Some(field) = self.fields.get_mut(self.active) else {
            return;
        };
        match &mut field.value {
            FieldValue::Text(value) => {
                if field.digits_only && (!ch.is_ascii_digit() || value.len() >= auth::OTP_LEN) {
                    return;
                }
                value.push(ch);
            }
            FieldValue::Toggle(on) => {
                if ch == ' ' {
                    *on = !*on;
                }
            }
        }
        self.status = None;
    }

    fn backspace(&mut self) {
        if let Some(FormField {
            value: FieldValue::Text(value),
            ..
        }) = self.fields.get_mut(self.active)
        {
            value.pop();
        }
        self.status = None;
    }

    fn text(&self, index: usize) -> &str {
        match self.fields.get(index).map(|field| &field.value) {
            Some(FieldValue::Text(value)) => value.as_str(),
            _ => "",
        }
    }

    fn toggled(&self, index: usize) -> bool {
        matches!(
            self.fields.get(index).map(|field| &field.value),
            Some(FieldValue::Toggle(true))
        )
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = Some(message.into());
        self.submitting = false;
    }

    fn body(&self, spinner: &str) -> Text<'static> {
        let mut lines = Vec::new();
        for (idx, field) in self.fields.iter().enumerate() {
            let focused = idx == self.active;
            let label_style = if focused {
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(COLOR_TEXT_SECONDARY)
            };
            let value = match &field.value {
                FieldValue::Text(value) if focused => format!("{value}▏"),
                FieldValue::Text(value) => value.clone(),
                FieldValue::Toggle(on) => (if *on { "[x]" } else { "[ ]" }).to_string(),
            };
            lines.push(Line::from(vec![
                Span::styled(format!("{:<12}", field.label), label_style),
                Span::styled(value, Style::default().fg(COLOR_TEXT_PRIMARY)),
            ]));
        }
        lines.push(Line::from(""));
        if self.submitting {
            lines.push(Line::from(Span::styled(
                format!("{spinner} Working…"),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        } else if let Some(status) = &self.status {
            lines.push(Line::from(Span::styled(
                status.clone(),
                Style::default().fg(COLOR_ERROR),
            )));
        }
        lines.push(Line::from(Span::styled(
            "Enter submit · Tab next field · Space toggle · Esc cancel",
            Style::default()
                .fg(COLOR_TEXT_SECONDARY)
                .add_modifier(Modifier::ITALIC),
        )));
        Text::from(lines)
    }
}

struct ProfileView {
    email: String,
    mfa_enabled: bool,
    enrollment: Option<Enrollment>,
    form: Form,
}

enum Overlay {
    ConfirmDelete {
        container: Container,
        video_id: String,
        title: String,
    },
    Share(Form),
    Login(Form),
    SecondFactor(Form),
    Profile(ProfileView),
    Help,
}

enum AsyncResponse {
    Feed {
        container: Container,
        generation: u64,
        result: Result<Vec<VideoRecord>>,
    },
    Shared {
        request_id: u64,
        result: Result<VideoRecord>,
    },
    Deleted {
        request_id: u64,
        container: Container,
        video_id: String,
        result: Result<String>,
    },
    Login {
        request_id: u64,
        result: Result<JoinOutcome>,
    },
    Verified {
        request_id: u64,
        result: Result<SignedInUser>,
    },
    MfaSetup {
        request_id: u64,
        result: Result<Enrollment>,
    },
    MfaChanged {
        request_id: u64,
        enabled: bool,
        result: Result<()>,
    },
}

pub struct Options {
    pub controller: FeedController<MpvStage>,
    pub feed_service: Arc<dyn FeedService>,
    pub share_service: Arc<dyn ShareService>,
    pub session: Arc<session::Manager>,
    pub load_private: bool,
    pub status_message: String,
}

pub struct Model {
    controller: FeedController<MpvStage>,
    feed_service: Arc<dyn FeedService>,
    share_service: Arc<dyn ShareService>,
    session: Arc<session::Manager>,
    feed_events: Vec<Receiver<FeedEvent>>,
    active: Container,
    load_private: bool,
    status_message: String,
    notice: Option<Notice>,
    overlay: Option<Overlay>,
    spinner: Spinner,
    loading: HashMap<Container, u64>,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
    pending_share: Option<u64>,
    pending_delete: Option<u64>,
    pending_auth: Option<u64>,
    needs_redraw: bool,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let Options {
            mut controller,
            feed_service,
            share_service,
            session,
            load_private,
            status_message,
        } = opts;
        controller.activate(Container::Popular);
        let feed_events = Container::ALL
            .iter()
            .map(|container| controller.subscribe(*container))
            .collect();
        let (response_tx, response_rx) = unbounded();
        Self {
            controller,
            feed_service,
            share_service,
            session,
            feed_events,
            active: Container::Popular,
            load_private,
            status_message,
            notice: None,
            overlay: None,
            spinner: Spinner::new(),
            loading: HashMap::new(),
            response_tx,
            response_rx,
            next_request_id: 1,
            pending_share: None,
            pending_delete: None,
            pending_auth: None,
            needs_redraw: true,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        self.start();
        let result = self.event_loop(&mut terminal);
        self.controller.stage_mut().shutdown();

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => self.notify(NoticeKind::Error, format!("{err:#}")),
                        }
                        self.mark_dirty();
                    }
                } else {
                    self.mark_dirty();
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.reap_player() {
                    self.mark_dirty();
                }
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        !self.loading.is_empty()
            || self.pending_share.is_some()
            || self.pending_delete.is_some()
            || self.pending_auth.is_some()
    }

    fn next_request(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    fn notify(&mut self, kind: NoticeKind, text: impl Into<String>) {
        let text = text.into();
        match kind {
            NoticeKind::Error => warn!(%text, "notice"),
            _ => debug!(%text, "notice"),
        }
        self.notice = Some(Notice { kind, text });
    }

    /// Loads the feeds available to the current session.
    pub fn start(&mut self) {
        self.reload(Container::Popular);
        if self.load_private && self.session.is_signed_in() {
            self.reload(Container::Private);
        }
    }

    fn reload(&mut self, container: Container) {
        if container == Container::Private && !self.session.is_signed_in() {
            self.notify(NoticeKind::Error, "Sign in to see your private videos.");
            return;
        }
        let generation = self.controller.begin_reload(container);
        self.loading.insert(container, generation);
        self.status_message = format!("Loading {} videos…", container.display_name());
        let service = Arc::clone(&self.feed_service);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.load(container);
            let _ = tx.send(AsyncResponse::Feed {
                container,
                generation,
                result,
            });
        });
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(response) = self.response_rx.try_recv() {
            self.handle_response(response);
            changed = true;
        }
        let events: Vec<FeedEvent> = self
            .feed_events
            .iter()
            .flat_map(|rx| rx.try_iter().collect::<Vec<_>>())
            .collect();
        for event in events {
            self.handle_feed_event(event);
            changed = true;
        }
        changed
    }

    fn reap_player(&mut self) -> bool {
        let Some((container, video_id)) = self.controller.stage_mut().poll_exit() else {
            return false;
        };
        self.controller.playback_ended(container, &video_id);
        true
    }

    fn handle_feed_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::PlaybackBlocked {
                container, reason, ..
            } if container == self.active => {
                self.notify(
                    NoticeKind::Info,
                    format!("Playback paused ({reason}). Press Enter to play."),
                );
            }
            FeedEvent::VoteChanged {
                state,
                upvotes,
                downvotes,
                ..
            } => {
                self.status_message =
                    format!("{} · ▲ {upvotes} ▼ {downvotes}", capitalize(vote_label(state)));
            }
            FeedEvent::Reloaded { container, len } => {
                info!(container = %container, len, "feed reloaded");
            }
            _ => {}
        }
    }

    fn handle_response(&mut self, response: AsyncResponse) {
        match response {
            AsyncResponse::Feed {
                container,
                generation,
                result,
            } => {
                if self.loading.get(&container) == Some(&generation) {
                    self.loading.remove(&container);
                }
                match result {
                    Ok(items) => {
                        let len = items.len();
                        if self.controller.apply_reload(container, generation, items) {
                            self.status_message =
                                format!("{} · {len} videos", container.display_name());
                        }
                    }
                    Err(err) => {
                        if self.controller.is_reload_current(container, generation) {
                            self.notify(NoticeKind::Error, format!("{err:#}"));
                        }
                    }
                }
            }
            AsyncResponse::Shared { request_id, result } => {
                if self.pending_share != Some(request_id) {
                    return;
                }
                self.pending_share = None;
                match result {
                    Ok(record) => {
                        let container = Container::for_record(&record);
                        let title = record.display_title().to_string();
                        self.switch_to(container);
                        self.controller.prepend(container, record);
                        self.overlay = None;
                        self.notify(NoticeKind::Success, format!("Shared \"{title}\"."));
                    }
                    Err(err) => {
                        let message = format!("{err:#}");
                        if let Some(Overlay::Share(form)) = self.overlay.as_mut() {
                            form.set_status(message.clone());
                        }
                        self.notify(NoticeKind::Error, message);
                    }
                }
            }
            AsyncResponse::Deleted {
                request_id,
                container,
                video_id,
                result,
            } => {
                if self.pending_delete != Some(request_id) {
                    return;
                }
                self.pending_delete = None;
                let still_pending = self
                    .controller
                    .feed(container)
                    .and_then(FeedState::pending_delete)
                    == Some(video_id.as_str());
                match result {
                    Ok(message) if still_pending => {
                        match self.controller.confirm_delete_current(container) {
                            Ok(_) => self.notify(NoticeKind::Success, message),
                            Err(err) => self.notify(NoticeKind::Error, err.to_string()),
                        }
                    }
                    Ok(message) => self.notify(NoticeKind::Success, message),
                    Err(err) => {
                        if still_pending {
                            self.controller.cancel_delete(container);
                        }
                        self.notify(NoticeKind::Error, format!("{err:#}"));
                    }
                }
            }
            AsyncResponse::Login { request_id, result } => {
                if self.pending_auth != Some(request_id) {
                    return;
                }
                self.pending_auth = None;
                match result {
                    Ok(JoinOutcome::SignedIn(user)) => self.signed_in(user),
                    Ok(JoinOutcome::MfaRequired(pending)) => {
                        self.overlay = Some(Overlay::SecondFactor(Form::code(
                            "Enter your authenticator code",
                        )));
                        self.notify(
                            NoticeKind::Info,
                            format!("Two-factor code required for {}.", pending.email),
                        );
                    }
                    Ok(JoinOutcome::InviteSent { .. }) => {
                        self.overlay = None;
                        self.notify(NoticeKind::Info, auth::INVITE_SENT_MESSAGE);
                    }
                    Err(err) => self.form_error(format!("{err:#}")),
                }
            }
            AsyncResponse::Verified { request_id, result } => {
                if self.pending_auth != Some(request_id) {
                    return;
                }
                self.pending_auth = None;
                match result {
                    Ok(user) => self.signed_in(user),
                    Err(err) => self.form_error(format!("{err:#}")),
                }
            }
            AsyncResponse::MfaSetup { request_id, result } => {
                if self.pending_auth != Some(request_id) {
                    return;
                }
                self.pending_auth = None;
                match result {
                    Ok(enrollment) => {
                        let path = enrollment.qr_path.display().to_string();
                        if let Some(Overlay::Profile(view)) = self.overlay.as_mut() {
                            view.form.submitting = false;
                            view.enrollment = Some(enrollment);
                        }
                        self.notify(
                            NoticeKind::Info,
                            format!("QR code saved to {path}. Press o to open it."),
                        );
                    }
                    Err(err) => self.form_error(format!("{err:#}")),
                }
            }
            AsyncResponse::MfaChanged {
                request_id,
                enabled,
                result,
            } => {
                if self.pending_auth != Some(request_id) {
                    return;
                }
                self.pending_auth = None;
                match result {
                    Ok(()) => {
                        self.overlay = None;
                        let message = if enabled {
                            auth::MFA_ENABLED_MESSAGE
                        } else {
                            auth::MFA_DISABLED_MESSAGE
                        };
                        self.notify(NoticeKind::Success, message);
                    }
                    Err(err) => self.form_error(format!("{err:#}")),
                }
            }
        }
    }

    fn form_error(&mut self, message: String) {
        match self.overlay.as_mut() {
            Some(Overlay::Login(form)) | Some(Overlay::SecondFactor(form)) => {
                form.set_status(message.clone())
            }
            Some(Overlay::Profile(view)) => view.form.set_status(message.clone()),
            _ => {}
        }
        self.notify(NoticeKind::Error, message);
    }

    fn signed_in(&mut self, user: SignedInUser) {
        self.overlay = None;
        self.notify(NoticeKind::Success, format!("Signed in as {}.", user.email));
        if self.load_private {
            self.reload(Container::Private);
        }
    }

    fn switch_to(&mut self, container: Container) {
        if container == self.active {
            return;
        }
        self.active = container;
        self.controller.activate(container);
    }

    fn current_video(&self) -> Option<&VideoRecord> {
        self.controller.feed(self.active)?.current()
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.overlay.is_some() {
            self.handle_overlay_key(code)?;
            return Ok(false);
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => {
                self.controller
                    .swipe(self.active, Direction::Forward, Instant::now());
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.controller
                    .swipe(self.active, Direction::Backward, Instant::now());
            }
            KeyCode::Char('u') => {
                self.controller.vote_current(self.active, Press::Up);
            }
            KeyCode::Char('d') => {
                self.controller.vote_current(self.active, Press::Down);
            }
            KeyCode::Enter => {
                if let Err(err) = self.controller.play_current(self.active) {
                    self.notify(NoticeKind::Error, err.to_string());
                }
            }
            KeyCode::Char('m') => {
                if let Some(muted) = self.controller.toggle_mute(self.active) {
                    self.status_message = if muted { "Muted" } else { "Sound on" }.to_string();
                }
            }
            KeyCode::Tab | KeyCode::BackTab => {
                let next = self.active.next();
                if next == Container::Private && !self.session.is_signed_in() {
                    self.notify(NoticeKind::Error, "Sign in to see your private videos.");
                } else {
                    self.switch_to(next);
                    if self.controller.feed(next).is_none() && !self.loading.contains_key(&next) {
                        self.reload(next);
                    }
                }
            }
            KeyCode::Char('r') => self.reload(self.active),
            KeyCode::Char('s') => {
                if self.require_sign_in("share videos") {
                    self.overlay = Some(Overlay::Share(Form::share()));
                }
            }
            KeyCode::Char('x') => {
                if self.require_sign_in("delete videos") {
                    self.request_delete();
                }
            }
            KeyCode::Char('l') => {
                if let Some(user) = self.session.active() {
                    self.notify(NoticeKind::Info, format!("Already signed in as {}.", user.email));
                } else {
                    self.overlay = Some(Overlay::Login(Form::login()));
                }
            }
            KeyCode::Char('p') => {
                if let Some(user) = self.session.active() {
                    self.overlay = Some(Overlay::Profile(ProfileView {
                        email: user.email,
                        mfa_enabled: user.mfa_enabled,
                        enrollment: None,
                        form: Form::code("Profile"),
                    }));
                } else {
                    self.notify(NoticeKind::Error, "Sign in to manage your profile.");
                }
            }
            KeyCode::Char('L') => self.logout()?,
            KeyCode::Char('o') => self.open_current()?,
            KeyCode::Char('c') => self.copy_current()?,
            KeyCode::Char('?') => self.overlay = Some(Overlay::Help),
            _ => {}
        }
        Ok(false)
    }

    fn require_sign_in(&mut self, action: &str) -> bool {
        if self.session.is_signed_in() {
            true
        } else {
            self.notify(NoticeKind::Error, format!("Sign in to {action}."));
            false
        }
    }

    fn request_delete(&mut self) {
        if self.pending_delete.is_some() {
            self.notify(NoticeKind::Info, "A delete is already in progress.");
            return;
        }
        let title = self
            .current_video()
            .map(|video| video.display_title().to_string());
        let (Some(title), Some(video_id)) =
            (title, self.controller.request_delete_current(self.active))
        else {
            self.notify(NoticeKind::Info, "Nothing to delete.");
            return;
        };
        self.overlay = Some(Overlay::ConfirmDelete {
            container: self.active,
            video_id,
            title,
        });
    }

    fn logout(&mut self) -> Result<()> {
        if !self.session.is_signed_in() {
            self.notify(NoticeKind::Info, "You are not signed in.");
            return Ok(());
        }
        self.session.logout()?;
        self.switch_to(Container::Popular);
        self.loading.remove(&Container::Private);
        self.controller.remove_container(Container::Private);
        self.feed_events = Container::ALL
            .iter()
            .map(|container| self.controller.subscribe(*container))
            .collect();
        self.notify(NoticeKind::Success, "Signed out.");
        Ok(())
    }

    fn open_current(&mut self) -> Result<()> {
        let Some(url) = self.current_video().map(|video| video.media_url().to_string()) else {
            return Ok(());
        };
        webbrowser::open(&url).map_err(|err| anyhow!("open {url}: {err}"))?;
        self.notify(NoticeKind::Info, format!("Opened {url}"));
        Ok(())
    }

    fn copy_current(&mut self) -> Result<()> {
        let Some(url) = self.current_video().map(|video| video.media_url().to_string()) else {
            return Ok(());
        };
        let mut clipboard =
            arboard::Clipboard::new().map_err(|err| anyhow!("open clipboard: {err}"))?;
        clipboard
            .set_text(url)
            .map_err(|err| anyhow!("copy link: {err}"))?;
        self.notify(NoticeKind::Success, "Link copied to clipboard.");
        Ok(())
    }

    fn handle_overlay_key(&mut self, code: KeyCode) -> Result<()> {
        let Some(overlay) = self.overlay.take() else {
            return Ok(());
        };
        match overlay {
            Overlay::Help => {}
            Overlay::ConfirmDelete {
                container,
                video_id,
                title,
            } => match code {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    self.spawn_delete(container, video_id);
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    self.controller.cancel_delete(container);
                    self.status_message = "Delete cancelled".to_string();
                }
                _ => {
                    self.overlay = Some(Overlay::ConfirmDelete {
                        container,
                        video_id,
                        title,
                    });
                }
            },
            Overlay::Share(mut form) => {
                if self.edit_form(&mut form, code) {
                    self.submit_share(&mut form);
                }
                if code == KeyCode::Esc {
                    self.pending_share = None;
                } else {
                    self.overlay = Some(Overlay::Share(form));
                }
            }
            Overlay::Login(mut form) => {
                if self.edit_form(&mut form, code) {
                    self.submit_login(&mut form);
                }
                if code == KeyCode::Esc {
                    self.pending_auth = None;
                } else {
                    self.overlay = Some(Overlay::Login(form));
                }
            }
            Overlay::SecondFactor(mut form) => {
                if self.edit_form(&mut form, code) {
                    self.submit_second_factor(&mut form);
                }
                if code == KeyCode::Esc {
                    self.pending_auth = None;
                    self.session.cancel_login();
                } else {
                    self.overlay = Some(Overlay::SecondFactor(form));
                }
            }
            Overlay::Profile(mut view) => {
                let start_setup = code == KeyCode::Char('s')
                    && !view.mfa_enabled
                    && view.enrollment.is_none()
                    && !view.form.submitting;
                if start_setup {
                    view.form.submitting = true;
                    self.spawn_mfa_setup();
                } else if let (KeyCode::Char('o'), Some(enrollment)) = (code, &view.enrollment) {
                    let path = enrollment.qr_path.display().to_string();
                    if let Err(err) = webbrowser::open(&path) {
                        view.form.set_status(format!("open {path}: {err}"));
                    }
                } else if self.edit_form(&mut view.form, code) {
                    self.submit_profile(&mut view);
                }
                if code == KeyCode::Esc {
                    self.pending_auth = None;
                } else {
                    self.overlay = Some(Overlay::Profile(view));
                }
            }
        }
        Ok(())
    }

    /// Applies an editing key. Returns true when the form should be submitted.
    fn edit_form(&self, form: &mut Form, code: KeyCode) -> bool {
        match code {
            KeyCode::Enter => return !form.submitting,
            KeyCode::Tab | KeyCode::Down => form.next(),
            KeyCode::BackTab | KeyCode::Up => form.previous(),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Char(ch) => form.insert_char(ch),
            _ => {}
        }
        false
    }

    fn submit_share(&mut self, form: &mut Form) {
        let url = form.text(0).trim().to_string();
        if url.is_empty() {
            form.set_status("Please enter a video URL");
            return;
        }
        let optional = |value: &str| {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        };
        let request = ShareRequest {
            url,
            title: optional(form.text(1)),
            description: optional(form.text(2)),
            is_private: Some(form.toggled(3)),
        };
        form.status = None;
        form.submitting = true;
        let request_id = self.next_request();
        self.pending_share = Some(request_id);
        let service = Arc::clone(&self.share_service);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.share(&request);
            let _ = tx.send(AsyncResponse::Shared { request_id, result });
        });
    }

    fn spawn_delete(&mut self, container: Container, video_id: String) {
        let request_id = self.next_request();
        self.pending_delete = Some(request_id);
        self.status_message = "Deleting…".to_string();
        let service = Arc::clone(&self.share_service);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.delete(&video_id);
            let _ = tx.send(AsyncResponse::Deleted {
                request_id,
                container,
                video_id,
                result,
            });
        });
    }

    fn submit_login(&mut self, form: &mut Form) {
        let email = match auth::validate_email(form.text(0)) {
            Ok(email) => email,
            Err(err) => {
                form.set_status(err.to_string());
                return;
            }
        };
        form.status = None;
        form.submitting = true;
        let request_id = self.next_request();
        self.pending_auth = Some(request_id);
        let session = Arc::clone(&self.session);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = session.begin_login(&email);
            let _ = tx.send(AsyncResponse::Login { request_id, result });
        });
    }

    fn submit_second_factor(&mut self, form: &mut Form) {
        let code = match auth::validate_otp(form.text(0)) {
            Ok(code) => code.to_string(),
            Err(err) => {
                form.set_status(err.to_string());
                return;
            }
        };
        form.status = None;
        form.submitting = true;
        let request_id = self.next_request();
        self.pending_auth = Some(request_id);
        let session = Arc::clone(&self.session);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = session.complete_login(&code);
            let _ = tx.send(AsyncResponse::Verified { request_id, result });
        });
    }

    fn spawn_mfa_setup(&mut self) {
        let request_id = self.next_request();
        self.pending_auth = Some(request_id);
        let session = Arc::clone(&self.session);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = session.begin_mfa_setup();
            let _ = tx.send(AsyncResponse::MfaSetup { request_id, result });
        });
    }

    fn submit_profile(&mut self, view: &mut ProfileView) {
        if !view.mfa_enabled && view.enrollment.is_none() {
            view.form.set_status("Press s to start MFA setup first");
            return;
        }
        let code = match auth::validate_otp(view.form.text(0)) {
            Ok(code) => code.to_string(),
            Err(err) => {
                view.form.set_status(err.to_string());
                return;
            }
        };
        view.form.status = None;
        view.form.submitting = true;
        let enable = !view.mfa_enabled;
        let request_id = self.next_request();
        self.pending_auth = Some(request_id);
        let session = Arc::clone(&self.session);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = if enable {
                session.enable_mfa(&code)
            } else {
                session.disable_mfa(&code)
            };
            let _ = tx.send(AsyncResponse::MfaChanged {
                request_id,
                enabled: enable,
                result,
            });
        });
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(LayoutDirection::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
        } else {
            self.status_message.clone()
        };
        let account = self
            .session
            .active()
            .map(|user| format!("  [{}]", user.email))
            .unwrap_or_else(|| "  [signed out]".to_string());
        let status_line = Paragraph::new(format!("{status_text}{account}")).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        self.draw_tabs(frame, layout[1]);

        let body = Layout::default()
            .direction(LayoutDirection::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(layout[2]);
        self.draw_window(frame, body[0]);
        self.draw_detail(frame, body[1]);

        let (notice_text, notice_color) = match &self.notice {
            Some(notice) => {
                let color = match notice.kind {
                    NoticeKind::Info => COLOR_ACCENT,
                    NoticeKind::Success => COLOR_SUCCESS,
                    NoticeKind::Error => COLOR_ERROR,
                };
                (truncate(&notice.text, layout[3].width as usize), color)
            }
            None => (String::new(), COLOR_TEXT_SECONDARY),
        };
        let notice = Paragraph::new(notice_text)
            .style(Style::default().fg(notice_color).bg(COLOR_PANEL_BG));
        frame.render_widget(notice, layout[3]);

        let footer = Paragraph::new(truncate(FOOTER_HINTS, layout[4].width as usize))
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center);
        frame.render_widget(footer, layout[4]);

        if self.overlay.is_some() {
            self.draw_overlay(frame, layout[2]);
        }
    }

    fn draw_tabs(&self, frame: &mut Frame<'_>, area: Rect) {
        let titles: Vec<Line<'static>> = Container::ALL
            .iter()
            .map(|container| {
                let count = self
                    .controller
                    .feed(*container)
                    .map(|feed| feed.len().to_string())
                    .unwrap_or_else(|| "–".to_string());
                Line::from(format!("{} ({count})", container.display_name()))
            })
            .collect();
        let selected = Container::ALL
            .iter()
            .position(|container| *container == self.active)
            .unwrap_or(0);
        let tabs = Tabs::new(titles)
            .select(selected)
            .style(Style::default().fg(COLOR_TEXT_SECONDARY).bg(COLOR_PANEL_BG))
            .highlight_style(
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            );
        frame.render_widget(tabs, area);
    }

    fn panel_block(&self, title: String) -> Block<'static> {
        Block::default()
            .title(Span::styled(
                title,
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::horizontal(1))
    }

    fn draw_window(&self, frame: &mut Frame<'_>, area: Rect) {
        let feed = self.controller.feed(self.active);
        let position = feed.and_then(|feed| feed.current_index().map(|i| (i, feed.len())));
        let name = self.active.display_name();
        let title = match position {
            Some((index, len)) => format!("{name} · {}/{len}", index + 1),
            None => name.to_string(),
        };
        let block = self.panel_block(title);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let Some(feed) = feed.filter(|feed| !feed.is_empty()) else {
            let message = if self.loading.contains_key(&self.active) {
                format!("{} Loading…", self.spinner.frame())
            } else {
                "No videos yet. Press s to share one.".to_string()
            };
            frame.render_widget(
                Paragraph::new(message).style(Style::default().fg(COLOR_TEXT_SECONDARY)),
                inner,
            );
            return;
        };

        let width = inner.width as usize;
        let window = feed.window();
        let items: Vec<ListItem> = window
            .clone()
            .filter_map(|index| feed.items().get(index).map(|video| (index, video)))
            .map(|(index, video)| {
                let prefix = format!(
                    "{} {:>3}. ",
                    playback_marker(feed.playback_of(video.id())),
                    index + 1
                );
                let suffix = format!(" {}", feed.vote_state(video.id()).marker());
                let room = width.saturating_sub(prefix.width() + suffix.width());
                let title_style = if video.category() == Category::Funny {
                    Style::default().fg(COLOR_FUNNY)
                } else {
                    Style::default().fg(COLOR_TEXT_PRIMARY)
                };
                ListItem::new(Line::from(vec![
                    Span::styled(prefix, Style::default().fg(COLOR_TEXT_SECONDARY)),
                    Span::styled(truncate(video.display_title(), room), title_style),
                    Span::styled(suffix, Style::default().fg(COLOR_ACCENT)),
                ]))
            })
            .collect();

        let mut state = ListState::default();
        if let Some(current) = feed.current_index() {
            state.select(Some(current.saturating_sub(window.start)));
        }
        let list = List::new(items).highlight_style(
            Style::default()
                .bg(COLOR_PANEL_SELECTED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_stateful_widget(list, inner, &mut state);
    }

    fn draw_detail(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = self.panel_block("Now showing".to_string());
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let Some(feed) = self.controller.feed(self.active) else {
            return;
        };
        let Some(video) = feed.current() else {
            return;
        };
        let width = inner.width as usize;
        let secondary = Style::default().fg(COLOR_TEXT_SECONDARY);

        let mut lines = wrap_plain(
            video.display_title(),
            width,
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .add_modifier(Modifier::BOLD),
        );
        let owner = if video.owner().is_empty() {
            "unknown"
        } else {
            video.owner()
        };
        lines.push(Line::from(Span::styled(format!("Shared by {owner}"), secondary)));
        let visibility = if video.is_private() { "private" } else { "public" };
        lines.push(Line::from(Span::styled(
            format!("{} · {visibility}", video.category().label()),
            secondary,
        )));
        lines.push(Line::from(""));

        let vote = feed.vote_state(video.id());
        lines.push(Line::from(vec![
            Span::styled(
                format!("▲ {}  ▼ {}", video.upvotes(), video.downvotes()),
                Style::default().fg(COLOR_ACCENT),
            ),
            Span::styled(format!("   ({})", vote_label(vote)), secondary),
        ]));
        let playback = match feed.playback_of(video.id()) {
            Some(Playback::Playing) => "Playing",
            Some(Playback::Blocked) => "Paused, press Enter to play",
            _ => "Stopped",
        };
        let sound = if feed.is_muted() { "muted" } else { "sound on" };
        lines.push(Line::from(Span::styled(format!("{playback} · {sound}"), secondary)));
        lines.push(Line::from(""));

        if !video.description().trim().is_empty() {
            lines.extend(wrap_plain(
                video.description(),
                width,
                Style::default().fg(COLOR_TEXT_PRIMARY),
            ));
            lines.push(Line::from(""));
        }
        lines.push(Line::from(Span::styled(
            truncate(video.media_url(), width),
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::UNDERLINED),
        )));

        frame.render_widget(Paragraph::new(Text::from(lines)), inner);
    }

    fn draw_overlay(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(overlay) = &self.overlay else {
            return;
        };
        let spinner = self.spinner.frame();
        let (title, body, size) = match overlay {
            Overlay::ConfirmDelete { title, .. } => (
                "Delete video".to_string(),
                Text::from(vec![
                    Line::from(format!("Delete \"{title}\"?")),
                    Line::from(""),
                    Line::from(Span::styled(
                        "y confirm · n cancel",
                        Style::default().fg(COLOR_TEXT_SECONDARY),
                    )),
                ]),
                (50, 30),
            ),
            Overlay::Share(form) | Overlay::Login(form) | Overlay::SecondFactor(form) => {
                (form.title.to_string(), form.body(spinner), (60, 45))
            }
            Overlay::Profile(view) => (
                "Profile".to_string(),
                profile_body(view, spinner),
                (60, 55),
            ),
            Overlay::Help => ("Keys".to_string(), help_body(), (60, 70)),
        };
        let (percent_x, percent_y) = size;
        let popup_area = centered_rect(percent_x, percent_y, area);
        frame.render_widget(Clear, popup_area);
        let popup = Paragraph::new(body)
            .block(
                Block::default()
                    .title(Span::styled(
                        title,
                        Style::default()
                            .fg(COLOR_ACCENT)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_ACCENT))
                    .style(Style::default().bg(COLOR_PANEL_BG))
                    .padding(Padding::uniform(1)),
            )
            .wrap(Wrap { trim: false });
        frame.render_widget(popup, popup_area);
    }
}

fn profile_body(view: &ProfileView, spinner: &str) -> Text<'static> {
    let secondary = Style::default().fg(COLOR_TEXT_SECONDARY);
    let mut lines = vec![
        Line::from(format!("Email: {}", view.email)),
        Line::from(format!(
            "Two-factor authentication: {}",
            if view.mfa_enabled { "enabled" } else { "disabled" }
        )),
        Line::from(""),
    ];
    if view.mfa_enabled {
        lines.push(Line::from(Span::styled(
            "Enter a code from your authenticator app to disable MFA.",
            secondary,
        )));
    } else if let Some(enrollment) = &view.enrollment {
        lines.push(Line::from(format!("Secret: {}", enrollment.secret)));
        lines.push(Line::from(Span::styled(
            format!("QR code: {} (o to open)", enrollment.qr_path.display()),
            secondary,
        )));
        lines.push(Line::from(Span::styled(
            "Enter the code shown by your authenticator app to enable MFA.",
            secondary,
        )));
    } else {
        lines.push(Line::from(Span::styled(
            "Press s to set up two-factor authentication.",
            secondary,
        )));
    }
    lines.push(Line::from(""));
    lines.extend(view.form.body(spinner).lines);
    Text::from(lines)
}

fn help_body() -> Text<'static> {
    let rows = [
        ("j / ↓", "next video"),
        ("k / ↑", "previous video"),
        ("u / d", "upvote / downvote"),
        ("Enter", "play current video"),
        ("m", "mute or unmute"),
        ("Tab", "switch between Popular and Private"),
        ("r", "reload feed"),
        ("s", "share a video"),
        ("x", "delete current video"),
        ("l / L", "sign in / sign out"),
        ("p", "profile and two-factor setup"),
        ("o / c", "open / copy video link"),
        ("q", "quit"),
    ];
    Text::from(
        rows.iter()
            .map(|(key, action)| {
                Line::from(vec![
                    Span::styled(
                        format!("{key:<10}"),
                        Style::default()
                            .fg(COLOR_ACCENT)
                            .add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(*action, Style::default().fg(COLOR_TEXT_PRIMARY)),
                ])
            })
            .collect::<Vec<_>>(),
    )
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MockAccountService, MockFeedService};
    use crate::feed::FeedController;
    use crate::session::SharedToken;
    use crate::storage::{Options as StoreOptions, Store};
    use crate::video::StageConfig;
    use tempfile::{tempdir, TempDir};

    fn offline_model(dir: &TempDir) -> Model {
        offline_model_with(
            dir,
            StageConfig {
                command: vec!["funny-tui-test-missing-player".into()],
                autoplay: false,
            },
        )
    }

    fn offline_model_with(dir: &TempDir, stage: StageConfig) -> Model {
        let store = Arc::new(
            Store::open(StoreOptions {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        let feeds = MockFeedService::default();
        let shares = feeds.share_service("me@example.com");
        let flow = auth::Flow::new(Arc::new(MockAccountService::new(Arc::clone(&store))));
        let session = Arc::new(session::Manager::new(
            store,
            flow,
            SharedToken::default(),
            dir.path().join("qr"),
        ));
        Model::new(Options {
            controller: FeedController::new(MpvStage::new(stage), Duration::ZERO),
            feed_service: Arc::new(feeds),
            share_service: Arc::new(shares),
            session,
            load_private: true,
            status_message: String::new(),
        })
    }

    fn settle(model: &mut Model) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while model.is_loading() && Instant::now() < deadline {
            model.poll_async();
            thread::sleep(Duration::from_millis(5));
        }
        model.poll_async();
    }

    fn type_text(model: &mut Model, text: &str) {
        for ch in text.chars() {
            model.handle_key(KeyCode::Char(ch)).unwrap();
        }
    }

    fn sign_in(model: &mut Model) {
        model.handle_key(KeyCode::Char('l')).unwrap();
        type_text(model, "me@example.com");
        model.handle_key(KeyCode::Enter).unwrap();
        settle(model);
        assert!(model.session.is_signed_in());
    }

    #[test]
    fn truncates_by_display_width() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 6), "hello…");
        assert_eq!(truncate("日本語のタイトル", 5), "日本…");
        assert_eq!(truncate("abc", 0), "");
    }

    #[test]
    fn code_field_accepts_only_six_digits() {
        let mut form = Form::code("Code");
        for ch in "12a34567".chars() {
            form.insert_char(ch);
        }
        assert_eq!(form.text(0), "123456");
        form.backspace();
        assert_eq!(form.text(0), "12345");
    }

    #[test]
    fn share_form_toggles_private() {
        let mut form = Form::share();
        form.previous();
        assert_eq!(form.active, 3);
        form.insert_char(' ');
        assert!(form.toggled(3));
        form.next();
        form.insert_char('x');
        assert_eq!(form.text(0), "x");
    }

    #[test]
    fn loads_popular_and_swipes() {
        let dir = tempdir().unwrap();
        let mut model = offline_model(&dir);
        model.start();
        settle(&mut model);

        let feed = model.controller.feed(Container::Popular).unwrap();
        assert_eq!(feed.len(), 4);
        assert_eq!(feed.current_index(), Some(0));
        assert!(model.controller.feed(Container::Private).is_none());

        model.handle_key(KeyCode::Char('j')).unwrap();
        model.handle_key(KeyCode::Char('u')).unwrap();
        let feed = model.controller.feed(Container::Popular).unwrap();
        assert_eq!(feed.current_index(), Some(1));
        let current = feed.current().unwrap();
        assert_eq!(feed.vote_state(current.id()), VoteState::Up);
        assert_eq!(current.upvotes(), 1);
    }

    #[test]
    fn signed_out_actions_are_refused() {
        let dir = tempdir().unwrap();
        let mut model = offline_model(&dir);
        model.start();
        settle(&mut model);

        model.handle_key(KeyCode::Char('s')).unwrap();
        assert!(model.overlay.is_none());
        assert_eq!(model.notice.as_ref().map(|n| n.kind), Some(NoticeKind::Error));

        model.handle_key(KeyCode::Tab).unwrap();
        assert_eq!(model.active, Container::Popular);
    }

    #[test]
    fn login_loads_private_feed_and_share_focuses_record() {
        let dir = tempdir().unwrap();
        let mut model = offline_model(&dir);
        model.start();
        settle(&mut model);
        sign_in(&mut model);
        assert_eq!(
            model.controller.feed(Container::Private).map(|feed| feed.len()),
            Some(1)
        );

        model.handle_key(KeyCode::Char('s')).unwrap();
        type_text(&mut model, "https://youtu.be/abc123");
        model.handle_key(KeyCode::Tab).unwrap();
        type_text(&mut model, "Lol cat");
        model.handle_key(KeyCode::BackTab).unwrap();
        model.handle_key(KeyCode::BackTab).unwrap();
        model.handle_key(KeyCode::Char(' ')).unwrap();
        model.handle_key(KeyCode::Enter).unwrap();
        settle(&mut model);

        assert!(model.overlay.is_none());
        assert_eq!(model.active, Container::Private);
        let feed = model.controller.feed(Container::Private).unwrap();
        assert_eq!(feed.len(), 2);
        let current = feed.current().unwrap();
        assert_eq!(current.title(), "Lol cat");
        assert_eq!(current.category(), Category::Funny);
    }

    #[test]
    fn empty_share_url_is_rejected_locally() {
        let dir = tempdir().unwrap();
        let mut model = offline_model(&dir);
        sign_in(&mut model);
        model.handle_key(KeyCode::Char('s')).unwrap();
        model.handle_key(KeyCode::Enter).unwrap();
        assert!(model.pending_share.is_none());
        match &model.overlay {
            Some(Overlay::Share(form)) => {
                assert_eq!(form.status.as_deref(), Some("Please enter a video URL"))
            }
            _ => panic!("share form closed"),
        }
    }

    #[test]
    fn delete_is_confirmed_before_removal() {
        let dir = tempdir().unwrap();
        let mut model = offline_model(&dir);
        model.start();
        settle(&mut model);
        sign_in(&mut model);

        model.handle_key(KeyCode::Char('x')).unwrap();
        model.handle_key(KeyCode::Char('n')).unwrap();
        assert_eq!(model.controller.feed(Container::Popular).unwrap().len(), 4);

        model.handle_key(KeyCode::Char('x')).unwrap();
        model.handle_key(KeyCode::Char('y')).unwrap();
        settle(&mut model);
        let feed = model.controller.feed(Container::Popular).unwrap();
        assert_eq!(feed.len(), 3);
        assert_eq!(feed.current_index(), Some(0));
        assert!(feed.pending_delete().is_none());
    }

    #[test]
    fn failed_delete_keeps_item_and_reports_error() {
        let dir = tempdir().unwrap();
        let mut model = offline_model(&dir);
        model.start();
        settle(&mut model);
        sign_in(&mut model);

        // someone else removed it on the server already
        model.share_service.delete("1").unwrap();
        model.handle_key(KeyCode::Char('x')).unwrap();
        model.handle_key(KeyCode::Char('y')).unwrap();
        settle(&mut model);

        let feed = model.controller.feed(Container::Popular).unwrap();
        assert_eq!(feed.len(), 4);
        assert_eq!(feed.current().map(|v| v.id()), Some("1"));
        assert!(feed.pending_delete().is_none());
        let notice = model.notice.as_ref().unwrap();
        assert_eq!(notice.kind, NoticeKind::Error);
        assert!(notice.text.contains("Video not found"), "{}", notice.text);
    }

    #[cfg(unix)]
    #[test]
    fn private_feed_loading_in_background_keeps_popular_playing() {
        let dir = tempdir().unwrap();
        let mut model = offline_model_with(
            &dir,
            StageConfig {
                command: vec!["sh".into(), "-c".into(), "sleep 30".into(), "%URL%".into()],
                autoplay: true,
            },
        );
        model.start();
        settle(&mut model);
        assert_eq!(
            model.controller.stage().now_playing(),
            Some((Container::Popular, "1"))
        );

        sign_in(&mut model);
        assert!(model.controller.feed(Container::Private).is_some());
        assert_eq!(
            model.controller.stage().now_playing(),
            Some((Container::Popular, "1"))
        );
        assert_eq!(
            model
                .controller
                .feed(Container::Private)
                .and_then(|feed| feed.playback_of("5")),
            Some(Playback::Idle)
        );

        model.handle_key(KeyCode::Tab).unwrap();
        assert_eq!(
            model.controller.stage().now_playing(),
            Some((Container::Private, "5"))
        );
        model.handle_key(KeyCode::Tab).unwrap();
        assert_eq!(
            model.controller.stage().now_playing(),
            Some((Container::Popular, "1"))
        );
        model.controller.stage_mut().shutdown();
    }

    #[test]
    fn mfa_enable_then_second_factor_login() {
        let dir = tempdir().unwrap();
        let mut model = offline_model(&dir);
        sign_in(&mut model);

        model.handle_key(KeyCode::Char('p')).unwrap();
        model.handle_key(KeyCode::Enter).unwrap();
        match &model.overlay {
            Some(Overlay::Profile(view)) => assert!(view.form.status.is_some()),
            _ => panic!("profile closed"),
        }
        model.handle_key(KeyCode::Char('s')).unwrap();
        settle(&mut model);
        type_text(&mut model, "123456");
        model.handle_key(KeyCode::Enter).unwrap();
        settle(&mut model);
        assert!(model.overlay.is_none());
        assert_eq!(
            model.notice.as_ref().map(|n| n.text.as_str()),
            Some(auth::MFA_ENABLED_MESSAGE)
        );

        model.handle_key(KeyCode::Char('L')).unwrap();
        assert!(!model.session.is_signed_in());
        assert!(model.controller.feed(Container::Private).is_none());

        model.handle_key(KeyCode::Char('l')).unwrap();
        type_text(&mut model, "me@example.com");
        model.handle_key(KeyCode::Enter).unwrap();
        settle(&mut model);
        assert!(matches!(model.overlay, Some(Overlay::SecondFactor(_))));

        type_text(&mut model, "12");
        model.handle_key(KeyCode::Enter).unwrap();
        match &model.overlay {
            Some(Overlay::SecondFactor(form)) => assert_eq!(
                form.status.as_deref(),
                Some("Please enter a valid 6-digit code")
            ),
            _ => panic!("code prompt closed"),
        }
        type_text(&mut model, "3456");
        model.handle_key(KeyCode::Enter).unwrap();
        settle(&mut model);
        assert!(model.session.is_signed_in());
        assert!(model.overlay.is_none());
    }
}
