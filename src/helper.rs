//! The native helper: one per browser profile, launched by the browser.
//!
//! [`HelperState`] owns everything one helper knows and is driven by a
//! single event loop. Background tasks (channel reader, bus transport,
//! X11 event thread) only hand it messages.
//!
//! Every helper joins the bus. The helper that wins the election also
//! holds the keyboard hook and is the bus hub; the rest are followers
//! that re-attempt the election when the leader resigns, and on a slow
//! poll in case it died without saying so.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use x11rb::protocol::Event;

use crate::bus::BroadcastBus;
use crate::bus::message::BusMessage;
use crate::bus::socket::SocketBus;
use crate::config::{Config, RuntimePaths, ShortcutConfig};
use crate::election::LeaderElection;
use crate::hotkey::focus::X11FocusProbe;
use crate::hotkey::keybinding::Shortcut;
use crate::hotkey::trigger::SwitchTrigger;
use crate::hotkey::{HotkeyError, KeyEventSink, X11Hook};
use crate::native::ChannelError;
use crate::native::channel::{ChannelEvent, FrameSender, spawn_reader};
use crate::native::protocol::{ExtensionMessage, HostMessage, ShortcutLabels};
use crate::resolver::catalog::BrowserCatalog;
use crate::resolver::identity::ProfileIdentity;
use crate::resolver::owner::OwnerResolver;
use crate::surface::clipboard::Clipboard;
use crate::surface::{LogOverlay, SwitcherOverlay};

/// Pause between a `leaderResigned` and our election attempt, so the
/// old leader's lock is gone by the time we look.
pub const TAKEOVER_DELAY: Duration = Duration::from_millis(100);

const CLIPBOARD_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum HelperError {
    #[error("install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// What a bus message means for this helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Addressed to us; pass on to the extension.
    Forward(HostMessage),
    ReloadShortcuts,
    LeaderResigned,
    /// Addressed to another profile, or we do not know who we are yet.
    Ignore,
}

/// Decide what to do with `message`. `accepts` says whether an
/// addressed target means us; the helper passes [`OwnerResolver::accepts`].
pub fn route(accepts: impl Fn(&ProfileIdentity) -> bool, message: &BusMessage) -> Routed {
    if let Some(target) = message.target() {
        if !accepts(target) {
            return Routed::Ignore;
        }
    }

    match message {
        BusMessage::CtrlTab {
            direction,
            show_ui,
            combine_windows,
            ..
        } => Routed::Forward(HostMessage::cycle(*direction, *show_ui, !combine_windows)),
        BusMessage::CtrlRelease { .. } => Routed::Forward(HostMessage::EndSwitch),
        BusMessage::RequestShowUi { combine_windows, .. } => Routed::Forward(HostMessage::RequestShowUi {
            current_window_only: !combine_windows,
        }),
        BusMessage::CopyUrl { .. } => Routed::Forward(HostMessage::CopyUrl),
        BusMessage::ShortcutsChanged {} => Routed::ReloadShortcuts,
        BusMessage::LeaderResigned {} => Routed::LeaderResigned,
    }
}

/// Display labels for the configured shortcuts. Unparseable entries are
/// shown as written.
pub fn shortcut_labels(shortcuts: &ShortcutConfig) -> ShortcutLabels {
    let label = |raw: &str| {
        raw.parse::<Shortcut>()
            .map(|s| s.label())
            .unwrap_or_else(|_| raw.to_string())
    };
    ShortcutLabels {
        tab_switch: label(&shortcuts.tab_switch),
        copy_url: label(&shortcuts.copy_url),
    }
}

#[derive(Debug, Clone, Default)]
pub struct HelperOptions {
    pub config_path: Option<PathBuf>,
    pub runtime_dir: Option<PathBuf>,
    /// Grab the keyboard when leading. Off leaves a hook-less leader that
    /// still runs the hub.
    pub keyboard_hook: bool,
}

/// Keyboard side of a leader: the hook and the trigger it drives.
struct Leadership {
    hook: X11Hook,
    events: UnboundedReceiver<Event>,
    trigger: SwitchTrigger,
}

pub struct HelperState {
    options: HelperOptions,
    config: Config,
    catalog: Arc<BrowserCatalog>,
    owner: OwnerResolver,
    election: LeaderElection,
    bus: Arc<SocketBus>,
    sender: FrameSender,
    overlay: Box<dyn SwitcherOverlay>,
    clipboard: Clipboard,
    leadership: Option<Leadership>,
    /// `error_no_accessibility` already sent this run.
    hook_reported: bool,
    takeover_at: Option<Instant>,
    registered: bool,
}

impl HelperState {
    /// Load config, resolve our owner, run the first election and join
    /// the bus. Must be called from a tokio runtime.
    pub fn new(options: HelperOptions, sender: FrameSender) -> Self {
        let config = match Config::load(options.config_path.as_deref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "config unusable, using defaults");
                Config::default()
            }
        };
        let catalog = config.catalog().unwrap_or_else(|e| {
            tracing::error!(error = %e, "browser overrides rejected");
            BrowserCatalog::builtin()
        });

        let paths = RuntimePaths::resolve(options.runtime_dir.as_deref());
        if let Err(e) = paths.ensure() {
            tracing::warn!(error = %e, "runtime directory unavailable");
        }

        let mut owner = OwnerResolver::for_current_process();
        owner.resolve_owner(&catalog);

        let mut election = LeaderElection::new(&paths.lock_file);
        let bus = if election.try_become_leader() {
            SocketBus::hub(&paths.bus_socket).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "bus hub unavailable, running detached");
                SocketBus::detached(&paths.bus_socket)
            })
        } else {
            SocketBus::client(&paths.bus_socket)
        };

        let clipboard = Clipboard::from_command(config.clipboard_command.as_deref());

        Self {
            options,
            config,
            catalog: Arc::new(catalog),
            owner,
            election,
            bus: Arc::new(bus),
            sender,
            overlay: Box::new(LogOverlay::new()),
            clipboard,
            leadership: None,
            hook_reported: false,
            takeover_at: None,
            registered: false,
        }
    }

    pub fn with_overlay(mut self, overlay: Box<dyn SwitcherOverlay>) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn is_leader(&self) -> bool {
        self.election.is_leader()
    }

    pub fn identity(&self) -> Option<&ProfileIdentity> {
        self.owner.identity()
    }

    /// Serve the extension on `reader` until it closes the pipe or we are
    /// signalled, then step down.
    pub async fn run<R>(mut self, reader: R) -> Result<(), HelperError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut sigterm = signal(SignalKind::terminate()).map_err(HelperError::Signal)?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(HelperError::Signal)?;

        let (mut channel, reader_task) = spawn_reader::<_, ExtensionMessage>(reader);
        let mut bus_rx = self.bus.subscribe();
        let mut bus_open = true;

        let mut poll = interval(self.config.timing.leader_poll());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut focus_check = interval(self.config.timing.focus_check());
        focus_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            pid = std::process::id(),
            owner = ?self.owner.identity(),
            leader = self.is_leader(),
            "helper started"
        );
        self.send(&HostMessage::Ready).await;
        if self.is_leader() {
            self.try_take_over().await;
        }

        loop {
            tokio::select! {
                event = channel.recv() => match event {
                    Some(ChannelEvent::Message(message)) => self.on_extension_message(message).await,
                    Some(ChannelEvent::Closed) | None => {
                        tracing::info!("extension closed the channel");
                        break;
                    }
                },

                message = bus_rx.recv(), if bus_open => match message {
                    Ok(message) => self.on_bus_message(message).await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "bus subscriber lagged");
                    }
                    Err(RecvError::Closed) => {
                        tracing::error!("bus closed");
                        bus_open = false;
                    }
                },

                event = next_key_event(&mut self.leadership), if self.leadership.is_some() => match event {
                    Some(event) => self.on_x11_event(&event),
                    None => {
                        tracing::error!("keyboard hook stopped delivering events");
                        self.drop_leadership();
                    }
                },

                _ = poll.tick() => self.on_poll_tick().await,

                _ = focus_check.tick(), if self.switch_in_progress() => self.check_focus(),

                _ = sleep_until(self.takeover_at.unwrap_or_else(Instant::now)), if self.takeover_at.is_some() => {
                    self.takeover_at = None;
                    self.try_take_over().await;
                },

                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM");
                    break;
                },
                _ = sigint.recv() => {
                    tracing::info!("SIGINT");
                    break;
                },
            }
        }

        reader_task.abort();
        self.shutdown().await;
        Ok(())
    }

    async fn send(&self, message: &HostMessage) {
        if let Err(e) = self.sender.send(message).await {
            match &e {
                ChannelError::Io(_) => tracing::warn!(error = %e, action = message.action(), "write to extension failed"),
                _ => tracing::error!(error = %e, action = message.action(), "message not sent"),
            }
        }
    }

    async fn on_extension_message(&mut self, message: ExtensionMessage) {
        tracing::debug!(action = message.action(), "from extension");
        match message {
            ExtensionMessage::Register {
                bundle_id,
                extension_version,
            } => {
                let identity = self.owner.register(&bundle_id, &self.catalog).clone();
                tracing::info!(
                    owner = %identity,
                    version = extension_version.as_deref().unwrap_or("unknown"),
                    "extension registered"
                );
                self.registered = true;
                self.send_registered().await;
            }
            ExtensionMessage::ShowSwitcher { tabs, selected_index } => {
                self.overlay.show(&tabs, selected_index);
            }
            ExtensionMessage::UpdateSelection { selected_index } => {
                self.overlay.update_selection(selected_index);
            }
            ExtensionMessage::HideSwitcher => self.overlay.hide(),
            ExtensionMessage::Ping => self.send(&HostMessage::Pong).await,
            ExtensionMessage::Pong => {}
            ExtensionMessage::UrlCopied { url } => self.copy_url(&url).await,
        }
    }

    async fn send_registered(&self) {
        let Some(identity) = self.owner.identity() else {
            return;
        };
        self.send(&HostMessage::Registered {
            bundle_id: identity.bundle_id.clone(),
            shortcuts: shortcut_labels(&self.config.shortcuts),
        })
        .await;
    }

    async fn copy_url(&mut self, url: &str) {
        match tokio::time::timeout(CLIPBOARD_TIMEOUT, self.clipboard.copy(url)).await {
            Ok(Ok(())) => {
                tracing::debug!(len = url.len(), "url copied");
                self.overlay.toast("Link copied");
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "clipboard write failed"),
            Err(_) => tracing::warn!(program = self.clipboard.program(), "clipboard write timed out"),
        }
    }

    async fn on_bus_message(&mut self, message: BusMessage) {
        match route(|target| self.owner.accepts(target), &message) {
            Routed::Forward(host) => {
                tracing::debug!(kind = message.kind(), action = host.action(), "forwarding to extension");
                self.send(&host).await;
            }
            Routed::ReloadShortcuts => self.reload_shortcuts().await,
            Routed::LeaderResigned => {
                if !self.is_leader() {
                    tracing::info!("leader resigned, attempting takeover");
                    self.takeover_at = Some(Instant::now() + TAKEOVER_DELAY);
                }
            }
            Routed::Ignore => {
                tracing::trace!(kind = message.kind(), target = ?message.target(), "not for us");
            }
        }
    }

    async fn reload_shortcuts(&mut self) {
        let config = match Config::load(self.options.config_path.as_deref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "reload failed, keeping current shortcuts");
                return;
            }
        };
        let catalog = match config.catalog() {
            Ok(catalog) => Arc::new(catalog),
            Err(e) => {
                tracing::warn!(error = %e, "reload failed, keeping current browsers");
                return;
            }
        };

        let changed = config.shortcuts != self.config.shortcuts;
        self.clipboard = Clipboard::from_command(config.clipboard_command.as_deref());
        self.config = config;
        self.catalog = catalog;

        if let Some(leadership) = &mut self.leadership {
            leadership.trigger.set_catalog(self.catalog.clone());
            if changed {
                if let Err(e) = leadership.hook.rebind(&self.config.shortcuts) {
                    tracing::warn!(error = %e, "new shortcuts not grabbed");
                }
            }
        }

        tracing::info!(
            tab_switch = %self.config.shortcuts.tab_switch,
            copy_url = %self.config.shortcuts.copy_url,
            changed,
            "shortcuts reloaded"
        );
        if changed && self.registered {
            self.send_registered().await;
        }
    }

    async fn on_poll_tick(&mut self) {
        if self.owner.needs_pid() {
            self.owner.resolve_owner(&self.catalog);
        }
        // A leader whose hub failed to bind keeps retrying it here.
        if !self.is_leader() || !self.bus.is_hub() {
            self.try_take_over().await;
        }
    }

    /// Become leader if the lock is free, then bring up the hub and the
    /// hook. Safe to call repeatedly; finished steps are skipped.
    pub async fn try_take_over(&mut self) {
        let was_leader = self.is_leader();
        if !self.election.try_become_leader() {
            return;
        }
        if !was_leader {
            tracing::info!(pid = std::process::id(), "became leader");
        }

        if !self.bus.is_hub() {
            if let Err(e) = self.bus.promote() {
                tracing::warn!(error = %e, "bus promotion failed; leading without followers");
            }
        }

        if self.leadership.is_none() && self.options.keyboard_hook && !self.hook_reported {
            match self.install_hook() {
                Ok(leadership) => self.leadership = Some(leadership),
                Err(e) => {
                    tracing::warn!(error = %e, "keyboard hook unavailable, leading without it");
                    self.hook_reported = true;
                    self.send(&HostMessage::ErrorNoAccessibility).await;
                }
            }
        }
    }

    fn install_hook(&self) -> Result<Leadership, HotkeyError> {
        let (hook, events) = X11Hook::install(&self.config.shortcuts)?;
        let focus = X11FocusProbe::connect()?;
        let bus: Arc<dyn BroadcastBus> = self.bus.clone();
        let trigger = SwitchTrigger::new(
            bus,
            Box::new(focus),
            self.catalog.clone(),
            self.config.timing.reveal_delay(),
        );
        Ok(Leadership { hook, events, trigger })
    }

    fn on_x11_event(&mut self, event: &Event) {
        let Some(leadership) = &mut self.leadership else {
            return;
        };
        for key in leadership.hook.classify(event) {
            tracing::trace!(?key, "key event");
            leadership.trigger.on_key_event(key);
        }
    }

    fn switch_in_progress(&self) -> bool {
        self.leadership.as_ref().is_some_and(|l| l.trigger.in_progress())
    }

    fn check_focus(&mut self) {
        if let Some(leadership) = &mut self.leadership {
            if leadership.trigger.check_focus() {
                leadership.hook.release_hold();
            }
        }
    }

    fn drop_leadership(&mut self) {
        if let Some(mut leadership) = self.leadership.take() {
            leadership.trigger.finish();
            leadership.hook.uninstall();
        }
    }

    /// Hook first, then the lock, then the hub's resignation broadcast,
    /// so followers that react find the lock already free.
    async fn shutdown(&mut self) {
        let was_leader = self.is_leader();
        self.drop_leadership();
        self.election.release();
        self.bus.shutdown().await;
        tracing::info!(was_leader, "helper stopped");
    }
}

async fn next_key_event(leadership: &mut Option<Leadership>) -> Option<Event> {
    match leadership {
        Some(leadership) => leadership.events.recv().await,
        None => std::future::pending().await,
    }
}
