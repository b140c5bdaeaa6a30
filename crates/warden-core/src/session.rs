//! Session: composition root. Owns the VT, MessageQueue, Agent, DeliveryLoop,
//! and the client set; binds the control socket; runs the lifecycle loop.
//!
//! Binds the control socket with a stale-socket probe-and-remove, then runs
//! an accept loop handing each connection its own attached client backed by
//! a priority queue and derived activity state.

use crate::agent::{Agent, AgentState, AgentProfile, ClaudeCodeProfile, CollectorPorts, GenericProfile};
use crate::client::{Client, ClientHost, DispatchOutcome};
use crate::collectors::Authority;
use crate::collectors::otel::{GenericUsageParser, TelemetryParser};
use crate::config::SupervisorOptions;
use crate::delivery::{DeliveryLoop, NullObserver};
use crate::error::{Result, SupervisorError};
use crate::heartbeat::Heartbeat;
use crate::message::{Message, Priority};
use crate::osc::CachedColor;
use crate::otel_listener::OtelListener;
use crate::protocol::{
  AgentInfo, ControlFrame, FrameType, MessageInfo, Request, Response, decode_frame, encode_frame,
  read_json_request, write_json_response,
};
use crate::queue::MessageQueue;
use crate::vt::{SpawnSpec, Vt};
use log::{info, warn};
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub const H2_ACTOR_ENV: &str = "H2_ACTOR";

/// Resolves the agent type from the command name. Only `claude` is
/// recognized by name today; everything else gets the profile that only
/// supports the always-present output collector.
#[must_use]
pub fn resolve_profile(program: &str) -> Arc<dyn AgentProfile> {
  let basename = Path::new(program)
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or(program);
  match basename {
    "claude" => Arc::new(ClaudeCodeProfile),
    _ => Arc::new(GenericProfile),
  }
}

/// `COLORFGBG` is synthesized when the parent environment doesn't already
/// carry it, since the child has no real host terminal to query.
#[must_use]
fn synthesized_colorfgbg() -> String {
  "15;0".to_string()
}

/// Probes a pre-existing socket path for a live peer before removing it,
/// surfacing a live peer as the typed `AgentAlreadyRunning` error.
pub fn bind_control_socket(path: &Path) -> Result<UnixListener> {
  if let Some(dir) = path.parent() {
    fs::create_dir_all(dir).map_err(|source| SupervisorError::SocketBind {
      path: path.to_path_buf(),
      source,
    })?;
    let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o700));
  }

  if path.exists() {
    match UnixStream::connect(path) {
      Ok(_) => {
        return Err(SupervisorError::AgentAlreadyRunning {
          path: path.to_path_buf(),
        });
      }
      Err(_) => {
        info!("removing stale socket at {}", path.display());
        let _ = fs::remove_file(path);
      }
    }
  }

  UnixListener::bind(path).map_err(|source| SupervisorError::SocketBind {
    path: path.to_path_buf(),
    source,
  })
}

#[must_use]
pub fn socket_path(state_dir: &Path, agent_name: &str) -> PathBuf {
  state_dir.join("sockets").join(format!("{agent_name}.sock"))
}

struct Inner {
  quit_requested: bool,
  relaunch_requested: bool,
  passthrough_owner: Option<u64>,
}

/// The supervisor's composition root for one agent session.
pub struct Session {
  pub name: String,
  pub spawn_spec: SpawnSpec,
  pub queue: Arc<MessageQueue>,
  pub agent: Arc<Agent>,
  pub vt: Mutex<Option<Arc<Vt>>>,
  pub options: SupervisorOptions,
  pub state_dir: PathBuf,
  profile: Arc<dyn AgentProfile>,
  session_id: String,
  collector_ports: CollectorPorts,
  otel_listener: Option<OtelListener>,
  heartbeat: Mutex<Option<Heartbeat>>,
  next_client_id: AtomicU64,
  inner: Mutex<Inner>,
  stop: Arc<AtomicBool>,
}

/// Spools `body` to disk when it exceeds the inline limit and attaches the
/// resulting path to the message, for `DeliveryLoop::render_body` to
/// envelope as a `Read <path>` pointer.
fn spool_if_oversized(state_dir: &Path, agent_name: &str, msg: Message, inline_limit: usize) -> Message {
  if msg.body.len() <= inline_limit {
    return msg;
  }
  match crate::persistence::spool_message_body(state_dir, agent_name, msg.created_at_ms, &msg.id, &msg.body) {
    Ok(path) => msg.with_file_path(path.to_string_lossy().into_owned()),
    Err(e) => {
      warn!("failed to spool oversized message body: {e}");
      msg
    }
  }
}

impl Session {
  /// Builds the `Agent`, wiring in whichever collectors this spawn's
  /// resolved agent type supports, and binds a telemetry listener whenever
  /// the otel collector is active so the child has somewhere to export to.
  #[must_use]
  pub fn new(name: String, spawn_spec: SpawnSpec, options: SupervisorOptions, state_dir: PathBuf) -> Arc<Self> {
    let queue = Arc::new(MessageQueue::new());
    let profile = resolve_profile(&spawn_spec.program);
    let session_id = crate::agent::new_session_id();
    let supported = profile.supported_collectors();
    let with_hook = supported.contains(&Authority::Hook);
    let otel_cfg = if supported.contains(&Authority::Otel) {
      Some((
        options.otel_idle_threshold,
        Arc::new(GenericUsageParser) as Arc<dyn TelemetryParser>,
      ))
    } else {
      None
    };
    let agent = Agent::new(options.output_idle_threshold, otel_cfg, with_hook);

    let otel_listener = agent.otel_collector().and_then(|otel| OtelListener::spawn(otel.clone()));
    let collector_ports = CollectorPorts {
      otel_port: otel_listener.as_ref().map(OtelListener::port),
    };

    Arc::new(Self {
      name,
      spawn_spec,
      queue,
      agent,
      vt: Mutex::new(None),
      options,
      state_dir,
      profile,
      session_id,
      collector_ports,
      otel_listener,
      heartbeat: Mutex::new(None),
      next_client_id: AtomicU64::new(1),
      inner: Mutex::new(Inner {
        quit_requested: false,
        relaunch_requested: false,
        passthrough_owner: None,
      }),
      stop: Arc::new(AtomicBool::new(false)),
    })
  }

  /// `StartPTY` + `PipeOutput`: spawns the child and starts the read pump,
  /// replacing any previous VT (used both at startup and on relaunch).
  /// Also (re)arms the heartbeat task, gated on `options.heartbeat.enabled`.
  pub fn start_vt(self: &Arc<Self>) -> Result<()> {
    let vt = Vt::start(
      self.clone_spawn_spec(),
      self.options.default_rows,
      self.options.default_cols,
      self.options.reserved_rows(),
      self.options.pty_write_timeout,
      CachedColor::white(),
      CachedColor::black(),
    )?;
    let output_collector = self.agent.output_collector().clone();
    vt.spawn_pipe_output(move || {
      output_collector.note_output();
    });
    *self.vt.lock() = Some(vt);

    if let Some(old) = self.heartbeat.lock().take() {
      old.stop();
    }
    let hb = Heartbeat::spawn(self.agent.clone(), self.queue.clone(), self.options.heartbeat.clone());
    *self.heartbeat.lock() = Some(hb);

    Ok(())
  }

  /// Composes the full spawn spec for this session's agent type: prepended
  /// argv (e.g. `--session-id`), injected environment (telemetry endpoint,
  /// `H2_ACTOR`, a synthesized `COLORFGBG` when the parent doesn't already
  /// carry one), then whatever the caller supplied on top.
  fn clone_spawn_spec(&self) -> SpawnSpec {
    let mut args = self.profile.prepend_args(&self.session_id);
    args.extend(self.spawn_spec.args.iter().cloned());

    let mut extra_env = self.profile.child_env(&self.collector_ports);
    extra_env.push((H2_ACTOR_ENV.to_string(), self.name.clone()));
    if std::env::var("COLORFGBG").is_err() {
      extra_env.push(("COLORFGBG".to_string(), synthesized_colorfgbg()));
    }
    extra_env.extend(self.spawn_spec.extra_env.iter().cloned());

    SpawnSpec {
      program: self.spawn_spec.program.clone(),
      args,
      cwd: self.spawn_spec.cwd.clone(),
      extra_env,
    }
  }

  #[must_use]
  pub fn vt(&self) -> Option<Arc<Vt>> {
    self.vt.lock().clone()
  }

  pub fn request_quit(&self) {
    self.inner.lock().quit_requested = true;
    self.stop.store(true, Ordering::Relaxed);
  }

  pub fn request_relaunch(&self) {
    self.inner.lock().relaunch_requested = true;
  }

  #[must_use]
  pub fn try_acquire_passthrough(&self, client_id: u64) -> bool {
    let mut inner = self.inner.lock();
    match inner.passthrough_owner {
      None => {
        inner.passthrough_owner = Some(client_id);
        self.queue.pause();
        true
      }
      Some(owner) => owner == client_id,
    }
  }

  pub fn force_take_passthrough(&self, client_id: u64) {
    let mut inner = self.inner.lock();
    inner.passthrough_owner = Some(client_id);
    self.queue.pause();
  }

  pub fn release_passthrough(&self, client_id: u64) {
    let mut inner = self.inner.lock();
    if inner.passthrough_owner == Some(client_id) {
      inner.passthrough_owner = None;
      self.queue.unpause();
    }
  }

  #[must_use]
  pub fn is_passthrough_locked_by_other(&self, client_id: u64) -> bool {
    match self.inner.lock().passthrough_owner {
      Some(owner) => owner != client_id,
      None => false,
    }
  }

  /// Runs the lifecycle loop: poll child exit, pause+notify on exit, wait
  /// for relaunch or quit. Intended to run on a dedicated thread.
  pub fn run_lifecycle(self: &Arc<Self>) {
    loop {
      if self.stop.load(Ordering::Relaxed) {
        return;
      }
      let exited = self.vt().map(|vt| vt.poll_exit()).unwrap_or(false);
      if exited {
        self.queue.pause();
        warn!("child exited for session {}", self.name);
        loop {
          if self.stop.load(Ordering::Relaxed) {
            return;
          }
          let mut inner = self.inner.lock();
          if inner.relaunch_requested {
            inner.relaunch_requested = false;
            drop(inner);
            self.agent.reset();
            if let Err(e) = self.start_vt() {
              warn!("relaunch failed: {e}");
            } else {
              self.queue.unpause();
            }
            break;
          }
          if inner.quit_requested {
            return;
          }
          drop(inner);
          thread::sleep(Duration::from_millis(100));
        }
      }
      thread::sleep(Duration::from_millis(100));
    }
  }

  pub fn stop(&self) {
    self.stop.store(true, Ordering::Relaxed);
    if let Some(hb) = self.heartbeat.lock().take() {
      hb.stop();
    }
    if let Some(listener) = &self.otel_listener {
      listener.stop();
    }
    self.agent.stop();
  }

  fn next_client_id(&self) -> u64 {
    self.next_client_id.fetch_add(1, Ordering::Relaxed)
  }

  fn handle_request(&self, request: Request) -> Response {
    match request {
      Request::Send { priority, from, body } => {
        let msg = Message::new(from, priority, body);
        let msg = spool_if_oversized(&self.state_dir, &self.name, msg, self.options.inline_body_limit);
        let id = msg.id.clone();
        self.queue.enqueue(msg);
        Response {
          ok: true,
          message_id: Some(id),
          ..Response::default()
        }
      }
      Request::Show { message_id } => match self.queue.lookup(&message_id) {
        Some(m) => Response {
          ok: true,
          message: Some(MessageInfo::from(&m)),
          ..Response::default()
        },
        None => Response::err(SupervisorError::NotFound(message_id).to_string()),
      },
      Request::Status => {
        let (state, sub_state) = self.agent.state();
        Response {
          ok: true,
          agent: Some(AgentInfo {
            name: self.name.clone(),
            state: format!("{state:?}"),
            sub_state: format!("{sub_state:?}"),
            pending_messages: self.queue.pending_count(),
            queue_paused: self.queue.is_paused(),
          }),
          ..Response::default()
        }
      }
      Request::Attach { .. } => Response::ok(),
      Request::HookEvent { event_name, payload } => {
        if let Some(hook) = self.agent.hook_collector() {
          let permission_decision = payload
            .get("decision")
            .and_then(|v| v.as_str())
            .and_then(crate::collectors::hook::PermissionDecision::parse);
          hook.handle_event(&crate::collectors::hook::HookEvent {
            name: event_name,
            permission_decision,
          });
        }
        Response::ok()
      }
      Request::Stop => {
        self.request_quit();
        Response::ok()
      }
    }
  }

  /// Handles one control-socket connection's JSON handshake phase, then (on
  /// a successful `attach`) hands the same stream off to the framed client
  /// loop for the rest of the connection's lifetime.
  pub fn handle_connection(self: &Arc<Self>, stream: UnixStream) {
    let request = match read_json_request(&stream) {
      Ok(r) => r,
      Err(e) => {
        warn!("invalid request: {e}");
        let _ = write_json_response(&stream, &Response::err(e.to_string()));
        return;
      }
    };
    let attach_dims = match &request {
      Request::Attach { cols, rows } => Some((*cols, *rows)),
      _ => None,
    };
    let response = self.handle_request(request);
    if write_json_response(&stream, &response).is_err() {
      return;
    }
    if let Some((cols, rows)) = attach_dims
      && response.ok
    {
      self.serve_attached_client(stream, cols, rows);
    }
  }

  /// Post-handshake framed loop for one attached client: a reader thread
  /// decodes `Data`/`Control` frames off the socket into the `Client` state
  /// machine and the shared VT, while this thread acts as the TickStatus
  /// task, periodically rendering and writing a fresh frame back.
  fn serve_attached_client(self: &Arc<Self>, stream: UnixStream, cols: u16, rows: u16) {
    let Some(vt) = self.vt() else {
      warn!("attach attempted before VT start for session {}", self.name);
      return;
    };
    let client_id = self.next_client_id();
    vt.resize(rows, cols, self.options.reserved_rows());

    let client = Arc::new(Mutex::new(Client::new(
      client_id,
      self.name.clone(),
      vt.clone(),
      self.queue.clone(),
      self.clone() as Arc<dyn ClientHost>,
      self.options.debug_keys,
    )));
    let cols_cell = Arc::new(AtomicU16::new(cols));
    let connection_stop = Arc::new(AtomicBool::new(false));

    let reader_stream = match stream.try_clone() {
      Ok(s) => s,
      Err(e) => {
        warn!("failed to clone attach socket: {e}");
        return;
      }
    };

    let reader_handle = {
      let client = client.clone();
      let vt = vt.clone();
      let cols_cell = cols_cell.clone();
      let connection_stop = connection_stop.clone();
      let session = self.clone();
      thread::spawn(move || {
        let mut reader = reader_stream;
        loop {
          if connection_stop.load(Ordering::Relaxed) {
            return;
          }
          let (frame_type, payload) = match decode_frame(&mut reader) {
            Ok(f) => f,
            Err(_) => {
              connection_stop.store(true, Ordering::Relaxed);
              return;
            }
          };
          match frame_type {
            FrameType::Data => {
              let outcome = client.lock().process_input(&payload);
              match outcome {
                DispatchOutcome::Quit => {
                  session.request_quit();
                  connection_stop.store(true, Ordering::Relaxed);
                  return;
                }
                DispatchOutcome::Detach => {
                  connection_stop.store(true, Ordering::Relaxed);
                  return;
                }
                DispatchOutcome::Relaunch => session.request_relaunch(),
                _ => {}
              }
            }
            FrameType::Control => {
              if let Ok(ControlFrame::Resize { cols, rows }) = serde_json::from_slice(&payload) {
                vt.resize(rows, cols, session.options.reserved_rows());
                cols_cell.store(cols, Ordering::Relaxed);
              }
            }
          }
        }
      })
    };

    let mut writer = stream;
    let mut idle_since: Option<Instant> = None;
    let mut last_state = self.agent.state().0;
    loop {
      if connection_stop.load(Ordering::Relaxed) || self.stop.load(Ordering::Relaxed) {
        break;
      }
      thread::sleep(Duration::from_millis(100));

      let _ = client.lock().check_pending_esc_timeout();

      let (state, _) = self.agent.state();
      if state != last_state {
        idle_since = if state == AgentState::Idle { Some(Instant::now()) } else { None };
        last_state = state;
      }
      let idle_for = idle_since.map(|t| t.elapsed());
      let exit_reason = if state == AgentState::Exited {
        Some(vt.exit_error().unwrap_or_else(|| "exited".to_string()))
      } else {
        None
      };

      let cols = cols_cell.load(Ordering::Relaxed);
      let frame = client.lock().render_frame(cols, idle_for, exit_reason.as_deref());
      let Ok(encoded) = encode_frame(FrameType::Data, &frame) else {
        break;
      };
      if writer.write_all(&encoded).is_err() {
        break;
      }
    }

    connection_stop.store(true, Ordering::Relaxed);
    self.release_passthrough(client_id);
    let _ = reader_handle.join();
  }

  pub fn accept_loop(self: &Arc<Self>, listener: UnixListener) {
    listener.set_nonblocking(true).ok();
    while !self.stop.load(Ordering::Relaxed) {
      match listener.accept() {
        Ok((stream, _)) => {
          let session = self.clone();
          thread::spawn(move || session.handle_connection(stream));
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
          thread::sleep(Duration::from_millis(50));
        }
        Err(e) => {
          warn!("accept error: {e}");
          thread::sleep(Duration::from_millis(200));
        }
      }
    }
  }

  /// Starts the `DeliveryLoop` on its own thread, gated on this session's
  /// idle/blocked predicates.
  pub fn start_delivery_loop(self: &Arc<Self>) -> thread::JoinHandle<()> {
    let queue = self.queue.clone();
    let agent = self.agent.clone();
    let options = self.options.clone();
    let session_for_blocked = self.clone();
    let vt = self.vt().expect("VT must be started before delivery loop");
    thread::spawn(move || {
      let is_blocked: Arc<dyn Fn() -> bool + Send + Sync> = Arc::new(move || {
        matches!(
          session_for_blocked.agent.state().1,
          crate::agent::SubState::WaitingForPermission
        )
      });
      let delivery = DeliveryLoop::new(queue, vt, agent, options, Arc::new(NullObserver), is_blocked);
      delivery.run();
    })
  }
}

impl crate::client::ClientHost for Session {
  fn on_submit(&self, from: &str, priority: Priority, body: String) {
    let msg = Message::new(from, priority, body);
    let msg = spool_if_oversized(&self.state_dir, &self.name, msg, self.options.inline_body_limit);
    self.queue.enqueue(msg);
  }

  fn on_relaunch(&self) {
    self.request_relaunch();
  }

  fn on_detach(&self, client_id: u64) {
    self.release_passthrough(client_id);
  }

  fn queue_status(&self) -> (usize, bool) {
    (self.queue.pending_count(), self.queue.is_paused())
  }

  fn otel_metrics(&self) -> Option<(u64, f64)> {
    self.agent.metrics().map(|m| {
      let snapshot = m.snapshot();
      (snapshot.total_tokens, snapshot.cost_usd)
    })
  }

  fn is_passthrough_locked_by_other(&self, client_id: u64) -> bool {
    Session::is_passthrough_locked_by_other(self, client_id)
  }

  fn try_acquire_passthrough(&self, client_id: u64) -> bool {
    Session::try_acquire_passthrough(self, client_id)
  }

  fn force_take_passthrough(&self, client_id: u64) {
    Session::force_take_passthrough(self, client_id);
  }

  fn release_passthrough(&self, client_id: u64) {
    Session::release_passthrough(self, client_id);
  }

  fn agent_sub_state(&self) -> crate::agent::SubState {
    self.agent.state().1
  }

  fn agent_name(&self) -> String {
    self.name.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn bind_control_socket_succeeds_on_fresh_path() {
    let dir = tempdir().unwrap();
    let path = socket_path(dir.path(), "agent-a");
    let listener = bind_control_socket(&path).unwrap();
    drop(listener);
  }

  #[test]
  fn bind_control_socket_reports_already_running_for_live_peer() {
    let dir = tempdir().unwrap();
    let path = socket_path(dir.path(), "agent-b");
    let _listener = bind_control_socket(&path).unwrap();
    let result = bind_control_socket(&path);
    assert!(matches!(result, Err(SupervisorError::AgentAlreadyRunning { .. })));
  }

  #[test]
  fn bind_control_socket_cleans_up_stale_path() {
    let dir = tempdir().unwrap();
    let path = socket_path(dir.path(), "agent-c");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"not a real socket").unwrap();
    let listener = bind_control_socket(&path);
    assert!(listener.is_ok());
  }

  fn make_session() -> Arc<Session> {
    Session::new(
      "agent-d".to_string(),
      SpawnSpec {
        program: "cat".to_string(),
        args: Vec::new(),
        cwd: std::env::temp_dir(),
        extra_env: Vec::new(),
      },
      SupervisorOptions::default(),
      std::env::temp_dir(),
    )
  }

  #[test]
  fn send_request_enqueues_and_returns_message_id() {
    let session = make_session();
    let response = session.handle_request(Request::Send {
      priority: Priority::Normal,
      from: "peer".to_string(),
      body: "hi".to_string(),
    });
    assert!(response.ok);
    assert!(response.message_id.is_some());
    assert_eq!(session.queue.pending_count(), 1);
  }

  #[test]
  fn show_returns_the_message_body() {
    let session = make_session();
    let send_response = session.handle_request(Request::Send {
      priority: Priority::Normal,
      from: "peer".to_string(),
      body: "hi there".to_string(),
    });
    let id = send_response.message_id.unwrap();
    let response = session.handle_request(Request::Show { message_id: id });
    assert!(response.ok);
    let message = response.message.unwrap();
    assert_eq!(message.body, "hi there");
    assert!(message.file_path.is_none());
  }

  #[test]
  fn show_unknown_message_id_is_not_found() {
    let session = make_session();
    let response = session.handle_request(Request::Show {
      message_id: "nope".to_string(),
    });
    assert!(!response.ok);
    assert!(response.error.unwrap().contains("not found"));
  }

  #[test]
  fn status_reflects_queue_pending_count() {
    let session = make_session();
    session.handle_request(Request::Send {
      priority: Priority::Normal,
      from: "peer".to_string(),
      body: "hi".to_string(),
    });
    let response = session.handle_request(Request::Status);
    assert_eq!(response.agent.unwrap().pending_messages, 1);
  }

  #[test]
  fn passthrough_lock_second_client_is_locked_until_force_take() {
    let session = make_session();
    assert!(session.try_acquire_passthrough(1));
    assert!(session.is_passthrough_locked_by_other(2));
    assert!(!session.try_acquire_passthrough(2));
    session.force_take_passthrough(2);
    assert!(!session.is_passthrough_locked_by_other(2));
    assert!(session.is_passthrough_locked_by_other(1));
  }

  #[test]
  fn stop_request_flags_quit() {
    let session = make_session();
    let response = session.handle_request(Request::Stop);
    assert!(response.ok);
  }

  #[test]
  fn oversized_send_body_is_spooled_to_disk() {
    let dir = tempdir().unwrap();
    let session = Session::new(
      "agent-e".to_string(),
      SpawnSpec {
        program: "cat".to_string(),
        args: Vec::new(),
        cwd: std::env::temp_dir(),
        extra_env: Vec::new(),
      },
      SupervisorOptions::default(),
      dir.path().to_path_buf(),
    );
    let big_body = "x".repeat(crate::config::INLINE_BODY_LIMIT_BYTES + 1);
    let response = session.handle_request(Request::Send {
      priority: Priority::Normal,
      from: "peer".to_string(),
      body: big_body,
    });
    assert!(response.ok);
    let id = response.message_id.unwrap();
    let stored = session.queue.lookup(&id).unwrap();
    assert!(stored.file_path.is_some());
    assert!(std::path::Path::new(stored.file_path.as_ref().unwrap()).exists());
  }
}
