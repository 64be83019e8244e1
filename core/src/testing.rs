//! In-process fakes shared by the unit tests

use crate::error::{KernelError, Result, Service};
use crate::output::{DisplaySurface, RenderEvent};
use crate::services::{CompileResult, Compiler, Driver, Execution, FileContent, Registry, StatusStream};
use crate::types::{InvocationId, InvocationStatus, SessionId, StatusSnapshot, StatusUpdate, Variables};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Display
// =============================================================================

#[derive(Default)]
pub struct RecordingSurface {
    events: Mutex<Vec<RenderEvent>>,
}

impl RecordingSurface {
    pub fn events(&self) -> Vec<RenderEvent> {
        self.events.lock().clone()
    }

    /// Concatenated text of one stream.
    pub fn text(&self, name: crate::output::StreamName) -> String {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RenderEvent::Stream { name: n, text } if *n == name => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl DisplaySurface for RecordingSurface {
    fn emit(&self, event: RenderEvent) {
        self.events.lock().push(event);
    }
}

// =============================================================================
// HTTP
// =============================================================================

pub fn http_response(status: u16, content_type: &str, body: &[u8]) -> Vec<u8> {
    http_response_with_headers(status, content_type, &[], body)
}

pub fn http_response_with_headers(
    status: u16,
    content_type: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> Vec<u8> {
    let mut head = format!(
        "HTTP/1.1 {} STUB\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        content_type,
        body.len()
    );
    for (name, value) in headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");

    let mut response = head.into_bytes();
    response.extend_from_slice(body);
    response
}

/// Answers one canned response per connection, in order.
pub struct HttpStub {
    addr: std::net::SocketAddr,
    handle: JoinHandle<Vec<String>>,
}

impl HttpStub {
    pub async fn start(responses: Vec<Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);
                socket.write_all(&response).await.unwrap();
                let _ = socket.shutdown().await;
            }
            requests
        });

        Self { addr, handle }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests received so far, head and body, once every response was served.
    pub async fn requests(self) -> Vec<String> {
        self.handle.await.unwrap()
    }
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break buf.len();
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    String::from_utf8_lossy(&buf).to_string()
}

// =============================================================================
// Services
// =============================================================================

fn unreachable_error(service: Service) -> KernelError {
    KernelError::transport(service, "connection refused")
}

#[derive(Default)]
struct CompilerState {
    results: VecDeque<CompileResult>,
    compiled: Vec<String>,
    injected: Vec<Variables>,
    unreachable: bool,
}

/// Compiles anything into one instruction echoing the source, unless
/// results were queued.
#[derive(Default)]
pub struct FakeCompiler {
    state: Mutex<CompilerState>,
}

impl FakeCompiler {
    pub fn push_result(&self, result: CompileResult) {
        self.state.lock().results.push_back(result);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    pub fn compiled(&self) -> Vec<String> {
        self.state.lock().compiled.clone()
    }

    pub fn injected(&self) -> Vec<Variables> {
        self.state.lock().injected.clone()
    }
}

#[async_trait]
impl Compiler for FakeCompiler {
    async fn compile(&self, source: &str) -> Result<CompileResult> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(unreachable_error(Service::Compiler));
        }
        state.compiled.push(source.to_string());
        Ok(state
            .results
            .pop_front()
            .unwrap_or_else(|| CompileResult::Ok(vec![serde_json::json!({ "source": source })])))
    }

    async fn inject_variables(&self, variables: &Variables) -> Result<()> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(unreachable_error(Service::Compiler));
        }
        state.injected.push(variables.clone());
        Ok(())
    }
}

/// Scripted answer to one status fetch
#[derive(Debug, Clone)]
pub enum Step {
    Snapshot(StatusSnapshot),
    Fail,
}

pub fn running(output: &str, bytecode: Option<&str>) -> Step {
    Step::Snapshot(StatusSnapshot {
        status: InvocationStatus::Running,
        output: Some(output.to_string()),
        bytecode: bytecode.map(str::to_string),
    })
}

pub fn complete(output: &str) -> Step {
    Step::Snapshot(StatusSnapshot {
        status: InvocationStatus::Complete,
        output: Some(output.to_string()),
        bytecode: None,
    })
}

#[derive(Default)]
struct RegistryState {
    sessions_created: usize,
    known: HashSet<String>,
    variables: HashMap<String, Variables>,
    active: HashMap<String, String>,
    files: HashMap<(String, String), FileContent>,
    invocations: Vec<(SessionId, Vec<serde_json::Value>)>,
    scripts: HashMap<String, VecDeque<Step>>,
    status_fetches: usize,
    cancel_on_fetch: Option<CancellationToken>,
    unreachable: bool,
}

/// Sessions are `S<n>` and invocations `I<n>`, counted from 1. Status
/// fetches follow the script of the invocation and report completion once
/// it runs out.
#[derive(Default)]
pub struct FakeRegistry {
    state: Mutex<RegistryState>,
}

impl FakeRegistry {
    pub fn sessions_created(&self) -> usize {
        self.state.lock().sessions_created
    }

    pub fn set_variable(&self, session: &str, name: &str, data_type: &str) {
        let mut state = self.state.lock();
        state.known.insert(session.to_string());
        state
            .variables
            .entry(session.to_string())
            .or_default()
            .insert(name.to_string(), data_type.to_string());
    }

    pub fn set_active(&self, session: &str, invocation: &str) {
        let mut state = self.state.lock();
        state.known.insert(session.to_string());
        state.active.insert(session.to_string(), invocation.to_string());
    }

    pub fn set_file(&self, session: &str, name: &str, file: FileContent) {
        let mut state = self.state.lock();
        state.known.insert(session.to_string());
        state.files.insert((session.to_string(), name.to_string()), file);
    }

    pub fn script_status(&self, invocation: &str, steps: Vec<Step>) {
        self.state.lock().scripts.insert(invocation.to_string(), steps.into());
    }

    pub fn cancel_on_fetch(&self, token: CancellationToken) {
        self.state.lock().cancel_on_fetch = Some(token);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    pub fn status_fetches(&self) -> usize {
        self.state.lock().status_fetches
    }

    pub fn invocations(&self) -> Vec<(SessionId, Vec<serde_json::Value>)> {
        self.state.lock().invocations.clone()
    }

    fn known_session(state: &RegistryState, session: &SessionId) -> Result<()> {
        if state.unreachable {
            return Err(unreachable_error(Service::Registry));
        }
        if !state.known.contains(session.as_str()) {
            return Err(KernelError::transport(
                Service::Registry,
                format!("session {} not found", session),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn create_session(&self) -> Result<SessionId> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(unreachable_error(Service::Registry));
        }
        state.sessions_created += 1;
        let id = format!("S{}", state.sessions_created);
        state.known.insert(id.clone());
        Ok(SessionId::new(id))
    }

    async fn get_variables(&self, session: &SessionId) -> Result<Variables> {
        let state = self.state.lock();
        Self::known_session(&state, session)?;
        Ok(state.variables.get(session.as_str()).cloned().unwrap_or_default())
    }

    async fn create_invocation(
        &self,
        session: &SessionId,
        instructions: &[serde_json::Value],
    ) -> Result<InvocationId> {
        let mut state = self.state.lock();
        Self::known_session(&state, session)?;
        state.invocations.push((session.clone(), instructions.to_vec()));
        Ok(InvocationId::new(format!("I{}", state.invocations.len())))
    }

    async fn get_status(&self, invocation: &InvocationId) -> Result<StatusSnapshot> {
        let mut state = self.state.lock();
        state.status_fetches += 1;
        if let Some(token) = &state.cancel_on_fetch {
            token.cancel();
        }
        if state.unreachable {
            return Err(unreachable_error(Service::Registry));
        }

        let step = state
            .scripts
            .get_mut(invocation.as_str())
            .and_then(|steps| steps.pop_front());
        match step {
            Some(Step::Snapshot(snapshot)) => Ok(snapshot),
            Some(Step::Fail) => Err(unreachable_error(Service::Registry)),
            None => Ok(StatusSnapshot {
                status: InvocationStatus::Complete,
                output: None,
                bytecode: None,
            }),
        }
    }

    async fn get_active_invocation(&self, session: &SessionId) -> Result<Option<InvocationId>> {
        let state = self.state.lock();
        Self::known_session(&state, session)?;
        Ok(state.active.get(session.as_str()).map(InvocationId::new))
    }

    async fn get_file(&self, session: &SessionId, name: &str) -> Result<FileContent> {
        let state = self.state.lock();
        Self::known_session(&state, session)?;
        state
            .files
            .get(&(session.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| KernelError::transport(Service::Registry, format!("no file variable {}", name)))
    }

    fn file_url(&self, session: &SessionId, name: &str) -> String {
        format!("http://registry.test/sessions/{}/files/{}", session, name)
    }
}

struct Script {
    updates: Vec<StatusUpdate>,
    hang: bool,
}

#[derive(Default)]
struct DriverState {
    scripts: VecDeque<Script>,
    executed: Vec<(SessionId, String)>,
    observed: Vec<InvocationId>,
}

/// Every call to `execute` or `observe` consumes the next queued script; a
/// single closing update is pushed when none is queued.
#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<DriverState>,
}

impl FakeDriver {
    pub fn push_updates(&self, updates: Vec<StatusUpdate>) {
        self.state.lock().scripts.push_back(Script { updates, hang: false });
    }

    /// Push updates and then never close.
    pub fn push_hanging(&self, updates: Vec<StatusUpdate>) {
        self.state.lock().scripts.push_back(Script { updates, hang: true });
    }

    pub fn executed(&self) -> Vec<(SessionId, String)> {
        self.state.lock().executed.clone()
    }

    pub fn observed(&self) -> Vec<InvocationId> {
        self.state.lock().observed.clone()
    }

    fn next_stream(state: &mut DriverState) -> StatusStream {
        let script = state.scripts.pop_front().unwrap_or_else(|| Script {
            updates: vec![StatusUpdate {
                close: true,
                ..StatusUpdate::default()
            }],
            hang: false,
        });

        let updates = stream::iter(script.updates.into_iter().map(Ok));
        if script.hang {
            Box::pin(updates.chain(stream::pending()))
        } else {
            Box::pin(updates)
        }
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn execute(&self, session: &SessionId, source: &str) -> Result<Execution> {
        let mut state = self.state.lock();
        state.executed.push((session.clone(), source.to_string()));
        let invocation = InvocationId::new(format!("I{}", state.executed.len()));
        let updates = Self::next_stream(&mut state);
        Ok(Execution { invocation, updates })
    }

    async fn observe(&self, invocation: &InvocationId) -> Result<StatusStream> {
        let mut state = self.state.lock();
        state.observed.push(invocation.clone());
        Ok(Self::next_stream(&mut state))
    }
}

pub fn update(output: &str, bytecode: Option<&str>, close: bool) -> StatusUpdate {
    StatusUpdate {
        output: output.to_string(),
        bytecode: bytecode.map(str::to_string),
        close,
    }
}
