//! Connection state machine.
//!
//! The machine does no io. Requests from [`Connection`][crate::Connection] handles and
//! decoded backend messages come in as events, frontend messages are written into an
//! output buffer which the connection worker flushes to the transport.
//!
//! ```text
//! Unplugged -> Connecting -> Authenticating -> Idle <-> Transaction -> Terminated
//!                                                       |- Starting
//!                                                       |- Idle
//!                                                       |- SimpleQuery { Waiting, FetchData }
//!                                                       |- ExtendedQuery { Parse, Bind, Exec }
//!                                                       |- Error
//!                                                       |- Exiting
//! ```
//!
//! Each level, connection and transaction, keeps its own queue of deferred requests
//! which is replayed in arrival order once the level is idle again.
use bytes::BytesMut;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    Error, Result,
    common::{ByteStr, debug, error, info, span, unit_error, verbose, warn},
    connection::{ConnectionCallbacks, ConnectionOptions},
    encode::Params,
    postgres::{
        BackendMessage, FrontendProtocol, Message, ProtocolError, QueryError,
        backend::{Authentication, BackendKeyData},
        frontend,
    },
    resultset::Resultset,
    statement::StatementCache,
    value::TypeRegistry,
};

mod auth;
mod extended;
mod simple;
mod transaction;

pub use auth::UnsupportedAuth;

use transaction::{Step, Transaction, TxRequest};

/// Called once per statement result, the last call of a query is flagged complete.
pub(crate) type ResultCallback = Box<dyn FnMut(Resultset, bool) + Send>;

pub(crate) type ErrorCallback = Box<dyn FnOnce(Error) + Send>;

pub(crate) type StartedCallback = Box<dyn FnOnce() + Send>;

unit_error! {
    /// Connection is terminated, no operation is accepted.
    pub struct Terminated("connection terminated");
}

unit_error! {
    /// Operation was queued in a transaction which has been rolled back.
    pub struct TransactionAborted("transaction aborted");
}

/// Identify a transaction across handles and requests.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct TransactionId(u64);

impl TransactionId {
    pub(crate) fn next() -> Self {
        static ID: AtomicU64 = AtomicU64::new(0);
        Self(ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A query request, with parameters it runs as extended query.
pub(crate) struct Query {
    pub(crate) sql: String,
    pub(crate) params: Option<Params>,
    /// Transaction the query is issued from.
    pub(crate) tx: Option<TransactionId>,
    pub(crate) on_result: ResultCallback,
    pub(crate) on_error: ErrorCallback,
}

impl Query {
    pub(crate) fn fail(self, err: impl Into<Error>) {
        (self.on_error)(err.into())
    }
}

/// Final result of a query in an implicit transaction, delivered once `COMMIT` succeeds.
pub(crate) struct Held {
    result: Resultset,
    on_result: ResultCallback,
    on_error: ErrorCallback,
}

impl Held {
    pub(crate) fn deliver(mut self) {
        (self.on_result)(self.result, true)
    }

    pub(crate) fn fail(self, err: impl Into<Error>) {
        (self.on_error)(err.into())
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("sql", &self.sql)
            .field("params", &self.params)
            .field("tx", &self.tx)
            .finish_non_exhaustive()
    }
}

/// Request event from connection handles.
pub(crate) enum Request {
    Begin {
        id: TransactionId,
        on_started: StartedCallback,
        on_error: ErrorCallback,
    },
    /// `COMMIT` when `commit` is true, `ROLLBACK` otherwise.
    Close {
        id: TransactionId,
        commit: bool,
    },
    Execute(Query),
    Terminate,
}

impl Request {
    /// Fail the request without running it.
    pub(crate) fn fail(self, err: impl Into<Error>) {
        match self {
            Request::Begin { on_error, .. } => on_error(err.into()),
            Request::Execute(query) => query.fail(err),
            Request::Close { .. } | Request::Terminate => {}
        }
    }

    #[cfg_attr(not(feature = "verbose"), allow(unused))]
    fn name(&self) -> &'static str {
        match self {
            Request::Begin { .. } => "Begin",
            Request::Close { commit: true, .. } => "Commit",
            Request::Close { commit: false, .. } => "Rollback",
            Request::Execute(_) => "Execute",
            Request::Terminate => "Terminate",
        }
    }
}

/// Resources shared by every level of the machine.
pub(crate) struct Shared {
    pub(crate) out: BytesMut,
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) cache: StatementCache,
}

impl Shared {
    pub(crate) fn send<F: FrontendProtocol>(&mut self, msg: F) {
        frontend::write(msg, &mut self.out);
    }

    pub(crate) fn query(&mut self, sql: &str) {
        verbose!("Query: {sql}");
        self.send(frontend::Query { sql });
    }
}

enum State {
    Unplugged,
    Connecting,
    Authenticating,
    Idle,
    Transaction(Transaction),
    Terminated,
}

impl State {
    #[cfg_attr(not(feature = "verbose"), allow(unused))]
    fn name(&self) -> &'static str {
        match self {
            State::Unplugged => "Unplugged",
            State::Connecting => "Connecting",
            State::Authenticating => "Authenticating",
            State::Idle => "Idle",
            State::Transaction(_) => "Transaction",
            State::Terminated => "Terminated",
        }
    }
}

/// Log and ignore a message that has no meaning in current phase.
pub(crate) fn unexpected(_msg: &BackendMessage, _phase: &'static str) {
    warn!(
        "unexpected message `{}` in `{_phase}`, ignored",
        BackendMessage::message_name(_msg.msgtype()),
    );
}

/// Protocol state machine of one connection.
pub(crate) struct Machine {
    state: State,
    deferred: VecDeque<Request>,
    shared: Shared,
    options: ConnectionOptions,
    callbacks: ConnectionCallbacks,
    server_params: HashMap<ByteStr, ByteStr>,
    backend_key: Option<BackendKeyData>,
}

impl Machine {
    pub(crate) fn new(options: ConnectionOptions, callbacks: ConnectionCallbacks) -> Self {
        Self {
            state: State::Unplugged,
            deferred: VecDeque::new(),
            shared: Shared {
                out: BytesMut::with_capacity(1024),
                registry: options.registry.clone(),
                cache: StatementCache::new(),
            },
            options,
            callbacks,
            server_params: HashMap::new(),
            backend_key: None,
        }
    }

    /// Frontend messages waiting to be written.
    pub(crate) fn output(&mut self) -> &mut BytesMut {
        &mut self.shared.out
    }

    pub(crate) fn is_terminated(&self) -> bool {
        matches!(self.state, State::Terminated)
    }

    /// Transport is being established.
    pub(crate) fn connecting(&mut self) {
        if let State::Unplugged = self.state {
            verbose!("Unplugged -> Connecting");
            self.state = State::Connecting;
        }
    }

    /// Transport is established, start the handshake.
    pub(crate) fn connected(&mut self) {
        if let State::Unplugged | State::Connecting = self.state {
            verbose!("Connecting -> Authenticating");
            frontend::Startup {
                user: self.options.user.as_str(),
                database: Some(self.options.dbname.as_str()),
                params: &self.options.params,
            }
            .write(&mut self.shared.out);
            self.state = State::Authenticating;
        }
    }

    /// Route a request event.
    pub(crate) fn request(&mut self, req: Request) {
        verbose!("Request {} in {}", req.name(), self.state.name());

        if let Request::Terminate = req {
            match self.state {
                State::Idle | State::Transaction(_) => return self.terminate(),
                State::Terminated => return,
                _ => {}
            }
        }

        match &mut self.state {
            State::Terminated => req.fail(Terminated),
            State::Unplugged | State::Connecting | State::Authenticating => {
                self.deferred.push_back(req);
            },
            State::Idle if !self.deferred.is_empty() => self.deferred.push_back(req),
            State::Idle => self.dispatch(req),
            State::Transaction(tx) => {
                // requests of the open transaction never wait behind the top level queue,
                // it may hold a `Begin` that only runs after this transaction ends
                let own = match &req {
                    Request::Execute(query) => query.tx == Some(tx.id()),
                    Request::Close { id, .. } => *id == tx.id(),
                    _ => false,
                };
                if tx.is_closing() || (!own && !self.deferred.is_empty()) {
                    self.deferred.push_back(req);
                    return;
                }
                match req {
                    Request::Execute(query) => match query.tx {
                        Some(id) if id != tx.id() => query.fail(TransactionAborted),
                        _ => tx.request(TxRequest::Execute(query), &mut self.shared),
                    },
                    Request::Close { id, commit } if id == tx.id() => {
                        tx.request(TxRequest::Close { commit }, &mut self.shared);
                    },
                    Request::Close { .. } => {
                        debug!("close request of finished transaction ignored");
                    },
                    req => self.deferred.push_back(req),
                }
            },
        }
    }

    /// Run a request in top level `Idle`.
    fn dispatch(&mut self, req: Request) {
        match req {
            Request::Begin { id, on_started, on_error } => {
                let tx = Transaction::begin(id, on_started, on_error, &mut self.shared);
                self.state = State::Transaction(tx);
            },
            Request::Execute(query) if query.tx.is_some() => query.fail(TransactionAborted),
            Request::Execute(query) => {
                let tx = Transaction::implicit(query, &mut self.shared);
                self.state = State::Transaction(tx);
            },
            Request::Close { .. } => {
                debug!("close request without transaction ignored");
            },
            Request::Terminate => self.terminate(),
        }
    }

    /// Replay deferred requests, as if they arrive just now.
    fn replay(&mut self) {
        let mut queue = std::mem::take(&mut self.deferred);
        verbose!("Replay {} requests", queue.len());
        while let Some(req) = queue.pop_front() {
            self.request(req);
        }
        if let State::Idle = self.state {
            if self.deferred.is_empty() {
                if let Some(idle) = self.callbacks.idle.as_mut() {
                    idle();
                }
            }
        }
    }

    /// Process one backend message, any error terminates the connection.
    pub(crate) fn handle(&mut self, msg: Message) {
        if let Err(err) = self.try_handle(msg) {
            self.fail(err);
        }
    }

    fn try_handle(&mut self, msg: Message) -> Result<()> {
        span!("handle", state = self.state.name());
        verbose!("Recv {}", BackendMessage::message_name(msg.msgtype));

        let msg = match BackendMessage::decode(msg)? {
            BackendMessage::NoticeResponse(notice) => {
                let _notice = QueryError::parse(notice.body)?;
                warn!("{_notice}");
                return Ok(());
            },
            BackendMessage::ParameterStatus(param) => {
                debug!("{} = {}", param.name, param.value);
                self.server_params.insert(param.name, param.value);
                return Ok(());
            },
            BackendMessage::BackendKeyData(key) => {
                verbose!("Backend process id {}", key.process_id);
                self.backend_key = Some(key);
                return Ok(());
            },
            BackendMessage::NegotiateProtocolVersion(_v) => {
                warn!("server supports protocol minor version up to {}", _v.minor);
                return Ok(());
            },
            BackendMessage::Unknown(_msg) => {
                warn!("unknown message type `{}`, ignored", char::from(_msg.msgtype));
                return Ok(());
            },
            msg => msg,
        };

        match &mut self.state {
            State::Terminated => {},
            State::Unplugged | State::Connecting => {
                return Err(ProtocolError::unexpected_phase(msg.msgtype(), "Connecting").into());
            },
            State::Authenticating => self.authenticate(msg)?,
            State::Idle => match msg {
                BackendMessage::ErrorResponse(err) => {
                    let _err = QueryError::parse(err.body)?;
                    error!("{_err}");
                },
                msg => unexpected(&msg, "Idle"),
            },
            State::Transaction(tx) => match tx.handle(msg, &mut self.shared)? {
                Step::Continue => {},
                Step::Finished(leftover) => {
                    verbose!("Transaction -> Idle");
                    self.state = State::Idle;
                    for req in leftover.into_iter().rev() {
                        self.deferred.push_front(req);
                    }
                    self.replay();
                },
            },
        }

        Ok(())
    }

    fn authenticate(&mut self, msg: BackendMessage) -> Result<()> {
        match msg {
            BackendMessage::Authentication(auth) => match auth {
                Authentication::Ok => {
                    verbose!("Authentication ok");
                },
                Authentication::CleartextPassword => {
                    self.shared.send(frontend::PasswordMessage {
                        password: self.options.pass.as_str(),
                    });
                },
                Authentication::MD5Password { salt } => {
                    let password = auth::md5_password(
                        self.options.user.as_str(),
                        self.options.pass.as_str(),
                        salt,
                    );
                    self.shared.send(frontend::PasswordMessage { password: &password });
                },
                auth => {
                    return Err(UnsupportedAuth { method: auth.method_name() }.into());
                },
            },
            BackendMessage::ErrorResponse(err) => {
                let err = QueryError::parse(err.body)?;
                return Err(Error::from(err).context("handshake failed"));
            },
            BackendMessage::ReadyForQuery(_) => {
                info!(
                    "connected to {} as {}, server version {}",
                    self.options.dbname,
                    self.options.user,
                    self.server_params.get("server_version").map_or("unknown", ByteStr::as_str),
                );
                verbose!("Authenticating -> Idle");
                self.state = State::Idle;
                self.replay();
            },
            msg => unexpected(&msg, "Authenticating"),
        }
        Ok(())
    }

    /// Terminate by a connection level error.
    pub(crate) fn fail(&mut self, err: Error) {
        if self.is_terminated() {
            debug!("error after termination: {err}");
            return;
        }
        error!("connection error: {err}");
        self.enter_terminated(Some(err));
    }

    /// Terminate by request.
    pub(crate) fn terminate(&mut self) {
        self.enter_terminated(None);
    }

    fn enter_terminated(&mut self, cause: Option<Error>) {
        let prev = std::mem::replace(&mut self.state, State::Terminated);
        verbose!("{} -> Terminated", prev.name());

        match prev {
            State::Terminated => return,
            State::Unplugged | State::Connecting => {},
            State::Authenticating | State::Idle => self.shared.send(frontend::Terminate),
            State::Transaction(tx) => {
                self.shared.send(frontend::Terminate);
                tx.terminate();
            },
        }

        for req in std::mem::take(&mut self.deferred) {
            req.fail(Terminated);
        }

        if let Some(err) = cause {
            match self.callbacks.error.as_mut() {
                Some(on_error) => on_error(err),
                None => drop(err),
            }
        }

        if let Some(terminated) = self.callbacks.terminated.take() {
            terminated();
        }

        match self.backend_key {
            Some(_key) => {
                info!("connection terminated, backend process {}", _key.process_id);
            },
            None => {
                info!("connection terminated");
            },
        }
    }
}

#[cfg(test)]
mod test {
    use bytes::{Buf, BufMut};
    use std::sync::Mutex;

    use super::*;
    use crate::postgres::{Oid, oid};

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn push(&self, event: impl Into<String>) {
            self.0.lock().unwrap().push(event.into());
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    fn options() -> ConnectionOptions {
        ConnectionOptions::new()
            .user("app")
            .password("secret")
            .database("shop")
            .host("localhost")
            .param("application_name", "pgfsm")
    }

    fn machine(log: &Log) -> Machine {
        let (idle, terminated, error) = (log.clone(), log.clone(), log.clone());
        let callbacks = ConnectionCallbacks::new()
            .on_idle(move || idle.push("idle"))
            .on_terminated(move || terminated.push("terminated"))
            .on_error(move |err| error.push(format!("connection error: {}", err.kind())));
        Machine::new(options(), callbacks)
    }

    /// Machine in top level `Idle`.
    fn ready_machine(log: &Log) -> Machine {
        let mut m = machine(log);
        m.connecting();
        m.connected();
        m.output().clear();
        m.handle(auth(0, &[]));
        m.handle(ready(b'I'));
        assert_eq!(log.take(), ["idle"]);
        m
    }

    // ===== backend messages =====

    fn msg(msgtype: u8, body: impl AsRef<[u8]>) -> Message {
        Message::new(msgtype, body.as_ref().to_vec())
    }

    fn nul(s: &str) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.push(0);
        v
    }

    fn auth(code: u32, extra: &[u8]) -> Message {
        let mut body = code.to_be_bytes().to_vec();
        body.extend_from_slice(extra);
        msg(b'R', body)
    }

    fn ready(status: u8) -> Message {
        msg(b'Z', [status])
    }

    fn complete(tag: &str) -> Message {
        msg(b'C', nul(tag))
    }

    fn describe(fields: &[(&str, Oid)]) -> Message {
        let mut body: Vec<u8> = vec![];
        body.put_u16(fields.len() as u16);
        for (name, oid) in fields {
            body.put_slice(&nul(name));
            body.put_u32(0);
            body.put_i16(0);
            body.put_u32(*oid);
            body.put_i16(-1);
            body.put_i32(-1);
            body.put_u16(0);
        }
        msg(b'T', body)
    }

    fn row(values: &[Option<&str>]) -> Message {
        let mut body: Vec<u8> = vec![];
        body.put_u16(values.len() as u16);
        for value in values {
            match value {
                Some(v) => {
                    body.put_i32(v.len() as i32);
                    body.put_slice(v.as_bytes());
                },
                None => body.put_i32(-1),
            }
        }
        msg(b'D', body)
    }

    fn error_response(code: &str, message: &str) -> Message {
        let mut body = vec![b'S'];
        body.extend(nul("ERROR"));
        body.push(b'C');
        body.extend(nul(code));
        body.push(b'M');
        body.extend(nul(message));
        body.push(0);
        msg(b'E', body)
    }

    // ===== requests =====

    fn execute(sql: &str, params: Option<Params>, log: &Log) -> Request {
        let (ok, err) = (log.clone(), log.clone());
        Request::Execute(Query {
            sql: sql.into(),
            params,
            tx: None,
            on_result: Box::new(move |rs: Resultset, complete| {
                ok.push(format!("result {} rows, complete {complete}", rs.len()));
            }),
            on_error: Box::new(move |e| err.push(format!("error: {}", e.kind()))),
        })
    }

    fn begin(id: TransactionId, log: &Log) -> Request {
        let (ok, err) = (log.clone(), log.clone());
        Request::Begin {
            id,
            on_started: Box::new(move || ok.push("started")),
            on_error: Box::new(move |e| err.push(format!("begin error: {}", e.kind()))),
        }
    }

    // ===== frontend output =====

    /// Take written frontend messages as (msgtype, body).
    fn sent(m: &mut Machine) -> Vec<(char, Vec<u8>)> {
        let mut out = m.output().split().freeze();
        let mut msgs = vec![];
        while out.has_remaining() {
            let msgtype = out.get_u8();
            let len = out.get_u32() as usize;
            msgs.push((msgtype as char, out.split_to(len - 4).to_vec()));
        }
        msgs
    }

    fn tags(m: &mut Machine) -> String {
        sent(m).into_iter().map(|(t, _)| t).collect()
    }

    fn queries(m: &mut Machine) -> Vec<String> {
        sent(m)
            .into_iter()
            .filter(|(t, _)| *t == 'Q')
            .map(|(_, body)| String::from_utf8_lossy(&body[..body.len() - 1]).into_owned())
            .collect()
    }

    /// Complete the `BEGIN` of an implicit or explicit transaction.
    fn begun(m: &mut Machine) {
        assert_eq!(queries(m), ["BEGIN"]);
        m.handle(complete("BEGIN"));
        m.handle(ready(b'T'));
    }

    /// Complete the `COMMIT` of a transaction.
    fn committed(m: &mut Machine) {
        assert_eq!(queries(m), ["COMMIT"]);
        m.handle(complete("COMMIT"));
        m.handle(ready(b'I'));
    }

    // ===== handshake =====

    #[test]
    fn startup_packet() {
        let log = Log::default();
        let mut m = machine(&log);
        m.connecting();
        assert!(m.output().is_empty());
        m.connected();

        let mut out = m.output().split().freeze();
        let len = out.get_u32() as usize;
        assert_eq!(len, out.len() + 4);
        assert_eq!(out.get_u32(), 196_608);
        assert_eq!(
            &out[..],
            b"user\0app\0database\0shop\0application_name\0pgfsm\0\0",
        );
    }

    #[test]
    fn md5_auth() {
        let log = Log::default();
        let mut m = machine(&log);
        m.connected();
        m.output().clear();

        m.handle(auth(5, &[0x2a, 0x3d, 0x8f, 0xe0]));
        let sent = sent(&mut m);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 'p');
        assert_eq!(sent[0].1, nul(&auth::md5_password("app", "secret", [0x2a, 0x3d, 0x8f, 0xe0])));
    }

    #[test]
    fn cleartext_auth() {
        let log = Log::default();
        let mut m = machine(&log);
        m.connected();
        m.output().clear();

        m.handle(auth(3, &[]));
        assert_eq!(sent(&mut m), [('p', nul("secret"))]);
    }

    #[test]
    fn unsupported_auth() {
        let log = Log::default();
        let mut m = machine(&log);
        m.connected();
        m.request(execute("select 1", None, &log));
        m.output().clear();

        m.handle(auth(10, b"SCRAM-SHA-256\0\0"));
        assert!(m.is_terminated());
        assert_eq!(log.take(), [
            "error: connection terminated",
            "connection error: auth method `SASL` is not supported",
            "terminated",
        ]);
        assert_eq!(tags(&mut m), "X");

        m.request(execute("select 1", None, &log));
        assert_eq!(log.take(), ["error: connection terminated"]);
    }

    #[test]
    fn handshake_error_is_fatal() {
        let log = Log::default();
        let mut m = machine(&log);
        m.connected();
        m.handle(error_response("28P01", "password authentication failed"));
        assert!(m.is_terminated());
        assert_eq!(log.take(), [
            "connection error: ERROR: password authentication failed (28P01)",
            "terminated",
        ]);
    }

    #[test]
    fn server_state_is_recorded() {
        let log = Log::default();
        let mut m = machine(&log);
        m.connected();
        m.handle(auth(0, &[]));

        let mut status = nul("server_version");
        status.extend(nul("17.2"));
        m.handle(msg(b'S', status));

        let mut key = 42u32.to_be_bytes().to_vec();
        key.extend(7u32.to_be_bytes());
        m.handle(msg(b'K', key));

        m.handle(msg(b'N', b"SWARNING\0MCareful\0\0"));
        m.handle(msg(b'v', [0u8; 8]));
        m.handle(msg(b'!', b"whatever"));
        m.handle(ready(b'I'));

        assert!(!m.is_terminated());
        assert_eq!(m.server_params.get("server_version").map(ByteStr::as_str), Some("17.2"));
        assert_eq!(m.backend_key.map(|e| (e.process_id, e.secret_key)), Some((42, 7)));
        assert_eq!(log.take(), ["idle"]);
    }

    #[test]
    fn deferred_until_ready() {
        let log = Log::default();
        let mut m = machine(&log);
        m.connecting();
        m.request(execute("select 1", None, &log));
        m.request(execute("select 2", None, &log));
        m.connected();
        m.output().clear();

        m.handle(auth(0, &[]));
        assert!(m.output().is_empty());

        m.handle(ready(b'I'));
        begun(&mut m);
        assert_eq!(queries(&mut m), ["select 1"]);
        m.handle(complete("SELECT 0"));
        m.handle(ready(b'T'));
        committed(&mut m);

        begun(&mut m);
        assert_eq!(queries(&mut m), ["select 2"]);
        m.handle(complete("SELECT 0"));
        m.handle(ready(b'T'));
        committed(&mut m);

        assert_eq!(log.take(), [
            "result 0 rows, complete true",
            "result 0 rows, complete true",
            "idle",
        ]);
    }

    #[test]
    fn terminate_is_deferred_during_handshake() {
        let log = Log::default();
        let mut m = machine(&log);
        m.connected();
        m.request(execute("select 1", None, &log));
        m.request(Request::Terminate);
        m.handle(auth(0, &[]));
        assert!(!m.is_terminated());
        m.output().clear();

        m.handle(ready(b'I'));
        assert!(m.is_terminated());
        assert_eq!(tags(&mut m), "QX");
        assert_eq!(log.take(), ["error: connection terminated", "terminated"]);
    }

    // ===== transaction =====

    #[test]
    fn begin_commit() {
        let log = Log::default();
        let mut m = ready_machine(&log);
        let id = TransactionId::next();

        m.request(begin(id, &log));
        m.request(Request::Close { id, commit: true });
        begun(&mut m);
        assert_eq!(log.take(), ["started"]);
        committed(&mut m);
        assert_eq!(log.take(), ["idle"]);
    }

    #[test]
    fn commit_error() {
        let log = Log::default();
        let mut m = ready_machine(&log);
        let id = TransactionId::next();

        m.request(begin(id, &log));
        m.request(Request::Close { id, commit: true });
        begun(&mut m);
        assert_eq!(queries(&mut m), ["COMMIT"]);
        m.handle(error_response("40001", "could not serialize access"));
        m.handle(ready(b'I'));

        assert!(!m.is_terminated());
        assert_eq!(log.take(), [
            "started",
            "begin error: ERROR: could not serialize access (40001)",
            "idle",
        ]);
    }

    #[test]
    fn implicit_result_waits_for_commit() {
        let log = Log::default();
        let mut m = ready_machine(&log);

        m.request(execute("insert into line values (1)", None, &log));
        begun(&mut m);
        assert_eq!(queries(&mut m), ["insert into line values (1)"]);
        m.handle(complete("INSERT 0 1"));
        m.handle(ready(b'T'));
        assert!(log.take().is_empty());

        committed(&mut m);
        assert_eq!(log.take(), ["result 0 rows, complete true", "idle"]);
    }

    #[test]
    fn implicit_commit_error() {
        let log = Log::default();
        let mut m = ready_machine(&log);

        m.request(execute("insert into line values (1)", None, &log));
        m.request(execute("select 1", None, &log));
        begun(&mut m);
        assert_eq!(queries(&mut m), ["insert into line values (1)"]);
        m.handle(complete("INSERT 0 1"));
        m.handle(ready(b'T'));

        assert_eq!(queries(&mut m), ["COMMIT"]);
        m.handle(error_response("23503", "violates foreign key constraint"));
        m.handle(ready(b'I'));

        assert!(!m.is_terminated());
        assert_eq!(log.take(), ["error: ERROR: violates foreign key constraint (23503)"]);

        // the next query runs in its own transaction
        begun(&mut m);
        assert_eq!(queries(&mut m), ["select 1"]);
        m.handle(complete("SELECT 0"));
        m.handle(ready(b'T'));
        committed(&mut m);
        assert_eq!(log.take(), ["result 0 rows, complete true", "idle"]);
    }

    #[test]
    fn implicit_prepared_commit_error() {
        let log = Log::default();
        let mut m = ready_machine(&log);

        m.request(execute("insert into line values ($1)", Some(Params::new().bind(7i32)), &log));
        begun(&mut m);
        assert_eq!(tags(&mut m), "PDS");
        m.handle(msg(b'1', b""));
        m.handle(msg(b'n', b""));
        m.handle(ready(b'T'));
        assert_eq!(tags(&mut m), "BS");
        m.handle(msg(b'2', b""));
        m.handle(ready(b'T'));
        assert_eq!(tags(&mut m), "ES");
        m.handle(complete("INSERT 0 1"));
        m.handle(ready(b'T'));
        assert!(log.take().is_empty());

        assert_eq!(queries(&mut m), ["COMMIT"]);
        m.handle(error_response("23505", "duplicate key value"));
        m.handle(ready(b'I'));
        assert_eq!(log.take(), ["error: ERROR: duplicate key value (23505)", "idle"]);
    }

    #[test]
    fn rollback_and_stale_close() {
        let log = Log::default();
        let mut m = ready_machine(&log);
        let id = TransactionId::next();

        m.request(begin(id, &log));
        begun(&mut m);
        m.request(Request::Close { id, commit: false });
        assert_eq!(queries(&mut m), ["ROLLBACK"]);
        m.handle(complete("ROLLBACK"));
        m.handle(ready(b'I'));
        assert_eq!(log.take(), ["started", "idle"]);

        m.request(Request::Close { id, commit: true });
        assert!(m.output().is_empty());
    }

    #[test]
    fn simple_query_rows() {
        let log = Log::default();
        let mut m = ready_machine(&log);

        let rows = Log::default();
        let (ok, err) = (rows.clone(), rows.clone());
        m.request(Request::Execute(Query {
            sql: "select id, name from post".into(),
            params: None,
            tx: None,
            on_result: Box::new(move |rs: Resultset, complete| {
                assert!(complete);
                assert_eq!(rs.command_tag(), Some("SELECT 2"));
                for row in &rs {
                    let (id, name) = row.to::<(i32, Option<String>)>().unwrap();
                    ok.push(format!("{id} {name:?}"));
                }
            }),
            on_error: Box::new(move |e| err.push(format!("error: {}", e.kind()))),
        }));

        begun(&mut m);
        assert_eq!(queries(&mut m), ["select id, name from post"]);
        m.handle(describe(&[("id", oid::INT4), ("name", oid::TEXT)]));
        m.handle(row(&[Some("1"), Some("foo")]));
        m.handle(row(&[Some("2"), None]));
        m.handle(complete("SELECT 2"));
        m.handle(ready(b'T'));
        committed(&mut m);

        assert_eq!(rows.take(), ["1 Some(\"foo\")", "2 None"]);
        assert_eq!(log.take(), ["idle"]);
    }

    #[test]
    fn multi_statement() {
        let log = Log::default();
        let mut m = ready_machine(&log);
        let id = TransactionId::next();

        m.request(begin(id, &log));
        begun(&mut m);
        m.request(execute("update post set n = 1; select 1; ;", None, &log));
        m.handle(complete("UPDATE 3"));
        m.handle(describe(&[("?column?", oid::INT4)]));
        m.handle(row(&[Some("1")]));
        m.handle(complete("SELECT 1"));
        m.handle(msg(b'I', b""));
        m.handle(ready(b'T'));

        assert_eq!(log.take(), [
            "started",
            "result 0 rows, complete false",
            "result 1 rows, complete false",
            "result 0 rows, complete true",
        ]);
    }

    #[test]
    fn query_error_rolls_back() {
        let log = Log::default();
        let mut m = ready_machine(&log);
        let id = TransactionId::next();

        m.request(begin(id, &log));
        m.request(execute("select * from nope", None, &log));
        m.request(execute("select 1", None, &log));
        m.request(Request::Close { id, commit: true });
        m.request(execute("select 2", None, &log));
        begun(&mut m);

        assert_eq!(queries(&mut m), ["select * from nope"]);
        m.handle(error_response("42P01", "relation \"nope\" does not exist"));
        m.handle(ready(b'E'));
        assert_eq!(queries(&mut m), ["ROLLBACK"]);
        m.handle(complete("ROLLBACK"));
        m.handle(ready(b'I'));

        assert!(!m.is_terminated());
        assert_eq!(log.take(), [
            "started",
            "error: ERROR: relation \"nope\" does not exist (42P01)",
            "error: transaction aborted",
        ]);

        // queued after the commit, runs at top level
        begun(&mut m);
        assert_eq!(queries(&mut m), ["select 2"]);
    }

    #[test]
    fn begin_error() {
        let log = Log::default();
        let mut m = ready_machine(&log);
        let id = TransactionId::next();

        m.request(begin(id, &log));
        m.request(execute("select 1", None, &log));
        assert_eq!(queries(&mut m), ["BEGIN"]);
        m.handle(error_response("25001", "no"));
        m.handle(ready(b'I'));
        assert_eq!(queries(&mut m), ["ROLLBACK"]);
        m.handle(complete("ROLLBACK"));
        m.handle(ready(b'I'));

        assert_eq!(log.take(), [
            "begin error: ERROR: no (25001)",
            "error: transaction aborted",
            "idle",
        ]);
    }

    #[test]
    fn execute_after_transaction_ended() {
        let log = Log::default();
        let mut m = ready_machine(&log);
        let id = TransactionId::next();

        m.request(begin(id, &log));
        m.request(Request::Close { id, commit: true });
        begun(&mut m);
        committed(&mut m);
        log.take();

        let Request::Execute(mut query) = execute("select 1", None, &log) else { unreachable!() };
        query.tx = Some(id);
        m.request(Request::Execute(query));
        assert!(m.output().is_empty());
        assert_eq!(log.take(), ["error: transaction aborted"]);
    }

    #[test]
    fn second_begin_waits_for_first_transaction() {
        let log = Log::default();
        let mut m = ready_machine(&log);
        let (first, second) = (TransactionId::next(), TransactionId::next());

        m.request(begin(first, &log));
        begun(&mut m);
        m.request(begin(second, &log));

        let Request::Execute(mut query) = execute("select 1", None, &log) else { unreachable!() };
        query.tx = Some(first);
        m.request(Request::Execute(query));
        m.request(Request::Close { id: first, commit: true });
        assert_eq!(queries(&mut m), ["select 1"]);

        m.handle(complete("SELECT 0"));
        m.handle(ready(b'T'));
        committed(&mut m);
        begun(&mut m);

        assert_eq!(log.take(), ["started", "result 0 rows, complete true", "started"]);
    }

    // ===== extended query =====

    fn run_prepared(m: &mut Machine, log: &Log, cached: bool) {
        m.request(execute("select $1::int4", Some(Params::new().bind(7i32)), log));
        begun(m);

        if !cached {
            assert_eq!(tags(m), "PDS");
            m.handle(msg(b'1', b""));
            m.handle(msg(b't', [0u8, 1, 0, 0, 0, 23]));
            m.handle(describe(&[("int4", oid::INT4)]));
            m.handle(ready(b'T'));
        }

        let sent = sent(m);
        assert_eq!(sent.iter().map(|e| e.0).collect::<String>(), "BS");
        // one binary parameter, one binary result column
        let bind = &sent[0].1;
        assert!(bind.ends_with(&[0, 1, 0, 0, 0, 4, 0, 0, 0, 7, 0, 1, 0, 1]));

        m.handle(msg(b'2', b""));
        m.handle(ready(b'T'));
        assert_eq!(tags(m), "ES");

        m.handle(row(&[Some("\0\0\0\x07")]));
        m.handle(complete("SELECT 1"));
        m.handle(ready(b'T'));
        committed(m);
    }

    #[test]
    fn prepared_statement_cache() {
        let log = Log::default();
        let mut m = ready_machine(&log);

        run_prepared(&mut m, &log, false);
        assert_eq!(m.shared.cache.len(), 1);
        run_prepared(&mut m, &log, true);
        assert_eq!(m.shared.cache.len(), 1);

        assert_eq!(log.take(), [
            "result 1 rows, complete true",
            "idle",
            "result 1 rows, complete true",
            "idle",
        ]);
    }

    #[test]
    fn prepared_encode_error() {
        let log = Log::default();
        let mut m = ready_machine(&log);

        let params = Params::new().bind_typed(oid::INT2, 70_000i32);
        m.request(execute("select $1", Some(params), &log));
        begun(&mut m);

        // nothing sent for the query, the transaction commits
        committed(&mut m);
        let events = log.take();
        assert_eq!(events.len(), 2);
        assert!(events[0].starts_with("error: "));
        assert_eq!(events[1], "idle");
    }

    #[test]
    fn prepared_too_many_params() {
        let log = Log::default();
        let mut m = ready_machine(&log);

        let params = (0..70_000i64).fold(Params::new(), Params::bind);
        m.request(execute("insert into line select unnest($1)", Some(params), &log));
        begun(&mut m);

        committed(&mut m);
        assert!(!m.is_terminated());
        assert_eq!(log.take(), [
            "error: 70000 parameters exceed the protocol limit of 65535",
            "idle",
        ]);
    }

    // ===== fatal =====

    #[test]
    fn row_without_description_is_fatal() {
        let log = Log::default();
        let mut m = ready_machine(&log);

        m.request(execute("select 1", None, &log));
        begun(&mut m);
        m.output().clear();
        m.handle(row(&[Some("1")]));

        assert!(m.is_terminated());
        assert_eq!(tags(&mut m), "X");
        assert_eq!(log.take(), [
            "error: connection terminated",
            "connection error: protocol error, data row with 1 columns received without row description",
            "terminated",
        ]);
    }

    #[test]
    fn terminate_in_transaction() {
        let log = Log::default();
        let mut m = ready_machine(&log);
        let id = TransactionId::next();

        m.request(begin(id, &log));
        begun(&mut m);
        m.request(execute("select pg_sleep(10)", None, &log));
        m.request(execute("select 1", None, &log));
        m.output().clear();

        m.request(Request::Terminate);
        assert!(m.is_terminated());
        assert_eq!(tags(&mut m), "X");
        assert_eq!(log.take(), [
            "started",
            "error: connection terminated",
            "error: connection terminated",
            "begin error: connection terminated",
            "terminated",
        ]);

        m.request(Request::Terminate);
        assert!(log.take().is_empty());
    }
}
