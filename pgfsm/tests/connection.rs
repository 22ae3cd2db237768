//! Connection against a scripted server over an in memory pipe.
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use pgfsm::{
    Connection, ConnectionCallbacks, ConnectionOptions, ErrorKind, Params, Resultset,
    transport::Stream,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::timeout,
};

const INT4: u32 = 23;
const TEXT: u32 = 25;

struct Server {
    io: DuplexStream,
}

impl Server {
    async fn startup(&mut self) -> Vec<u8> {
        let len = self.io.read_u32().await.unwrap();
        let mut body = vec![0; len as usize - 4];
        self.io.read_exact(&mut body).await.unwrap();
        body
    }

    async fn recv(&mut self) -> (char, Bytes) {
        let msgtype = self.io.read_u8().await.unwrap();
        let len = self.io.read_u32().await.unwrap();
        let mut body = vec![0; len as usize - 4];
        self.io.read_exact(&mut body).await.unwrap();
        (msgtype as char, body.into())
    }

    /// Next message must be a simple `Query`.
    async fn query(&mut self) -> String {
        let (msgtype, body) = self.recv().await;
        assert_eq!(msgtype, 'Q');
        String::from_utf8(body[..body.len() - 1].to_vec()).unwrap()
    }

    async fn expect(&mut self, expected: char) -> Bytes {
        let (msgtype, body) = self.recv().await;
        assert_eq!(msgtype, expected);
        body
    }

    async fn send(&mut self, msgtype: u8, body: impl AsRef<[u8]>) {
        let body = body.as_ref();
        let mut buf = BytesMut::with_capacity(5 + body.len());
        buf.put_u8(msgtype);
        buf.put_u32(4 + body.len() as u32);
        buf.put_slice(body);
        self.io.write_all(&buf).await.unwrap();
    }

    async fn auth(&mut self, code: u32, extra: &[u8]) {
        let mut body = code.to_be_bytes().to_vec();
        body.extend_from_slice(extra);
        self.send(b'R', body).await;
    }

    async fn ready(&mut self, status: u8) {
        self.send(b'Z', [status]).await;
    }

    async fn complete(&mut self, tag: &str) {
        self.send(b'C', nul(tag)).await;
    }

    async fn describe(&mut self, fields: &[(&str, u32)]) {
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
        self.send(b'T', body).await;
    }

    async fn row(&mut self, values: &[&str]) {
        self.raw_row(values.iter().map(|v| v.as_bytes().to_vec()).collect()).await;
    }

    async fn raw_row(&mut self, values: Vec<Vec<u8>>) {
        let mut body: Vec<u8> = vec![];
        body.put_u16(values.len() as u16);
        for value in values {
            body.put_i32(value.len() as i32);
            body.put_slice(&value);
        }
        self.send(b'D', body).await;
    }

    async fn error(&mut self, code: &str, message: &str) {
        let mut body = vec![b'S'];
        body.extend(nul("ERROR"));
        body.push(b'C');
        body.extend(nul(code));
        body.push(b'M');
        body.extend(nul(message));
        body.push(0);
        self.send(b'E', body).await;
    }

    /// Trust authentication up to the first `ReadyForQuery`.
    async fn handshake(&mut self) {
        self.startup().await;
        self.auth(0, &[]).await;
        self.send(b'S', [nul("server_version"), nul("16.0")].concat()).await;
        self.send(b'K', [0, 0, 0, 7, 0, 0, 0, 9]).await;
        self.ready(b'I').await;
    }

    /// Reply to a `BEGIN`, `COMMIT` or `ROLLBACK`.
    async fn reply(&mut self, expected: &str, status: u8) {
        assert_eq!(self.query().await, expected);
        self.complete(expected).await;
        self.ready(status).await;
    }
}

fn nul(s: &str) -> Vec<u8> {
    let mut v = s.as_bytes().to_vec();
    v.push(0);
    v
}

struct Events {
    send: UnboundedSender<String>,
    recv: UnboundedReceiver<String>,
}

impl Events {
    fn new() -> Self {
        let (send, recv) = mpsc::unbounded_channel();
        Self { send, recv }
    }

    fn callbacks(&self) -> ConnectionCallbacks {
        let (idle, terminated, error) = (self.send.clone(), self.send.clone(), self.send.clone());
        ConnectionCallbacks::new()
            .on_idle(move || {
                let _ = idle.send("idle".into());
            })
            .on_terminated(move || {
                let _ = terminated.send("terminated".into());
            })
            .on_error(move |err| {
                let _ = error.send(format!("connection error: {}", kind(err.kind())));
            })
    }

    fn on_result(&self, name: &'static str) -> impl FnMut(Resultset, bool) + Send + 'static {
        let send = self.send.clone();
        move |rs, complete| {
            let rows = rs
                .iter()
                .map(|row| row.to::<(i32, String)>().map(|(id, name)| format!("{id}:{name}")))
                .collect::<Result<Vec<_>, _>>()
                .unwrap_or_else(|_| vec![format!("{} rows", rs.len())]);
            let _ = send.send(format!("{name} [{}] complete {complete}", rows.join(",")));
        }
    }

    fn on_error(&self, name: &'static str) -> impl FnOnce(pgfsm::Error) + Send + 'static {
        let send = self.send.clone();
        move |err| {
            let _ = send.send(format!("{name} error: {}", kind(err.kind())));
        }
    }

    fn on_started(&self) -> impl FnOnce() + Send + 'static {
        let send = self.send.clone();
        move || {
            let _ = send.send("started".into());
        }
    }

    async fn next(&mut self) -> String {
        timeout(Duration::from_secs(5), self.recv.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }
}

fn kind(kind: &ErrorKind) -> String {
    match kind {
        ErrorKind::Query(err) => format!("query {}", err.code()),
        ErrorKind::Terminated(_) => "terminated".into(),
        ErrorKind::TransactionAborted(_) => "aborted".into(),
        ErrorKind::UnsupportedAuth(err) => format!("unsupported {}", err.method()),
        ErrorKind::Io(_) => "io".into(),
        ErrorKind::Protocol(_) => "protocol".into(),
        ErrorKind::Config(_) => "config".into(),
        ErrorKind::Decode(_) => "decode".into(),
        ErrorKind::Encode(_) => "encode".into(),
    }
}

fn options(user: &str, pass: &str) -> ConnectionOptions {
    ConnectionOptions::new().user(user).password(pass).database("shop")
}

fn setup(options: ConnectionOptions, events: &Events) -> (Connection, Server) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let conn = Connection::with_transport(Stream::new(client), options, events.callbacks()).unwrap();
    (conn, Server { io: server })
}

#[tokio::test]
async fn md5_handshake() {
    let mut events = Events::new();
    let (_conn, mut server) = setup(options("md5_user", "password"), &events);

    let mut startup = Bytes::from(server.startup().await);
    assert_eq!(startup.get_u32(), 196608);
    let params = startup[..].split(|b| *b == 0).map(|s| String::from_utf8_lossy(s).into_owned()).collect::<Vec<_>>();
    assert_eq!(&params[..4], ["user", "md5_user", "database", "shop"]);

    server.auth(5, &[0x2a, 0x3d, 0x8f, 0xe0]).await;
    let password = server.expect('p').await;
    assert_eq!(&password[..], b"md562af4dd09bbb41884907a838a3233294\0");

    server.auth(0, &[]).await;
    server.ready(b'I').await;
    assert_eq!(events.next().await, "idle");
}

#[tokio::test]
async fn cleartext_handshake() {
    let mut events = Events::new();
    let (_conn, mut server) = setup(options("app", "secret"), &events);

    server.startup().await;
    server.auth(3, &[]).await;
    assert_eq!(&server.expect('p').await[..], b"secret\0");
    server.auth(0, &[]).await;
    server.ready(b'I').await;
    assert_eq!(events.next().await, "idle");
}

#[tokio::test]
async fn unsupported_auth_terminates() {
    let mut events = Events::new();
    let (conn, mut server) = setup(options("app", "secret"), &events);

    server.startup().await;
    // SASL
    server.auth(10, &nul("SCRAM-SHA-256")).await;
    assert_eq!(events.next().await, "connection error: unsupported SASL");
    assert_eq!(events.next().await, "terminated");

    conn.execute("select 1", events.on_result("late"), events.on_error("late"));
    assert_eq!(events.next().await, "late error: terminated");
}

#[tokio::test]
async fn select_rows() {
    let mut events = Events::new();
    let (conn, mut server) = setup(options("app", "secret"), &events);
    server.handshake().await;
    assert_eq!(events.next().await, "idle");

    conn.execute("select id, name from post", events.on_result("select"), events.on_error("select"));

    server.reply("BEGIN", b'T').await;
    assert_eq!(server.query().await, "select id, name from post");
    server.describe(&[("id", INT4), ("name", TEXT)]).await;
    server.row(&["1", "first"]).await;
    server.row(&["2", "second"]).await;
    server.complete("SELECT 2").await;
    server.ready(b'T').await;

    // delivered once the commit went through
    server.reply("COMMIT", b'I').await;
    assert_eq!(events.next().await, "select [1:first,2:second] complete true");
    assert_eq!(events.next().await, "idle");
}

#[tokio::test]
async fn begin_commit() {
    let mut events = Events::new();
    let (conn, mut server) = setup(options("app", "secret"), &events);
    server.handshake().await;
    assert_eq!(events.next().await, "idle");

    let tx = conn.begin(events.on_started(), events.on_error("tx"));
    tx.execute("insert into post values (3, 'third')", events.on_result("insert"), events.on_error("insert"));
    tx.commit();

    server.reply("BEGIN", b'T').await;
    assert_eq!(events.next().await, "started");

    assert_eq!(server.query().await, "insert into post values (3, 'third')");
    server.complete("INSERT 0 1").await;
    server.ready(b'T').await;
    assert_eq!(events.next().await, "insert [] complete true");

    server.reply("COMMIT", b'I').await;
    assert_eq!(events.next().await, "idle");
}

#[tokio::test]
async fn query_error_rolls_back() {
    let mut events = Events::new();
    let (conn, mut server) = setup(options("app", "secret"), &events);
    server.handshake().await;
    assert_eq!(events.next().await, "idle");

    let tx = conn.begin(events.on_started(), events.on_error("tx"));
    tx.execute("select nope", events.on_result("bad"), events.on_error("bad"));
    tx.execute("select 1", events.on_result("after"), events.on_error("after"));
    tx.commit();

    server.reply("BEGIN", b'T').await;
    assert_eq!(events.next().await, "started");

    assert_eq!(server.query().await, "select nope");
    server.error("42703", "column \"nope\" does not exist").await;
    server.ready(b'E').await;
    assert_eq!(events.next().await, "bad error: query 42703");

    server.reply("ROLLBACK", b'I').await;
    assert_eq!(events.next().await, "after error: aborted");
    assert_eq!(events.next().await, "idle");

    // still usable
    conn.execute("select 1", events.on_result("next"), events.on_error("next"));
    server.reply("BEGIN", b'T').await;
    assert_eq!(server.query().await, "select 1");
    server.describe(&[("id", INT4)]).await;
    server.row(&["1"]).await;
    server.complete("SELECT 1").await;
    server.ready(b'T').await;
    server.reply("COMMIT", b'I').await;
    assert_eq!(events.next().await, "next [1 rows] complete true");
    assert_eq!(events.next().await, "idle");
}

#[tokio::test]
async fn failed_commit_reaches_query() {
    let mut events = Events::new();
    let (conn, mut server) = setup(options("app", "secret"), &events);
    server.handshake().await;
    assert_eq!(events.next().await, "idle");

    conn.execute("insert into line values (1, 99)", events.on_result("insert"), events.on_error("insert"));
    server.reply("BEGIN", b'T').await;
    assert_eq!(server.query().await, "insert into line values (1, 99)");
    server.complete("INSERT 0 1").await;
    server.ready(b'T').await;

    // foreign key checked at commit
    assert_eq!(server.query().await, "COMMIT");
    server.error("23503", "insert or update on table \"line\" violates foreign key constraint").await;
    server.ready(b'I').await;

    assert_eq!(events.next().await, "insert error: query 23503");
    assert_eq!(events.next().await, "idle");
}

#[tokio::test]
async fn failed_commit_reaches_transaction() {
    let mut events = Events::new();
    let (conn, mut server) = setup(options("app", "secret"), &events);
    server.handshake().await;
    assert_eq!(events.next().await, "idle");

    let tx = conn.begin(events.on_started(), events.on_error("tx"));
    tx.execute("update post set n = n + 1", events.on_result("update"), events.on_error("update"));
    tx.commit();

    server.reply("BEGIN", b'T').await;
    assert_eq!(events.next().await, "started");
    assert_eq!(server.query().await, "update post set n = n + 1");
    server.complete("UPDATE 1").await;
    server.ready(b'T').await;
    assert_eq!(events.next().await, "update [] complete true");

    assert_eq!(server.query().await, "COMMIT");
    server.error("40001", "could not serialize access due to concurrent update").await;
    server.ready(b'I').await;

    assert_eq!(events.next().await, "tx error: query 40001");
    assert_eq!(events.next().await, "idle");
}

#[tokio::test]
async fn prepared_statement_is_parsed_once() {
    let mut events = Events::new();
    let (conn, mut server) = setup(options("app", "secret"), &events);
    server.handshake().await;
    assert_eq!(events.next().await, "idle");

    let sql = "select id, name from post where id = $1";
    let tx = conn.begin(events.on_started(), events.on_error("tx"));
    tx.execute_prepared(sql, Params::new().bind(1i32), events.on_result("one"), events.on_error("one"));
    tx.execute_prepared(sql, Params::new().bind(2i32), events.on_result("two"), events.on_error("two"));
    tx.commit();

    server.reply("BEGIN", b'T').await;
    assert_eq!(events.next().await, "started");

    // prepare
    server.expect('P').await;
    server.expect('D').await;
    server.expect('S').await;
    server.send(b'1', b"").await;
    server.send(b't', [0, 1, 0, 0, 0, INT4 as u8]).await;
    server.describe(&[("id", INT4), ("name", TEXT)]).await;
    server.ready(b'T').await;

    // int4 result is requested in binary
    for (id, name) in [(1i32, "first"), (2i32, "second")] {
        server.expect('B').await;
        server.expect('S').await;
        server.send(b'2', b"").await;
        server.ready(b'T').await;

        server.expect('E').await;
        server.expect('S').await;
        server.raw_row(vec![id.to_be_bytes().to_vec(), name.as_bytes().to_vec()]).await;
        server.complete("SELECT 1").await;
        server.ready(b'T').await;
    }

    assert_eq!(events.next().await, "one [1:first] complete true");
    assert_eq!(events.next().await, "two [2:second] complete true");

    // no second `Parse`, straight to commit
    server.reply("COMMIT", b'I').await;
    assert_eq!(events.next().await, "idle");
}

#[tokio::test]
async fn requests_before_handshake_run_in_order() {
    let mut events = Events::new();
    let (conn, mut server) = setup(options("app", "secret"), &events);

    conn.execute("select 1", events.on_result("first"), events.on_error("first"));
    conn.execute("select 2", events.on_result("second"), events.on_error("second"));
    server.handshake().await;

    for (sql, tag) in [("select 1", "first"), ("select 2", "second")] {
        server.reply("BEGIN", b'T').await;
        assert_eq!(server.query().await, sql);
        server.complete("SELECT 0").await;
        server.ready(b'T').await;
        server.reply("COMMIT", b'I').await;
        assert_eq!(events.next().await, format!("{tag} [] complete true"));
    }

    assert_eq!(events.next().await, "idle");
}

#[tokio::test]
async fn terminate_sends_terminate_message() {
    let mut events = Events::new();
    let (conn, mut server) = setup(options("app", "secret"), &events);
    server.handshake().await;
    assert_eq!(events.next().await, "idle");

    conn.terminate();
    server.expect('X').await;
    assert_eq!(events.next().await, "terminated");

    let mut rest = vec![];
    server.io.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn server_close_fails_query() {
    let mut events = Events::new();
    let (conn, mut server) = setup(options("app", "secret"), &events);
    server.handshake().await;
    assert_eq!(events.next().await, "idle");

    conn.execute("select pg_sleep(10)", events.on_result("sleep"), events.on_error("sleep"));
    server.reply("BEGIN", b'T').await;
    assert_eq!(server.query().await, "select pg_sleep(10)");
    drop(server);

    assert_eq!(events.next().await, "sleep error: terminated");
    assert_eq!(events.next().await, "connection error: io");
    assert_eq!(events.next().await, "terminated");
}
