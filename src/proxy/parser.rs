use bytes::{Buf, BytesMut};
use fallible_iterator::FallibleIterator;
use postgres_protocol::message::backend::Message;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::profiler::{ProfileScope, QueryContext, QueryParam, QueryProfile};
use crate::protocol::{
    detect_query_type, parse_cstring, ConnectionInfo, PendingStatement,
};

const PROTOCOL_V3: u32 = 196608;
const SSL_REQUEST_CODE: u32 = 80877103;
const CANCEL_REQUEST_CODE: u32 = 80877102;
const GSSENC_REQUEST_CODE: u32 = 80877104;

/// What the backend still owes us a response for, in send order.
#[derive(Debug)]
enum Pending {
    /// `Q`: done at the next `ReadyForQuery`, however many statements it held.
    Simple(PendingStatement),
    /// `E`: done at `CommandComplete`, `EmptyQueryResponse` or `PortalSuspended`.
    Extended(PendingStatement),
    /// `S`: answered by a `ReadyForQuery`.
    Sync,
}

/// Follows one client session and records every statement into its profile.
///
/// Fed copies of the traffic in both directions; never touches the bytes
/// actually forwarded. Once the copy stops being trustworthy (lost chunks,
/// an encrypted channel) the parser goes quiet for the rest of the session
/// and keeps only what it recorded before.
pub struct SessionParser {
    client_addr: SocketAddr,
    client_buffer: BytesMut,
    server_buffer: BytesMut,
    startup_received: bool,
    awaiting_encryption_answer: bool,
    desynced: bool,

    connection_info: Option<ConnectionInfo>,
    prepared: HashMap<String, String>,
    portals: HashMap<String, (String, Vec<QueryParam>)>,
    pending: VecDeque<Pending>,
    last_completion: Option<Instant>,
    simple_failed: bool,

    backend_pid: Option<i32>,

    scope: ProfileScope,
}

impl SessionParser {
    pub fn new(client_addr: SocketAddr, scope: ProfileScope) -> Self {
        Self {
            client_addr,
            client_buffer: BytesMut::with_capacity(8192),
            server_buffer: BytesMut::with_capacity(8192),
            startup_received: false,
            awaiting_encryption_answer: false,
            desynced: false,
            connection_info: None,
            prepared: HashMap::new(),
            portals: HashMap::new(),
            pending: VecDeque::new(),
            last_completion: None,
            simple_failed: false,
            backend_pid: None,
            scope,
        }
    }

    pub fn request_id(&self) -> &str {
        self.scope.request_id()
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.connection_info.as_ref()
    }

    /// Process id of the backend serving this session, once announced.
    pub fn backend_pid(&self) -> Option<i32> {
        self.backend_pid
    }

    pub fn is_desynced(&self) -> bool {
        self.desynced
    }

    /// Stop profiling after part of the captured stream went missing.
    ///
    /// Message boundaries can no longer be trusted, so nothing after the gap
    /// is recorded. Statements recorded before it are kept.
    pub fn mark_desynced(&mut self) {
        let unanswered = self.pending.len();
        if self.stop_tracking() {
            warn!(
                client = %self.client_addr,
                request_id = %self.scope.request_id(),
                unanswered,
                "Captured traffic has a gap, rest of session not profiled"
            );
        }
    }

    fn stop_tracking(&mut self) -> bool {
        if self.desynced {
            return false;
        }
        self.desynced = true;
        self.client_buffer.clear();
        self.server_buffer.clear();
        self.pending.clear();
        self.portals.clear();
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Close the session's profile. Statements still awaiting a response
    /// are dropped.
    pub fn finish(self) -> Option<QueryProfile> {
        if !self.pending.is_empty() {
            debug!(
                request_id = %self.scope.request_id(),
                unanswered = self.pending.len(),
                "Session closed with statements still pending"
            );
        }
        self.scope.finish()
    }

    pub fn parse_client_message(&mut self, data: &[u8]) {
        if self.desynced {
            return;
        }
        self.client_buffer.extend_from_slice(data);

        while !self.startup_received {
            if self.client_buffer.len() < 8 {
                return;
            }

            let msg_len = u32::from_be_bytes([
                self.client_buffer[0],
                self.client_buffer[1],
                self.client_buffer[2],
                self.client_buffer[3],
            ]) as usize;

            if msg_len < 8 {
                error!(client = %self.client_addr, length = msg_len, "Malformed startup packet");
                self.client_buffer.clear();
                return;
            }
            if self.client_buffer.len() < msg_len {
                return;
            }

            let startup_data = self.client_buffer.split_to(msg_len);
            self.handle_startup_message(&startup_data);
        }

        while self.client_buffer.len() >= 5 {
            let msg_type = self.client_buffer[0];
            let msg_len = u32::from_be_bytes([
                self.client_buffer[1],
                self.client_buffer[2],
                self.client_buffer[3],
                self.client_buffer[4],
            ]) as usize;

            if msg_len < 4 {
                error!(client = %self.client_addr, length = msg_len, "Malformed client message");
                self.client_buffer.clear();
                return;
            }

            let total_len = 1 + msg_len;
            if self.client_buffer.len() < total_len {
                break;
            }

            let msg_data = self.client_buffer.split_to(total_len);
            self.handle_client_message(msg_type, &msg_data[5..]);
        }
    }

    pub fn parse_server_message(&mut self, data: &[u8]) {
        if self.desynced {
            return;
        }
        self.server_buffer.extend_from_slice(data);

        // The single-byte answer to an encryption request is not a framed
        // message. Any other time these bytes are ordinary message tags.
        if self.awaiting_encryption_answer && !self.server_buffer.is_empty() {
            self.awaiting_encryption_answer = false;
            match self.server_buffer[0] {
                b'N' => {
                    debug!(client = %self.client_addr, "Encryption declined by server");
                    self.server_buffer.advance(1);
                }
                b'S' | b'G' => {
                    if self.stop_tracking() {
                        info!(
                            client = %self.client_addr,
                            request_id = %self.scope.request_id(),
                            "Session is encrypted, not profiled"
                        );
                    }
                    return;
                }
                // Servers without encryption support answer with an ErrorResponse.
                _ => {}
            }
        }

        loop {
            match Message::parse(&mut self.server_buffer) {
                Ok(Some(message)) => self.handle_server_message(message),
                Ok(None) => break,
                Err(e) => {
                    error!(
                        client = %self.client_addr,
                        error = %e,
                        "Failed to parse server message"
                    );
                    self.server_buffer.clear();
                    break;
                }
            }
        }
    }

    fn handle_startup_message(&mut self, data: &[u8]) {
        let mut protocol_bytes = &data[4..8];
        let protocol_version = protocol_bytes.get_u32();

        match protocol_version {
            PROTOCOL_V3 => {
                let mut info = ConnectionInfo::default();
                let mut params = &data[8..];

                while let Some((key, rest)) = parse_cstring(params) {
                    if key.is_empty() {
                        break;
                    }
                    let Some((value, rest)) = parse_cstring(rest) else {
                        break;
                    };
                    match key {
                        "user" => info.user_name = value.to_string(),
                        "database" => info.database = value.to_string(),
                        "application_name" => info.application_name = value.to_string(),
                        _ => {}
                    }
                    params = rest;
                }

                info!(
                    client = %self.client_addr,
                    request_id = %self.scope.request_id(),
                    user = %info.user_name,
                    database = %info.database,
                    app = %info.application_name,
                    "Session profiling started"
                );

                self.connection_info = Some(info);
                self.startup_received = true;
            }
            SSL_REQUEST_CODE | GSSENC_REQUEST_CODE => {
                debug!(client = %self.client_addr, "Encryption request");
                self.awaiting_encryption_answer = true;
            }
            CANCEL_REQUEST_CODE => {
                debug!(client = %self.client_addr, "Cancel request");
                self.startup_received = true;
            }
            _ => {
                debug!(
                    client = %self.client_addr,
                    protocol = protocol_version,
                    "Unknown protocol version"
                );
                self.startup_received = true;
            }
        }
    }

    fn handle_client_message(&mut self, msg_type: u8, body: &[u8]) {
        match msg_type {
            b'Q' => self.handle_simple_query(body),
            b'P' => self.handle_parse(body),
            b'B' => self.handle_bind(body),
            b'E' => self.handle_execute(body),
            b'C' => self.handle_close(body),
            b'S' => self.pending.push_back(Pending::Sync),
            b'X' => debug!(client = %self.client_addr, "Client terminating connection"),
            _ => {}
        }
    }

    fn handle_simple_query(&mut self, body: &[u8]) {
        let Some((query, _)) = parse_cstring(body) else {
            return;
        };
        let statement = statement(query, Vec::new());
        self.pending.push_back(Pending::Simple(statement));
    }

    fn handle_parse(&mut self, body: &[u8]) {
        let Some((name, rest)) = parse_cstring(body) else {
            return;
        };
        let Some((query, _)) = parse_cstring(rest) else {
            return;
        };
        self.prepared.insert(name.to_string(), query.to_string());
    }

    fn handle_bind(&mut self, body: &[u8]) {
        let Some((portal, statement_name, params)) = parse_bind(body) else {
            debug!(client = %self.client_addr, "Unparseable Bind message");
            return;
        };
        let Some(query) = self.prepared.get(statement_name) else {
            debug!(client = %self.client_addr, statement = %statement_name, "Bind to unknown statement");
            return;
        };
        self.portals
            .insert(portal.to_string(), (query.clone(), params));
    }

    fn handle_execute(&mut self, body: &[u8]) {
        let Some((portal, _)) = parse_cstring(body) else {
            return;
        };
        let Some((query, params)) = self.portals.get(portal) else {
            debug!(client = %self.client_addr, portal = %portal, "Execute of unknown portal");
            return;
        };
        let statement = statement(query, params.clone());
        self.pending.push_back(Pending::Extended(statement));
    }

    fn handle_close(&mut self, body: &[u8]) {
        let Some((&kind, rest)) = body.split_first() else {
            return;
        };
        let Some((name, _)) = parse_cstring(rest) else {
            return;
        };
        match kind {
            b'S' => {
                self.prepared.remove(name);
            }
            b'P' => {
                self.portals.remove(name);
            }
            _ => {}
        }
    }

    fn handle_server_message(&mut self, message: Message) {
        match message {
            Message::CommandComplete(_)
            | Message::EmptyQueryResponse
            | Message::PortalSuspended => {
                if matches!(self.pending.front(), Some(Pending::Extended(_))) {
                    self.complete_front();
                }
            }

            Message::ErrorResponse(body) => {
                let mut message = String::new();
                let mut sqlstate = String::new();
                let mut fields = body.fields();
                while let Ok(Some(field)) = fields.next() {
                    match field.type_() {
                        b'M' => message = String::from_utf8_lossy(field.value_bytes()).into_owned(),
                        b'C' => sqlstate = String::from_utf8_lossy(field.value_bytes()).into_owned(),
                        _ => {}
                    }
                }

                debug!(
                    client = %self.client_addr,
                    request_id = %self.scope.request_id(),
                    sqlstate = %sqlstate,
                    message = %message,
                    "PostgreSQL error"
                );

                match self.pending.front() {
                    Some(Pending::Simple(_)) => {
                        self.complete_front();
                        self.simple_failed = true;
                    }
                    Some(Pending::Extended(_)) => {
                        self.complete_front();
                        // The backend skips everything up to the next Sync.
                        while matches!(self.pending.front(), Some(Pending::Extended(_))) {
                            self.pending.pop_front();
                        }
                    }
                    Some(Pending::Sync) | None => {}
                }
            }

            Message::ReadyForQuery(_) => {
                if std::mem::take(&mut self.simple_failed) {
                    return;
                }
                match self.pending.front() {
                    Some(Pending::Simple(_)) => self.complete_front(),
                    Some(Pending::Sync) => {
                        self.pending.pop_front();
                    }
                    Some(Pending::Extended(_)) | None => {}
                }
            }

            Message::BackendKeyData(body) => {
                self.backend_pid = Some(body.process_id());
                debug!(
                    client = %self.client_addr,
                    process_id = body.process_id(),
                    "BackendKeyData"
                );
            }

            _ => {}
        }
    }

    fn complete_front(&mut self) {
        let Some(Pending::Simple(statement) | Pending::Extended(statement)) =
            self.pending.pop_front()
        else {
            return;
        };

        let now = Instant::now();
        // Pipelined statements wait behind their predecessors.
        let started = match self.last_completion {
            Some(previous) if previous > statement.queued_at => previous,
            _ => statement.queued_at,
        };
        let duration_ms = now.duration_since(started).as_secs_f64() * 1000.0;
        self.last_completion = Some(now);

        let ctx = QueryContext::new(statement.query)
            .with_params(statement.params)
            .with_label(statement.query_type.label());
        self.scope.record(ctx, duration_ms);
    }
}

fn statement(query: &str, params: Vec<QueryParam>) -> PendingStatement {
    PendingStatement {
        query: query.to_string(),
        query_type: detect_query_type(query),
        params,
        queued_at: Instant::now(),
    }
}

/// Portal name, statement name and rendered parameter values of a Bind body.
fn parse_bind(body: &[u8]) -> Option<(&str, &str, Vec<QueryParam>)> {
    let (portal, rest) = parse_cstring(body)?;
    let (statement, mut rest) = parse_cstring(rest)?;

    if rest.remaining() < 2 {
        return None;
    }
    let format_count = rest.get_i16().max(0) as usize;
    if rest.remaining() < format_count * 2 {
        return None;
    }
    let formats: Vec<i16> = (0..format_count).map(|_| rest.get_i16()).collect();

    if rest.remaining() < 2 {
        return None;
    }
    let param_count = rest.get_i16().max(0) as usize;
    let mut params = Vec::with_capacity(param_count);

    for i in 0..param_count {
        if rest.remaining() < 4 {
            return None;
        }
        let len = rest.get_i32();
        if len < 0 {
            params.push(QueryParam::Null);
            continue;
        }
        let len = len as usize;
        if rest.remaining() < len {
            return None;
        }
        let format = match formats.as_slice() {
            [] => 0,
            [single] => *single,
            many => many.get(i).copied().unwrap_or(0),
        };
        params.push(render_bind_value(&rest[..len], format));
        rest.advance(len);
    }

    Some((portal, statement, params))
}

fn render_bind_value(value: &[u8], format: i16) -> QueryParam {
    match (format, std::str::from_utf8(value)) {
        (0, Ok(text)) => QueryParam::String(text.to_string()),
        _ => QueryParam::String(format!("<binary {} bytes>", value.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::ProfileRegistry;
    use bytes::BufMut;

    fn client_addr() -> SocketAddr {
        "127.0.0.1:54321".parse().unwrap()
    }

    fn parser(registry: &ProfileRegistry) -> SessionParser {
        SessionParser::new(client_addr(), registry.scope("session-1"))
    }

    fn startup(params: &[(&str, &str)]) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_u32(PROTOCOL_V3);
        for (key, value) in params {
            body.put_slice(key.as_bytes());
            body.put_u8(0);
            body.put_slice(value.as_bytes());
            body.put_u8(0);
        }
        body.put_u8(0);

        let mut msg = BytesMut::new();
        msg.put_u32(body.len() as u32 + 4);
        msg.put_slice(&body);
        msg.to_vec()
    }

    fn message(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut msg = BytesMut::new();
        msg.put_u8(tag);
        msg.put_u32(body.len() as u32 + 4);
        msg.put_slice(body);
        msg.to_vec()
    }

    fn cstr(s: &str) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.push(0);
        v
    }

    fn query(sql: &str) -> Vec<u8> {
        message(b'Q', &cstr(sql))
    }

    fn parse(name: &str, sql: &str) -> Vec<u8> {
        let mut body = cstr(name);
        body.extend(cstr(sql));
        body.extend(0i16.to_be_bytes());
        message(b'P', &body)
    }

    fn bind(portal: &str, statement: &str, params: &[Option<&str>]) -> Vec<u8> {
        let mut body = cstr(portal);
        body.extend(cstr(statement));
        body.extend(0i16.to_be_bytes());
        body.extend((params.len() as i16).to_be_bytes());
        for param in params {
            match param {
                Some(value) => {
                    body.extend((value.len() as i32).to_be_bytes());
                    body.extend(value.as_bytes());
                }
                None => body.extend((-1i32).to_be_bytes()),
            }
        }
        body.extend(0i16.to_be_bytes());
        message(b'B', &body)
    }

    fn execute(portal: &str) -> Vec<u8> {
        let mut body = cstr(portal);
        body.extend(0i32.to_be_bytes());
        message(b'E', &body)
    }

    fn sync() -> Vec<u8> {
        message(b'S', &[])
    }

    fn command_complete(tag: &str) -> Vec<u8> {
        message(b'C', &cstr(tag))
    }

    fn ready() -> Vec<u8> {
        message(b'Z', b"I")
    }

    fn error_response(msg: &str) -> Vec<u8> {
        let mut body = vec![b'S'];
        body.extend(cstr("ERROR"));
        body.push(b'C');
        body.extend(cstr("42P01"));
        body.push(b'M');
        body.extend(cstr(msg));
        body.push(0);
        message(b'E', &body)
    }

    #[test]
    fn test_startup_parameters() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);
        p.parse_client_message(&startup(&[
            ("user", "app"),
            ("database", "courses"),
            ("application_name", "web"),
        ]));

        let info = p.connection_info().unwrap();
        assert_eq!(info.user_name, "app");
        assert_eq!(info.database, "courses");
        assert_eq!(info.application_name, "web");
    }

    #[test]
    fn test_backend_key_data() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);
        let mut body = Vec::new();
        body.extend(4242i32.to_be_bytes());
        body.extend(99i32.to_be_bytes());
        p.parse_server_message(&message(b'K', &body));
        assert_eq!(p.backend_pid(), Some(4242));
    }

    #[test]
    fn test_simple_queries_are_recorded() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);
        p.parse_client_message(&startup(&[("user", "app")]));

        for id in 0..3 {
            p.parse_client_message(&query(&format!("SELECT * FROM lessons WHERE id = {}", id)));
            p.parse_server_message(&command_complete("SELECT 1"));
            p.parse_server_message(&ready());
        }

        let profile = p.finish().unwrap();
        assert_eq!(profile.request_id, "session-1");
        assert_eq!(profile.query_count, 3);
        assert_eq!(profile.queries[0].label.as_deref(), Some("SELECT"));
        assert_eq!(profile.queries[2].raw_query, "SELECT * FROM lessons WHERE id = 2");
    }

    #[test]
    fn test_multi_statement_simple_query_is_one_record() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);
        p.parse_client_message(&startup(&[]));

        p.parse_client_message(&query("BEGIN; UPDATE t SET a = 1; COMMIT"));
        let mut response = command_complete("BEGIN");
        response.extend(command_complete("UPDATE 1"));
        response.extend(command_complete("COMMIT"));
        response.extend(ready());
        p.parse_server_message(&response);

        assert_eq!(p.pending_count(), 0);
        assert_eq!(p.finish().unwrap().query_count, 1);
    }

    #[test]
    fn test_extended_protocol_n1_detection() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);
        p.parse_client_message(&startup(&[]));
        p.parse_client_message(&parse("s1", "SELECT * FROM reviews WHERE course_id = $1"));

        for course in 0..12 {
            let id = course.to_string();
            let mut batch = bind("", "s1", &[Some(&id)]);
            batch.extend(execute(""));
            batch.extend(sync());
            p.parse_client_message(&batch);

            let mut response = command_complete("SELECT 3");
            response.extend(ready());
            p.parse_server_message(&response);
        }

        let profile = p.finish().unwrap();
        assert_eq!(profile.query_count, 12);
        assert!(profile.potential_n1);
        assert_eq!(profile.queries[5].params, vec![QueryParam::String("5".into())]);
        assert_eq!(
            profile.patterns[0].pattern,
            "select * from reviews where course_id=$N"
        );
    }

    #[test]
    fn test_pipelined_executes_split_by_sync() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);
        p.parse_client_message(&startup(&[]));

        let mut batch = parse("", "SELECT $1::int");
        batch.extend(bind("", "", &[Some("1")]));
        batch.extend(execute(""));
        batch.extend(bind("", "", &[None]));
        batch.extend(execute(""));
        batch.extend(sync());
        p.parse_client_message(&batch);
        assert_eq!(p.pending_count(), 3);

        let mut response = command_complete("SELECT 1");
        response.extend(command_complete("SELECT 1"));
        response.extend(ready());
        p.parse_server_message(&response);
        assert_eq!(p.pending_count(), 0);

        let profile = p.finish().unwrap();
        assert_eq!(profile.query_count, 2);
        assert_eq!(profile.queries[1].params, vec![QueryParam::Null]);
    }

    #[test]
    fn test_error_skips_rest_of_extended_batch() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);
        p.parse_client_message(&startup(&[]));

        let mut batch = parse("", "SELECT * FROM missing");
        batch.extend(bind("", "", &[]));
        batch.extend(execute(""));
        batch.extend(execute(""));
        batch.extend(sync());
        batch.extend(query("SELECT 1"));
        p.parse_client_message(&batch);

        let mut response = error_response("relation \"missing\" does not exist");
        response.extend(ready());
        response.extend(command_complete("SELECT 1"));
        response.extend(ready());
        p.parse_server_message(&response);

        assert_eq!(p.pending_count(), 0);
        let profile = p.finish().unwrap();
        let queries: Vec<_> = profile.queries.iter().map(|q| q.raw_query.as_str()).collect();
        assert_eq!(queries, vec!["SELECT * FROM missing", "SELECT 1"]);
    }

    #[test]
    fn test_failed_simple_query_does_not_consume_next() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);
        p.parse_client_message(&startup(&[]));

        let mut batch = query("SELECT * FROM missing");
        batch.extend(query("SELECT 2"));
        p.parse_client_message(&batch);

        let mut response = error_response("boom");
        response.extend(ready());
        p.parse_server_message(&response);
        assert_eq!(p.pending_count(), 1);

        let mut response = command_complete("SELECT 1");
        response.extend(ready());
        p.parse_server_message(&response);

        assert_eq!(p.finish().unwrap().query_count, 2);
    }

    #[test]
    fn test_messages_split_across_chunks() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);
        let mut stream = startup(&[("user", "app")]);
        stream.extend(query("SELECT now()"));

        for chunk in stream.chunks(3) {
            p.parse_client_message(chunk);
        }
        assert_eq!(p.pending_count(), 1);

        let response = [command_complete("SELECT 1"), ready()].concat();
        for chunk in response.chunks(2) {
            p.parse_server_message(chunk);
        }
        assert_eq!(p.finish().unwrap().query_count, 1);
    }

    #[test]
    fn test_ssl_request_then_startup() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);

        let mut ssl = Vec::new();
        ssl.extend(8u32.to_be_bytes());
        ssl.extend(SSL_REQUEST_CODE.to_be_bytes());
        p.parse_client_message(&ssl);
        p.parse_server_message(b"N");

        p.parse_client_message(&startup(&[("user", "app")]));
        assert_eq!(p.connection_info().unwrap().user_name, "app");
    }

    #[test]
    fn test_notice_tag_split_from_body_after_startup() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);
        p.parse_client_message(&startup(&[("user", "app")]));
        p.parse_client_message(&query("SELECT do_work()"));

        let mut notice_body = vec![b'S'];
        notice_body.extend(cstr("NOTICE"));
        notice_body.push(b'M');
        notice_body.extend(cstr("working"));
        notice_body.push(0);
        let notice = message(b'N', &notice_body);

        p.parse_server_message(&notice[..1]);
        p.parse_server_message(&notice[1..]);
        p.parse_server_message(&[command_complete("SELECT 1"), ready()].concat());

        assert_eq!(p.pending_count(), 0);
        assert!(!p.is_desynced());
        assert_eq!(p.finish().unwrap().query_count, 1);
    }

    #[test]
    fn test_parameter_status_tag_alone_is_framed() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);
        p.parse_client_message(&startup(&[]));
        p.parse_client_message(&query("SET TimeZone = 'UTC'"));

        let mut status = cstr("TimeZone");
        status.extend(cstr("UTC"));
        let status = message(b'S', &status);
        p.parse_server_message(&status[..1]);
        p.parse_server_message(&status[1..]);
        p.parse_server_message(&[command_complete("SET"), ready()].concat());

        assert_eq!(p.finish().unwrap().query_count, 1);
    }

    #[test]
    fn test_accepted_encryption_stops_profiling() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);

        let mut ssl = Vec::new();
        ssl.extend(8u32.to_be_bytes());
        ssl.extend(SSL_REQUEST_CODE.to_be_bytes());
        p.parse_client_message(&ssl);
        p.parse_server_message(b"S");
        assert!(p.is_desynced());

        p.parse_client_message(&[0x16, 0x03, 0x01, 0x02, 0x00, 0x01, 0x00, 0x01, 0xfc]);
        p.parse_server_message(&[0x16, 0x03, 0x03, 0x00, 0x5a]);
        assert_eq!(p.finish().unwrap().query_count, 0);
    }

    #[test]
    fn test_gap_stops_recording_after_partial_message() {
        let registry = ProfileRegistry::default();
        let mut p = parser(&registry);
        p.parse_client_message(&startup(&[]));

        p.parse_client_message(&query("SELECT 'before'"));
        p.parse_server_message(&[command_complete("SELECT 1"), ready()].concat());

        let cut = query("SELECT 'cut short'");
        p.parse_client_message(&cut[..7]);
        p.mark_desynced();
        assert!(p.is_desynced());
        assert_eq!(p.pending_count(), 0);

        for i in 0..20 {
            p.parse_client_message(&query(&format!("SELECT {}", i)));
            p.parse_server_message(&[command_complete("SELECT 1"), ready()].concat());
        }

        let profile = p.finish().unwrap();
        assert_eq!(profile.query_count, 1);
        assert_eq!(profile.queries[0].raw_query, "SELECT 'before'");
    }

    #[test]
    fn test_parse_bind_formats() {
        let mut body = cstr("portal");
        body.extend(cstr("stmt"));
        body.extend(1i16.to_be_bytes());
        body.extend(1i16.to_be_bytes());
        body.extend(1i16.to_be_bytes());
        body.extend(4i32.to_be_bytes());
        body.extend([0u8, 0, 0, 7]);

        let (portal, statement, params) = parse_bind(&body).unwrap();
        assert_eq!(portal, "portal");
        assert_eq!(statement, "stmt");
        assert_eq!(params, vec![QueryParam::String("<binary 4 bytes>".into())]);

        assert!(parse_bind(&cstr("only-portal")).is_none());
    }

    #[test]
    fn test_dropped_parser_finishes_profile() {
        let registry = ProfileRegistry::default();
        {
            let mut p = parser(&registry);
            p.parse_client_message(&startup(&[]));
        }
        assert!(!registry.is_active("session-1"));
    }
}
