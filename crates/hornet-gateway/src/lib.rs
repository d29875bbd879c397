//! Gateway transport adapter.
//!
//! Implements the core `TransportPort` over a sidecar gateway process that
//! owns the actual wire protocol and its cryptography. The adapter spawns
//! the gateway with the session directory as its argument and exchanges
//! newline-delimited JSON over stdio:
//!
//! - outbound frames: `{"op": "...", ...}`, with an `"id"` field on
//!   operations that expect an answer;
//! - inbound frames: `{"event": "open" | "closed" | "messages", ...}` for
//!   lifecycle/messages, `{"reply": <id>, "ok": bool, ...}` for answers.

use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, Command},
    sync::{mpsc, oneshot, Mutex},
};
use tracing::{debug, warn};

use hornet_core::{
    domain::{Jid, MessageId},
    errors::Error,
    transport::{
        CloseCode, Credential, GroupMetadata, InboundMessage, Presence, TransportEvent,
        TransportPort, UpsertKind,
    },
    Result,
};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;
const EVENT_CHANNEL_CAPACITY: usize = 128;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub program: PathBuf,
    pub session_dir: PathBuf,
}

#[derive(Clone, Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        // +1 for the '\n' we join with later.
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            if let Some(front) = self.lines.pop_front() {
                self.bytes = self.bytes.saturating_sub(front.len() + 1);
            } else {
                break;
            }
        }
    }

    fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

type PendingMap = HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>;

pub struct GatewayTransport {
    cfg: GatewayConfig,
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    pending: Arc<Mutex<PendingMap>>,
    self_jid: Arc<Mutex<Option<Jid>>>,
    next_id: AtomicU64,
}

impl GatewayTransport {
    pub fn new(cfg: GatewayConfig) -> Self {
        Self {
            cfg,
            child: Arc::new(Mutex::new(None)),
            stdin: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            self_jid: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    async fn write_frame(&self, frame: Value) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(Error::Transport("gateway is not connected".to_string()));
        };
        let mut line = serde_json::to_string(&frame)?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Transport(format!("gateway write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("gateway flush failed: {e}")))?;
        Ok(())
    }

    /// Send a frame that expects an answer and wait for the matching reply.
    async fn request(&self, mut frame: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        frame["id"] = json!(id);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.write_frame(frame).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(msg)) => Err(Error::Transport(format!("gateway refused request: {msg}"))),
            Err(_) => Err(Error::Transport(
                "gateway closed before answering".to_string(),
            )),
        }
    }

    async fn kill_child(&self) -> Result<()> {
        let child = {
            let mut guard = self.child.lock().await;
            guard.take()
        };

        let Some(mut child) = child else {
            return Ok(());
        };

        // If it's already exited, `try_wait` reaps it.
        if child.try_wait()?.is_some() {
            return Ok(());
        }

        match child.kill().await {
            Ok(()) => {
                let _ = child.wait().await?;
            }
            Err(e) => {
                // If it exited between `try_wait` and `kill`, `wait` reaps it.
                if child.try_wait()?.is_none() {
                    let mut guard = self.child.lock().await;
                    *guard = Some(child);
                    return Err(Error::Io(e));
                }
            }
        }

        Ok(())
    }
}

/// One parsed inbound line.
enum Frame {
    Event(TransportEvent),
    Reply {
        id: u64,
        ok: bool,
        data: Value,
        error: Option<String>,
    },
    Unknown(Value),
}

fn parse_frame(value: Value) -> Frame {
    if let Some(id) = value.get("reply").and_then(|v| v.as_u64()) {
        let ok = value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
        let data = value.get("data").cloned().unwrap_or(Value::Null);
        let error = value
            .get("error")
            .and_then(|v| v.as_str())
            .map(String::from);
        return Frame::Reply {
            id,
            ok,
            data,
            error,
        };
    }

    match value.get("event").and_then(|v| v.as_str()) {
        Some("open") => {
            let Some(self_jid) = value.get("self").and_then(|v| v.as_str()) else {
                return Frame::Unknown(value);
            };
            Frame::Event(TransportEvent::Open {
                self_jid: Jid::new(self_jid),
            })
        }
        Some("closed") => {
            let status = value
                .get("status")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u16;
            Frame::Event(TransportEvent::Closed {
                code: CloseCode::from_status(status),
            })
        }
        Some("messages") => {
            let kind = value
                .get("kind")
                .cloned()
                .and_then(|v| serde_json::from_value::<UpsertKind>(v).ok())
                .unwrap_or(UpsertKind::Notify);
            let messages = value
                .get("messages")
                .cloned()
                .and_then(|v| serde_json::from_value::<Vec<InboundMessage>>(v).ok())
                .unwrap_or_default();
            Frame::Event(TransportEvent::Messages { kind, messages })
        }
        _ => Frame::Unknown(value),
    }
}

#[async_trait]
impl TransportPort for GatewayTransport {
    async fn connect(&self, credential: Credential) -> Result<mpsc::Receiver<TransportEvent>> {
        // A reconnect replaces any previous gateway process.
        self.kill_child().await?;
        self.pending.lock().await.clear();

        let mut cmd = Command::new(&self.cfg.program);
        cmd.arg(&self.cfg.session_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Transport(format!("failed to spawn gateway: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("gateway stdout was not captured".to_string()))?;
        let stderr = child.stderr.take();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("gateway stdin was not captured".to_string()))?;

        {
            let mut guard = self.child.lock().await;
            *guard = Some(child);
        }
        {
            let mut guard = self.stdin.lock().await;
            *guard = Some(stdin);
        }

        // Drain stderr in background to avoid blocking on a full pipe.
        let stderr_tail: Arc<Mutex<StderrTail>> = Arc::new(Mutex::new(StderrTail::default()));
        if let Some(stderr) = stderr {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = r.next_line().await {
                    tail.lock().await.push_line(line);
                }
            });
        }

        // Handshake: tells the gateway how this session authenticates.
        let mut handshake = json!({ "op": "connect", "origin": credential.origin_tag() });
        if let Credential::PairingFlow { phone } = &credential {
            handshake["phone"] = json!(phone);
        }
        self.write_frame(handshake).await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pending = self.pending.clone();
        let self_jid = self.self_jid.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            loop {
                let line = match reader.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("gateway stdout read failed: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let value: Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("gateway frame parse failed: {e}");
                        continue;
                    }
                };

                match parse_frame(value) {
                    Frame::Reply {
                        id,
                        ok,
                        data,
                        error,
                    } => {
                        let waiter = pending.lock().await.remove(&id);
                        let Some(waiter) = waiter else {
                            debug!("reply {id} has no waiter");
                            continue;
                        };
                        let outcome = if ok {
                            Ok(data)
                        } else {
                            Err(error.unwrap_or_else(|| "unspecified gateway error".to_string()))
                        };
                        let _ = waiter.send(outcome);
                    }
                    Frame::Event(ev) => {
                        if let TransportEvent::Open { self_jid: jid } = &ev {
                            *self_jid.lock().await = Some(jid.clone());
                        }
                        if tx.send(ev).await.is_err() {
                            break; // consumer gone
                        }
                    }
                    Frame::Unknown(v) => {
                        debug!("ignoring unknown gateway frame: {v}");
                    }
                }
            }

            // EOF: answer anything still waiting, then let the event channel
            // close so the session manager sees the stream end.
            let mut map = pending.lock().await;
            for (_, waiter) in map.drain() {
                let tail = stderr_tail.lock().await.snapshot();
                let _ = waiter.send(Err(if tail.trim().is_empty() {
                    "gateway exited".to_string()
                } else {
                    format!("gateway exited; stderr tail:\n{tail}")
                }));
            }
        });

        Ok(rx)
    }

    async fn send_text(&self, to: &Jid, text: &str) -> Result<()> {
        self.write_frame(json!({ "op": "send", "to": to, "text": text }))
            .await
    }

    async fn send_text_mentioning(&self, to: &Jid, text: &str, mentions: &[Jid]) -> Result<()> {
        self.write_frame(json!({
            "op": "send",
            "to": to,
            "text": text,
            "mentions": mentions,
        }))
        .await
    }

    async fn react(&self, to: &Jid, message: &MessageId, emoji: &str) -> Result<()> {
        self.write_frame(json!({
            "op": "react",
            "to": to,
            "message": message,
            "emoji": emoji,
        }))
        .await
    }

    async fn presence(&self, to: &Jid, presence: Presence) -> Result<()> {
        self.write_frame(json!({
            "op": "presence",
            "to": to,
            "kind": presence.as_str(),
        }))
        .await
    }

    async fn read_receipts(&self, to: &Jid, messages: &[MessageId]) -> Result<()> {
        self.write_frame(json!({ "op": "read", "to": to, "messages": messages }))
            .await
    }

    async fn block(&self, jid: &Jid) -> Result<()> {
        self.write_frame(json!({ "op": "block", "jid": jid })).await
    }

    async fn group_metadata(&self, group: &Jid) -> Result<GroupMetadata> {
        let data = self
            .request(json!({ "op": "group_metadata", "jid": group }))
            .await?;
        serde_json::from_value(data)
            .map_err(|e| Error::Transport(format!("bad group metadata from gateway: {e}")))
    }

    async fn accept_group_invite(&self, code: &str) -> Result<()> {
        self.write_frame(json!({ "op": "join_group", "code": code }))
            .await
    }

    async fn follow_channel(&self, channel: &Jid) -> Result<()> {
        self.write_frame(json!({ "op": "follow", "jid": channel }))
            .await
    }

    async fn request_pairing_code(&self, phone: &str) -> Result<String> {
        let data = self
            .request(json!({ "op": "pairing_code", "phone": phone }))
            .await?;
        data.as_str()
            .map(String::from)
            .ok_or_else(|| Error::Transport("pairing code reply was not a string".to_string()))
    }

    async fn self_jid(&self) -> Option<Jid> {
        self.self_jid.lock().await.clone()
    }

    async fn close(&self) -> Result<()> {
        // Ask nicely first, then reap the process either way.
        let _ = self.write_frame(json!({ "op": "close" })).await;
        {
            let mut guard = self.stdin.lock().await;
            *guard = None;
        }
        self.kill_child().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Frame {
        parse_frame(serde_json::from_str(line).unwrap())
    }

    #[test]
    fn open_frame_parses() {
        let Frame::Event(TransportEvent::Open { self_jid }) =
            parse(r#"{"event":"open","self":"254700000099@user"}"#)
        else {
            panic!("expected open event");
        };
        assert_eq!(self_jid, Jid::user("254700000099"));
    }

    #[test]
    fn closed_frame_maps_status_codes() {
        let Frame::Event(TransportEvent::Closed { code }) =
            parse(r#"{"event":"closed","status":408}"#)
        else {
            panic!("expected closed event");
        };
        assert_eq!(code, CloseCode::ConnectionTimeout);
    }

    #[test]
    fn messages_frame_deserializes_batch() {
        let line = r#"{
            "event": "messages",
            "kind": "notify",
            "messages": [{
                "id": "m1",
                "conversation": "123@group",
                "sender": "254700000001@user",
                "from_self": false,
                "content": {"type": "text", "text": "hi"},
                "timestamp": 1700000000
            }]
        }"#;
        let Frame::Event(TransportEvent::Messages { kind, messages }) = parse(line) else {
            panic!("expected messages event");
        };
        assert_eq!(kind, UpsertKind::Notify);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, Jid::user("254700000001"));
    }

    #[test]
    fn reply_frames_route_by_id() {
        let Frame::Reply { id, ok, data, .. } =
            parse(r#"{"reply":7,"ok":true,"data":"AAAA1111"}"#)
        else {
            panic!("expected reply frame");
        };
        assert_eq!(id, 7);
        assert!(ok);
        assert_eq!(data, serde_json::json!("AAAA1111"));

        let Frame::Reply { ok, error, .. } =
            parse(r#"{"reply":8,"ok":false,"error":"no such group"}"#)
        else {
            panic!("expected reply frame");
        };
        assert!(!ok);
        assert_eq!(error.as_deref(), Some("no such group"));
    }

    #[test]
    fn garbage_is_unknown_not_fatal() {
        assert!(matches!(parse(r#"{"weird":1}"#), Frame::Unknown(_)));
        assert!(matches!(parse(r#"{"event":"open"}"#), Frame::Unknown(_)));
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let mut tail = StderrTail::default();
        for i in 0..(STDERR_TAIL_MAX_LINES + 50) {
            tail.push_line(format!("line {i}"));
        }
        assert!(tail.lines.len() <= STDERR_TAIL_MAX_LINES);
        assert!(tail.snapshot().contains(&format!(
            "line {}",
            STDERR_TAIL_MAX_LINES + 49
        )));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_gateway_emits_events() {
        use std::os::unix::fs::PermissionsExt;

        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = PathBuf::from(format!("/tmp/hornet-gw-{}-{ts}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        // Fake gateway: announce open, then keep reading ops until stdin closes.
        let script = dir.join("gateway.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"event\":\"open\",\"self\":\"99@user\"}'\ncat > /dev/null\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let transport = GatewayTransport::new(GatewayConfig {
            program: script,
            session_dir: dir.join("session"),
        });

        let mut events = transport.connect(Credential::LocalStore).await.unwrap();
        let ev = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .expect("gateway did not announce open in time")
            .expect("event stream closed early");
        assert!(matches!(ev, TransportEvent::Open { .. }));
        assert_eq!(transport.self_jid().await, Some(Jid::user("99")));

        // Fire-and-forget ops write without error while the child lives.
        transport
            .send_text(&Jid::user("42"), "hello")
            .await
            .unwrap();

        transport.close().await.unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
