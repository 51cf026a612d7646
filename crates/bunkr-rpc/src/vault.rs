//! Bunkr daemon client.
//!
//! The daemon speaks Go `net/rpc` JSON-RPC 1.0 over a Unix stream socket.
//! Every command is a single call to `CommandProxy.HandleCommand` whose only
//! parameter is `{"Line": "<command line>"}`; the reply carries
//! `{"Result": str, "Error": str}` and is terminated by a newline.
//!
//! One connection is opened per request, so concurrent requests never share
//! a stream.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use bunkr_core::crypto::Signature;
use bunkr_core::error::VaultError;
use bunkr_core::traits::{Vault, VaultRequest, VaultResponse};

/// RPC method every command goes through.
pub const HANDLE_COMMAND: &str = "CommandProxy.HandleCommand";

/// Content encoding tag for `write`.
const CONTENT_TYPE_B64: &str = "b64";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_RESPONSE_BYTES: u64 = 64 * 1024;

#[derive(Serialize)]
struct RpcRequest<'a> {
    method: &'static str,
    params: [CommandArgs<'a>; 1],
    id: u64,
}

#[derive(Serialize)]
struct CommandArgs<'a> {
    #[serde(rename = "Line")]
    line: &'a str,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<CommandResult>,
    #[serde(default)]
    error: Value,
}

#[derive(Deserialize)]
struct CommandResult {
    #[serde(rename = "Result", default)]
    result: String,
    #[serde(rename = "Error", default)]
    error: String,
}

fn check_token(what: &str, token: &str) -> Result<(), VaultError> {
    if token.is_empty() || token.chars().any(|c| c.is_whitespace() || c == '"') {
        return Err(VaultError::InvalidRequest(format!("{what} {token:?} is not a single word")));
    }
    Ok(())
}

/// The command line the daemon expects for `request`.
pub fn command_line(request: &VaultRequest) -> Result<String, VaultError> {
    match request {
        VaultRequest::CreateSecret { id, kind } => {
            check_token("secret name", id)?;
            Ok(format!("create {id} {kind}"))
        }
        VaultRequest::WriteSecret { id, content } => {
            check_token("secret name", id)?;
            check_token("secret content", content)?;
            Ok(format!("write {id} {CONTENT_TYPE_B64} \"{content}\""))
        }
        VaultRequest::GrantCapability { target, id, admin } => {
            check_token("grant target", target)?;
            check_token("secret name", id)?;
            let suffix = if *admin { " admin" } else { "" };
            Ok(format!("grant {target} {id}{suffix}"))
        }
        VaultRequest::SignHash { id, hash } => {
            check_token("secret name", id)?;
            Ok(format!("sign-ecdsa {id} {}", BASE64.encode(hash)))
        }
        VaultRequest::DeleteSecret { id } => {
            check_token("secret name", id)?;
            Ok(format!("delete {id}"))
        }
        VaultRequest::NewGroup { name } => {
            check_token("group name", name)?;
            Ok(format!("new-group {name}"))
        }
    }
}

/// Parse a `sign-ecdsa` result: two whitespace-separated tokens, each the
/// base64 of the ASCII decimal value of `r` and `s`.
pub fn parse_signature(result: &str) -> Result<Signature, VaultError> {
    let tokens: Vec<&str> = result.split_whitespace().collect();
    let [r, s] = tokens.as_slice() else {
        return Err(VaultError::MalformedResponse(format!(
            "expected two signature tokens, got {}",
            tokens.len()
        )));
    };
    let r = decode_scalar_token(r)?;
    let s = decode_scalar_token(s)?;
    Signature::from_scalars(r, s).map_err(|e| VaultError::MalformedResponse(e.to_string()))
}

fn decode_scalar_token(token: &str) -> Result<[u8; 32], VaultError> {
    let decoded = BASE64
        .decode(token)
        .map_err(|e| VaultError::MalformedResponse(format!("signature token: {e}")))?;
    let digits = std::str::from_utf8(&decoded)
        .map_err(|_| VaultError::MalformedResponse("signature token is not ASCII".into()))?;
    decimal_to_be32(digits.trim()).ok_or_else(|| {
        VaultError::MalformedResponse(format!("signature token {digits:?} is not a 256-bit decimal"))
    })
}

/// Big-endian 32-byte value of a decimal string; `None` for non-digits or
/// values of 2^256 and above.
pub fn decimal_to_be32(digits: &str) -> Option<[u8; 32]> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut out = [0u8; 32];
    for digit in digits.bytes() {
        let mut carry = u32::from(digit - b'0');
        for byte in out.iter_mut().rev() {
            let v = u32::from(*byte) * 10 + carry;
            *byte = v as u8;
            carry = v >> 8;
        }
        if carry != 0 {
            return None;
        }
    }
    Some(out)
}

fn transport(context: &str, e: impl std::fmt::Display) -> VaultError {
    VaultError::Transport(format!("{context}: {e}"))
}

/// Client for a Bunkr daemon listening on a Unix socket.
#[derive(Debug)]
pub struct BunkrClient {
    socket: PathBuf,
    timeout: Duration,
    next_id: AtomicU64,
}

impl BunkrClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: DEFAULT_TIMEOUT,
            next_id: AtomicU64::new(0),
        }
    }

    /// Per-request deadline covering connect, send and receive.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Send one command line and return the daemon's `Result` string.
    pub async fn call(&self, line: &str) -> Result<String, VaultError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            method: HANDLE_COMMAND,
            params: [CommandArgs { line }],
            id,
        };
        let mut payload =
            serde_json::to_vec(&request).map_err(|e| VaultError::InvalidRequest(e.to_string()))?;
        payload.push(b'\n');

        let reply = tokio::time::timeout(self.timeout, self.round_trip(&payload))
            .await
            .map_err(|_| VaultError::Transport(format!("no reply within {:?}", self.timeout)))??;
        parse_reply(&reply)
    }

    async fn round_trip(&self, payload: &[u8]) -> Result<Vec<u8>, VaultError> {
        let mut stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|e| transport(&format!("connect {}", self.socket.display()), e))?;
        stream.write_all(payload).await.map_err(|e| transport("send", e))?;

        let mut reply = Vec::new();
        let read = BufReader::new(stream)
            .take(MAX_RESPONSE_BYTES)
            .read_until(b'\n', &mut reply)
            .await
            .map_err(|e| transport("receive", e))?;
        if read == 0 {
            return Err(VaultError::Transport("connection closed before reply".into()));
        }
        Ok(reply)
    }
}

fn parse_reply(reply: &[u8]) -> Result<String, VaultError> {
    let response: RpcResponse = serde_json::from_slice(reply)
        .map_err(|e| VaultError::MalformedResponse(format!("reply is not JSON-RPC: {e}")))?;
    match response.error {
        Value::Null => {}
        Value::String(message) => return Err(VaultError::Operation(message)),
        other => return Err(VaultError::Operation(other.to_string())),
    }
    let result = response
        .result
        .ok_or_else(|| VaultError::MalformedResponse("reply has neither result nor error".into()))?;
    if !result.error.is_empty() {
        return Err(VaultError::Operation(result.error));
    }
    Ok(result.result)
}

#[async_trait]
impl Vault for BunkrClient {
    async fn execute(&self, request: VaultRequest) -> Result<VaultResponse, VaultError> {
        let line = command_line(&request)?;
        debug!(command = request.command(), socket = %self.socket.display(), "vault: request");
        let result = self.call(&line).await?;
        match request {
            VaultRequest::SignHash { .. } => parse_signature(&result).map(VaultResponse::Signature),
            _ => Ok(VaultResponse::Ack(result)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunkr_core::constants::CURVE_ORDER;
    use bunkr_core::traits::SecretKind;
    use tokio::net::UnixListener;

    const ORDER_DECIMAL: &str =
        "115792089237316195423570985008687907852837564279074904382605163141518161494337";

    fn scalar(v: u8) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[31] = v;
        out
    }

    fn token(decimal: &str) -> String {
        BASE64.encode(decimal.as_bytes())
    }

    // --- Command lines ---

    #[test]
    fn command_lines() {
        let cases = [
            (
                VaultRequest::CreateSecret {
                    id: "1Addr".into(),
                    kind: SecretKind::EcdsaSecp256k1,
                },
                "create 1Addr ECDSA-SECP256k1",
            ),
            (
                VaultRequest::WriteSecret {
                    id: "1Addr".into(),
                    content: "AQ==".into(),
                },
                "write 1Addr b64 \"AQ==\"",
            ),
            (
                VaultRequest::GrantCapability {
                    target: "savings".into(),
                    id: "1Addr".into(),
                    admin: false,
                },
                "grant savings 1Addr",
            ),
            (
                VaultRequest::GrantCapability {
                    target: "savings".into(),
                    id: "1Addr".into(),
                    admin: true,
                },
                "grant savings 1Addr admin",
            ),
            (
                VaultRequest::SignHash {
                    id: "1Addr".into(),
                    hash: [0u8; 32],
                },
                "sign-ecdsa 1Addr AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
            ),
            (VaultRequest::DeleteSecret { id: "1Addr".into() }, "delete 1Addr"),
            (VaultRequest::NewGroup { name: "savings".into() }, "new-group savings"),
        ];
        for (request, expected) in cases {
            assert_eq!(command_line(&request).unwrap(), expected);
        }
    }

    #[test]
    fn command_line_rejects_multi_word_arguments() {
        for id in ["", "two words", "quo\"te", "tab\there"] {
            let err = command_line(&VaultRequest::DeleteSecret { id: id.into() }).unwrap_err();
            assert!(matches!(err, VaultError::InvalidRequest(_)), "{id:?}");
        }
    }

    // --- Signature parsing ---

    #[test]
    fn decimal_parsing() {
        assert_eq!(decimal_to_be32("0"), Some([0u8; 32]));
        assert_eq!(decimal_to_be32("255"), Some(scalar(255)));
        let mut v256 = [0u8; 32];
        v256[30] = 1;
        assert_eq!(decimal_to_be32("256"), Some(v256));
        assert_eq!(decimal_to_be32(ORDER_DECIMAL), Some(CURVE_ORDER));
        assert_eq!(decimal_to_be32("00042"), Some(scalar(42)));
        // 2^256
        assert_eq!(
            decimal_to_be32(
                "115792089237316195423570985008687907853269984665640564039457584007913129639936"
            ),
            None
        );
        assert_eq!(decimal_to_be32(""), None);
        assert_eq!(decimal_to_be32("12a"), None);
        assert_eq!(decimal_to_be32("-1"), None);
    }

    #[test]
    fn parses_signature_tokens() {
        let result = format!("{} {}\n", token("7"), token("65535"));
        let sig = parse_signature(&result).unwrap();
        assert_eq!(sig.r(), &scalar(7));
        let mut s = [0u8; 32];
        s[30] = 0xFF;
        s[31] = 0xFF;
        assert_eq!(sig.s(), &s);
    }

    #[test]
    fn rejects_malformed_signatures() {
        let bad = [
            String::new(),
            token("7"),
            format!("{} {} {}", token("1"), token("2"), token("3")),
            format!("{} !!!", token("1")),
            format!("{} {}", token("1"), token("x1")),
            format!("{} {}", token("0"), token("1")),
            format!("{} {}", token("1"), token(ORDER_DECIMAL)),
        ];
        for result in bad {
            assert!(
                matches!(parse_signature(&result), Err(VaultError::MalformedResponse(_))),
                "accepted {result:?}"
            );
        }
    }

    // --- Wire ---

    /// Serve `replies` in order, one connection each, recording the lines.
    fn fake_daemon(replies: Vec<String>) -> (tempfile::TempDir, PathBuf, tokio::task::JoinHandle<Vec<String>>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bunkr.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            for reply in replies {
                let (stream, _) = listener.accept().await.unwrap();
                let (read, mut write) = stream.into_split();
                let mut request = String::new();
                BufReader::new(read).read_line(&mut request).await.unwrap();
                let value: Value = serde_json::from_str(&request).unwrap();
                assert_eq!(value["method"], HANDLE_COMMAND);
                lines.push(value["params"][0]["Line"].as_str().unwrap().to_string());
                write.write_all(reply.as_bytes()).await.unwrap();
            }
            lines
        });
        (dir, path, handle)
    }

    fn ok_reply(result: &str) -> String {
        format!("{{\"id\":0,\"result\":{{\"Result\":{result:?},\"Error\":\"\"}},\"error\":null}}\n")
    }

    #[tokio::test]
    async fn round_trip_over_unix_socket() {
        let sig = format!("{} {}", token("11"), token("22"));
        let (_dir, path, server) = fake_daemon(vec![ok_reply("Secret created"), ok_reply(&sig)]);
        let client = BunkrClient::new(&path);

        client
            .create_secret("1Addr", SecretKind::EcdsaSecp256k1)
            .await
            .unwrap();
        let signature = client.sign_hash("1Addr", [1u8; 32]).await.unwrap();
        assert_eq!(signature.r(), &scalar(11));
        assert_eq!(signature.s(), &scalar(22));

        let lines = server.await.unwrap();
        assert_eq!(lines[0], "create 1Addr ECDSA-SECP256k1");
        assert!(lines[1].starts_with("sign-ecdsa 1Addr AQEB"));
    }

    #[tokio::test]
    async fn operation_and_rpc_errors() {
        let (_dir, path, _server) = fake_daemon(vec![
            "{\"id\":0,\"result\":{\"Result\":\"\",\"Error\":\"secret not found\"},\"error\":null}\n".into(),
            "{\"id\":1,\"result\":null,\"error\":\"rpc: can't find method\"}\n".into(),
            "not json\n".into(),
        ]);
        let client = BunkrClient::new(&path);
        assert_eq!(
            client.delete_secret("1Addr").await.unwrap_err(),
            VaultError::Operation("secret not found".into())
        );
        assert_eq!(
            client.delete_secret("1Addr").await.unwrap_err(),
            VaultError::Operation("rpc: can't find method".into())
        );
        assert!(matches!(
            client.delete_secret("1Addr").await,
            Err(VaultError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn ack_where_signature_expected_is_malformed() {
        let (_dir, path, _server) = fake_daemon(vec![ok_reply("done")]);
        let client = BunkrClient::new(&path);
        assert!(matches!(
            client.sign_hash("1Addr", [0u8; 32]).await,
            Err(VaultError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn missing_socket_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let client = BunkrClient::new(dir.path().join("absent.sock"));
        let err = client.new_group("savings").await.unwrap_err();
        assert!(matches!(err, VaultError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn closed_connection_and_timeout_are_transport_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mute.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            // First connection: hang up immediately. Second: never answer.
            let (first, _) = listener.accept().await.unwrap();
            drop(first);
            let (_second, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = BunkrClient::new(&path).with_timeout(Duration::from_millis(200));
        assert!(matches!(
            client.delete_secret("1Addr").await,
            Err(VaultError::Transport(_))
        ));
        assert!(matches!(
            client.delete_secret("1Addr").await,
            Err(VaultError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn invalid_request_never_connects() {
        let client = BunkrClient::new("/nonexistent/bunkr.sock");
        let err = client.delete_secret("two words").await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidRequest(_)));
    }
}
