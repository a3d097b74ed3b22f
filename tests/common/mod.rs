//! Shared scripted-server harness for integration tests.
//!
//! Each test spins up a local `TcpListener` and drives the accepted socket
//! from a dedicated thread, standing in for a real MSA — the sync-I/O
//! analogue of the teacher lineage's fake-transport test harnesses, since
//! this crate has no async runtime to mock against.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

use rustls::{ServerConfig, ServerConnection, StreamOwned};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// Binds a loopback listener and runs `behavior` against the first accepted
/// connection on a background thread. Returns the bound port and the join
/// handle so the test can assert the script ran to completion.
pub fn spawn_server<F>(behavior: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let port = listener.local_addr().expect("listener has a local addr").port();
    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept test client connection");
        behavior(stream);
    });
    (port, handle)
}

/// Generates a throwaway self-signed certificate/key pair and the
/// corresponding server-side `rustls::ServerConfig`.
pub fn test_server_tls_config() -> Arc<ServerConfig> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("generate self-signed test certificate");
    let cert_der = CertificateDer::from(cert.serialize_der().expect("serialize test cert"));
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        cert.serialize_private_key_der(),
    ));
    Arc::new(
        ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .expect("build test TLS server config"),
    )
}

/// Either side of the scripted server's socket, before and after an
/// in-place STARTTLS upgrade. Mirrors `Transport`'s own `Inner` enum on the
/// client side of the same upgrade.
enum ServerSocket {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
    Closed,
}

impl Read for ServerSocket {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ServerSocket::Plain(s) => s.read(buf),
            ServerSocket::Tls(s) => s.read(buf),
            ServerSocket::Closed => Ok(0),
        }
    }
}

impl Write for ServerSocket {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            ServerSocket::Plain(s) => s.write(buf),
            ServerSocket::Tls(s) => s.write(buf),
            ServerSocket::Closed => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            ServerSocket::Plain(s) => s.flush(),
            ServerSocket::Tls(s) => s.flush(),
            ServerSocket::Closed => Ok(()),
        }
    }
}

/// A scripted server's view of the connection: a buffered reader over a
/// socket that can be upgraded to TLS mid-script.
pub struct ScriptedConn {
    reader: BufReader<ServerSocket>,
}

impl ScriptedConn {
    pub fn new(stream: TcpStream) -> ScriptedConn {
        ScriptedConn {
            reader: BufReader::new(ServerSocket::Plain(stream)),
        }
    }

    /// Sends one CRLF-terminated line.
    pub fn send(&mut self, line: &str) {
        let socket = self.reader.get_mut();
        socket.write_all(line.as_bytes()).expect("write test server line");
        socket.write_all(b"\r\n").expect("write test server CRLF");
        socket.flush().expect("flush test server line");
    }

    /// Sends a full multi-line reply, e.g. `&["250-a", "250-b", "250 c"]`.
    pub fn send_reply(&mut self, lines: &[&str]) {
        for line in lines {
            self.send(line);
        }
    }

    /// Reads one line (CRLF/LF stripped), panicking if the client disconnects.
    pub fn recv(&mut self) -> String {
        let mut raw = String::new();
        let n = self.reader.read_line(&mut raw).expect("read test client line");
        assert!(n > 0, "client closed the connection unexpectedly");
        while raw.ends_with('\n') || raw.ends_with('\r') {
            raw.pop();
        }
        raw
    }

    /// Upgrades the connection to TLS server-side, driving the handshake to
    /// completion before returning (mirrors `Transport::start_tls`'s
    /// `complete_io` technique on the client side).
    pub fn upgrade_tls(&mut self, config: Arc<ServerConfig>) {
        let plain = match std::mem::replace(self.reader.get_mut(), ServerSocket::Closed) {
            ServerSocket::Plain(tcp) => tcp,
            _ => panic!("upgrade_tls called on a connection that isn't plaintext"),
        };
        let conn = ServerConnection::new(config).expect("build server TLS connection");
        let mut tls_stream = StreamOwned::new(conn, plain);
        tls_stream
            .conn
            .complete_io(&mut tls_stream.sock)
            .expect("server TLS handshake");
        *self.reader.get_mut() = ServerSocket::Tls(Box::new(tls_stream));
    }
}

/// A minimal but protocol-complete fake MSA: accepts connections in a loop
/// (one per `ConnectionFactory::connect` call the `Runner` makes) and, for
/// each, runs greeting → EHLO → STARTTLS → EHLO → a command loop handling
/// MAIL/RCPT/AUTH/QUIT. Authentication state is per-connection, matching a
/// real server that requires AUTH before accepting RCPT.
pub fn spawn_fake_msa(valid_user: &'static str, valid_pass: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        let tls_config = test_server_tls_config();
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let tls_config = tls_config.clone();
            std::thread::spawn(move || fake_msa_connection(stream, tls_config, valid_user, valid_pass));
        }
    });
    port
}

fn fake_msa_connection(stream: TcpStream, tls_config: Arc<ServerConfig>, valid_user: &str, valid_pass: &str) {
    let mut conn = ScriptedConn::new(stream);
    conn.send("220 mail.example ESMTP");

    let ehlo = conn.recv();
    if !ehlo.to_ascii_uppercase().starts_with("EHLO") {
        return;
    }
    conn.send_reply(&[
        "250-mail.example",
        "250-STARTTLS",
        "250 AUTH CRAM-MD5 LOGIN PLAIN",
    ]);

    let starttls = conn.recv();
    if starttls.to_ascii_uppercase() != "STARTTLS" {
        return;
    }
    conn.send("220 go ahead");
    conn.upgrade_tls(tls_config);

    let ehlo2 = conn.recv();
    if !ehlo2.to_ascii_uppercase().starts_with("EHLO") {
        return;
    }
    conn.send_reply(&["250-mail.example", "250 AUTH CRAM-MD5 LOGIN PLAIN"]);

    let mut authenticated = false;
    loop {
        let line = conn.recv();
        let upper = line.to_ascii_uppercase();
        if upper.starts_with("MAIL FROM:") {
            conn.send("250 ok");
        } else if upper.starts_with("RCPT TO:") {
            conn.send(if authenticated { "250 ok" } else { "530 authentication required" });
        } else if upper.starts_with("RSET") {
            conn.send("250 ok");
        } else if upper.starts_with("AUTH ") {
            authenticated = handle_auth(&mut conn, &upper, valid_user, valid_pass);
        } else if upper.starts_with("QUIT") {
            conn.send("221 bye");
            return;
        } else {
            conn.send("500 unrecognized command");
        }
    }
}

fn handle_auth(conn: &mut ScriptedConn, upper_command: &str, valid_user: &str, valid_pass: &str) -> bool {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let mechanism = upper_command.trim_start_matches("AUTH ").trim();
    match mechanism {
        "PLAIN" => {
            conn.send("334 ");
            let reply = conn.recv();
            let Ok(decoded) = STANDARD.decode(reply) else {
                conn.send("535 malformed response");
                return false;
            };
            let parts: Vec<&[u8]> = decoded.split(|b| *b == 0).collect();
            let ok = parts.len() == 3
                && parts[1] == valid_user.as_bytes()
                && parts[2] == valid_pass.as_bytes();
            conn.send(if ok { "235 ok" } else { "535 authentication failed" });
            ok
        }
        "LOGIN" => {
            conn.send(&format!("334 {}", STANDARD.encode("Username:")));
            let user_reply = conn.recv();
            conn.send(&format!("334 {}", STANDARD.encode("Password:")));
            let pass_reply = conn.recv();
            let user_ok = STANDARD.decode(user_reply).ok().as_deref() == Some(valid_user.as_bytes());
            let pass_ok = STANDARD.decode(pass_reply).ok().as_deref() == Some(valid_pass.as_bytes());
            let ok = user_ok && pass_ok;
            conn.send(if ok { "235 ok" } else { "535 authentication failed" });
            ok
        }
        "CRAM-MD5" => {
            use hmac::{Hmac, Mac};
            use md5::Md5;
            let nonce = format!("<{}@mail.example>", random_token());
            conn.send(&format!("334 {}", STANDARD.encode(&nonce)));
            let reply = conn.recv();
            let Ok(decoded) = STANDARD.decode(reply) else {
                conn.send("535 malformed response");
                return false;
            };
            let decoded = String::from_utf8_lossy(&decoded);
            let mut parts = decoded.splitn(2, ' ');
            let user = parts.next().unwrap_or("");
            let digest = parts.next().unwrap_or("");

            let mut mac = Hmac::<Md5>::new_from_slice(valid_pass.as_bytes()).unwrap();
            mac.update(nonce.as_bytes());
            let expected = mac.finalize().into_bytes().iter().map(|b| format!("{b:02x}")).collect::<String>();

            let ok = user == valid_user && digest == expected;
            conn.send(if ok { "235 ok" } else { "535 authentication failed" });
            ok
        }
        other => {
            conn.send(&format!("504 unsupported mechanism {other}"));
            false
        }
    }
}

/// A short pseudo-random token for the CRAM-MD5 nonce, good enough for a
/// single test connection (not a security boundary).
pub fn random_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
