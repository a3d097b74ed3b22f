//! Exercises SASL LOGIN end-to-end through `Session::authenticate`, talking
//! to a server that only advertises LOGIN (so `Mechanism::select`'s
//! CRAM-MD5/PLAIN priority never kicks in).

mod common;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use msa_doctor::{ConnectionType, Endpoint, Mechanism, Session, TlsPolicy};

#[test]
fn login_mechanism_round_trips_through_a_real_session() {
    let (port, handle) = common::spawn_server(|stream| {
        let mut conn = common::ScriptedConn::new(stream);
        conn.send("220 mail.example ESMTP");
        assert!(conn.recv().to_ascii_uppercase().starts_with("EHLO"));
        conn.send_reply(&["250-mail.example", "250 AUTH LOGIN"]);

        assert_eq!(conn.recv(), "AUTH LOGIN");
        conn.send(&format!("334 {}", STANDARD.encode("Username:")));
        let user = conn.recv();
        assert_eq!(STANDARD.decode(user).unwrap(), b"alice");
        conn.send(&format!("334 {}", STANDARD.encode("Password:")));
        let pass = conn.recv();
        assert_eq!(STANDARD.decode(pass).unwrap(), b"hunter2");
        conn.send("235 ok");
    });

    let endpoint = Endpoint::new(
        "127.0.0.1",
        port,
        ConnectionType::PlainText,
        TlsPolicy::strict(),
    )
    .unwrap();
    let mut session = Session::new(endpoint);
    session.connect().unwrap();
    session.probe().unwrap();

    let offered = session.extensions().get("AUTH").unwrap().to_vec();
    let mechanism = Mechanism::select(&offered, "alice", "hunter2").unwrap();
    assert_eq!(mechanism.name(), "LOGIN");
    session.authenticate(mechanism, true).unwrap();

    handle.join().unwrap();
}
