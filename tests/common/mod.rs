#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// One step of a scripted server conversation.
pub enum Step {
    Send(&'static str),
    /// Read one line and compare it, CRLF stripped.
    Expect(&'static str),
    /// Read lines up to and including a lone `.`.
    ReadData,
}

/// Serve `script` to the first client on a loopback port. The handle yields
/// every line the client sent.
pub fn serve(script: Vec<Step>) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (sock, _) = listener.accept().unwrap();
        sock.set_read_timeout(Some(TIMEOUT)).unwrap();
        let mut writer = sock.try_clone().unwrap();
        let mut reader = BufReader::new(sock);
        let mut transcript = Vec::new();

        for step in script {
            match step {
                Step::Send(text) => writer.write_all(text.as_bytes()).unwrap(),
                Step::Expect(expected) => {
                    let line = read_line(&mut reader);
                    assert_eq!(line, expected);
                    transcript.push(line);
                }
                Step::ReadData => loop {
                    let line = read_line(&mut reader);
                    let done = line == ".";
                    transcript.push(line);
                    if done {
                        break;
                    }
                },
            }
        }
        transcript
    });
    (port, handle)
}

fn read_line<R: BufRead>(reader: &mut R) -> String {
    let mut line = String::new();
    let n = reader.read_line(&mut line).unwrap();
    assert!(n > 0, "client closed the connection");
    line.trim_end_matches(&['\r', '\n'][..]).to_string()
}
