#[macro_use]
extern crate log;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;
extern crate base64;
extern crate chrono;
extern crate openssl;
extern crate regex;

pub mod errors {
    error_chain! {
        foreign_links {
            Io(::std::io::Error);
            SslStack(::openssl::error::ErrorStack);
        }

        errors {
            DnsFailure(host: String) {
                description("host name resolution failed")
                display("cannot resolve host '{}'", host)
            }
            ConnectFailure(host: String, port: u16) {
                description("TCP connect failed")
                display("cannot connect to {}:{}", host, port)
            }
            TlsHandshakeFailure(detail: String) {
                description("TLS handshake failed")
                display("TLS handshake failed: {}", detail)
            }
            CommandRejected(status: String) {
                description("server rejected the command")
                display("server rejected the command: {}", status)
            }
            InvalidState(operation: &'static str, state: String) {
                description("operation not allowed in the current session state")
                display("cannot {} while {}", operation, state)
            }
            ConnectionClosed {
                description("connection closed by peer")
                display("connection closed by peer")
            }
            MissingBoundary {
                description("no payload boundary in server response")
                display("no payload boundary in server response")
            }
            EmptyAttachment {
                description("attachment decoded to zero bytes")
                display("attachment decoded to zero bytes")
            }
            Config(detail: String) {
                description("invalid configuration")
                display("invalid configuration: {}", detail)
            }
        }
    }

    impl Error {
        /// True when the session that produced this error can no longer be used.
        pub fn is_connection_loss(&self) -> bool {
            match *self.kind() {
                ErrorKind::Io(_)
                | ErrorKind::SslStack(_)
                | ErrorKind::DnsFailure(_)
                | ErrorKind::ConnectFailure(..)
                | ErrorKind::TlsHandshakeFailure(_)
                | ErrorKind::ConnectionClosed => true,
                _ => false,
            }
        }
    }
}

mod connection;
pub mod config;
pub mod html;
pub mod imap;
pub mod imapresult;
mod imapresultimpl;
pub mod mime;
pub mod smtp;
mod utils;

pub use config::Config;
pub use connection::{Connection, DEFAULT_TIMEOUT};
pub use imap::{ImapSession, ImapState};
pub use imapresult::{Attachment, Email, Mailbox};
pub use smtp::{SmtpSession, SmtpState};
