use log::debug;
use mailin_embedded::{response, Handler, Response, Server, SslConfig};
use std::{
    net::{IpAddr, TcpListener},
    sync::Once,
};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    Mutex,
};

pub const SMTP_PORT: u16 = 4567;
pub const POISONED_SMTP_PORT: u16 = 4568;

/// Binds before returning so that clients may connect as soon as this returns.
fn spawn_server<H: Handler + Clone + Send + 'static>(handler: H, port: u16) {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .unwrap_or_else(|error| panic!("Could not bind SMTP port {port}: {error}"));
    let mut server = Server::new(handler);
    server
        .with_name("contact-form.test")
        .with_tcp_listener(listener)
        .with_ssl(SslConfig::None)
        .unwrap_or_else(|error| panic!("Could not configure SMTP server: {error}"));
    std::thread::spawn(move || {
        if let Err(error) = server.serve() {
            debug!("SMTP server on {port} stopped: {error}");
        }
    });
}

#[derive(Clone)]
struct MailRecorder {
    buffer: Vec<u8>,
    mails: UnboundedSender<String>,
}

impl Handler for MailRecorder {
    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.buffer.extend_from_slice(buf);
        Ok(())
    }

    fn data_end(&mut self) -> Response {
        let mail = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        debug!("Received mail:\n{mail}");
        let _ = self.mails.send(mail);
        response::OK
    }
}

/// An SMTP server on a fixed port which accepts every mail and queues it for the test.
///
/// The server runs until the test process exits, so keep one instance per process.
pub struct FakeSmtpServer {
    mails: Mutex<UnboundedReceiver<String>>,
}

impl FakeSmtpServer {
    pub fn new(port: u16) -> Self {
        let (sender, receiver) = unbounded_channel();
        spawn_server(
            MailRecorder {
                buffer: Vec::new(),
                mails: sender,
            },
            port,
        );
        Self {
            mails: Mutex::new(receiver),
        }
    }

    /// Waits for the next mail the server accepts.
    pub async fn next_mail(&self) -> Option<String> {
        self.mails.lock().await.recv().await
    }

    /// Drops mails left over from earlier tests.
    pub async fn flush(&self) {
        let mut mails = self.mails.lock().await;
        while mails.try_recv().is_ok() {}
    }
}

#[derive(Clone)]
struct RejectingHandler;

impl Handler for RejectingHandler {
    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> Response {
        response::INTERNAL_ERROR
    }
}

/// Starts a server on [`POISONED_SMTP_PORT`] which refuses every sender. Only the first call
/// in a process starts it.
pub fn start_poisoned_smtp_server() {
    static STARTED: Once = Once::new();
    STARTED.call_once(|| spawn_server(RejectingHandler, POISONED_SMTP_PORT));
}
