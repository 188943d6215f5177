//! TCP command listener.
//!
//! Accepts short-lived connections, reads one line, parses it as a
//! [`Command`] and hands it to the dispatcher on the listener thread. The
//! socket is non-blocking and polled, so a shutdown is noticed within one
//! poll interval. Nothing is written back.

use super::command::Command;
use super::worker::{join_with_timeout, ShutdownSignal};
use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Listener {
    addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    /// Bind `address` and start accepting. Port 0 picks a free port.
    pub fn spawn<F>(
        address: &str,
        poll: Duration,
        shutdown: ShutdownSignal,
        dispatch: F,
    ) -> std::io::Result<Self>
    where
        F: Fn(Command) + Send + 'static,
    {
        let socket = TcpListener::bind(address)?;
        socket.set_nonblocking(true)?;
        let addr = socket.local_addr()?;
        tracing::info!("Listening for commands on {}", addr);

        let handle = std::thread::Builder::new()
            .name("listener".to_string())
            .spawn(move || accept_loop(socket, poll, &shutdown, dispatch))?;

        Ok(Self {
            addr,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait up to `timeout` for the accept loop to exit.
    pub fn join(mut self, timeout: Duration) -> bool {
        match self.handle.take() {
            Some(handle) => join_with_timeout(handle, "listener", timeout),
            None => true,
        }
    }
}

fn accept_loop<F>(socket: TcpListener, poll: Duration, shutdown: &ShutdownSignal, dispatch: F)
where
    F: Fn(Command),
{
    while !shutdown.is_triggered() {
        match socket.accept() {
            Ok((stream, peer)) => match read_command(stream) {
                Ok(Some(line)) => match line.parse::<Command>() {
                    Ok(command) => {
                        tracing::debug!("Command from {}: {}", peer, command);
                        dispatch(command);
                    }
                    Err(e) => tracing::warn!("Ignoring '{}' from {}: {}", line, peer, e),
                },
                Ok(None) => tracing::trace!("Empty connection from {}", peer),
                Err(e) => tracing::warn!("Could not read from {}: {}", peer, e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if shutdown.wait_timeout(poll) {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                if shutdown.wait_timeout(poll) {
                    break;
                }
            }
        }
    }
    tracing::info!("Listener stopped");
}

fn read_command(stream: TcpStream) -> std::io::Result<Option<String>> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line)?;
    let line = line.trim();
    Ok((!line.is_empty()).then(|| line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::io::Write;

    fn send(addr: SocketAddr, line: &str) {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(line.as_bytes()).unwrap();
    }

    #[test]
    #[serial_test::serial]
    fn test_dispatches_parsed_commands() {
        let shutdown = ShutdownSignal::new();
        let (tx, rx) = unbounded();
        let listener = Listener::spawn(
            "127.0.0.1:0",
            Duration::from_millis(10),
            shutdown.clone(),
            move |cmd| {
                let _ = tx.send(cmd);
            },
        )
        .unwrap();

        send(listener.local_addr(), "nonsense here\n");
        send(listener.local_addr(), "pipelinectl_start alarm_x\n");
        let cmd = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(cmd, Command::Start("alarm_x".into()));

        shutdown.trigger();
        assert!(listener.join(Duration::from_secs(5)));
        assert!(rx.try_recv().is_err());
    }
}
