//! TCP 调参服务 (单客户端, 阻塞IO + 超时轮询取消标志)
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use super::protocol::handle_line;
use crate::pipeline::{CancellationToken, SettingsPublisher};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct RemoteServer {
    listener: TcpListener,
    publisher: SettingsPublisher,
    cancel: CancellationToken,
}

impl RemoteServer {
    pub fn bind(addr: &str, publisher: SettingsPublisher, cancel: CancellationToken) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            publisher,
            cancel,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("remote".into())
            .spawn(move || self.run())
    }

    /// Serves one client at a time until cancelled.
    pub fn run(mut self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("📡 远程调参服务监听 {}", addr);
        }
        while !self.cancel.is_cancelled() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!("📡 客户端已连接: {}", peer);
                    if let Err(e) = self.serve(stream) {
                        warn!("⚠️  客户端连接出错: {}", e);
                    }
                    info!("📡 客户端已断开: {}", peer);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    warn!("⚠️  accept 失败: {}", e);
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
        info!("📡 远程调参服务已停止");
    }

    fn serve(&mut self, stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);
        let mut line = String::new();

        while !self.cancel.is_cancelled() {
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if let Some(reply) = handle_line(&line, &mut self.publisher) {
                        writer.write_all(reply.as_bytes())?;
                        writer.write_all(b"\n")?;
                        writer.flush()?;
                    }
                    line.clear();
                }
                // partial lines stay buffered in `line`
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
