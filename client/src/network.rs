use bincode::{deserialize, serialize};
use log::{debug, warn};
use shared::{Packet, Request, Response};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Request/response client for the swarm server's UDP control plane.
pub struct ControlClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    next_request_id: u32,
    reply_timeout: Duration,
}

impl ControlClient {
    pub async fn new(
        server_addr: &str,
        reply_timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(ControlClient {
            socket,
            server_addr,
            next_request_id: 1,
            reply_timeout,
        })
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Sends one request and waits for the reply carrying the same request id.
    /// Replies to earlier requests are skipped.
    pub async fn send_request(
        &mut self,
        request: Request,
    ) -> Result<Response, Box<dyn std::error::Error>> {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);

        self.send_packet(&Packet::Request {
            request_id,
            request,
        })
        .await?;

        match timeout(self.reply_timeout, self.await_reply(request_id)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(format!(
                "no reply from {} within {:?}",
                self.server_addr, self.reply_timeout
            )
            .into()),
        }
    }

    async fn await_reply(&self, request_id: u32) -> std::io::Result<Response> {
        let mut buffer = vec![0u8; 65536];

        loop {
            let (len, addr) = self.socket.recv_from(&mut buffer).await?;
            if addr != self.server_addr {
                warn!("Ignoring datagram from {}", addr);
                continue;
            }

            match deserialize::<Packet>(&buffer[..len]) {
                Ok(Packet::Response {
                    request_id: id,
                    response,
                }) if id == request_id => return Ok(response),
                Ok(Packet::Response { request_id: id, .. }) => {
                    debug!("Skipping stale reply {}", id);
                }
                _ => warn!("Unexpected packet from {}", addr),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers every request with `Stopped`, after first sending a reply for
    /// an unrelated request id.
    async fn spawn_echo_server() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];
            while let Ok((len, from)) = socket.recv_from(&mut buffer).await {
                if let Ok(Packet::Request { request_id, .. }) = deserialize(&buffer[..len]) {
                    let stale = Packet::Response {
                        request_id: request_id + 1000,
                        response: Response::Calibrated,
                    };
                    let reply = Packet::Response {
                        request_id,
                        response: Response::Stopped,
                    };
                    socket
                        .send_to(&serialize(&stale).unwrap(), from)
                        .await
                        .unwrap();
                    socket
                        .send_to(&serialize(&reply).unwrap(), from)
                        .await
                        .unwrap();
                }
            }
        });

        addr
    }

    fn stop_request() -> Request {
        Request::Stop {
            swarm_id: "f1".to_string(),
            drone_id: "d1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_matches_reply_by_request_id() {
        let addr = spawn_echo_server().await;
        let mut client = ControlClient::new(&addr.to_string(), Duration::from_secs(2))
            .await
            .unwrap();

        let first = client.send_request(stop_request()).await.unwrap();
        let second = client.send_request(stop_request()).await.unwrap();

        assert_eq!(first, Response::Stopped);
        assert_eq!(second, Response::Stopped);
        assert_eq!(client.next_request_id, 3);
    }

    #[tokio::test]
    async fn test_times_out_without_reply() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();
        let mut client = ControlClient::new(&addr.to_string(), Duration::from_millis(100))
            .await
            .unwrap();

        let result = client.send_request(stop_request()).await;

        tokio_test::assert_err!(result);
    }

    #[tokio::test]
    async fn test_rejects_bad_address() {
        let result = ControlClient::new("not an address", Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
