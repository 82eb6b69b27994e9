use crate::game::{LocalPlayer, LocalWorld};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{decode_frame, encode_frame, ConnId, Frame, MapLayout, Message, MAX_FRAME_BYTES};
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::interval;

/// Connection to the session server: one reliable stream for events, one
/// datagram socket for movement.
pub struct Client {
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    datagram: UdpSocket,
    conn_id: Option<ConnId>,
    map: MapLayout,
    pub world: LocalWorld,
}

impl Client {
    pub async fn connect(
        host: &str,
        reliable_port: u16,
        datagram_port: u16,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        info!("Connecting to {}:{}...", host, reliable_port);

        let stream = TcpStream::connect((host, reliable_port)).await?;
        let (read_half, write_half) = stream.into_split();

        let datagram = UdpSocket::bind("0.0.0.0:0").await?;
        datagram.connect((host, datagram_port)).await?;

        Ok(Client {
            read_half,
            write_half,
            datagram,
            conn_id: None,
            map: MapLayout::standard(),
            world: LocalWorld::new(),
        })
    }

    /// The server-assigned connection id, once registration completed
    pub fn conn_id(&self) -> Option<ConnId> {
        self.conn_id
    }

    /// Waits for the server's register frame, then echoes it on the datagram
    /// socket so the server learns our return address. Returns the assigned
    /// connection id.
    pub async fn register(&mut self) -> Result<ConnId, Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let body = read_framed(&mut self.read_half).await?;

            match decode_frame(&body)? {
                Frame::Register { conn } => {
                    info!("Registered as connection {}", conn);
                    self.conn_id = Some(conn);

                    let bytes = encode_frame(&Frame::Register { conn })?;
                    self.datagram.send(&bytes).await?;

                    return Ok(conn);
                }
                Frame::App(message) => self.world.apply(&message),
            }
        }
    }

    /// Requests a session identity for this connection. The server answers
    /// only indirectly: peers appear via join events once we are in.
    pub async fn login(&mut self, name: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.send_reliable(&Message::Login {
            name: name.to_string(),
        })
        .await
    }

    pub async fn send_reliable(
        &mut self,
        message: &Message,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let body = encode_frame(&Frame::App(message.clone()))?;
        self.write_half
            .write_all(&(body.len() as u32).to_be_bytes())
            .await?;
        self.write_half.write_all(&body).await?;
        Ok(())
    }

    /// Sends any message as one datagram
    pub async fn send_datagram(
        &self,
        message: &Message,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let bytes = encode_frame(&Frame::App(message.clone()))?;
        self.datagram.send(&bytes).await?;
        Ok(())
    }

    /// Reports our own movement state as one datagram. Quietly does nothing
    /// until registration has assigned us an id.
    pub async fn send_movement(
        &self,
        position: (f32, f32),
        linear_velocity: (f32, f32),
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(id) = self.conn_id else {
            return Ok(());
        };

        self.send_datagram(&Message::MovementState {
            id,
            position,
            linear_velocity,
        })
        .await
    }

    /// Next application message from the reliable channel
    pub async fn next_reliable(&mut self) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let body = read_framed(&mut self.read_half).await?;

            match decode_frame(&body)? {
                Frame::App(message) => return Ok(message),
                Frame::Register { conn } => {
                    debug!("Repeated register frame for connection {}", conn);
                    self.conn_id = Some(conn);
                }
            }
        }
    }

    /// Next application message from the datagram channel
    pub async fn next_datagram(&mut self) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
        let mut buffer = [0u8; 2048];

        loop {
            let len = self.datagram.recv(&mut buffer).await?;

            match decode_frame(&buffer[..len]) {
                Ok(Frame::App(message)) => return Ok(message),
                Ok(Frame::Register { .. }) => debug!("Ignoring register datagram"),
                Err(e) => warn!("Undecodable datagram: {}", e),
            }
        }
    }

    /// Autopilot loop: joins the session under `name`, then runs the strip,
    /// hopping over obstacles and reporting movement until the server goes
    /// away.
    pub async fn run(&mut self, name: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let conn = match self.conn_id {
            Some(conn) => conn,
            None => self.register().await?,
        };
        self.login(name).await?;

        let mut player = LocalPlayer::spawn(conn);
        let mut rng = StdRng::from_entropy();
        let mut movement_interval = interval(Duration::from_millis(16));
        let mut last_step = Instant::now();
        let mut buffer = [0u8; 2048];
        let mut chunk = [0u8; 2048];
        // Reliable-stream reassembly buffer. The select below may drop a
        // pending read when another branch wins, so the stream is read in
        // cancel-safe raw chunks and reframed from here.
        let mut pending: Vec<u8> = Vec::new();

        loop {
            tokio::select! {
                read = self.read_half.read(&mut chunk) => match read {
                    Ok(0) => {
                        info!("Server closed the connection");
                        break;
                    }
                    Ok(n) => {
                        pending.extend_from_slice(&chunk[..n]);
                        if !drain_reliable(&mut self.world, &mut pending) {
                            break;
                        }
                    }
                    Err(e) => {
                        info!("Server closed the connection: {}", e);
                        break;
                    }
                },

                received = self.datagram.recv(&mut buffer) => match received {
                    Ok(len) => match decode_frame(&buffer[..len]) {
                        Ok(Frame::App(message)) => self.world.apply(&message),
                        Ok(Frame::Register { .. }) => debug!("Ignoring register datagram"),
                        Err(e) => warn!("Undecodable datagram: {}", e),
                    },
                    Err(e) => error!("Error receiving datagram: {}", e),
                },

                _ = movement_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_step).as_secs_f32();
                    last_step = now;

                    if player.wants_hop(&self.map, &mut rng) {
                        player.hop();
                    }
                    player.step(dt);

                    if let Err(e) = self.send_movement(player.position, player.linear_velocity).await {
                        error!("Error sending movement: {}", e);
                    }
                },
            }
        }

        Ok(())
    }
}

/// Peels every complete frame off the reassembly buffer and applies it to
/// the local world. Returns false when the stream is corrupt and the session
/// should end.
fn drain_reliable(world: &mut LocalWorld, pending: &mut Vec<u8>) -> bool {
    loop {
        if pending.len() < 4 {
            return true;
        }

        let len = u32::from_be_bytes([pending[0], pending[1], pending[2], pending[3]]) as usize;
        if len == 0 || len > MAX_FRAME_BYTES {
            warn!("Frame length {} out of bounds", len);
            return false;
        }
        if pending.len() < 4 + len {
            return true;
        }

        let body = pending[4..4 + len].to_vec();
        pending.drain(..4 + len);

        match decode_frame(&body) {
            Ok(Frame::App(message)) => world.apply(&message),
            Ok(Frame::Register { conn }) => {
                debug!("Repeated register frame for connection {}", conn);
            }
            Err(e) => {
                warn!("Undecodable frame from server: {}", e);
                return false;
            }
        }
    }
}

/// Reads one length-prefixed frame body from the reliable stream
async fn read_framed<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len == 0 || len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {} out of bounds", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(frame: &Frame) -> Vec<u8> {
        let body = encode_frame(frame).unwrap();
        let mut bytes = (body.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&body);
        bytes
    }

    #[test]
    fn test_drain_reassembles_split_frames() {
        let mut world = LocalWorld::new();
        let mut pending = Vec::new();

        let join = framed(&Frame::App(Message::PlayerJoinLeave {
            id: 4,
            name: "ninja".to_string(),
            joined: true,
        }));
        let movement = framed(&Frame::App(Message::MovementState {
            id: 4,
            position: (200.0, 500.0),
            linear_velocity: (300.0, 0.0),
        }));

        let stream: Vec<u8> = [join.as_slice(), movement.as_slice()].concat();

        // First chunk ends three bytes into the second frame's prefix.
        let split = join.len() + 3;
        pending.extend_from_slice(&stream[..split]);
        assert!(drain_reliable(&mut world, &mut pending));
        assert_eq!(world.player_count(), 1);

        pending.extend_from_slice(&stream[split..]);
        assert!(drain_reliable(&mut world, &mut pending));
        assert_eq!(world.players[&4].position, (200.0, 500.0));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_drain_keeps_partial_frame_pending() {
        let mut world = LocalWorld::new();

        let frame = framed(&Frame::App(Message::PlayerJoinLeave {
            id: 1,
            name: "ninja".to_string(),
            joined: true,
        }));
        let mut pending = frame[..frame.len() - 1].to_vec();

        assert!(drain_reliable(&mut world, &mut pending));
        assert_eq!(world.player_count(), 0);
        assert_eq!(pending.len(), frame.len() - 1);
    }

    #[test]
    fn test_drain_rejects_corrupt_length() {
        let mut world = LocalWorld::new();

        let mut oversized = u32::MAX.to_be_bytes().to_vec();
        assert!(!drain_reliable(&mut world, &mut oversized));

        let mut zeroed = 0u32.to_be_bytes().to_vec();
        assert!(!drain_reliable(&mut world, &mut zeroed));
    }
}
