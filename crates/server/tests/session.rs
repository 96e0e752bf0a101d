//! End-to-end sessions against a real server over loopback: connect
//! handshake, snapshot broadcast and input-driven movement.

use std::time::{Duration, Instant};

use strafe::net::{
    ConnectAccept, ConnectRequest, InputMessage, Message, PeerId, SnapshotMessage, Transport,
    UnknownSenderPolicy,
};
use strafe::STARTING_HEALTH;
use strafe_server::{GameServer, ServerConfig};

struct TestClient {
    transport: Transport,
    server_peer: PeerId,
}

impl TestClient {
    fn new(server: &GameServer) -> Self {
        let mut transport = Transport::bind("127.0.0.1:0", UnknownSenderPolicy::Reject).unwrap();
        let server_peer = transport.add_peer(server.local_addr()).unwrap();
        Self {
            transport,
            server_peer,
        }
    }

    /// Pumps the server and this client until `f` returns true.
    fn pump_until<F>(&mut self, server: &mut GameServer, timeout: Duration, mut f: F) -> bool
    where
        F: FnMut(&Message) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            server.tick_once();
            self.transport.update(0.002);

            let mut done = false;
            while let Some(polled) = self.transport.poll() {
                if let Ok(message) = Message::decode(self.transport.payload(&polled)) {
                    if f(&message) {
                        done = true;
                    }
                }
                self.transport.release(polled);
            }
            if done {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn connect(&mut self, server: &mut GameServer, name: &str) -> ConnectAccept {
        self.transport
            .send_reliable(self.server_peer, &ConnectRequest::new(name))
            .unwrap();

        let mut accept = None;
        let ok = self.pump_until(server, Duration::from_secs(5), |message| {
            if let Message::ConnectAccept(a) = message {
                accept = Some(*a);
                true
            } else {
                false
            }
        });
        assert!(ok, "no connect accept within timeout");
        accept.unwrap()
    }

    fn await_snapshot<F>(&mut self, server: &mut GameServer, mut pred: F) -> SnapshotMessage
    where
        F: FnMut(&SnapshotMessage) -> bool,
    {
        let mut found = None;
        let ok = self.pump_until(server, Duration::from_secs(5), |message| {
            if let Message::Snapshot(s) = message {
                if pred(s) {
                    found = Some(*s);
                    return true;
                }
            }
            false
        });
        assert!(ok, "no matching snapshot within timeout");
        found.unwrap()
    }
}

#[test]
fn handshake_assigns_slot_and_snapshots_follow() {
    let mut server = GameServer::new("127.0.0.1:0", ServerConfig::default()).unwrap();
    let mut client = TestClient::new(&server);

    let accept = client.connect(&mut server, "p1");
    assert_eq!(accept.player_index, 0);
    assert!(accept.server_time >= 0.0);
    assert_eq!(server.player_count(), 1);

    let snapshot = client.await_snapshot(&mut server, |s| s.player_count > 0);
    let me = snapshot.players[0];
    assert_eq!(me.player_idx, 0);
    assert_eq!(me.health, STARTING_HEALTH as u8);
}

#[test]
fn second_client_gets_next_slot() {
    let mut server = GameServer::new("127.0.0.1:0", ServerConfig::default()).unwrap();

    let mut first = TestClient::new(&server);
    let mut second = TestClient::new(&server);

    assert_eq!(first.connect(&mut server, "p1").player_index, 0);
    assert_eq!(second.connect(&mut server, "p2").player_index, 1);
    assert_eq!(server.player_count(), 2);

    let snapshot = second.await_snapshot(&mut server, |s| s.player_count == 2);
    assert_eq!(snapshot.players[0].player_idx, 0);
    assert_eq!(snapshot.players[1].player_idx, 1);
}

#[test]
fn inputs_move_the_player_and_are_acknowledged() {
    let mut server = GameServer::new("127.0.0.1:0", ServerConfig::default()).unwrap();
    let mut client = TestClient::new(&server);
    client.connect(&mut server, "p1");

    let before = client.await_snapshot(&mut server, |s| s.player_count > 0);
    let start_x = before.players[0].pos_x;
    let start_z = before.players[0].pos_z;

    // Feed forward inputs a few at a time while the server ticks.
    let mut sequence = 0u32;
    for _ in 0..15 {
        for _ in 0..3 {
            sequence += 1;
            let input = InputMessage {
                sequence,
                move_x: 1.0,
                look_yaw: 0.0,
                ..Default::default()
            };
            client
                .transport
                .send_unreliable(client.server_peer, &input)
                .unwrap();
        }
        server.tick_once();
        std::thread::sleep(Duration::from_millis(5));
    }

    let after = client.await_snapshot(&mut server, |s| {
        s.player_count > 0 && s.players[0].last_processed_seq >= sequence
    });

    let moved_x = (after.players[0].pos_x - start_x).abs();
    let moved_z = (after.players[0].pos_z - start_z).abs();
    assert!(
        moved_x > 0 || moved_z > 0,
        "player did not move after {sequence} inputs"
    );
}
