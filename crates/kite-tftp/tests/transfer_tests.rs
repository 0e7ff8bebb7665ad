//! End-to-end transfer scenarios over loopback sockets: full
//! server/client sessions, scripted peers that count and inspect packets,
//! spoofed datagrams, and abuse of the request port.
//!
//! The engine itself carries no timeouts, so every wait here is bounded
//! with `tokio::time::timeout`.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use kite_tftp::client::{GetOutcome, TftpClient};
use kite_tftp::endpoint::{EPHEMERAL_MIN, Endpoint};
use kite_tftp::fblock::BlockFile;
use kite_tftp::packet::{ErrorCode, Packet, TransferMode};
use kite_tftp::server::{ServerConfig, TftpServer};
use kite_tftp::{DATA_BLOCK_SIZE, TftpError, transfer};
use tokio::net::UdpSocket;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const SILENCE: Duration = Duration::from_millis(300);

async fn start_server(root: &Path) -> SocketAddr {
    let server = TftpServer::bind(ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        root_dir: root.to_path_buf(),
        audit_enabled: false,
    })
    .await
    .expect("bind server");
    let addr = server.local_addr().expect("server addr");
    tokio::spawn(server.serve());
    addr
}

fn client_for(server: SocketAddr, mode: TransferMode) -> TftpClient {
    let mut client = TftpClient::new(server);
    client.mode = mode;
    client
}

async fn recv_packet(socket: &UdpSocket) -> (Packet, SocketAddr) {
    let mut buf = [0u8; 600];
    let (len, from) = timeout(WAIT, socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for a packet")
        .expect("recv");
    (Packet::decode(&buf[..len]).expect("decode"), from)
}

#[tokio::test]
async fn tiny_octet_transfer() {
    let root = tempfile::tempdir().unwrap();
    tokio::fs::write(root.path().join("hello.txt"), b"Hello\n")
        .await
        .unwrap();
    let server = start_server(root.path()).await;

    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("out");
    let client = client_for(server, TransferMode::Octet);

    let outcome = timeout(WAIT, client.get("hello.txt", &out))
        .await
        .unwrap()
        .unwrap();
    match outcome {
        GetOutcome::Complete(report) => {
            assert_eq!(report.bytes, 6);
            assert_eq!(report.blocks, 1);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(tokio::fs::read(&out).await.unwrap(), b"Hello\n");
}

#[tokio::test]
async fn block_boundary_transfer() {
    let root = tempfile::tempdir().unwrap();
    let content = vec![0x41u8; 1024];
    tokio::fs::write(root.path().join("blocks.bin"), &content)
        .await
        .unwrap();
    let server = start_server(root.path()).await;

    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("out");
    let client = client_for(server, TransferMode::Octet);

    let outcome = timeout(WAIT, client.get("blocks.bin", &out))
        .await
        .unwrap()
        .unwrap();
    match outcome {
        GetOutcome::Complete(report) => {
            assert_eq!(report.bytes, 1024);
            assert_eq!(report.blocks, 3);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(tokio::fs::read(&out).await.unwrap(), content);
}

#[tokio::test]
async fn empty_file_transfer() {
    let root = tempfile::tempdir().unwrap();
    tokio::fs::write(root.path().join("empty"), b"").await.unwrap();
    let server = start_server(root.path()).await;

    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("out");
    let client = client_for(server, TransferMode::Octet);

    let outcome = timeout(WAIT, client.get("empty", &out))
        .await
        .unwrap()
        .unwrap();
    match outcome {
        GetOutcome::Complete(report) => {
            assert_eq!(report.bytes, 0);
            assert_eq!(report.blocks, 1);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(tokio::fs::read(&out).await.unwrap(), b"");
}

#[tokio::test]
async fn missing_file_is_reported_not_found() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path()).await;

    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("out");
    let client = client_for(server, TransferMode::Octet);

    let outcome = timeout(WAIT, client.get("missing.txt", &out))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, GetOutcome::NotFound));
    // The destination must not be left behind.
    assert!(!out.exists());
}

#[tokio::test]
async fn netascii_transfer_round_trip() {
    let root = tempfile::tempdir().unwrap();
    tokio::fs::write(root.path().join("text"), b"A\nB\rC")
        .await
        .unwrap();
    let server = start_server(root.path()).await;

    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("out");
    let client = client_for(server, TransferMode::Netascii);

    let outcome = timeout(WAIT, client.get("text", &out))
        .await
        .unwrap()
        .unwrap();
    match outcome {
        GetOutcome::Complete(report) => assert_eq!(report.bytes, 7),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(tokio::fs::read(&out).await.unwrap(), b"A\nB\rC");
    // The intermediate wire-form file is removed after conversion.
    assert!(!PathBuf::from(format!("{}.tmp", out.display())).exists());
}

#[tokio::test]
async fn netascii_wire_bytes_are_translated() {
    let root = tempfile::tempdir().unwrap();
    tokio::fs::write(root.path().join("text"), b"A\nB\rC")
        .await
        .unwrap();
    let server = start_server(root.path()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let rrq = Packet::Rrq {
        filename: "text".to_string(),
        mode: TransferMode::Netascii,
    };
    socket.send_to(&rrq.to_bytes(), server).await.unwrap();

    let (packet, session) = recv_packet(&socket).await;
    match packet {
        Packet::Data { block: 1, payload } => assert_eq!(payload, b"A\r\nB\r\0C"),
        other => panic!("expected DATA(1), got {:?}", other),
    }
    socket
        .send_to(&Packet::Ack { block: 1 }.to_bytes(), session)
        .await
        .unwrap();
}

#[tokio::test]
async fn sender_emits_one_data_packet_per_block_plus_final() {
    let root = tempfile::tempdir().unwrap();
    tokio::fs::write(root.path().join("blocks.bin"), vec![0x41u8; 1024])
        .await
        .unwrap();
    let server = start_server(root.path()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let rrq = Packet::Rrq {
        filename: "blocks.bin".to_string(),
        mode: TransferMode::Octet,
    };
    socket.send_to(&rrq.to_bytes(), server).await.unwrap();

    let mut sizes = Vec::new();
    loop {
        let (packet, session) = recv_packet(&socket).await;
        let Packet::Data { block, payload } = packet else {
            panic!("expected DATA, got {:?}", packet);
        };
        assert_eq!(block as usize, sizes.len() + 1);
        sizes.push(payload.len());
        socket
            .send_to(&Packet::Ack { block }.to_bytes(), session)
            .await
            .unwrap();
        if payload.len() < DATA_BLOCK_SIZE {
            break;
        }
    }
    // floor(1024 / 512) + 1 packets, the last one empty.
    assert_eq!(sizes, vec![512, 512, 0]);
}

#[tokio::test]
async fn receiver_ignores_spoofed_data() {
    let endpoint = Endpoint::bind_ephemeral().await.unwrap();
    let port = endpoint.local_addr().unwrap().port();
    let dst: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let server_ip: IpAddr = "127.0.0.1".parse().unwrap();

    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("out");
    let out_task = out.clone();
    let receiver = tokio::spawn(async move {
        let mut file = BlockFile::open_write(&out_task, DATA_BLOCK_SIZE).await.unwrap();
        let result = transfer::receive_file(&endpoint, server_ip, &mut file).await;
        file.close().await.unwrap();
        result
    });

    let real = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let attacker = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // The first datagram binds the peer transfer ID to the real sender.
    let data1 = Packet::Data {
        block: 1,
        payload: vec![0x42; 512],
    };
    real.send_to(&data1.to_bytes(), dst).await.unwrap();
    let (ack, _) = recv_packet(&real).await;
    assert_eq!(ack, Packet::Ack { block: 1 });

    // A well-formed DATA with the expected block number, but from a
    // different port: it must be dropped without an ACK.
    let forged = Packet::Data {
        block: 2,
        payload: b"evil".to_vec(),
    };
    attacker.send_to(&forged.to_bytes(), dst).await.unwrap();
    let mut buf = [0u8; 600];
    assert!(
        timeout(SILENCE, attacker.recv_from(&mut buf)).await.is_err(),
        "spoofed datagram must not be acknowledged"
    );

    // The real peer finishes the transfer as if nothing happened.
    let data2 = Packet::Data {
        block: 2,
        payload: b"ok!".to_vec(),
    };
    real.send_to(&data2.to_bytes(), dst).await.unwrap();
    let (ack, _) = recv_packet(&real).await;
    assert_eq!(ack, Packet::Ack { block: 2 });

    timeout(WAIT, receiver).await.unwrap().unwrap().unwrap();

    let mut expected = vec![0x42u8; 512];
    expected.extend_from_slice(b"ok!");
    assert_eq!(tokio::fs::read(&out).await.unwrap(), expected);
}

#[tokio::test]
async fn sender_ignores_spoofed_ack() {
    let root = tempfile::tempdir().unwrap();
    let path = root.path().join("small");
    tokio::fs::write(&path, b"tiny").await.unwrap();

    let endpoint = Endpoint::bind_ephemeral().await.unwrap();
    let real = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let attacker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer = real.local_addr().unwrap();

    let sender = tokio::spawn(async move {
        let mut file = BlockFile::open_read(&path, DATA_BLOCK_SIZE).await.unwrap();
        transfer::send_file(&endpoint, peer, &mut file).await
    });

    let (packet, session) = recv_packet(&real).await;
    assert!(matches!(packet, Packet::Data { block: 1, .. }));

    // An ACK with a wrong block number from a wrong source: were it
    // accepted, the sender would fail with an out-of-order error.
    attacker
        .send_to(&Packet::Ack { block: 99 }.to_bytes(), session)
        .await
        .unwrap();
    tokio::time::sleep(SILENCE).await;

    real.send_to(&Packet::Ack { block: 1 }.to_bytes(), session)
        .await
        .unwrap();
    timeout(WAIT, sender).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn data_to_request_port_is_illegal() {
    let root = tempfile::tempdir().unwrap();
    tokio::fs::write(root.path().join("hello.txt"), b"Hello\n")
        .await
        .unwrap();
    let server = start_server(root.path()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let stray = Packet::Data {
        block: 1,
        payload: b"x".to_vec(),
    };
    socket.send_to(&stray.to_bytes(), server).await.unwrap();

    let (packet, _) = recv_packet(&socket).await;
    assert_eq!(
        packet,
        Packet::Error {
            code: ErrorCode::IllegalOperation,
            message: "Illegal TFTP operation.".to_string(),
        }
    );

    // The listener must still be serving.
    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("out");
    let client = client_for(server, TransferMode::Octet);
    let outcome = timeout(WAIT, client.get("hello.txt", &out))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, GetOutcome::Complete(_)));
}

#[tokio::test]
async fn wrq_is_rejected_as_illegal() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let wrq = Packet::Wrq {
        filename: "upload.bin".to_string(),
        mode: TransferMode::Octet,
    };
    socket.send_to(&wrq.to_bytes(), server).await.unwrap();

    let (packet, _) = recv_packet(&socket).await;
    assert_eq!(
        packet,
        Packet::Error {
            code: ErrorCode::IllegalOperation,
            message: "Illegal TFTP operation.".to_string(),
        }
    );
}

#[tokio::test]
async fn malformed_rrq_is_answered_with_error_zero() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    // Opcode 1, but the obsolete mail mode is not a valid mode here.
    socket
        .send_to(b"\x00\x01foo\x00mail\x00", server)
        .await
        .unwrap();

    let (packet, _) = recv_packet(&socket).await;
    assert_eq!(
        packet,
        Packet::Error {
            code: ErrorCode::NotDefined,
            message: "Malformed RRQ packet.".to_string(),
        }
    );
}

#[tokio::test]
async fn path_escape_is_an_access_violation() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path()).await;

    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("out");
    let client = client_for(server, TransferMode::Octet);

    let result = timeout(WAIT, client.get("../escape.txt", &out))
        .await
        .unwrap();
    match result {
        Err(TftpError::Peer { code, message }) => {
            assert_eq!(code, ErrorCode::IllegalOperation);
            assert_eq!(message, "Access violation.");
        }
        other => panic!("expected a peer error, got {:?}", other),
    }
}

#[tokio::test]
async fn ephemeral_ports_come_from_the_dynamic_range() {
    let endpoint = Endpoint::bind_ephemeral().await.unwrap();
    assert!(endpoint.local_addr().unwrap().port() >= EPHEMERAL_MIN);
}
