//! Integration tests for the TFTP server
//!
//! These tests start the actual server and talk to it over loopback UDP.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use tempfile::{TempDir, tempdir};
use tftp::{
    BLOCK_SIZE, MAX_PACKET_SIZE, Packet, Request, TftpServer, TftpServerConfig, TransferConfig, encode_ack,
    encode_data,
};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const TRANSFER_TIMEOUT: Duration = Duration::from_millis(200);

struct TestServer {
    addr: SocketAddr,
    root: TempDir,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_server() -> TestServer {
    let root = tempdir().unwrap();
    let config = TftpServerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        root_directory: Some(root.path().to_path_buf()),
        transfer_config: TransferConfig {
            timeout: TRANSFER_TIMEOUT,
            max_attempts: 3,
            local_bind: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        },
    };

    let mut server = TftpServer::new(config);
    let addr = server.bind().await.unwrap();
    let handle = tokio::spawn(async move { server.run().await });

    TestServer { addr, root, handle }
}

async fn client() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

async fn recv(sock: &UdpSocket) -> (Packet, SocketAddr) {
    let mut buf = [0u8; MAX_PACKET_SIZE];
    let (n, src) = timeout(Duration::from_secs(2), sock.recv_from(&mut buf))
        .await
        .expect("no packet from server")
        .unwrap();
    (Packet::decode(&buf[..n]).unwrap(), src)
}

async fn assert_silent(sock: &UdpSocket, wait: Duration) {
    let mut buf = [0u8; MAX_PACKET_SIZE];
    if let Ok(received) = timeout(wait, sock.recv_from(&mut buf)).await {
        let (n, src) = received.unwrap();
        panic!("unexpected packet from {}: {:?}", src, Packet::decode(&buf[..n]));
    }
}

/// Fetch a file with a minimal in-test client
async fn download(server: SocketAddr, filename: &str) -> Vec<u8> {
    let sock = client().await;
    sock.send_to(&Request::read(filename, "octet").encode(), server)
        .await
        .unwrap();

    let mut content = Vec::new();
    let mut expected: u16 = 1;
    loop {
        let (packet, src) = recv(&sock).await;
        let Packet::Data { block, payload } = packet else {
            panic!("expected DATA, got {:?}", packet);
        };
        assert_eq!(block, expected);
        sock.send_to(&encode_ack(block), src).await.unwrap();
        content.extend_from_slice(&payload);
        if payload.len() < BLOCK_SIZE {
            return content;
        }
        expected = expected.wrapping_add(1);
    }
}

fn write_file(root: &Path, name: &str, content: &[u8]) {
    std::fs::write(root.join(name), content).unwrap();
}

#[tokio::test]
async fn test_read_1000_byte_file() {
    let server = start_server().await;
    let content: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
    write_file(server.root.path(), "thousand.bin", &content);

    let sock = client().await;
    sock.send_to(&Request::read("thousand.bin", "octet").encode(), server.addr)
        .await
        .unwrap();

    let (first, src) = recv(&sock).await;
    // Transfers run on their own port
    assert_ne!(src, server.addr);
    assert_eq!(
        first,
        Packet::Data {
            block: 1,
            payload: content[..512].to_vec()
        }
    );
    sock.send_to(&encode_ack(1), src).await.unwrap();

    let (second, _) = recv(&sock).await;
    assert_eq!(
        second,
        Packet::Data {
            block: 2,
            payload: content[512..].to_vec()
        }
    );
    sock.send_to(&encode_ack(2), src).await.unwrap();

    assert_silent(&sock, TRANSFER_TIMEOUT * 2).await;
}

#[tokio::test]
async fn test_read_exact_multiple_of_block_size() {
    let server = start_server().await;
    write_file(server.root.path(), "block.bin", &[0xAB; 512]);

    let sock = client().await;
    sock.send_to(&Request::read("block.bin", "octet").encode(), server.addr)
        .await
        .unwrap();

    let (first, src) = recv(&sock).await;
    assert_eq!(
        first,
        Packet::Data {
            block: 1,
            payload: vec![0xAB; 512]
        }
    );
    sock.send_to(&encode_ack(1), src).await.unwrap();

    let (second, _) = recv(&sock).await;
    assert_eq!(
        second,
        Packet::Data {
            block: 2,
            payload: Vec::new()
        }
    );
    sock.send_to(&encode_ack(2), src).await.unwrap();

    assert_silent(&sock, TRANSFER_TIMEOUT * 2).await;
}

#[tokio::test]
async fn test_read_empty_file() {
    let server = start_server().await;
    write_file(server.root.path(), "empty", b"");

    assert_eq!(download(server.addr, "empty").await, b"");
}

#[tokio::test]
async fn test_read_missing_file() {
    let server = start_server().await;

    let sock = client().await;
    sock.send_to(&Request::read("missing.txt", "octet").encode(), server.addr)
        .await
        .unwrap();

    let (packet, _) = recv(&sock).await;
    assert_eq!(
        packet,
        Packet::Error {
            code: 1,
            message: "File not found".to_string()
        }
    );
}

#[tokio::test]
async fn test_read_outside_root_is_access_violation() {
    let server = start_server().await;

    let sock = client().await;
    sock.send_to(&Request::read("../secret", "octet").encode(), server.addr)
        .await
        .unwrap();

    let (packet, _) = recv(&sock).await;
    assert_eq!(
        packet,
        Packet::Error {
            code: 2,
            message: "Access violation".to_string()
        }
    );
}

#[tokio::test]
async fn test_write_to_existing_file_is_refused() {
    let server = start_server().await;
    write_file(server.root.path(), "exists.txt", b"original contents");

    let sock = client().await;
    sock.send_to(&Request::write("exists.txt", "octet").encode(), server.addr)
        .await
        .unwrap();

    let (packet, _) = recv(&sock).await;
    assert_eq!(
        packet,
        Packet::Error {
            code: 6,
            message: "File already exists.".to_string()
        }
    );

    let stored = std::fs::read(server.root.path().join("exists.txt")).unwrap();
    assert_eq!(stored, b"original contents");
}

#[tokio::test]
async fn test_write_then_read_back() {
    let server = start_server().await;
    let content: Vec<u8> = (0..1300u32).map(|i| (i % 253) as u8).collect();

    let sock = client().await;
    sock.send_to(&Request::write("upload.bin", "octet").encode(), server.addr)
        .await
        .unwrap();

    let (ack, src) = recv(&sock).await;
    assert_eq!(ack, Packet::Ack { block: 0 });

    for (index, chunk) in content.chunks(BLOCK_SIZE).enumerate() {
        let block = index as u16 + 1;
        sock.send_to(&encode_data(block, chunk), src).await.unwrap();
        assert_eq!(recv(&sock).await.0, Packet::Ack { block });
    }

    // The final ACK is sent once and the transfer is over
    assert_silent(&sock, TRANSFER_TIMEOUT * 2).await;

    assert_eq!(std::fs::read(server.root.path().join("upload.bin")).unwrap(), content);
    assert_eq!(download(server.addr, "upload.bin").await, content);
}

#[tokio::test]
async fn test_write_netascii_normalizes_line_endings() {
    let server = start_server().await;

    let sock = client().await;
    sock.send_to(&Request::write("notes.txt", "netascii").encode(), server.addr)
        .await
        .unwrap();

    let (_, src) = recv(&sock).await;
    sock.send_to(&encode_data(1, b"line one\r\nline two\r\0end\r\n"), src)
        .await
        .unwrap();
    assert_eq!(recv(&sock).await.0, Packet::Ack { block: 1 });

    // Give the transfer a moment to close the file
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stored = std::fs::read(server.root.path().join("notes.txt")).unwrap();
    assert_eq!(stored, b"line one\nline two\rend\n");
}

#[tokio::test]
async fn test_write_timeout_keeps_received_data() {
    let server = start_server().await;

    let sock = client().await;
    sock.send_to(&Request::write("partial.bin", "octet").encode(), server.addr)
        .await
        .unwrap();

    let (_, src) = recv(&sock).await;
    sock.send_to(&encode_data(1, &[0x5A; BLOCK_SIZE]), src).await.unwrap();

    // ACK(1) is sent once and retransmitted twice, then the transfer gives up
    for _ in 0..3 {
        assert_eq!(recv(&sock).await.0, Packet::Ack { block: 1 });
    }
    assert_silent(&sock, TRANSFER_TIMEOUT * 3).await;

    let stored = std::fs::read(server.root.path().join("partial.bin")).unwrap();
    assert_eq!(stored, vec![0x5A; BLOCK_SIZE]);
}

#[tokio::test]
async fn test_short_datagram_is_ignored() {
    let server = start_server().await;
    write_file(server.root.path(), "after.txt", b"still serving");

    let sock = client().await;
    sock.send_to(&[0, 1, b'x'], server.addr).await.unwrap();
    assert_silent(&sock, Duration::from_millis(200)).await;

    // Stray ACKs and unknown opcodes at the listening port get no answer either
    sock.send_to(&encode_ack(1), server.addr).await.unwrap();
    sock.send_to(&[0, 9, 0, 0], server.addr).await.unwrap();
    assert_silent(&sock, Duration::from_millis(200)).await;

    assert_eq!(download(server.addr, "after.txt").await, b"still serving");
}

#[tokio::test]
async fn test_concurrent_transfers() {
    let server = start_server().await;
    for i in 0..5 {
        let content = vec![i as u8; 600 + i * 100];
        write_file(server.root.path(), &format!("file{i}.bin"), &content);
    }

    let mut handles = Vec::new();
    for i in 0..5 {
        let addr = server.addr;
        handles.push(tokio::spawn(async move { download(addr, &format!("file{i}.bin")).await }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let content = handle.await.unwrap();
        assert_eq!(content, vec![i as u8; 600 + i * 100]);
    }
}

#[tokio::test]
async fn test_stalled_peer_does_not_block_others() {
    let server = start_server().await;
    write_file(server.root.path(), "stalled.bin", &[1; 2048]);
    write_file(server.root.path(), "quick.txt", b"quick");

    // Start a transfer and never acknowledge it
    let stalled = client().await;
    stalled
        .send_to(&Request::read("stalled.bin", "octet").encode(), server.addr)
        .await
        .unwrap();
    let _ = recv(&stalled).await;

    assert_eq!(download(server.addr, "quick.txt").await, b"quick");
}
