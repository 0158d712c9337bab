use std::net::UdpSocket;

/// Guesses the LAN address of this machine.
///
/// Connecting a UDP socket sends nothing; it only asks the OS which
/// interface would route to a public address. Falls back to `127.0.0.1`.
pub fn guess_local_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}
